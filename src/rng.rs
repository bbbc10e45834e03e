//! Randomness seam
//!
//! The ping tick scans each link's peer map starting at a random offset
//! (see the controller's ping tick). That policy needs real entropy in
//! production and a scripted sequence in tests.

use std::sync::Mutex;

use rand::RngCore;

/// A source of uniform `u32`s in `[0, bound)`.
pub trait Rng: Send + Sync {
    fn next_below(&self, bound: usize) -> usize;
}

/// Thread-local OS randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRng;

impl Rng for SystemRng {
    fn next_below(&self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (rand::thread_rng().next_u32() as usize) % bound
    }
}

/// A scripted sequence of offsets for deterministic tests. Wraps around
/// once exhausted so long-running scenario tests don't need to script
/// every tick.
pub struct FakeRng {
    script: Mutex<Vec<usize>>,
    cursor: Mutex<usize>,
}

impl FakeRng {
    pub fn new(script: Vec<usize>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: Mutex::new(0),
        }
    }
}

impl Rng for FakeRng {
    fn next_below(&self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        let script = self.script.lock().unwrap();
        if script.is_empty() {
            return 0;
        }
        let mut cursor = self.cursor.lock().unwrap();
        let value = script[*cursor % script.len()] % bound;
        *cursor += 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_rng_cycles_script() {
        let rng = FakeRng::new(vec![0, 3, 7]);
        assert_eq!(rng.next_below(10), 0);
        assert_eq!(rng.next_below(10), 3);
        assert_eq!(rng.next_below(10), 7);
        assert_eq!(rng.next_below(10), 0);
    }

    #[test]
    fn fake_rng_wraps_bound() {
        let rng = FakeRng::new(vec![5]);
        assert_eq!(rng.next_below(3), 2);
    }
}
