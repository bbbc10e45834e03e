//! Transport-phase encryption for peer data traffic
//!
//! Wraps/unwraps switch packets using ChaCha20-Poly1305 with a monotonic
//! send counter and a sliding replay window on receive.

use crate::crypto::aead;
use crate::error::{CryptoError, MeshError, ProtocolError};
use crate::protocol::messages::TransportHeader;

/// Maximum counter value before a session must rekey
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX - 8192;

/// Encrypt a switch packet for transport.
pub fn encrypt_packet(
    key: &[u8; 32],
    counter: u64,
    receiver_index: u32,
    plaintext: &[u8],
) -> Result<Vec<u8>, MeshError> {
    if counter >= REJECT_AFTER_MESSAGES {
        return Err(ProtocolError::HandshakeFailed {
            reason: "transport counter exhausted, session must rekey".into(),
        }
        .into());
    }

    let ciphertext = aead::encrypt(key, counter, plaintext, &[])?;

    Ok(TransportHeader::build_message(
        receiver_index,
        counter,
        &ciphertext,
    ))
}

/// Decrypt a transport packet, returning (counter, plaintext).
pub fn decrypt_packet(key: &[u8; 32], packet: &[u8]) -> Result<(u64, Vec<u8>), MeshError> {
    if packet.len() < TransportHeader::MIN_SIZE {
        return Err(ProtocolError::InvalidMessageLength {
            expected: TransportHeader::MIN_SIZE,
            got: packet.len(),
        }
        .into());
    }

    let header = TransportHeader::from_bytes(packet)?;
    let ciphertext = TransportHeader::payload(packet);

    if ciphertext.len() < 16 {
        return Err(CryptoError::Decryption.into());
    }

    let plaintext = aead::decrypt(key, header.counter, ciphertext, &[])?;

    Ok((header.counter, plaintext))
}

/// Anti-replay window for tracking received packet counters
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    highest: u64,
    bitmap: u128,
    duplicates: u64,
    out_of_range: u64,
}

const WINDOW_SIZE: u64 = 128;

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self {
            highest: 0,
            bitmap: 0,
            duplicates: 0,
            out_of_range: 0,
        }
    }

    /// Check if a counter is valid (not a replay) and update the window.
    pub fn check_and_update(&mut self, counter: u64) -> bool {
        if self.highest == 0 && self.bitmap == 0 {
            self.highest = counter;
            self.bitmap = 1;
            return true;
        }

        if counter > self.highest {
            let shift = counter - self.highest;
            if shift >= WINDOW_SIZE {
                self.bitmap = 1;
            } else {
                self.bitmap = (self.bitmap << shift) | 1;
            }
            self.highest = counter;
            true
        } else {
            let diff = self.highest - counter;

            if diff >= WINDOW_SIZE {
                self.out_of_range += 1;
                false
            } else {
                let bit = 1u128 << diff;
                if self.bitmap & bit != 0 {
                    self.duplicates += 1;
                    false
                } else {
                    self.bitmap |= bit;
                    true
                }
            }
        }
    }

    /// Counters rejected as duplicates, surfaced via `getReplayProtector`.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Counters rejected as too far behind the window, surfaced via `getReplayProtector`.
    pub fn received_out_of_range(&self) -> u64 {
        self.out_of_range
    }
}

/// Per-direction AEAD state for an established session
#[derive(Debug, Clone)]
pub struct TransportState {
    pub sending_key: [u8; 32],
    pub receiving_key: [u8; 32],
    pub sending_counter: u64,
    pub replay_window: ReplayWindow,
}

impl TransportState {
    pub fn new(sending_key: [u8; 32], receiving_key: [u8; 32]) -> Self {
        Self {
            sending_key,
            receiving_key,
            sending_counter: 0,
            replay_window: ReplayWindow::new(),
        }
    }

    pub fn encrypt(&mut self, receiver_index: u32, plaintext: &[u8]) -> Result<Vec<u8>, MeshError> {
        let counter = self.sending_counter;
        self.sending_counter += 1;
        encrypt_packet(&self.sending_key, counter, receiver_index, plaintext)
    }

    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>, MeshError> {
        let (counter, plaintext) = decrypt_packet(&self.receiving_key, packet)?;

        if !self.replay_window.check_and_update(counter) {
            return Err(ProtocolError::ReplayDetected { counter }.into());
        }

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; 32];
        let plaintext = b"hello mesh";

        let encrypted = encrypt_packet(&key, 0, 12345, plaintext).unwrap();

        assert_eq!(encrypted[0], 4);
        let receiver_index = u32::from_le_bytes(encrypted[4..8].try_into().unwrap());
        assert_eq!(receiver_index, 12345);

        let (counter, decrypted) = decrypt_packet(&key, &encrypted).unwrap();
        assert_eq!(counter, 0);
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_replay_window_basic() {
        let mut window = ReplayWindow::new();

        assert!(window.check_and_update(0));
        assert!(!window.check_and_update(0));

        assert!(window.check_and_update(1));
        assert!(window.check_and_update(5));
        assert!(window.check_and_update(10));

        assert!(!window.check_and_update(5));
        assert!(!window.check_and_update(10));
        assert_eq!(window.duplicates(), 3);
    }

    #[test]
    fn test_replay_window_outside_window() {
        let mut window = ReplayWindow::new();

        assert!(window.check_and_update(200));
        assert!(!window.check_and_update(0));
        assert_eq!(window.received_out_of_range(), 1);
        assert!(window.check_and_update(200 - WINDOW_SIZE + 1));
    }

    #[test]
    fn test_transport_state() {
        let mut state = TransportState::new([1u8; 32], [2u8; 32]);

        let msg1 = state.encrypt(100, b"packet 1").unwrap();
        let msg2 = state.encrypt(100, b"packet 2").unwrap();
        assert_eq!(state.sending_counter, 2);

        let mut recv_state = TransportState::new([2u8; 32], [1u8; 32]);

        assert_eq!(recv_state.decrypt(&msg1).unwrap(), b"packet 1");
        assert_eq!(recv_state.decrypt(&msg2).unwrap(), b"packet 2");
        assert!(recv_state.decrypt(&msg1).is_err());
    }
}
