//! BLAKE2s hashing, HMAC, and HKDF primitives for the handshake.

use blake2::{
    digest::{consts::U16, FixedOutput, Mac as MacTrait, Update},
    Blake2s256, Blake2sMac, Digest,
};
use hmac::SimpleHmac;

type HmacBlake2s = SimpleHmac<Blake2s256>;

/// Length of BLAKE2s-256 hash output
pub const HASH_LEN: usize = 32;

/// Length of BLAKE2s MAC output
pub const MAC_LEN: usize = 16;

/// BLAKE2s-256 hash of a single input
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// BLAKE2s-256 hash of two concatenated inputs: HASH(a || b)
pub fn hash_two(a: &[u8], b: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    Digest::update(&mut hasher, a);
    Digest::update(&mut hasher, b);
    hasher.finalize().into()
}

/// BLAKE2s keyed MAC (16 bytes output) with a 32-byte key
pub fn mac(key: &[u8; HASH_LEN], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = Blake2sMac::<U16>::new_from_slice(key).expect("valid key length");
    MacTrait::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// HMAC-BLAKE2s, standard RFC 2104 construction
pub fn hmac(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacBlake2s::new_from_slice(key).expect("HMAC accepts any key length");
    Update::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// KDF1: single-output key derivation
pub fn kdf1(key: &[u8; HASH_LEN], input: &[u8]) -> [u8; HASH_LEN] {
    let temp = hmac(key, input);
    hmac(&temp, &[0x01])
}

/// KDF2: two-output key derivation
pub fn kdf2(key: &[u8; HASH_LEN], input: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    let temp = hmac(key, input);

    let t1 = hmac(&temp, &[0x01]);

    let mut t2_input = [0u8; HASH_LEN + 1];
    t2_input[..HASH_LEN].copy_from_slice(&t1);
    t2_input[HASH_LEN] = 0x02;
    let t2 = hmac(&temp, &t2_input);

    (t1, t2)
}

/// KDF3: three-output key derivation
pub fn kdf3(key: &[u8; HASH_LEN], input: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN], [u8; HASH_LEN]) {
    let temp = hmac(key, input);

    let t1 = hmac(&temp, &[0x01]);

    let mut t2_input = [0u8; HASH_LEN + 1];
    t2_input[..HASH_LEN].copy_from_slice(&t1);
    t2_input[HASH_LEN] = 0x02;
    let t2 = hmac(&temp, &t2_input);

    let mut t3_input = [0u8; HASH_LEN + 1];
    t3_input[..HASH_LEN].copy_from_slice(&t2);
    t3_input[HASH_LEN] = 0x03;
    let t3 = hmac(&temp, &t3_input);

    (t1, t2, t3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_two() {
        let a = b"hello";
        let b = b"world";

        let result1 = hash_two(a, b);

        let mut combined = Vec::new();
        combined.extend_from_slice(a);
        combined.extend_from_slice(b);
        let result2 = hash(&combined);

        assert_eq!(result1, result2);
    }

    #[test]
    fn test_mac_length() {
        let key = [0u8; 32];
        let result = mac(&key, b"test data");
        assert_eq!(result.len(), 16);
    }

    #[test]
    fn test_kdf_outputs() {
        let key = [0u8; 32];
        let input = b"test input";

        let k1 = kdf1(&key, input);
        assert_eq!(k1.len(), 32);

        let (k2a, k2b) = kdf2(&key, input);
        assert_ne!(k2a, k2b);

        let (k3a, k3b, k3c) = kdf3(&key, input);
        assert_ne!(k3a, k3b);
        assert_ne!(k3b, k3c);
    }
}
