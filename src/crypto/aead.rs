//! AEAD primitives for the peer transport and handshake
//!
//! ChaCha20-Poly1305 for transport/handshake encryption.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::error::CryptoError;

/// Authentication tag length
pub const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305 key length
pub const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 12;

/// Encrypt plaintext using ChaCha20-Poly1305.
///
/// The counter is a 64-bit value placed in the last 8 bytes of the nonce,
/// little-endian, with the leading 4 bytes zeroed.
pub fn encrypt(
    key: &[u8; KEY_LEN],
    counter: u64,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes[4..12].copy_from_slice(&counter.to_le_bytes());
    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encryption)
}

/// Decrypt ciphertext using ChaCha20-Poly1305.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    counter: u64,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes[4..12].copy_from_slice(&counter.to_le_bytes());
    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0u8; 32];
        let plaintext = b"hello mesh";
        let aad = b"additional data";
        let counter = 42u64;

        let ciphertext = encrypt(&key, counter, plaintext, aad).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);

        let decrypted = decrypt(&key, counter, &ciphertext, aad).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let key = [0u8; 32];
        let wrong_key = [1u8; 32];
        let plaintext = b"hello mesh";
        let aad = b"additional data";
        let counter = 42u64;

        let ciphertext = encrypt(&key, counter, plaintext, aad).unwrap();
        assert!(decrypt(&wrong_key, counter, &ciphertext, aad).is_err());
    }

    #[test]
    fn test_decrypt_wrong_counter() {
        let key = [0u8; 32];
        let plaintext = b"hello mesh";
        let aad = b"additional data";

        let ciphertext = encrypt(&key, 42, plaintext, aad).unwrap();
        assert!(decrypt(&key, 43, &ciphertext, aad).is_err());
    }

    #[test]
    fn test_decrypt_wrong_aad() {
        let key = [0u8; 32];
        let plaintext = b"hello mesh";
        let counter = 42u64;

        let ciphertext = encrypt(&key, counter, plaintext, b"correct aad").unwrap();
        assert!(decrypt(&key, counter, &ciphertext, b"wrong aad").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [0u8; 32];
        let aad = b"";
        let counter = 0u64;

        let ciphertext = encrypt(&key, counter, &[], aad).unwrap();
        assert_eq!(ciphertext.len(), TAG_LEN);

        let decrypted = decrypt(&key, counter, &ciphertext, aad).unwrap();
        assert!(decrypted.is_empty());
    }
}
