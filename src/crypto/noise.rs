//! Noise IKpsk2 protocol state machine
//!
//! Implements the Noise protocol pattern used for the peer handshake.
//! Pattern: Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s

use super::{aead, blake2s};
use crate::error::CryptoError;

/// Noise protocol construction string
pub const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";

/// Protocol identifier mixed into the initial hash
pub const IDENTIFIER: &[u8] = b"meshlink peer handshake v1";

/// Label for MAC1 key derivation
pub const LABEL_MAC1: &[u8] = b"mac1----";

/// Hash length (also chaining key length)
pub const HASH_LEN: usize = 32;

/// Noise protocol handshake state
#[derive(Clone)]
pub struct HandshakeState {
    /// Chaining key for key derivation
    pub chaining_key: [u8; HASH_LEN],
    /// Hash accumulator
    pub hash: [u8; HASH_LEN],
}

impl HandshakeState {
    /// Initialize the chaining key from the construction string
    pub fn initial_chain_key() -> [u8; HASH_LEN] {
        blake2s::hash(CONSTRUCTION)
    }

    /// Initialize the hash chain with the responder's static public key
    ///
    /// h = HASH(HASH(CONSTRUCTION) || IDENTIFIER)
    /// h = HASH(h || responder_static_public)
    pub fn initial_hash(responder_static: &[u8; 32]) -> [u8; HASH_LEN] {
        let ck = Self::initial_chain_key();
        let h1 = blake2s::hash_two(&ck, IDENTIFIER);
        blake2s::hash_two(&h1, responder_static)
    }

    /// Create a new handshake state for the initiator
    pub fn new_initiator(responder_static: &[u8; 32]) -> Self {
        Self {
            chaining_key: Self::initial_chain_key(),
            hash: Self::initial_hash(responder_static),
        }
    }

    /// Create a new handshake state for the responder
    ///
    /// Both parties hash against the responder's static public key.
    pub fn new_responder(our_static_public: &[u8; 32]) -> Self {
        Self {
            chaining_key: Self::initial_chain_key(),
            hash: Self::initial_hash(our_static_public),
        }
    }

    /// MixHash: h = HASH(h || data)
    pub fn mix_hash(&mut self, data: &[u8]) {
        self.hash = blake2s::hash_two(&self.hash, data);
    }

    /// MixKey: (ck, k) = KDF2(ck, input_key_material)
    pub fn mix_key(&mut self, input: &[u8]) -> [u8; 32] {
        let (new_ck, key) = blake2s::kdf2(&self.chaining_key, input);
        self.chaining_key = new_ck;
        key
    }

    /// MixKeyAndHash: (ck, temp_h, k) = KDF3(ck, input_key_material)
    ///
    /// Used to mix the pre-shared beacon password into the transcript.
    pub fn mix_key_and_hash(&mut self, psk: &[u8; 32]) -> [u8; 32] {
        let (new_ck, temp_h, key) = blake2s::kdf3(&self.chaining_key, psk);
        self.chaining_key = new_ck;
        self.mix_hash(&temp_h);
        key
    }

    /// EncryptAndHash: encrypts plaintext with key, mixes ciphertext into hash
    pub fn encrypt_and_hash(
        &mut self,
        key: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = aead::encrypt(key, 0, plaintext, &self.hash)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// DecryptAndHash: decrypts ciphertext with key, mixes ciphertext into hash
    pub fn decrypt_and_hash(
        &mut self,
        key: &[u8; 32],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let plaintext = aead::decrypt(key, 0, ciphertext, &self.hash)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }
}

/// Transport keys derived from a completed handshake
pub struct TransportKeys {
    pub sending_key: [u8; 32],
    pub receiving_key: [u8; 32],
}

impl TransportKeys {
    /// Derive transport keys for the initiator: (sending_key, receiving_key) = KDF2(ck, "")
    pub fn derive_initiator(chaining_key: &[u8; 32]) -> Self {
        let (t_send, t_recv) = blake2s::kdf2(chaining_key, &[]);
        Self {
            sending_key: t_send,
            receiving_key: t_recv,
        }
    }

    /// Derive transport keys for the responder (swapped relative to the initiator)
    pub fn derive_responder(chaining_key: &[u8; 32]) -> Self {
        let (t_recv, t_send) = blake2s::kdf2(chaining_key, &[]);
        Self {
            sending_key: t_send,
            receiving_key: t_recv,
        }
    }
}

/// Compute the MAC1 key from a peer's public key: HASH(LABEL_MAC1 || peer_public_key)
pub fn mac1_key(peer_public: &[u8; 32]) -> [u8; 32] {
    blake2s::hash_two(LABEL_MAC1, peer_public)
}

/// Compute MAC1 over a message: MAC(mac1_key, message)
pub fn compute_mac1(peer_public: &[u8; 32], message: &[u8]) -> [u8; 16] {
    let key = mac1_key(peer_public);
    blake2s::mac(&key, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_hash() {
        let peer_public = [0u8; 32];
        let h = HandshakeState::initial_hash(&peer_public);
        assert_eq!(h, HandshakeState::initial_hash(&peer_public));

        let other_public = [1u8; 32];
        assert_ne!(h, HandshakeState::initial_hash(&other_public));
    }

    #[test]
    fn test_encrypt_decrypt_and_hash() {
        let peer_public = [0u8; 32];
        let mut state1 = HandshakeState::new_initiator(&peer_public);
        let mut state2 = state1.clone();

        let key = [42u8; 32];
        let plaintext = b"secret message";

        let ciphertext = state1.encrypt_and_hash(&key, plaintext).unwrap();
        let decrypted = state2.decrypt_and_hash(&key, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
        assert_eq!(state1.hash, state2.hash);
    }

    #[test]
    fn test_transport_keys() {
        let ck = [0u8; 32];

        let initiator_keys = TransportKeys::derive_initiator(&ck);
        let responder_keys = TransportKeys::derive_responder(&ck);

        assert_eq!(initiator_keys.sending_key, responder_keys.receiving_key);
        assert_eq!(initiator_keys.receiving_key, responder_keys.sending_key);
    }

    #[test]
    fn test_mac1_computation() {
        let peer_public = [0u8; 32];
        let message = b"test message";

        let mac = compute_mac1(&peer_public, message);
        assert_eq!(mac, compute_mac1(&peer_public, message));
        assert_ne!(mac, compute_mac1(&peer_public, b"other message"));
    }

    #[test]
    fn test_responder_initiator_same_initial_state() {
        let responder_public = [42u8; 32];

        let initiator_state = HandshakeState::new_initiator(&responder_public);
        let responder_state = HandshakeState::new_responder(&responder_public);

        assert_eq!(initiator_state.chaining_key, responder_state.chaining_key);
        assert_eq!(initiator_state.hash, responder_state.hash);
    }
}
