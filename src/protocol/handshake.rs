//! Noise IKpsk2 handshake implementation
//!
//! Implements the two-message Noise IK exchange used to establish a peer
//! session. The controller-visible state machine has five states
//! (Unauthenticated, Handshake1, Handshake2, Handshake3, Established); see
//! `session.rs` for how this two-message exchange maps onto them.

use tai64::Tai64N;

use crate::crypto::{blake2s, noise, x25519};
use crate::error::{CryptoError, MeshError, ProtocolError};
use crate::protocol::messages::{HandshakeInitiation, HandshakeResponse};

/// State for an in-progress handshake (initiator side)
pub struct InitiatorHandshake {
    pub static_private: [u8; 32],
    pub static_public: [u8; 32],
    pub peer_static: [u8; 32],
    /// Pre-shared beacon password, or zeros if none was supplied
    pub psk: [u8; 32],
    pub sender_index: u32,
    ephemeral_private: [u8; 32],
    noise_state: noise::HandshakeState,
}

impl InitiatorHandshake {
    pub fn new(
        static_private: [u8; 32],
        peer_static: [u8; 32],
        psk: Option<[u8; 32]>,
        sender_index: u32,
    ) -> Self {
        let static_public = x25519::public_key(&static_private);
        Self {
            static_private,
            static_public,
            peer_static,
            psk: psk.unwrap_or([0u8; 32]),
            sender_index,
            ephemeral_private: [0u8; 32],
            noise_state: noise::HandshakeState::new_initiator(&peer_static),
        }
    }

    /// Build message 1 (Handshake Initiation). Moves the controller's peer
    /// into Handshake1.
    pub fn create_initiation(&mut self) -> Result<HandshakeInitiation, MeshError> {
        let (ephemeral_private, ephemeral_public) = x25519::generate_keypair();
        self.ephemeral_private = ephemeral_private;

        self.noise_state.mix_hash(&ephemeral_public);
        self.noise_state.chaining_key =
            blake2s::kdf1(&self.noise_state.chaining_key, &ephemeral_public);

        let shared_es = x25519::dh(&ephemeral_private, &self.peer_static);
        let key = self.noise_state.mix_key(&shared_es);

        let encrypted_static = self.noise_state.encrypt_and_hash(&key, &self.static_public)?;
        let encrypted_static: [u8; 48] = encrypted_static
            .try_into()
            .map_err(|_| CryptoError::Encryption)?;

        let shared_ss = x25519::dh(&self.static_private, &self.peer_static);
        let key = self.noise_state.mix_key(&shared_ss);

        let timestamp = Tai64N::now();
        let encrypted_timestamp = self.noise_state.encrypt_and_hash(&key, &timestamp.to_bytes())?;
        let encrypted_timestamp: [u8; 28] = encrypted_timestamp
            .try_into()
            .map_err(|_| CryptoError::Encryption)?;

        let mut msg = HandshakeInitiation::new(
            self.sender_index,
            ephemeral_public,
            encrypted_static,
            encrypted_timestamp,
        );

        let mac1_key = noise::mac1_key(&self.peer_static);
        msg.mac1 = blake2s::mac(&mac1_key, &msg.bytes_for_mac1());

        Ok(msg)
    }

    /// Process message 2 (Handshake Response) and derive transport keys.
    ///
    /// Decrypting the response's authentication tag is itself proof the
    /// responder derived the matching keys, so the initiator can move
    /// straight to Established without waiting for a confirming packet.
    pub fn process_response(
        &mut self,
        response: &HandshakeResponse,
    ) -> Result<HandshakeResult, MeshError> {
        if response.receiver_index != self.sender_index {
            return Err(ProtocolError::InvalidSenderIndex {
                index: response.receiver_index,
            }
            .into());
        }

        self.noise_state.mix_hash(&response.ephemeral_public);
        self.noise_state.chaining_key =
            blake2s::kdf1(&self.noise_state.chaining_key, &response.ephemeral_public);

        let shared_ee = x25519::dh(&self.ephemeral_private, &response.ephemeral_public);
        self.noise_state.mix_key(&shared_ee);

        let shared_se = x25519::dh(&self.static_private, &response.ephemeral_public);
        let _key = self.noise_state.mix_key(&shared_se);

        let key = self.noise_state.mix_key_and_hash(&self.psk);

        self.noise_state
            .decrypt_and_hash(&key, &response.encrypted_nothing)?;

        let keys = noise::TransportKeys::derive_initiator(&self.noise_state.chaining_key);

        Ok(HandshakeResult {
            local_index: self.sender_index,
            remote_index: response.sender_index,
            sending_key: keys.sending_key,
            receiving_key: keys.receiving_key,
        })
    }
}

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub local_index: u32,
    pub remote_index: u32,
    pub sending_key: [u8; 32],
    pub receiving_key: [u8; 32],
}

/// State for processing a handshake (responder side)
pub struct ResponderHandshake {
    pub static_private: [u8; 32],
    pub static_public: [u8; 32],
    pub sender_index: u32,
    noise_state: noise::HandshakeState,
    initiator_ephemeral: [u8; 32],
    initiator_static: [u8; 32],
    initiator_index: u32,
}

impl ResponderHandshake {
    pub fn new(static_private: [u8; 32], sender_index: u32) -> Self {
        let static_public = x25519::public_key(&static_private);
        Self {
            static_private,
            static_public,
            sender_index,
            noise_state: noise::HandshakeState::new_responder(&static_public),
            initiator_ephemeral: [0u8; 32],
            initiator_static: [0u8; 32],
            initiator_index: 0,
        }
    }

    /// Process message 1 (Handshake Initiation). Moves the controller's
    /// peer into Handshake1 and returns the initiator's static public key
    /// so the caller can look up or create the corresponding peer.
    pub fn process_initiation(
        &mut self,
        initiation: &HandshakeInitiation,
    ) -> Result<[u8; 32], MeshError> {
        self.initiator_ephemeral = initiation.ephemeral_public;
        self.initiator_index = initiation.sender_index;

        self.noise_state.mix_hash(&initiation.ephemeral_public);
        self.noise_state.chaining_key =
            blake2s::kdf1(&self.noise_state.chaining_key, &initiation.ephemeral_public);

        let shared_es = x25519::dh(&self.static_private, &initiation.ephemeral_public);
        let key = self.noise_state.mix_key(&shared_es);

        let static_bytes = self
            .noise_state
            .decrypt_and_hash(&key, &initiation.encrypted_static)?;
        self.initiator_static = static_bytes
            .try_into()
            .map_err(|_| CryptoError::Decryption)?;

        let shared_ss = x25519::dh(&self.static_private, &self.initiator_static);
        let key = self.noise_state.mix_key(&shared_ss);

        let _timestamp = self
            .noise_state
            .decrypt_and_hash(&key, &initiation.encrypted_timestamp)?;

        Ok(self.initiator_static)
    }

    /// Build message 2 (Handshake Response). Moves the controller's peer
    /// into Handshake2: keys are derived but unconfirmed until the first
    /// transport packet decrypts successfully (Handshake3).
    pub fn create_response(
        &mut self,
        psk: Option<[u8; 32]>,
    ) -> Result<(HandshakeResponse, HandshakeResult), MeshError> {
        let psk = psk.unwrap_or([0u8; 32]);

        let (ephemeral_private, ephemeral_public) = x25519::generate_keypair();

        self.noise_state.mix_hash(&ephemeral_public);
        self.noise_state.chaining_key =
            blake2s::kdf1(&self.noise_state.chaining_key, &ephemeral_public);

        let shared_ee = x25519::dh(&ephemeral_private, &self.initiator_ephemeral);
        self.noise_state.mix_key(&shared_ee);

        let shared_se = x25519::dh(&ephemeral_private, &self.initiator_static);
        let _key = self.noise_state.mix_key(&shared_se);

        let key = self.noise_state.mix_key_and_hash(&psk);

        let encrypted_nothing = self.noise_state.encrypt_and_hash(&key, &[])?;
        let encrypted_nothing: [u8; 16] = encrypted_nothing
            .try_into()
            .map_err(|_| CryptoError::Encryption)?;

        let mut response = HandshakeResponse::new(
            self.sender_index,
            self.initiator_index,
            ephemeral_public,
            encrypted_nothing,
        );

        let mac1_key = noise::mac1_key(&self.initiator_static);
        response.mac1 = blake2s::mac(&mac1_key, &response.bytes_for_mac1_owned());

        let keys = noise::TransportKeys::derive_responder(&self.noise_state.chaining_key);

        Ok((
            response,
            HandshakeResult {
                local_index: self.sender_index,
                remote_index: self.initiator_index,
                sending_key: keys.sending_key,
                receiving_key: keys.receiving_key,
            },
        ))
    }
}

/// Verify MAC1 on a handshake initiation (we are the responder: MAC1 is
/// computed with our own public key).
pub fn verify_initiation_mac1(
    initiation_bytes: &[u8],
    our_public_key: &[u8; 32],
) -> Result<(), MeshError> {
    if initiation_bytes.len() < HandshakeInitiation::SIZE {
        return Err(ProtocolError::InvalidMessageLength {
            expected: HandshakeInitiation::SIZE,
            got: initiation_bytes.len(),
        }
        .into());
    }

    let mac1_key = noise::mac1_key(our_public_key);
    let mac1_data = &initiation_bytes[..116];
    let expected_mac1 = blake2s::mac(&mac1_key, mac1_data);

    if &initiation_bytes[116..132] != expected_mac1 {
        return Err(ProtocolError::MacVerificationFailed.into());
    }

    Ok(())
}

/// Verify MAC1 on a handshake response (we are the initiator: MAC1 is
/// computed with our own public key).
pub fn verify_response_mac1(
    response_bytes: &[u8],
    our_public_key: &[u8; 32],
) -> Result<(), MeshError> {
    if response_bytes.len() < HandshakeResponse::SIZE {
        return Err(ProtocolError::InvalidMessageLength {
            expected: HandshakeResponse::SIZE,
            got: response_bytes.len(),
        }
        .into());
    }

    let mac1_key = noise::mac1_key(our_public_key);
    let mac1_data = HandshakeResponse::bytes_for_mac1(response_bytes);
    let expected_mac1 = blake2s::mac(&mac1_key, mac1_data);

    if &response_bytes[60..76] != expected_mac1 {
        return Err(ProtocolError::MacVerificationFailed.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_initiation() {
        let (static_private, _) = x25519::generate_keypair();
        let (_, peer_public) = x25519::generate_keypair();

        let mut handshake = InitiatorHandshake::new(static_private, peer_public, None, 12345);
        let init = handshake.create_initiation().unwrap();

        assert_eq!(init.sender_index, 12345);
        assert!(!init.ephemeral_public.iter().all(|&b| b == 0));
        assert!(!init.mac1.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_initiator_responder_handshake() {
        let (initiator_static_private, initiator_static_public) = x25519::generate_keypair();
        let (responder_static_private, responder_static_public) = x25519::generate_keypair();

        let mut initiator =
            InitiatorHandshake::new(initiator_static_private, responder_static_public, None, 1001);
        let initiation = initiator.create_initiation().unwrap();

        verify_initiation_mac1(&initiation.to_bytes(), &responder_static_public).unwrap();

        let mut responder = ResponderHandshake::new(responder_static_private, 2002);
        let peer_public = responder.process_initiation(&initiation).unwrap();
        assert_eq!(peer_public, initiator_static_public);

        let (response, responder_result) = responder.create_response(None).unwrap();

        verify_response_mac1(&response.to_bytes(), &initiator_static_public).unwrap();

        let initiator_result = initiator.process_response(&response).unwrap();

        assert_eq!(initiator_result.sending_key, responder_result.receiving_key);
        assert_eq!(initiator_result.receiving_key, responder_result.sending_key);
        assert_eq!(initiator_result.local_index, 1001);
        assert_eq!(initiator_result.remote_index, 2002);
        assert_eq!(responder_result.local_index, 2002);
        assert_eq!(responder_result.remote_index, 1001);
    }

    #[test]
    fn test_handshake_with_psk() {
        let (initiator_static_private, initiator_static_public) = x25519::generate_keypair();
        let (responder_static_private, responder_static_public) = x25519::generate_keypair();
        let psk = [42u8; 32];

        let mut initiator = InitiatorHandshake::new(
            initiator_static_private,
            responder_static_public,
            Some(psk),
            1001,
        );
        let initiation = initiator.create_initiation().unwrap();

        let mut responder = ResponderHandshake::new(responder_static_private, 2002);
        let peer_public = responder.process_initiation(&initiation).unwrap();
        assert_eq!(peer_public, initiator_static_public);

        let (response, responder_result) = responder.create_response(Some(psk)).unwrap();
        let initiator_result = initiator.process_response(&response).unwrap();

        assert_eq!(initiator_result.sending_key, responder_result.receiving_key);
        assert_eq!(initiator_result.receiving_key, responder_result.sending_key);
    }

    #[test]
    fn test_mismatched_psk_fails() {
        let (initiator_static_private, _) = x25519::generate_keypair();
        let (responder_static_private, responder_static_public) = x25519::generate_keypair();

        let mut initiator = InitiatorHandshake::new(
            initiator_static_private,
            responder_static_public,
            Some([1u8; 32]),
            1001,
        );
        let initiation = initiator.create_initiation().unwrap();

        let mut responder = ResponderHandshake::new(responder_static_private, 2002);
        responder.process_initiation(&initiation).unwrap();

        let (response, _) = responder.create_response(Some([2u8; 32])).unwrap();

        assert!(initiator.process_response(&response).is_err());
    }
}
