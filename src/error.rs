//! Error types for the mesh link controller

use thiserror::Error;

/// Top-level error type for the controller
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Switch error: {0}")]
    Switch(#[from] SwitchError),

    #[error("Admin error: {0}")]
    Admin(#[from] AdminError),

    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid base64 key: {field}")]
    InvalidKey { field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed: invalid ciphertext or authentication tag")]
    Decryption,

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("DH computation failed")]
    DiffieHellman,
}

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("Invalid message type: {msg_type}")]
    InvalidMessageType { msg_type: u8 },

    #[error("Invalid message length: expected {expected}, got {got}")]
    InvalidMessageLength { expected: usize, got: usize },

    #[error("MAC verification failed")]
    MacVerificationFailed,

    #[error("Replay attack detected: counter {counter} already seen")]
    ReplayDetected { counter: u64 },

    #[error("No active session")]
    NoSession,

    #[error("Invalid sender index: {index}")]
    InvalidSenderIndex { index: u32 },

    #[error("Runt frame: length {len} shorter than link-layer header")]
    RuntFrame { len: usize },

    #[error("Beacon payload malformed: {reason}")]
    MalformedBeacon { reason: String },

    #[error("Incompatible protocol version: {version}")]
    IncompatibleVersion { version: u32 },
}

/// Switch / forwarding-fabric errors
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("No space left in switch interface table")]
    OutOfSpace,

    #[error("Internal switch invariant violated: {reason}")]
    Internal { reason: String },
}

/// Admin API errors, carrying the wire-level error code from the contract
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("bad interface number: {ifnum}")]
    BadIfnum { ifnum: u32 },

    #[error("bad public key")]
    BadKey,

    #[error("no such interface: {ifnum}")]
    NoSuchIface { ifnum: u32 },

    #[error("peer not found")]
    NotFound,

    #[error("invalid beacon state transition")]
    InvalidState,

    #[error("out of space")]
    OutOfSpace,

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl AdminError {
    /// Stable numeric code surfaced over the admin API, independent of display text.
    pub fn as_code(&self) -> i32 {
        match self {
            Self::BadIfnum { .. } => -1,
            Self::BadKey => -2,
            Self::NoSuchIface { .. } => -3,
            Self::NotFound => -4,
            Self::InvalidState => -5,
            Self::OutOfSpace => -6,
            Self::Internal { .. } => -7,
        }
    }
}

impl From<SwitchError> for AdminError {
    fn from(e: SwitchError) -> Self {
        match e {
            SwitchError::OutOfSpace => AdminError::OutOfSpace,
            SwitchError::Internal { reason } => AdminError::Internal { reason },
        }
    }
}

impl MeshError {
    /// Get the process exit code category for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Protocol(_) => 2,
            Self::Crypto(_) => 3,
            Self::Switch(_) => 4,
            Self::Admin(_) => 5,
            Self::System(_) => 6,
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, MeshError>;
