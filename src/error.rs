//! Error types for the noiseguard handshake core

use thiserror::Error;

/// Main error type for noiseguard
#[derive(Error, Debug)]
pub enum NoiseGuardError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
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
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Entropy source or a primitive could not produce key material
    #[error("Key generation failed")]
    KeyGeneration,

    #[error("Encryption failed")]
    Encryption,

    /// AEAD tag mismatch on transport data or cookie replies
    #[error("Decryption failed: invalid ciphertext or authentication tag")]
    Decryption,

    /// Shared secret was all zeros (low-order peer point)
    #[error("DH computation failed")]
    DiffieHellman,
}

/// Protocol-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message type: {msg_type}")]
    InvalidMessageType { msg_type: u8 },

    #[error("Invalid message length: expected {expected}, got {got}")]
    InvalidMessageLength { expected: usize, got: usize },

    #[error("Handshake authentication failed")]
    HandshakeAuthenticationFailed,

    #[error("Chaining keys of initiator and responder differ")]
    ChainingKeyMismatch,

    #[error("Handshake is not in the expected state: {expected}")]
    UnexpectedHandshakeState { expected: &'static str },

    #[error("MAC verification failed")]
    MacVerificationFailed,

    #[error("Handshake initiation timestamp is not newer than the last accepted one")]
    StaleTimestamp,

    #[error("Handshake initiation rate limit exceeded")]
    RateLimited,

    #[error("Unknown peer static key")]
    UnknownPeer,

    #[error("Replay rejected: counter {counter}")]
    ReplayRejected { counter: u64 },

    #[error("Sending counter exhausted, rekey required")]
    CounterExhausted,

    #[error("Session expired")]
    SessionExpired,

    #[error("No active session")]
    NoSession,

    #[error("Invalid receiver index: {index}")]
    InvalidReceiverIndex { index: u32 },
}

impl NoiseGuardError {
    /// Wrong length or type byte; dropped silently at the network boundary
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Protocol(
                ProtocolError::InvalidMessageLength { .. } | ProtocolError::InvalidMessageType { .. }
            )
        )
    }

    /// Check if the offending packet can simply be discarded and the
    /// session carried on unchanged
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Protocol(ProtocolError::ChainingKeyMismatch) => false,

            Self::Protocol(ProtocolError::InvalidMessageLength { .. }) => true,
            Self::Protocol(ProtocolError::InvalidMessageType { .. }) => true,
            Self::Protocol(ProtocolError::HandshakeAuthenticationFailed) => true,
            Self::Protocol(ProtocolError::MacVerificationFailed) => true,
            Self::Protocol(ProtocolError::StaleTimestamp) => true,
            Self::Protocol(ProtocolError::RateLimited) => true,
            Self::Protocol(ProtocolError::ReplayRejected { .. }) => true,
            Self::Protocol(ProtocolError::InvalidReceiverIndex { .. }) => true,
            Self::Crypto(CryptoError::Decryption) => true,
            Self::Crypto(CryptoError::KeyGeneration) => true,
            Self::Crypto(CryptoError::DiffieHellman) => true,

            _ => false,
        }
    }

    /// Check if the error means the current keys must be replaced
    pub fn requires_rekey(&self) -> bool {
        matches!(
            self,
            Self::Protocol(
                ProtocolError::CounterExhausted
                    | ProtocolError::SessionExpired
                    | ProtocolError::NoSession
            )
        )
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Protocol(_) => 4,
            Self::Crypto(_) => 5,
        }
    }
}

/// Result type alias for noiseguard operations
pub type Result<T> = std::result::Result<T, NoiseGuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_classification() {
        let err: NoiseGuardError = ProtocolError::InvalidMessageType { msg_type: 9 }.into();
        assert!(err.is_malformed());
        assert!(err.is_recoverable());

        let err: NoiseGuardError = ProtocolError::ReplayRejected { counter: 3 }.into();
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_fatal_and_rekey_classification() {
        let err: NoiseGuardError = ProtocolError::ChainingKeyMismatch.into();
        assert!(!err.is_recoverable());

        let err: NoiseGuardError = ProtocolError::CounterExhausted.into();
        assert!(err.requires_rekey());
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_messages_carry_no_key_material() {
        let err: NoiseGuardError = CryptoError::Decryption.into();
        assert_eq!(
            err.to_string(),
            "Crypto error: Decryption failed: invalid ciphertext or authentication tag"
        );
    }
}
