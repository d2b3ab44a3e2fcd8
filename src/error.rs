//! Error taxonomy for the overlay
//!
//! - ConfigError: rejected at construction time, never defaulted.
//! - CipherError: reported per message, the message is dropped.
//! - TransportError: connectivity problems, retried by the channels.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid broker address: {0}")]
    InvalidBroker(String),

    #[error("invalid AES key: passphrase must be at least 16 bytes")]
    InvalidKeyMaterial,

    #[error("invalid TLS material: {0}")]
    InvalidTls(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid key material: passphrase must be at least 16 bytes")]
    InvalidKeyMaterial,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("client is not connected")]
    NotConnected,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("timed out waiting for the broker")]
    Timeout,

    #[error("client error: {0}")]
    Client(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl TransportError {
    /// True for the failures that mean the session is gone and a reconnect cycle must start.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransportError::NotConnected | TransportError::ConnectionLost(_))
    }
}
