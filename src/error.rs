//! Typed error boundaries for each component.
//!
//! Each fallible subsystem gets its own enum so callers can match on error
//! class (e.g. the rate controller needs to know `RpcError::RateLimited` from
//! `RpcError::Network`). The binary's top-level error path collapses these
//! into `eyre::Report` for logging and process exit codes.

use thiserror::Error;

/// Classified outcome of a single RPC attempt. The adaptive rate controller
/// reacts differently to each variant.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("transient server error (HTTP {status})")]
    ServerTransient { status: u16 },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed RPC result: {0}")]
    MalformedResult(String),

    #[error("RPC returned an error object: {code} {message}")]
    RpcObject { code: i64, message: String },

    #[error("unexpected HTTP status {0}")]
    Other(u16),
}

impl RpcError {
    /// Whether the Rate Controller should treat this as a plain network
    /// error for backoff purposes (as opposed to a 429, which gets its own
    /// stricter backoff curve).
    pub fn is_network_like(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout(_) | RpcError::Network(_) | RpcError::ServerTransient { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("not a valid base58 Solana account address: {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to read or create the encryption key: {0}")]
    KeyIo(#[from] std::io::Error),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (wrong key or corrupted ciphertext)")]
    Decrypt,

    #[error("malformed ciphertext envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("transaction payload missing balances")]
    MissingBalances,
}
