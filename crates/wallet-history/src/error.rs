//! Error types for the ingestion pipeline.
//!
//! - [`ProviderError`] - chain data provider failures (rate limits are a distinct variant)
//! - [`StorageError`] - SQLite failures
//! - [`IngestError`] - per-wallet outcome, split into recoverable and fatal
//!
//! Config loading and the binary itself use `anyhow`.

use thiserror::Error;

// =============================================================================
// Provider Errors
// =============================================================================

/// Failures talking to the chain data provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider answered "429 Too Many Requests". The only retryable error.
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// Address could not be parsed as a chain address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Signature could not be parsed.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Any other RPC/transport failure.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Response could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to prepare database file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    /// SQLite integers are signed 64-bit
    #[error("Amount {amount} for {id} does not fit in an INTEGER column")]
    AmountOutOfRange { id: String, amount: u64 },
}

// =============================================================================
// Ingestion Errors
// =============================================================================

/// Outcome of a failed wallet run.
///
/// Provider errors end the current wallet only. Storage errors abort the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Storage(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limit_is_retryable() {
        assert!(ProviderError::RateLimited("429".into()).is_rate_limited());
        assert!(!ProviderError::Rpc("connection reset".into()).is_rate_limited());
        assert!(!ProviderError::InvalidAddress("nope".into()).is_rate_limited());
    }

    #[test]
    fn test_storage_errors_are_fatal() {
        let err: IngestError = StorageError::CorruptRow {
            table: "wallet_transactions",
            message: "bad time".into(),
        }
        .into();
        assert!(err.is_fatal());

        let err: IngestError = ProviderError::Rpc("timeout".into()).into();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("timeout"));
    }
}
