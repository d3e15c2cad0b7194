//! Chain data provider port
//!
//! The pipeline only needs two read-only calls: list signatures for an
//! address (paginated, newest first) and fetch one transaction with its
//! balance metadata. The Solana implementation lives in `rpc.rs`; tests use
//! scripted in-memory providers.

use async_trait::async_trait;

use crate::error::ProviderResult;

/// One entry of a signature listing. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub signature: String,
    /// Unix seconds; the provider may not know it yet
    pub block_time: Option<i64>,
}

/// Balance snapshot of a transaction, as needed for reconstruction.
///
/// `account_keys`, `pre_balances` and `post_balances` are index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDetails {
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub block_time: Option<i64>,
}

#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Up to `limit` signatures involving `address`, newest first, strictly
    /// older than `before` when given.
    async fn signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
    ) -> ProviderResult<Vec<SignatureRecord>>;

    /// Full transaction by signature. `Ok(None)` when the provider has no
    /// transaction or no status metadata for it.
    async fn transaction(&self, signature: &str) -> ProviderResult<Option<TransactionDetails>>;
}
