//! Wallet transfer history ingestion
//!
//! Pulls signature history for tracked Solana wallets, reconstructs SOL
//! transfers from balance deltas and stores each one exactly once in SQLite.

pub mod config;
pub mod constants;
pub mod error;
pub mod ingest;
pub mod paginator;
pub mod provider;
pub mod reconstruct;
pub mod retry;
pub mod rpc;
pub mod store;

pub use error::{IngestError, ProviderError, StorageError};
pub use ingest::{IngestionMode, Ingestor, Pacing, SweepSummary, WalletSummary};
pub use provider::{ChainDataProvider, SignatureRecord, TransactionDetails};
pub use reconstruct::{Direction, TransferRecord};
pub use retry::{RateLimitedClient, RetryPolicy};
pub use store::{Database, DedupStore, WalletRegistry};
