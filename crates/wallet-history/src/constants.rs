//! Centralized constants for the wallet history ingester
//!
//! Endpoints, pagination limits, pacing delays and heuristics live here so
//! they are easy to find and update.

// =============================================================================
// Endpoints and Files
// =============================================================================

/// Public mainnet RPC endpoint (used when nothing else is configured)
pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Default config file path
pub const CONFIG_FILE: &str = "config.toml";

/// Default SQLite database location
pub const DEFAULT_DATABASE_PATH: &str = "./data/wallet_history.sqlite";

// =============================================================================
// Pagination
// =============================================================================

/// Max signatures per getSignaturesForAddress request
pub const PAGE_SIZE: usize = 1000;

/// Delay between signature page requests (after the first)
pub const PAGE_DELAY_MS: u64 = 1000;

// =============================================================================
// Lookback Windows
// =============================================================================

/// Historical backfill window
pub const BACKFILL_LOOKBACK_DAYS: i64 = 365;

/// Incremental sweep window
pub const INCREMENTAL_LOOKBACK_HOURS: i64 = 24;

// =============================================================================
// Per-signature Pacing
// =============================================================================

/// Delay between transaction fetches during a backfill (many wallets' worth of budget)
pub const BACKFILL_SIGNATURE_DELAY_MS: u64 = 1000;

/// Delay between transaction fetches during an incremental sweep
pub const INCREMENTAL_SIGNATURE_DELAY_MS: u64 = 500;

/// Log a progress line every N signatures
pub const PROGRESS_LOG_INTERVAL: usize = 50;

// =============================================================================
// Retry / Backoff
// =============================================================================

/// Total attempts per provider call (first try included)
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

/// First backoff delay; doubles on every retry
pub const RETRY_INITIAL_DELAY_MS: u64 = 500;

// =============================================================================
// Transfer Reconstruction
// =============================================================================

/// Base signature fee in lamports. A 5000-lamport debit with no counterparty
/// is a vote/fee-only transaction, not a transfer.
pub const FEE_ONLY_LAMPORTS: u64 = 5000;

/// Counterparty label when no opposing balance change is found
pub const UNKNOWN_COUNTERPARTY: &str = "unknown";

// =============================================================================
// Wallet Registry
// =============================================================================

/// Wallet seeded into an empty registry before a sweep
pub const DEFAULT_WALLET: &str = "Df9nkXFqWJsm1pjjjfZ1R7uFKkwoSBcAvEYyjy36pVjz";

/// Lamports per SOL (display only)
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
