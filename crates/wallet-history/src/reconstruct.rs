//! Transfer reconstruction from balance deltas
//!
//! A transaction only tells us every account's balance before and after.
//! From the watched wallet's delta we derive direction and amount, and take
//! the first account that moved the opposite way as the counterparty. This
//! is an approximation for multi-party transactions, kept as-is so new rows
//! stay consistent with rows already stored.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::constants;
use crate::error::ProviderResult;
use crate::provider::{ChainDataProvider, TransactionDetails};

/// A normalized SOL movement for one watched wallet, keyed by signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Transaction signature (primary key)
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    /// Lamports, always > 0
    pub amount_minor_units: u64,
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord {
    pub fn amount_sol(&self) -> f64 {
        self.amount_minor_units as f64 / constants::LAMPORTS_PER_SOL
    }
}

/// Direction relative to the watched wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Why a transaction produced no transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Provider returned no transaction or no status metadata
    Unavailable,
    /// Watched wallet is not in the account list
    AddressNotFound,
    /// Balance arrays don't cover the watched wallet's index
    MalformedBalances,
    /// Wallet balance did not change
    ZeroDelta,
    /// Base fee debit with no counterparty (vote/housekeeping)
    FeeOnly,
}

impl SkipReason {
    /// Unexpected response shape, as opposed to a transaction that simply moved no SOL for us
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            SkipReason::Unavailable | SkipReason::AddressNotFound | SkipReason::MalformedBalances
        )
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::Unavailable => "transaction or metadata unavailable",
            SkipReason::AddressNotFound => "wallet not found in transaction accounts",
            SkipReason::MalformedBalances => "balance arrays shorter than account list",
            SkipReason::ZeroDelta => "no SOL moved for wallet",
            SkipReason::FeeOnly => "fee-only transaction to unknown counterparty",
        };
        f.write_str(text)
    }
}

/// Successful reconstruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstructed {
    pub record: TransferRecord,
    pub direction: Direction,
}

/// Derive the watched wallet's transfer from a transaction's balances.
///
/// `now` is used as the timestamp when the transaction has no block time.
pub fn reconstruct_transfer(
    signature: &str,
    details: &TransactionDetails,
    watched: &str,
    now: DateTime<Utc>,
) -> Result<Reconstructed, SkipReason> {
    let keys = &details.account_keys;
    let pre = &details.pre_balances;
    let post = &details.post_balances;

    let pos = keys
        .iter()
        .position(|k| k == watched)
        .ok_or(SkipReason::AddressNotFound)?;

    let (Some(&before), Some(&after)) = (pre.get(pos), post.get(pos)) else {
        return Err(SkipReason::MalformedBalances);
    };

    let delta = after as i128 - before as i128;
    if delta == 0 {
        return Err(SkipReason::ZeroDelta);
    }

    let direction = if delta > 0 {
        Direction::Incoming
    } else {
        Direction::Outgoing
    };

    // First account (other than ours) that moved the opposite way
    let counterparty = pre
        .iter()
        .zip(post.iter())
        .enumerate()
        .find(|&(i, (&b, &a))| {
            i != pos
                && match direction {
                    Direction::Incoming => a < b,
                    Direction::Outgoing => a > b,
                }
        })
        .and_then(|(i, _)| keys.get(i).cloned())
        .unwrap_or_else(|| constants::UNKNOWN_COUNTERPARTY.to_string());

    let amount = delta.unsigned_abs() as u64;

    if amount == constants::FEE_ONLY_LAMPORTS && counterparty == constants::UNKNOWN_COUNTERPARTY {
        return Err(SkipReason::FeeOnly);
    }

    let (from_address, to_address) = match direction {
        Direction::Incoming => (counterparty, watched.to_string()),
        Direction::Outgoing => (watched.to_string(), counterparty),
    };

    // Inherited imprecision: undated transactions get ingestion time
    let timestamp = details
        .block_time
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .unwrap_or(now);

    Ok(Reconstructed {
        record: TransferRecord {
            id: signature.to_string(),
            from_address,
            to_address,
            amount_minor_units: amount,
            timestamp,
        },
        direction,
    })
}

/// Fetches a transaction and reconstructs the watched wallet's transfer
pub struct TransactionReconstructor<'a, P: ?Sized> {
    provider: &'a P,
}

impl<'a, P: ChainDataProvider + ?Sized> TransactionReconstructor<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// `Ok(None)` when the transaction is not a relevant transfer. Provider
    /// errors (after retries) are returned for the caller to log and skip.
    pub async fn reconstruct(&self, signature: &str, watched: &str) -> ProviderResult<Option<Reconstructed>> {
        let outcome = match self.provider.transaction(signature).await? {
            Some(details) => reconstruct_transfer(signature, &details, watched, Utc::now()),
            None => Err(SkipReason::Unavailable),
        };

        match outcome {
            Ok(reconstructed) => Ok(Some(reconstructed)),
            Err(reason) => {
                if reason.is_anomaly() {
                    warn!(%signature, wallet = %watched, %reason, "Skipping transaction");
                } else {
                    debug!(%signature, wallet = %watched, %reason, "Skipping transaction");
                }
                Ok(None)
            }
        }
    }
}
