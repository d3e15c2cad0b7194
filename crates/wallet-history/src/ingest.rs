//! Per-wallet ingestion: paginate, dedup, reconstruct, persist
//!
//! Everything runs sequentially. The only waits are the retry backoff,
//! the page delay and the per-signature delay.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::error::IngestResult;
use crate::paginator::SignaturePaginator;
use crate::provider::ChainDataProvider;
use crate::reconstruct::TransactionReconstructor;
use crate::retry::{RateLimitedClient, RetryPolicy};
use crate::store::{DedupStore, WalletRegistry};

/// How far back a run looks, and how fast it fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionMode {
    /// One-off history load for a single address
    Backfill,
    /// Recurring catch-up over all tracked wallets
    Incremental,
}

impl IngestionMode {
    pub fn lookback(&self) -> TimeDelta {
        match self {
            IngestionMode::Backfill => TimeDelta::days(constants::BACKFILL_LOOKBACK_DAYS),
            IngestionMode::Incremental => TimeDelta::hours(constants::INCREMENTAL_LOOKBACK_HOURS),
        }
    }

    /// Oldest block time (unix seconds) still inside the window
    pub fn cutoff(&self, now: DateTime<Utc>) -> i64 {
        (now - self.lookback()).timestamp()
    }
}

impl std::fmt::Display for IngestionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestionMode::Backfill => write!(f, "backfill"),
            IngestionMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Fixed delays between provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub page_delay: Duration,
    pub backfill_signature_delay: Duration,
    pub incremental_signature_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(constants::PAGE_DELAY_MS),
            backfill_signature_delay: Duration::from_millis(constants::BACKFILL_SIGNATURE_DELAY_MS),
            incremental_signature_delay: Duration::from_millis(constants::INCREMENTAL_SIGNATURE_DELAY_MS),
        }
    }
}

impl Pacing {
    /// No waits at all
    pub fn none() -> Self {
        Self {
            page_delay: Duration::ZERO,
            backfill_signature_delay: Duration::ZERO,
            incremental_signature_delay: Duration::ZERO,
        }
    }

    pub fn signature_delay(&self, mode: IngestionMode) -> Duration {
        match mode {
            IngestionMode::Backfill => self.backfill_signature_delay,
            IngestionMode::Incremental => self.incremental_signature_delay,
        }
    }
}

/// Counts for one wallet run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletSummary {
    /// In-window signatures returned by the paginator
    pub signatures_seen: usize,
    /// Signatures already in the store (no fetch made)
    pub already_stored: usize,
    /// Transactions fetched from the provider
    pub fetched: usize,
    /// Fetched but not a relevant transfer, or the fetch failed
    pub skipped: usize,
    /// New rows written
    pub stored: usize,
}

impl std::ops::AddAssign for WalletSummary {
    fn add_assign(&mut self, other: Self) {
        self.signatures_seen += other.signatures_seen;
        self.already_stored += other.already_stored;
        self.fetched += other.fetched;
        self.skipped += other.skipped;
        self.stored += other.stored;
    }
}

/// Counts for a sweep over every tracked wallet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub wallets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub totals: WalletSummary,
}

/// Drives the pipeline for tracked wallets
pub struct Ingestor<P, S> {
    client: RateLimitedClient<P>,
    store: S,
    pacing: Pacing,
    page_size: usize,
}

impl<P: ChainDataProvider, S: DedupStore> Ingestor<P, S> {
    pub fn new(provider: P, store: S, retry: RetryPolicy, pacing: Pacing) -> Self {
        Self {
            client: RateLimitedClient::new(provider, retry),
            store,
            pacing,
            page_size: constants::PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provider(&self) -> &P {
        self.client.inner()
    }

    /// Ingest one wallet's transfers inside the mode's window.
    ///
    /// Provider errors from pagination end the run for this wallet; a failed
    /// transaction fetch only skips that signature. Storage errors are always
    /// returned.
    pub async fn ingest_wallet(&self, address: &str, mode: IngestionMode) -> IngestResult<WalletSummary> {
        let cutoff = mode.cutoff(Utc::now());
        let signature_delay = self.pacing.signature_delay(mode);

        info!(wallet = %address, %mode, cutoff, "Ingesting wallet");

        let mut paginator = SignaturePaginator::new(&self.client, address, cutoff)
            .with_page_size(self.page_size)
            .with_page_delay(self.pacing.page_delay);
        let reconstructor = TransactionReconstructor::new(&self.client);
        let mut summary = WalletSummary::default();

        while let Some(batch) = paginator.next_batch().await? {
            for record in batch {
                summary.signatures_seen += 1;
                if summary.signatures_seen % constants::PROGRESS_LOG_INTERVAL == 0 {
                    info!(
                        wallet = %address,
                        seen = summary.signatures_seen,
                        stored = summary.stored,
                        "Ingestion progress"
                    );
                }

                if self.store.exists(&record.signature).await? {
                    summary.already_stored += 1;
                    continue;
                }

                if summary.fetched > 0 {
                    sleep(signature_delay).await;
                }
                summary.fetched += 1;

                let reconstructed = match reconstructor.reconstruct(&record.signature, address).await {
                    Ok(Some(r)) => r,
                    Ok(None) => {
                        summary.skipped += 1;
                        continue;
                    }
                    Err(err) => {
                        warn!(wallet = %address, signature = %record.signature, error = %err, "Failed to fetch transaction");
                        summary.skipped += 1;
                        continue;
                    }
                };

                if self.store.insert_if_absent(&reconstructed.record).await? {
                    debug!(
                        signature = %reconstructed.record.id,
                        direction = %reconstructed.direction,
                        amount = reconstructed.record.amount_minor_units,
                        "Stored transfer"
                    );
                    summary.stored += 1;
                } else {
                    // Written by an overlapping run since the existence check
                    summary.already_stored += 1;
                }
            }
        }

        let pages = paginator.stats();
        info!(
            wallet = %address,
            pages = pages.pages,
            fetched_signatures = pages.fetched,
            filtered = pages.filtered,
            already_stored = summary.already_stored,
            skipped = summary.skipped,
            stored = summary.stored,
            "Wallet ingestion complete"
        );

        Ok(summary)
    }

    /// Ingest every tracked wallet in turn.
    ///
    /// A wallet that fails with a provider error is logged and counted; the
    /// sweep moves on. Storage errors abort the sweep.
    pub async fn sweep<R: WalletRegistry + ?Sized>(&self, registry: &R, mode: IngestionMode) -> IngestResult<SweepSummary> {
        let addresses = registry.list_tracked_addresses().await?;
        let mut sweep = SweepSummary {
            wallets: addresses.len(),
            ..Default::default()
        };

        if addresses.is_empty() {
            info!("No tracked wallets to sweep");
            return Ok(sweep);
        }

        for address in &addresses {
            match self.ingest_wallet(address, mode).await {
                Ok(summary) => {
                    sweep.succeeded += 1;
                    sweep.totals += summary;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    error!(wallet = %address, error = %err, "Wallet ingestion failed");
                    sweep.failed += 1;
                }
            }
        }

        info!(
            wallets = sweep.wallets,
            succeeded = sweep.succeeded,
            failed = sweep.failed,
            stored = sweep.totals.stored,
            "Sweep complete"
        );

        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IngestError, ProviderError, ProviderResult, StorageError, StorageResult};
    use crate::provider::{SignatureRecord, TransactionDetails};
    use crate::reconstruct::TransferRecord;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const W: &str = "WatchedWallet111111111111111111111111111111";
    const X: &str = "Counterparty1111111111111111111111111111111";

    /// One page per address plus a transaction table; logs transaction fetches
    #[derive(Default)]
    struct FakeChain {
        signatures: HashMap<String, Vec<SignatureRecord>>,
        transactions: HashMap<String, TransactionDetails>,
        failing_addresses: HashSet<String>,
        failing_transactions: HashSet<String>,
        fetches: Mutex<Vec<(String, Instant)>>,
    }

    impl FakeChain {
        fn with_transfer(mut self, address: &str, signature: &str, pre: [u64; 2], post: [u64; 2]) -> Self {
            let now = Utc::now().timestamp();
            self.signatures
                .entry(address.to_string())
                .or_default()
                .push(SignatureRecord {
                    signature: signature.to_string(),
                    block_time: Some(now - 60),
                });
            self.transactions.insert(
                signature.to_string(),
                TransactionDetails {
                    account_keys: vec![address.to_string(), X.to_string()],
                    pre_balances: pre.to_vec(),
                    post_balances: post.to_vec(),
                    block_time: Some(now - 60),
                },
            );
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.fetches.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
        }
    }

    #[async_trait]
    impl ChainDataProvider for FakeChain {
        async fn signatures_for_address(
            &self,
            address: &str,
            _limit: usize,
            before: Option<&str>,
        ) -> ProviderResult<Vec<SignatureRecord>> {
            if self.failing_addresses.contains(address) {
                return Err(ProviderError::InvalidAddress(address.to_string()));
            }
            // Single short page per address
            if before.is_some() {
                return Ok(vec![]);
            }
            Ok(self.signatures.get(address).cloned().unwrap_or_default())
        }

        async fn transaction(&self, signature: &str) -> ProviderResult<Option<TransactionDetails>> {
            self.fetches
                .lock()
                .unwrap()
                .push((signature.to_string(), Instant::now()));
            if self.failing_transactions.contains(signature) {
                return Err(ProviderError::Rpc("node unavailable".into()));
            }
            Ok(self.transactions.get(signature).cloned())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, TransferRecord>>,
        broken: bool,
    }

    #[async_trait]
    impl DedupStore for MemoryStore {
        async fn exists(&self, id: &str) -> StorageResult<bool> {
            if self.broken {
                return Err(StorageError::CorruptRow {
                    table: "wallet_transactions",
                    message: "disk gone".into(),
                });
            }
            Ok(self.rows.lock().unwrap().contains_key(id))
        }

        async fn insert_if_absent(&self, record: &TransferRecord) -> StorageResult<bool> {
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(&record.id) {
                return Ok(false);
            }
            rows.insert(record.id.clone(), record.clone());
            Ok(true)
        }
    }

    struct StaticRegistry(Vec<String>);

    #[async_trait]
    impl WalletRegistry for StaticRegistry {
        async fn list_tracked_addresses(&self) -> StorageResult<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn ingestor(chain: FakeChain, store: MemoryStore) -> Ingestor<FakeChain, MemoryStore> {
        Ingestor::new(chain, store, RetryPolicy::new(1, Duration::ZERO), Pacing::none())
    }

    #[test]
    fn test_mode_windows() {
        let now = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
        assert_eq!(IngestionMode::Backfill.cutoff(now), 1_750_000_000 - 365 * 86_400);
        assert_eq!(IngestionMode::Incremental.cutoff(now), 1_750_000_000 - 86_400);
    }

    #[test]
    fn test_signature_delay_by_mode() {
        let pacing = Pacing::default();
        assert_eq!(pacing.signature_delay(IngestionMode::Backfill), Duration::from_millis(1000));
        assert_eq!(pacing.signature_delay(IngestionMode::Incremental), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_second_run_stores_nothing_and_fetches_nothing() {
        let chain = FakeChain::default()
            .with_transfer(W, "s1", [100, 50], [80, 70])
            .with_transfer(W, "s2", [80, 70], [90, 60]);
        let ingestor = ingestor(chain, MemoryStore::default());

        let first = ingestor.ingest_wallet(W, IngestionMode::Incremental).await.unwrap();
        assert_eq!(first.stored, 2);
        assert_eq!(first.fetched, 2);

        let second = ingestor.ingest_wallet(W, IngestionMode::Incremental).await.unwrap();
        assert_eq!(second.signatures_seen, 2);
        assert_eq!(second.already_stored, 2);
        assert_eq!(second.fetched, 0);
        assert_eq!(second.stored, 0);

        assert_eq!(ingestor.provider().fetched(), vec!["s1", "s2"]);
        assert_eq!(ingestor.store().rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_irrelevant_and_failed_fetches_are_skipped() {
        let mut chain = FakeChain::default()
            .with_transfer(W, "ok", [100, 50], [80, 70])
            .with_transfer(W, "flat", [100, 50], [100, 50])
            .with_transfer(W, "broken", [100, 50], [80, 70]);
        chain.failing_transactions.insert("broken".to_string());
        let ingestor = ingestor(chain, MemoryStore::default());

        let summary = ingestor.ingest_wallet(W, IngestionMode::Backfill).await.unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.stored, 1);
    }

    #[tokio::test]
    async fn test_unavailable_transaction_counted_as_skipped() {
        let mut chain = FakeChain::default().with_transfer(W, "kept", [100, 50], [80, 70]);
        chain
            .signatures
            .get_mut(W)
            .unwrap()
            .push(SignatureRecord {
                signature: "pruned".to_string(),
                block_time: Some(Utc::now().timestamp() - 60),
            });
        let ingestor = ingestor(chain, MemoryStore::default());

        let summary = ingestor.ingest_wallet(W, IngestionMode::Incremental).await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.stored, 1);
        assert!(!ingestor.store().rows.lock().unwrap().contains_key("pruned"));
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failing_wallet() {
        let mut chain = FakeChain::default().with_transfer(W, "s1", [100, 50], [80, 70]);
        chain.failing_addresses.insert("bad-wallet".to_string());
        let ingestor = ingestor(chain, MemoryStore::default());
        let registry = StaticRegistry(vec!["bad-wallet".to_string(), W.to_string()]);

        let sweep = ingestor.sweep(&registry, IngestionMode::Incremental).await.unwrap();
        assert_eq!(sweep.wallets, 2);
        assert_eq!(sweep.failed, 1);
        assert_eq!(sweep.succeeded, 1);
        assert_eq!(sweep.totals.stored, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_sweep() {
        let chain = FakeChain::default().with_transfer(W, "s1", [100, 50], [80, 70]);
        let store = MemoryStore {
            broken: true,
            ..Default::default()
        };
        let ingestor = ingestor(chain, store);
        let registry = StaticRegistry(vec![W.to_string()]);

        let err = ingestor.sweep(&registry, IngestionMode::Incremental).await.unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
    }

    #[tokio::test]
    async fn test_empty_registry_is_a_no_op() {
        let ingestor = ingestor(FakeChain::default(), MemoryStore::default());
        let sweep = ingestor
            .sweep(&StaticRegistry(vec![]), IngestionMode::Incremental)
            .await
            .unwrap();
        assert_eq!(sweep, SweepSummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_signature_fetches() {
        let chain = FakeChain::default()
            .with_transfer(W, "s1", [100, 50], [80, 70])
            .with_transfer(W, "s2", [80, 70], [90, 60])
            .with_transfer(W, "s3", [90, 60], [70, 80]);
        let pacing = Pacing {
            incremental_signature_delay: Duration::from_millis(500),
            ..Pacing::none()
        };
        let ingestor = Ingestor::new(chain, MemoryStore::default(), RetryPolicy::new(1, Duration::ZERO), pacing);

        ingestor.ingest_wallet(W, IngestionMode::Incremental).await.unwrap();

        let fetches = ingestor.provider().fetches.lock().unwrap();
        assert_eq!(fetches.len(), 3);
        assert_eq!(fetches[1].1 - fetches[0].1, Duration::from_millis(500));
        assert_eq!(fetches[2].1 - fetches[1].1, Duration::from_millis(500));
    }
}
