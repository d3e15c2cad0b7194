//! Backward walk over an address's signature history
//!
//! Pages come back newest first. Each request asks for up to `page_size`
//! signatures before the last signature of the previous page, and the walk
//! stops as soon as it reaches the lookback cutoff or the provider runs out
//! of history. Records with no block time count as outside the window, so a
//! page made only of them ends the walk like a page of old records.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::constants;
use crate::error::ProviderResult;
use crate::provider::{ChainDataProvider, SignatureRecord};

/// Running counts for one paginated walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationStats {
    /// Page requests made
    pub pages: usize,
    /// Records returned by the provider
    pub fetched: usize,
    /// Records handed to the caller
    pub emitted: usize,
    /// Records dropped (outside the window or undated)
    pub filtered: usize,
}

/// Lazy, finite sequence of in-window signature batches for one address
pub struct SignaturePaginator<'a, P: ?Sized> {
    provider: &'a P,
    address: String,
    cutoff: i64,
    page_size: usize,
    page_delay: Duration,
    before: Option<String>,
    done: bool,
    stats: PaginationStats,
}

impl<'a, P: ChainDataProvider + ?Sized> SignaturePaginator<'a, P> {
    /// `cutoff` is a unix timestamp; records older than it are outside the window.
    pub fn new(provider: &'a P, address: &str, cutoff: i64) -> Self {
        Self {
            provider,
            address: address.to_string(),
            cutoff,
            page_size: constants::PAGE_SIZE,
            page_delay: Duration::from_millis(constants::PAGE_DELAY_MS),
            before: None,
            done: false,
            stats: PaginationStats::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn stats(&self) -> PaginationStats {
        self.stats
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next non-empty batch of in-window signatures, or `None` once finished.
    pub async fn next_batch(&mut self) -> ProviderResult<Option<Vec<SignatureRecord>>> {
        if self.done {
            return Ok(None);
        }

        if self.stats.pages > 0 {
            sleep(self.page_delay).await;
        }

        let page = self
            .provider
            .signatures_for_address(&self.address, self.page_size, self.before.as_deref())
            .await?;
        self.stats.pages += 1;
        self.stats.fetched += page.len();

        debug!(
            wallet = %self.address,
            page = self.stats.pages,
            size = page.len(),
            "Fetched signature page"
        );

        if page.is_empty() {
            debug!(wallet = %self.address, "No more signatures to fetch");
            self.done = true;
            return Ok(None);
        }

        let batch: Vec<SignatureRecord> = page
            .iter()
            .filter(|r| in_window(r, self.cutoff))
            .cloned()
            .collect();
        self.stats.filtered += page.len() - batch.len();

        if batch.is_empty() {
            info!(wallet = %self.address, "No signatures in this page fall inside the lookback window");
            self.done = true;
            return Ok(None);
        }

        // Newest first: one dated record before the cutoff means every
        // later record (and page) is older still.
        let crossed_cutoff = page
            .iter()
            .any(|r| r.block_time.is_some_and(|t| t < self.cutoff));

        if crossed_cutoff {
            debug!(wallet = %self.address, "Reached the lookback window boundary");
            self.done = true;
        } else if page.len() < self.page_size {
            debug!(wallet = %self.address, "Reached end of available signatures");
            self.done = true;
        } else {
            self.before = page.last().map(|r| r.signature.clone());
        }

        self.stats.emitted += batch.len();
        Ok(Some(batch))
    }

    /// Drain the whole walk into one list (newest first).
    pub async fn collect_all(&mut self) -> ProviderResult<Vec<SignatureRecord>> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch);
        }
        Ok(all)
    }
}

fn in_window(record: &SignatureRecord, cutoff: i64) -> bool {
    record.block_time.is_some_and(|t| t >= cutoff)
}
