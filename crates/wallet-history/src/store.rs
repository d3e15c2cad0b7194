//! SQLite storage for tracked wallets and ingested transfers
//!
//! Transfers are keyed by signature. `insert_if_absent` relies on the
//! primary key (`ON CONFLICT DO NOTHING`), so overlapping runs can never
//! create duplicate rows; `exists` only saves a network round trip.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::reconstruct::TransferRecord;

// =============================================================================
// Ports
// =============================================================================

/// At-most-once transfer persistence
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether a transfer with this id (signature) is already stored.
    async fn exists(&self, id: &str) -> StorageResult<bool>;

    /// Store the record unless its id is present. Returns true if a row was written.
    async fn insert_if_absent(&self, record: &TransferRecord) -> StorageResult<bool>;
}

/// Source of addresses to sweep
#[async_trait]
pub trait WalletRegistry: Send + Sync {
    async fn list_tracked_addresses(&self) -> StorageResult<Vec<String>>;
}

/// A wallet whose history is ingested
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TrackedWallet {
    pub id: i64,
    pub address: String,
}

/// Row counts for the `stats` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub wallets: u64,
    pub transfers: u64,
}

/// Row type for wallet_transactions queries
#[derive(FromRow)]
struct TransferRow {
    id: String,
    from_wallet: String,
    to_wallet: String,
    amount: i64,
    time: String,
}

// =============================================================================
// Database
// =============================================================================

/// SQLite database wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create the database file
    pub async fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // SQLx requires the file to exist for SQLite
        if !path.exists() {
            std::fs::File::create(path)?;
        }

        let url = format!("sqlite:{}", path.display());
        let pool = SqlitePool::connect(&url).await?;

        // WAL + busy timeout so a sweep and a backfill can overlap
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;

        let db = Self { pool };
        db.init_schema().await?;

        info!(path = %path.display(), "Database ready");
        Ok(db)
    }

    /// Private in-memory database (single connection, lives as long as the pool)
    pub async fn open_in_memory() -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> StorageResult<()> {
        sqlx::query(
            "
            -- Wallets whose history is ingested
            CREATE TABLE IF NOT EXISTS wallets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT UNIQUE NOT NULL,
                added_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "
            -- One row per transaction signature
            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id TEXT PRIMARY KEY,
                from_wallet TEXT NOT NULL,
                to_wallet TEXT NOT NULL,
                amount INTEGER NOT NULL,
                time TEXT NOT NULL,
                fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_wallet_transactions_time ON wallet_transactions(time)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Wallets
    // =========================================================================

    /// Add a wallet. Returns false if it was already tracked.
    pub async fn add_wallet(&self, address: &str) -> StorageResult<bool> {
        let result = sqlx::query("INSERT INTO wallets (address) VALUES (?) ON CONFLICT(address) DO NOTHING")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stop tracking a wallet. Stored transfers are kept.
    pub async fn remove_wallet(&self, address: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM wallets WHERE address = ?")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_wallets(&self) -> StorageResult<Vec<TrackedWallet>> {
        let wallets = sqlx::query_as::<_, TrackedWallet>("SELECT id, address FROM wallets ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(wallets)
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// Most recent transfers, newest first
    pub async fn recent_transfers(&self, limit: u32) -> StorageResult<Vec<TransferRecord>> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            "SELECT id, from_wallet, to_wallet, amount, time
             FROM wallet_transactions
             ORDER BY time DESC, id
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_transfer).collect()
    }

    /// Transfers involving an address, newest first
    pub async fn transfers_for_wallet(&self, address: &str) -> StorageResult<Vec<TransferRecord>> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            "SELECT id, from_wallet, to_wallet, amount, time
             FROM wallet_transactions
             WHERE from_wallet = ? OR to_wallet = ?
             ORDER BY time DESC, id",
        )
        .bind(address)
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_transfer).collect()
    }

    pub async fn stats(&self) -> StorageResult<StoreStats> {
        let wallets: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wallets")
            .fetch_one(&self.pool)
            .await?;
        let transfers: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wallet_transactions")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            wallets: wallets.0 as u64,
            transfers: transfers.0 as u64,
        })
    }
}

#[async_trait]
impl DedupStore for Database {
    async fn exists(&self, id: &str) -> StorageResult<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM wallet_transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_if_absent(&self, record: &TransferRecord) -> StorageResult<bool> {
        let amount = i64::try_from(record.amount_minor_units).map_err(|_| StorageError::AmountOutOfRange {
            id: record.id.clone(),
            amount: record.amount_minor_units,
        })?;

        let result = sqlx::query(
            "INSERT INTO wallet_transactions (id, from_wallet, to_wallet, amount, time)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(&record.from_address)
        .bind(&record.to_address)
        .bind(amount)
        .bind(record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl WalletRegistry for Database {
    async fn list_tracked_addresses(&self) -> StorageResult<Vec<String>> {
        Ok(self.list_wallets().await?.into_iter().map(|w| w.address).collect())
    }
}

// =============================================================================
// Helper functions
// =============================================================================

fn row_to_transfer(r: TransferRow) -> StorageResult<TransferRecord> {
    let timestamp = DateTime::parse_from_rfc3339(&r.time)
        .map_err(|e| StorageError::CorruptRow {
            table: "wallet_transactions",
            message: format!("{}: bad time '{}': {}", r.id, r.time, e),
        })?
        .with_timezone(&Utc);

    let amount = u64::try_from(r.amount).map_err(|_| StorageError::CorruptRow {
        table: "wallet_transactions",
        message: format!("{}: negative amount {}", r.id, r.amount),
    })?;

    Ok(TransferRecord {
        id: r.id,
        from_address: r.from_wallet,
        to_address: r.to_wallet,
        amount_minor_units: amount,
        timestamp,
    })
}
