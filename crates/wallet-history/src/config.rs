//! Configuration for the wallet history ingester
//!
//! Values come from (highest wins): CLI flags / environment, `config.toml`,
//! then the defaults in `constants.rs`. Every file section is optional.

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants;
use crate::ingest::Pacing;
use crate::retry::RetryPolicy;

// =============================================================================
// File-based Configuration (config.toml)
// =============================================================================

/// Configuration loaded from config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub rpc: RpcSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub pacing: PacingSection,
    #[serde(default)]
    pub wallets: WalletsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcSection {
    /// JSON-RPC endpoint
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// SQLite file path
    pub path: Option<PathBuf>,
}

/// Backoff for rate-limited provider calls
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

/// Fixed delays between provider calls
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacingSection {
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_backfill_signature_delay_ms")]
    pub backfill_signature_delay_ms: u64,
    #[serde(default = "default_incremental_signature_delay_ms")]
    pub incremental_signature_delay_ms: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            page_delay_ms: default_page_delay_ms(),
            backfill_signature_delay_ms: default_backfill_signature_delay_ms(),
            incremental_signature_delay_ms: default_incremental_signature_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletsSection {
    /// Wallet seeded into an empty registry before a sweep
    #[serde(default = "default_wallet")]
    pub default_wallet: String,
    #[serde(default = "default_true")]
    pub seed_default_when_empty: bool,
}

impl Default for WalletsSection {
    fn default() -> Self {
        Self {
            default_wallet: default_wallet(),
            seed_default_when_empty: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    constants::RETRY_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    constants::RETRY_INITIAL_DELAY_MS
}

fn default_page_delay_ms() -> u64 {
    constants::PAGE_DELAY_MS
}

fn default_backfill_signature_delay_ms() -> u64 {
    constants::BACKFILL_SIGNATURE_DELAY_MS
}

fn default_incremental_signature_delay_ms() -> u64 {
    constants::INCREMENTAL_SIGNATURE_DELAY_MS
}

fn default_wallet() -> String {
    constants::DEFAULT_WALLET.to_string()
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| {
            "Failed to parse config.toml. Check for:\n\
             - Unknown sections or keys (allowed: rpc, database, retry, pacing, wallets)\n\
             - Invalid TOML syntax (missing quotes, brackets, etc.)\n\
             - Incorrect data types (strings vs numbers)"
        })
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Values that can override the file (from CLI flags / env)
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub rpc_url: Option<String>,
    pub database_path: Option<PathBuf>,
}

/// Main configuration struct with validated values
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub database_path: PathBuf,
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    pub default_wallet: Pubkey,
    pub seed_default_when_empty: bool,
}

impl Config {
    /// Build runtime config from file config plus overrides
    pub fn from_file(file_config: &FileConfig, overrides: Overrides) -> Result<Self> {
        if file_config.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        let default_wallet = Pubkey::from_str(&file_config.wallets.default_wallet)
            .with_context(|| "Invalid wallets.default_wallet address")?;

        Ok(Self {
            rpc_url: overrides
                .rpc_url
                .or_else(|| file_config.rpc.url.clone())
                .unwrap_or_else(|| constants::DEFAULT_RPC_URL.to_string()),

            database_path: overrides
                .database_path
                .or_else(|| file_config.database.path.clone())
                .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_DATABASE_PATH)),

            retry: RetryPolicy::new(
                file_config.retry.max_attempts,
                Duration::from_millis(file_config.retry.initial_delay_ms),
            ),

            pacing: Pacing {
                page_delay: Duration::from_millis(file_config.pacing.page_delay_ms),
                backfill_signature_delay: Duration::from_millis(file_config.pacing.backfill_signature_delay_ms),
                incremental_signature_delay: Duration::from_millis(file_config.pacing.incremental_signature_delay_ms),
            },

            default_wallet,
            seed_default_when_empty: file_config.wallets.seed_default_when_empty,
        })
    }
}
