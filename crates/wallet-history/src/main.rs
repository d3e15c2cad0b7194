//! wallet-history - Solana wallet transfer ingester
//!
//! # Usage
//!
//! ```bash
//! # Load a year of history for one wallet (and start tracking it)
//! wallet-history backfill Df9nkXFqWJsm1pjjjfZ1R7uFKkwoSBcAvEYyjy36pVjz
//!
//! # Catch up the last 24 hours for every tracked wallet
//! SOLANA_RPC_URL=https://my-rpc.example.com wallet-history sweep
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use wallet_history::config::{Config, FileConfig, Overrides};
use wallet_history::constants;
use wallet_history::rpc::SolanaRpcProvider;
use wallet_history::{Database, IngestionMode, Ingestor};

#[derive(Parser, Debug)]
#[command(name = "wallet-history")]
#[command(about = "Ingest SOL transfer history for tracked wallets into SQLite")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = constants::CONFIG_FILE)]
    config: PathBuf,

    /// Solana JSON-RPC endpoint (overrides config.toml)
    #[arg(long, env = "SOLANA_RPC_URL")]
    rpc_url: Option<String>,

    /// SQLite database path (overrides config.toml)
    #[arg(long, env = "WALLET_HISTORY_DB")]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON log output
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest the last year of transfers for one address
    Backfill {
        /// Wallet address (base58)
        address: String,
    },
    /// Ingest the last 24 hours for every tracked wallet
    Sweep,
    /// Manage tracked wallets
    Wallets {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Show stored wallet and transfer counts
    Stats {
        /// Number of recent transfers to print
        #[arg(long, default_value = "10")]
        recent: u32,
    },
}

#[derive(Subcommand, Debug)]
enum WalletAction {
    /// List tracked wallets
    List,
    /// Start tracking a wallet
    Add { address: String },
    /// Stop tracking a wallet (stored transfers are kept)
    Remove { address: String },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .init();
    }
}

/// Parse and normalize a wallet address
fn parse_address(address: &str) -> Result<String> {
    let pubkey = Pubkey::from_str(address).with_context(|| format!("Invalid wallet address: {}", address))?;
    Ok(pubkey.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let file_config = FileConfig::load_or_default(&cli.config)?;
    let config = Config::from_file(
        &file_config,
        Overrides {
            rpc_url: cli.rpc_url,
            database_path: cli.database,
        },
    )?;

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    match cli.command {
        Commands::Backfill { address } => run_backfill(&config, db, &address).await,
        Commands::Sweep => run_sweep(&config, db).await,
        Commands::Wallets { action } => run_wallets(db, action).await,
        Commands::Stats { recent } => run_stats(db, recent).await,
    }
}

fn build_ingestor(config: &Config, db: Database) -> Ingestor<SolanaRpcProvider, Database> {
    let provider = SolanaRpcProvider::new(&config.rpc_url);
    info!(rpc = %provider.url(), "Using RPC endpoint");
    Ingestor::new(provider, db, config.retry, config.pacing)
}

async fn run_backfill(config: &Config, db: Database, address: &str) -> Result<()> {
    let address = parse_address(address)?;

    if db.add_wallet(&address).await? {
        info!(wallet = %address, "Now tracking wallet");
    }

    let ingestor = build_ingestor(config, db);
    let summary = ingestor
        .ingest_wallet(&address, IngestionMode::Backfill)
        .await
        .with_context(|| format!("Backfill failed for {}", address))?;

    println!(
        "Backfill complete for {}: {} signatures, {} already stored, {} fetched, {} skipped, {} stored",
        address, summary.signatures_seen, summary.already_stored, summary.fetched, summary.skipped, summary.stored
    );
    Ok(())
}

async fn run_sweep(config: &Config, db: Database) -> Result<()> {
    if config.seed_default_when_empty && db.list_wallets().await?.is_empty() {
        let address = config.default_wallet.to_string();
        db.add_wallet(&address).await?;
        info!(wallet = %address, "No wallets tracked, seeded default wallet");
    }

    let ingestor = build_ingestor(config, db.clone());
    let sweep = ingestor.sweep(&db, IngestionMode::Incremental).await?;

    if sweep.failed > 0 {
        warn!(failed = sweep.failed, "Some wallets failed during sweep");
    }

    println!(
        "Sweep complete: {} wallets ({} ok, {} failed), {} new transfers",
        sweep.wallets, sweep.succeeded, sweep.failed, sweep.totals.stored
    );
    Ok(())
}

async fn run_wallets(db: Database, action: WalletAction) -> Result<()> {
    match action {
        WalletAction::List => {
            let wallets = db.list_wallets().await?;
            if wallets.is_empty() {
                println!("No tracked wallets");
            }
            for wallet in wallets {
                println!("{:>4}  {}", wallet.id, wallet.address);
            }
        }
        WalletAction::Add { address } => {
            let address = parse_address(&address)?;
            if db.add_wallet(&address).await? {
                println!("Tracking {}", address);
            } else {
                println!("{} is already tracked", address);
            }
        }
        WalletAction::Remove { address } => {
            let address = parse_address(&address)?;
            if db.remove_wallet(&address).await? {
                println!("Stopped tracking {}", address);
            } else {
                println!("{} was not tracked", address);
            }
        }
    }
    Ok(())
}

async fn run_stats(db: Database, recent: u32) -> Result<()> {
    let stats = db.stats().await?;
    println!("Tracked wallets: {}", stats.wallets);
    println!("Stored transfers: {}", stats.transfers);

    let transfers = db.recent_transfers(recent).await?;
    if !transfers.is_empty() {
        println!();
        println!("Recent transfers:");
        for t in transfers {
            println!(
                "  {}  {:>14.9} SOL  {} -> {}  {}",
                t.timestamp.format("%Y-%m-%d %H:%M:%S"),
                t.amount_sol(),
                t.from_address,
                t.to_address,
                t.id
            );
        }
    }
    Ok(())
}
