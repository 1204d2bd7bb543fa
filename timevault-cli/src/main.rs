//! `timevault`: drive a `TimeVault` deployment from the command line.

mod commands;

use std::path::PathBuf;

use alloy_primitives::{utils::parse_ether, Address, U256};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use timevault_core::{
    config::{Network, DEFAULT_GATEWAY_URL},
    VaultId,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "timevault", version)]
#[command(about = "Time-locked ETH vaults with hidden content, on Base", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

/// Where the contract lives and how to sign. Secrets only come from the
/// environment (or `.env`), never from a config file.
#[derive(Args)]
struct ConnectionArgs {
    /// JSON config file. When set, `--network`, `--gateway`, `--timeout-secs`
    /// and `--confirmations` are taken from the file.
    #[arg(long, env = "TIMEVAULT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Target chain
    #[arg(long, env = "TIMEVAULT_NETWORK", default_value_t = Network::Base, global = true)]
    network: Network,

    /// RPC endpoint (defaults to the network's public endpoint)
    #[arg(long, env = "TIMEVAULT_RPC_URL", global = true)]
    rpc_url: Option<String>,

    /// `TimeVault` contract address
    #[arg(long = "contract", env = "TIMEVAULT_CONTRACT_ADDRESS", global = true)]
    contract_address: Option<Address>,

    /// IPFS gateway used to fetch content
    #[arg(long = "gateway", env = "TIMEVAULT_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL, global = true)]
    gateway_url: String,

    /// Seconds to wait for each transaction to finalize
    #[arg(long, default_value_t = 120, global = true)]
    timeout_secs: u64,

    /// Blocks to wait before a receipt counts as final
    #[arg(long, default_value_t = 1, global = true)]
    confirmations: u64,

    /// Hex private key signing transactions
    #[arg(long, env = "TIMEVAULT_PRIVATE_KEY", hide_env_values = true, global = true)]
    private_key: Option<String>,

    /// Pinata API key
    #[arg(long, env = "PINATA_API_KEY", hide_env_values = true, global = true)]
    pinata_api_key: Option<String>,

    /// Pinata secret API key
    #[arg(long, env = "PINATA_SECRET_KEY", hide_env_values = true, global = true)]
    pinata_secret_key: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a vault's reveal key. Works offline.
    DeriveKey {
        /// Vault id (decimal or 0x hex)
        #[arg(long)]
        vault_id: VaultId,

        /// Unlock time (unix seconds or YYYY-MM-DD, UTC)
        #[arg(long, value_parser = parse_unlock_time)]
        unlock_time: u64,
    },

    /// Show a vault as JSON
    Status {
        /// Vault id (decimal or 0x hex)
        #[arg(long)]
        vault_id: VaultId,
    },

    /// Upload an image, create a vault and optionally seal hidden content for it
    Create {
        /// Lock NFT image
        #[arg(long)]
        image: PathBuf,

        /// Amount to lock, in ETH (e.g. 0.1)
        #[arg(long, value_parser = parse_amount)]
        amount: U256,

        /// Unlock time (unix seconds or YYYY-MM-DD, UTC)
        #[arg(long, value_parser = parse_unlock_time)]
        unlock_time: u64,

        /// Gift the vault to this address
        #[arg(long)]
        recipient: Option<Address>,

        /// Add 0.001 ETH for the recipient's withdrawal gas (gifts only)
        #[arg(long)]
        gas_reserve: bool,

        /// File to seal as hidden content, revealed after withdrawal
        #[arg(long)]
        hidden: Option<PathBuf>,
    },

    /// Withdraw a vault's funds, then burn its lock NFT
    Withdraw {
        /// Vault id (decimal or 0x hex)
        #[arg(long)]
        vault_id: VaultId,

        /// Continue an interrupted withdrawal from ledger state
        #[arg(long)]
        resume: bool,
    },

    /// Seal a file as hidden content of an existing vault
    Seal {
        /// Vault id (decimal or 0x hex)
        #[arg(long)]
        vault_id: VaultId,

        /// File to seal
        #[arg(long)]
        file: PathBuf,
    },

    /// Fetch and decrypt hidden content of a withdrawn vault
    Reveal {
        /// Vault id (decimal or 0x hex)
        #[arg(long)]
        vault_id: VaultId,

        /// Content hash of the sealed blob
        #[arg(long)]
        hash: String,

        /// Where to write the revealed content
        #[arg(long)]
        out: PathBuf,
    },
}

fn parse_amount(s: &str) -> Result<U256, String> {
    let amount = parse_ether(s).map_err(|e| format!("invalid ETH amount `{s}`: {e}"))?;
    if amount.is_zero() {
        return Err("amount must be positive".to_string());
    }
    Ok(amount)
}

/// Unix seconds, or a calendar date taken as midnight UTC.
fn parse_unlock_time(s: &str) -> Result<u64, String> {
    if let Ok(seconds) = s.parse::<u64>() {
        return Ok(seconds);
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("expected unix seconds or YYYY-MM-DD, got `{s}`: {e}"))?;
    let timestamp = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("`{s}` has no midnight"))?
        .and_utc()
        .timestamp();
    u64::try_from(timestamp).map_err(|_| format!("`{s}` is before 1970"))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    commands::run(cli).await
}
