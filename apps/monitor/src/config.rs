use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use schema::{WatchDirection, parse_sol_amount};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "monitor", about = "Solana wallet transfer monitor")]
pub struct Cli {
    /// Watch store file (overrides WATCH_STORE_PATH)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Primary RPC URL (overrides RPC_URL)
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Poll all active watches until interrupted
    Run,

    /// Register a wallet for an owner
    Add {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        address: String,
        #[arg(long, default_value = "")]
        label: String,
        /// Minimum amount in SOL
        #[arg(long, value_parser = parse_sol_arg)]
        min: Option<u64>,
        /// Maximum amount in SOL
        #[arg(long, value_parser = parse_sol_arg)]
        max: Option<u64>,
        /// in | out | both
        #[arg(long, default_value = "both")]
        direction: WatchDirection,
    },

    /// Show an owner's watches
    List {
        #[arg(long)]
        owner: String,
    },

    /// Delete a watch
    Remove {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        watch_id: u64,
    },

    /// Change amount or direction filters of a watch
    Filter {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        watch_id: u64,
        #[arg(long, value_parser = parse_sol_arg, conflicts_with = "clear_min")]
        min: Option<u64>,
        #[arg(long, value_parser = parse_sol_arg, conflicts_with = "clear_max")]
        max: Option<u64>,
        #[arg(long)]
        clear_min: bool,
        #[arg(long)]
        clear_max: bool,
        #[arg(long)]
        direction: Option<WatchDirection>,
    },

    /// Stop polling a watch without deleting it
    Pause {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        watch_id: u64,
    },

    /// Start polling a paused watch again
    Resume {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        watch_id: u64,
    },
}

fn parse_sol_arg(s: &str) -> Result<u64, String> {
    parse_sol_amount(s).map_err(|e| e.to_string())
}

#[derive(Clone, Debug)]
pub struct Config {
    pub rpc_url: String,
    pub rpc_fallback_urls: Vec<String>,
    pub rpc_concurrency: usize,
    pub rpc_min_delay_ms: u64,
    pub rpc_timeout: Duration,

    pub poll_interval: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub signature_lookback: usize,

    // lamports
    pub dust_floor: u64,
    pub fee_tolerance: u64,
    pub min_notify: u64,

    pub store_path: PathBuf,
    pub telegram_bot_token: Option<String>,
    pub explorer_url: String,
    pub stats_every_ticks: u64,
}

pub fn load(cli: &Cli) -> Result<Config> {
    load_from(cli, |key| env::var(key).ok())
}

/// Builds the config from `lookup` (environment in production) with CLI overrides.
pub fn load_from<F>(cli: &Cli, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let rpc_url = cli
        .rpc_url
        .clone()
        .or_else(|| var("RPC_URL"))
        .unwrap_or_else(|| "https://api.mainnet-beta.solana.com".to_string());
    let rpc_fallback_urls = parse_list(var("RPC_FALLBACK_URLS").as_deref().unwrap_or(""));

    let rpc_concurrency = env_parse(&var, "RPC_CONCURRENCY", 4usize)?;
    let rpc_min_delay_ms = env_parse(&var, "RPC_MIN_DELAY_MS", 0u64)?;
    let rpc_timeout = Duration::from_secs(env_parse(&var, "RPC_TIMEOUT_SECS", 25u64)?);

    let poll_interval = Duration::from_millis(env_parse(&var, "POLL_INTERVAL_MS", 15_000u64)?);
    let batch_size = env_parse(&var, "BATCH_SIZE", 3usize)?;
    let batch_delay = Duration::from_millis(env_parse(&var, "BATCH_DELAY_MS", 1_000u64)?);
    let signature_lookback = env_parse(&var, "SIGNATURE_LOOKBACK", 5usize)?;

    let dust_floor = env_sol(&var, "DUST_FLOOR_SOL", "0.000001")?;
    let fee_tolerance = env_sol(&var, "FEE_TOLERANCE_SOL", "0.00001")?;
    let min_notify = env_sol(&var, "MIN_NOTIFY_SOL", "0.001")?;

    let store_path = cli
        .store
        .clone()
        .or_else(|| var("WATCH_STORE_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data/watches.json"));
    let telegram_bot_token = var("TELEGRAM_BOT_TOKEN");
    let explorer_url = var("EXPLORER_URL").unwrap_or_else(|| "https://solscan.io".to_string());
    let stats_every_ticks = env_parse(&var, "STATS_EVERY_TICKS", 20u64)?;

    if poll_interval.is_zero() {
        return Err(anyhow!("POLL_INTERVAL_MS must be greater than 0"));
    }
    if batch_size == 0 {
        return Err(anyhow!("BATCH_SIZE must be at least 1"));
    }
    if signature_lookback == 0 {
        return Err(anyhow!("SIGNATURE_LOOKBACK must be at least 1"));
    }
    if rpc_concurrency == 0 {
        return Err(anyhow!("RPC_CONCURRENCY must be at least 1"));
    }

    Ok(Config {
        rpc_url,
        rpc_fallback_urls,
        rpc_concurrency,
        rpc_min_delay_ms,
        rpc_timeout,
        poll_interval,
        batch_size,
        batch_delay,
        signature_lookback,
        dust_floor,
        fee_tolerance,
        min_notify,
        store_path,
        telegram_bot_token,
        explorer_url,
        stats_every_ticks,
    })
}

fn env_parse<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}='{raw}': {e}")),
        None => Ok(default),
    }
}

fn env_sol<F>(var: &F, key: &str, default: &str) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = var(key).unwrap_or_else(|| default.to_string());
    parse_sol_amount(&raw).with_context(|| format!("invalid {key}"))
}

pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
