use anyhow::{Result, anyhow};
use log::{info, warn};
use schema::{AnalyzerParams, WatchConfig, format_sol};
use std::sync::Arc;

use crate::config::{Command, Config};
use crate::delivery::{ConsoleChannel, DeliveryChannel, TelegramChannel};
use crate::dispatch::Dispatcher;
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;
use crate::rpc::RpcClient;
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::store::{FilterUpdate, JsonWatchStore};

pub async fn execute(command: Command, cfg: Config) -> Result<()> {
    let store = JsonWatchStore::new(cfg.store_path.clone());

    match command {
        Command::Run => run(cfg, store).await,

        Command::Add {
            owner,
            address,
            label,
            min,
            max,
            direction,
        } => {
            validate_address(&address)?;
            let watch = WatchConfig {
                owner_id: owner,
                watch_id: 0,
                label,
                address,
                min_amount: min,
                max_amount: max,
                direction,
                active: true,
                created_at: 0,
            };
            let added = store.add(watch, cfg.min_notify)?;
            println!("added watch {}", describe(&added));
            Ok(())
        }

        Command::List { owner } => {
            let watches = store.list_for_owner(&owner)?;
            if watches.is_empty() {
                println!("no watches for owner {owner}");
            }
            for w in &watches {
                println!("{}", describe(w));
            }
            Ok(())
        }

        Command::Remove { owner, watch_id } => {
            let removed = store.remove(&owner, watch_id)?;
            println!("removed watch {}", describe(&removed));
            Ok(())
        }

        Command::Filter {
            owner,
            watch_id,
            min,
            max,
            clear_min,
            clear_max,
            direction,
        } => {
            let update = FilterUpdate {
                min_amount: if clear_min { Some(None) } else { min.map(Some) },
                max_amount: if clear_max { Some(None) } else { max.map(Some) },
                direction,
            };
            let updated = store.update_filters(&owner, watch_id, &update, cfg.min_notify)?;
            println!("updated watch {}", describe(&updated));
            Ok(())
        }

        Command::Pause { owner, watch_id } => {
            let w = store.set_active(&owner, watch_id, false)?;
            println!("paused watch {}", describe(&w));
            Ok(())
        }

        Command::Resume { owner, watch_id } => {
            let w = store.set_active(&owner, watch_id, true)?;
            println!("resumed watch {}", describe(&w));
            Ok(())
        }
    }
}

async fn run(cfg: Config, store: JsonWatchStore) -> Result<()> {
    info!("monitor starting:");
    info!("  rpc_primary={}", cfg.rpc_url);
    info!("  rpc_fallback_count={}", cfg.rpc_fallback_urls.len());
    if !cfg.rpc_fallback_urls.is_empty() {
        info!("  rpc_fallbacks={:?}", cfg.rpc_fallback_urls);
    }
    info!("  rpc_concurrency={}", cfg.rpc_concurrency);
    info!("  rpc_min_delay_ms={}", cfg.rpc_min_delay_ms);
    info!("  rpc_timeout={:?}", cfg.rpc_timeout);
    info!("  poll_interval={:?}", cfg.poll_interval);
    info!("  batch_size={}", cfg.batch_size);
    info!("  batch_delay={:?}", cfg.batch_delay);
    info!("  signature_lookback={}", cfg.signature_lookback);
    info!("  dust_floor={} SOL", format_sol(cfg.dust_floor));
    info!("  fee_tolerance={} SOL", format_sol(cfg.fee_tolerance));
    info!("  min_notify={} SOL", format_sol(cfg.min_notify));
    info!("  store={}", store.path().display());
    info!("  explorer={}", cfg.explorer_url);

    let channel: Arc<dyn DeliveryChannel> = match cfg.telegram_bot_token.as_deref() {
        Some(token) => {
            info!("  delivery=telegram");
            Arc::new(TelegramChannel::new(token)?)
        }
        None => {
            warn!("  delivery=console (TELEGRAM_BOT_TOKEN not set)");
            Arc::new(ConsoleChannel)
        }
    };

    let rpc = RpcClient::new(
        cfg.rpc_url.clone(),
        cfg.rpc_fallback_urls.clone(),
        cfg.rpc_concurrency,
        cfg.rpc_min_delay_ms,
        cfg.rpc_timeout,
    )?;

    let metrics = Arc::new(Metrics::new());
    let pipeline = Arc::new(Pipeline {
        chain: Arc::new(rpc),
        dispatcher: Dispatcher::new(channel, &cfg.explorer_url, metrics.clone()),
        analyzer: AnalyzerParams {
            dust_floor: cfg.dust_floor,
            fee_tolerance: cfg.fee_tolerance,
        },
        min_notify: cfg.min_notify,
        lookback: cfg.signature_lookback,
        metrics: metrics.clone(),
    });

    let settings = SchedulerSettings {
        poll_interval: cfg.poll_interval,
        batch_size: cfg.batch_size,
        batch_delay: cfg.batch_delay,
        stats_every_ticks: cfg.stats_every_ticks,
    };

    let scheduler = Scheduler::new(Arc::new(store), pipeline, settings, metrics);
    let cursors = scheduler.run(shutdown_signal()).await;
    info!("monitor stopped with {cursors} watch cursors");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, shutting down"),
        Err(e) => {
            warn!("failed to listen for ctrl-c: {e:?}");
            std::future::pending::<()>().await;
        }
    }
}

/// Solana addresses are base58-encoded 32-byte public keys.
pub fn validate_address(address: &str) -> Result<()> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| anyhow!("invalid address '{address}': {e}"))?;
    if bytes.len() != 32 {
        return Err(anyhow!(
            "invalid address '{address}': decodes to {} bytes, expected 32",
            bytes.len()
        ));
    }
    Ok(())
}

fn describe(w: &WatchConfig) -> String {
    let bound = |v: Option<u64>| v.map(format_sol).unwrap_or_else(|| "-".to_string());
    format!(
        "#{} [{}] {} label={:?} direction={} min={} max={}",
        w.watch_id,
        if w.active { "active" } else { "paused" },
        w.address,
        w.label,
        w.direction,
        bound(w.min_amount),
        bound(w.max_amount)
    )
}
