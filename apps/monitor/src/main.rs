use anyhow::Result;
use clap::Parser;

mod commands;
mod config;
mod cursor;
mod delivery;
mod differ;
mod dispatch;
mod metrics;
mod pipeline;
mod rpc;
mod scheduler;
mod store;

#[cfg(test)]
mod testing;

use config::Cli;

fn setup_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let cfg = config::load(&cli)?;

    commands::execute(cli.command, cfg).await
}
