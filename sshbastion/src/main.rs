use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sshbastion_relay::Config;
use time::{format_description, UtcOffset};
use tracing::info;
use tracing_log::LogTracer;
use tracing_subscriber::filter::dynamic_filter_fn;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// SSH bastion relay.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Configuration YAML file location.
    #[arg(short, long)]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(cli: &Cli) -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        match cli.verbose {
            0 => std::env::set_var("RUST_LOG", "sshbastion=info,sshbastion_relay=info"),
            1 => std::env::set_var("RUST_LOG", "sshbastion=debug,sshbastion_relay=debug"),
            _ => std::env::set_var("RUST_LOG", "debug"),
        }
    }

    LogTracer::init().context("failed to initialize log compatibility layer")?;

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let env_filter = Arc::new(EnvFilter::from_default_env());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(OffsetTime::new(
            offset,
            format_description::parse("[day].[month].[year] [hour]:[minute]:[second]").unwrap(),
        ))
        .with_filter(dynamic_filter_fn(move |m, c| env_filter.enabled(m, c.clone())));

    tracing_subscriber::registry().with(fmt_layer).try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = Arc::new(
        Config::load(&cli.config).with_context(|| format!("loading config {}", cli.config.display()))?,
    );

    sshbastion_relay::run_server(config).await?;
    info!("exiting");
    Ok(())
}
