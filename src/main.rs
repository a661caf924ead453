use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use stockscout::application::orchestrator::BatchOrchestrator;
use stockscout::config::Config;
use stockscout::domain::types::SymbolStatus;
use stockscout::infrastructure::mock::MockMarketDataSource;
use stockscout::infrastructure::sink::JsonLinesSink;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

/// Batch stock scanner: fetches market data under broker rate limits and
/// emits one directional signal per symbol as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "stockscout", version, about)]
struct Cli {
    /// Comma-separated symbols, overriding the SYMBOLS environment variable.
    #[arg(long)]
    symbols: Option<String>,

    /// Abandon unfinished fetches after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Seed for the mock market data source.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(symbols) = cli.symbols {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        config.validate()?;
    }
    if config.symbols.is_empty() {
        anyhow::bail!("no symbols configured; set SYMBOLS or pass --symbols");
    }

    info!(
        "stockscout: scanning {} symbols with {} fetch workers",
        config.symbols.len(),
        config.fetch_workers
    );

    let source = Arc::new(MockMarketDataSource::new(cli.seed));
    let sink = Arc::new(JsonLinesSink);
    let orchestrator = BatchOrchestrator::new(config, source, sink);

    let deadline = cli.deadline_secs.map(Duration::from_secs);
    let reports = orchestrator.run(deadline).await?;

    let incomplete = reports
        .iter()
        .filter(|r| r.status != SymbolStatus::Complete)
        .count();
    if incomplete > 0 {
        warn!("{} of {} symbols finished incomplete", incomplete, reports.len());
    }
    info!("done");
    Ok(())
}
