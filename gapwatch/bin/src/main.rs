mod di;
mod schedule;

use crate::di::create_app_module;
use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use gapwatch_application::{DirectionFilter, GapMonitorService, MonitorConfig};
use gapwatch_domain::{BoundaryRule, DetectionMode, Timeframe};
use shaku::HasComponent;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "gapwatch", author, version, about = "Price gap monitor over OHLCV bar series")]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    symbol: Option<String>,

    /// Detection mode: strict, body, open or b2dir
    #[arg(long, global = true)]
    mode: Option<DetectionMode>,

    /// Price boundary rule: strict or inclusive
    #[arg(long, global = true)]
    boundary_rule: Option<BoundaryRule>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tick every configured timeframe on its schedule until Ctrl+C
    Run,

    /// Run a single tick for one timeframe
    Tick {
        /// Timeframe label, e.g. 60M, 4H, 1D (defaults to the base timeframe)
        #[arg(long)]
        timeframe: Option<Timeframe>,
    },

    /// List gap candidates in the most recent stored bars without recording them
    Scan {
        #[arg(long)]
        timeframe: Option<Timeframe>,

        /// Direction filter: both, up or down
        #[arg(long, default_value = "both")]
        direction: DirectionFilter,

        /// Number of recent bars to scan
        #[arg(long)]
        bars: Option<usize>,

        /// Run a recording tick before scanning
        #[arg(long)]
        record: bool,
    },

    /// Replay the stored bar history into a fresh ledger file
    Rebuild {
        /// Where to write the rebuilt ledger; must not exist
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the ledger instead of only previewing counts
        #[arg(long)]
        apply: bool,
    },

    /// List open gaps in the ledger
    Gaps {
        /// Show every symbol instead of the configured one
        #[arg(long)]
        all: bool,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::from_json_file(path)?,
            None => MonitorConfig::default(),
        };

        if let Some(symbol) = &self.symbol {
            config.symbol = symbol.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(rule) = self.boundary_rule {
            config.boundary_rule = rule;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ledger) = &self.ledger {
            config.ledger_path = ledger.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.load_config().context("Failed to load configuration")?;

    let module = create_app_module(&config)?;
    let service: Arc<dyn GapMonitorService> = module.resolve();

    match cli.command {
        Commands::Run => run_scheduler(service, &config).await,
        Commands::Tick { timeframe } => {
            let timeframe = timeframe.unwrap_or(config.base_timeframe);
            let report = service.run_tick(&config.symbol, timeframe).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Scan {
            timeframe,
            direction,
            bars,
            record,
        } => {
            let timeframe = timeframe.unwrap_or(config.base_timeframe);
            if record {
                service.run_tick(&config.symbol, timeframe).await?;
            }
            let summary = service
                .summarize_recent(
                    &config.symbol,
                    timeframe,
                    bars.unwrap_or(config.summary_bars),
                    config.mode,
                    direction,
                )
                .await?;

            println!(
                "{} {} mode={} direction={}: {} candidates in {} bars",
                summary.symbol,
                summary.timeframe,
                summary.mode,
                summary.filter,
                summary.candidates.len(),
                summary.bars_scanned
            );
            for candidate in &summary.candidates {
                println!(
                    "  {}  {:<4}  {} - {}",
                    candidate.found_at.format("%Y-%m-%d %H:%M"),
                    candidate.direction.as_str(),
                    candidate.low,
                    candidate.high
                );
            }
            Ok(())
        }
        Commands::Rebuild { output, apply } => {
            let output = match (apply, output) {
                (true, Some(path)) => Some(path),
                (true, None) => anyhow::bail!("--apply needs --output"),
                (false, _) => None,
            };
            let report = service
                .rebuild(&config.symbol, &config.timeframes(), output.as_deref())
                .await?;

            for series in &report.series {
                println!(
                    "{} {}: {} bars, {} gaps ({} open)",
                    report.symbol, series.timeframe, series.bars, series.gaps, series.open
                );
            }
            match &report.written_to {
                Some(path) => println!("Rebuilt ledger written to {}", path.display()),
                None => println!(
                    "Preview only: {} gaps; pass --apply --output PATH to write",
                    report.total_gaps()
                ),
            }
            Ok(())
        }
        Commands::Gaps { all } => {
            let symbol = (!all).then_some(config.symbol.as_str());
            let gaps = service.open_gaps(symbol).await?;
            println!("{} open gaps", gaps.len());
            for gap in &gaps {
                println!(
                    "  #{} {} {} {:<4} {} - {} found {}",
                    gap.id(),
                    gap.symbol(),
                    gap.timeframe(),
                    gap.direction().as_str(),
                    gap.low(),
                    gap.high(),
                    gap.found_at().format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
    }
}

async fn tick_all(service: &dyn GapMonitorService, symbol: &str, timeframes: &[Timeframe]) {
    for timeframe in timeframes {
        if let Err(e) = service.run_tick(symbol, *timeframe).await {
            error!("Tick {} {} failed: {}", symbol, timeframe, e);
        }
    }
}

async fn run_scheduler(
    service: Arc<dyn GapMonitorService>,
    config: &MonitorConfig,
) -> anyhow::Result<()> {
    let timeframes = config.timeframes();
    info!(
        "Starting gap monitor for {} on {:?} (Press Ctrl+C to stop)",
        config.symbol, timeframes
    );

    tick_all(service.as_ref(), &config.symbol, &timeframes).await;

    loop {
        let now = Utc::now();
        let Some((at, due)) = schedule::next_due(&timeframes, now) else {
            return Ok(());
        };
        info!("Next tick at {} for {:?}", at, due);

        tokio::select! {
            _ = tokio::time::sleep(schedule::until(at, now)) => {
                tick_all(service.as_ref(), &config.symbol, &due).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, stopping gracefully...");
                break;
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}
