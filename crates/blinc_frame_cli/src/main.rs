//! Blinc Frame CLI
//!
//! Drive the frame scheduler from a timer and watch what it does.

use anyhow::{Context, Result};
use blinc_frame::{
    FrameScheduler, IntervalTickSource, Phase, SchedulerConfig, Subscription, TickSource,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "blinc-frame")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Blinc frame scheduler driver", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe counting callbacks to a phase and tick it for a while
    Run {
        /// Scheduler configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Phase to subscribe to (simulation, pre-physics, pre-render)
        #[arg(short, long, default_value = "simulation")]
        phase: String,

        /// Number of subscribers
        #[arg(short, long, default_value = "4")]
        subscribers: usize,

        /// How long to run, in milliseconds
        #[arg(short, long, default_value = "1000")]
        duration_ms: u64,

        /// Make every K-th subscriber fail on each tick (0 disables)
        #[arg(long, default_value = "0")]
        fail_every: usize,
    },

    /// List phases and whether the configured source can drive them
    Phases {
        /// Scheduler configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            config,
            phase,
            subscribers,
            duration_ms,
            fail_every,
        } => {
            cmd_run(
                config.as_deref(),
                &phase,
                subscribers,
                Duration::from_millis(duration_ms),
                fail_every,
            )
            .await
        }

        Commands::Phases { config } => cmd_phases(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(SchedulerConfig::default()),
    }
}

async fn cmd_run(
    config_path: Option<&Path>,
    phase: &str,
    subscribers: usize,
    duration: Duration,
    fail_every: usize,
) -> Result<()> {
    let config = load_config(config_path)?;
    let phase: Phase = phase.parse()?;

    let runtime = Handle::current();
    let source = IntervalTickSource::from_config(runtime.clone(), &config.source);
    let scheduler = FrameScheduler::with_config(Arc::new(source), runtime, &config);

    info!(
        "Subscribing {} callbacks to {} at {} Hz",
        subscribers,
        phase,
        config.source.rates.get(phase)
    );

    let calls = Arc::new(AtomicU64::new(0));
    let mut subs: Vec<Subscription> = Vec::with_capacity(subscribers);
    for n in 1..=subscribers {
        let failing = fail_every > 0 && n % fail_every == 0;
        let calls = Arc::clone(&calls);
        let sub = scheduler.subscribe_async(phase, move |_dt| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                if failing {
                    anyhow::bail!("subscriber {n} failed on purpose");
                }
                Ok(())
            }
        })?;

        if sub.is_inert() {
            warn!("{} is not supported by this source, nothing will tick", phase);
        }
        subs.push(sub);
    }

    tokio::time::sleep(duration).await;

    for sub in &subs {
        sub.unsubscribe()?;
    }
    scheduler.cleanup_all()?;

    let stats = scheduler.stats();
    let phase_stats = stats.phase(phase);
    info!(
        "{}: {} ticks, {} callbacks dispatched, {} completed, {} failures, {} stale fires",
        phase,
        phase_stats.ticks,
        phase_stats.dispatched,
        calls.load(Ordering::Relaxed),
        phase_stats.failures,
        phase_stats.stale_fires
    );
    info!(
        "workers: {} spawned, {} reused, {} live",
        stats.workers.spawned, stats.workers.reused, stats.workers.live
    );

    Ok(())
}

fn cmd_phases(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let source = IntervalTickSource::from_config(Handle::current(), &config.source);

    for phase in Phase::ALL {
        info!(
            "{:<12} {:>8.1} Hz  {}",
            phase.name(),
            source.rates().get(phase),
            if source.supports(phase) {
                "supported"
            } else {
                "needs render context"
            }
        );
    }

    Ok(())
}
