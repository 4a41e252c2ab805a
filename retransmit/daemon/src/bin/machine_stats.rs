//! Host CPU and memory poller
//!
//! Prints one JSON line of CPU usage per sample and logs memory figures,
//! until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # 30 samples per minute (default)
//! ./machine-stats
//!
//! # Once a second, reading a different proc mount
//! ./machine-stats --per-minute 60 --proc-root /host/proc
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use retransmit_probe::{
    procfs::{cpu_stat, memory_stat},
    shutdown::ShutdownCoordinator,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::time::{interval, MissedTickBehavior};

/// Host CPU and memory statistics from procfs
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Samples taken per minute
    #[clap(short, long, default_value_t = 30)]
    per_minute: u32,

    /// procfs mount point
    #[clap(long, default_value = "/proc")]
    proc_root: PathBuf,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    if args.per_minute == 0 {
        anyhow::bail!("Samples per minute must be >= 1");
    }

    let coordinator = Arc::new(ShutdownCoordinator::new());
    coordinator
        .spawn_signal_listener()
        .context("Failed to install signal handlers")?;
    let mut shutdown = coordinator.subscribe();

    let period = Duration::from_secs(60) / args.per_minute;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Polling {:?} every {:.1}s",
        args.proc_root,
        period.as_secs_f64()
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => poll(&args.proc_root),
        }
    }

    Ok(())
}

fn poll(proc_root: &Path) {
    match cpu_stat(proc_root) {
        Ok(stat) => match serde_json::to_string(&stat.sample()) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode CPU sample: {}", e),
        },
        Err(e) => error!("CPU stat: {}", e),
    }

    match memory_stat(proc_root) {
        Ok(mem) => {
            info!("Total memory: {:.2} kB", mem.total_bytes as f64 / 1024.0);
            info!("Free memory: {:.2} kB", mem.free_bytes as f64 / 1024.0);
            info!("Available memory: {:.2} kB", mem.available_bytes as f64 / 1024.0);
            info!("Cached memory: {:.2} kB", mem.cached_bytes as f64 / 1024.0);
        }
        Err(e) => error!("Memory stat: {}", e),
    }
}
