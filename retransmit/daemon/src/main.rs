//! TCP Retransmit Probe - Userspace Program
//!
//! Loads the retransmit tracepoint probe, streams decoded events to stdout or
//! a file, and prints a session summary on exit.
//!
//! ## Usage
//!
//! ```bash
//! # Stream events as text until Ctrl-C
//! sudo ./retransmit-probe --ebpf-object path/to/retransmit-probe.o
//!
//! # Run for 60 seconds, JSON lines to a file
//! sudo ./retransmit-probe --ebpf-object retransmit-probe.o --duration 60 \
//!     --format json --output retransmits.jsonl
//!
//! # Probe built against a BPF ring buffer map
//! sudo ./retransmit-probe --ebpf-object retransmit-probe.o --transport ringbuf
//!
//! # Everything from a config file, overriding the format
//! sudo ./retransmit-probe --config probe.json --format influx
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use retransmit_probe::{
    address::Ipv6Style,
    config::{Config, Transport},
    consumer::{ConsumerSession, RingBufferConsumer},
    decoder::RecordDecoder,
    loader::ProbeLoader,
    shutdown::ShutdownCoordinator,
    sink::{build_sink, SinkType},
    types::SessionStats,
};
use std::{path::PathBuf, sync::Arc};
use tokio::time::Instant;

/// TCP retransmission tracing probe using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Duration to run the probe (in seconds, 0 = until interrupted)
    #[clap(short, long)]
    duration: Option<u64>,

    /// Output file for events (stdout if omitted)
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[clap(short, long, value_enum)]
    format: Option<SinkType>,

    /// Path to eBPF object file
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// Program name inside the eBPF object
    #[clap(long)]
    program: Option<String>,

    /// Map the probe publishes records on
    #[clap(long)]
    map: Option<String>,

    /// Tracepoint category
    #[clap(long)]
    tracepoint_category: Option<String>,

    /// Tracepoint name
    #[clap(long)]
    tracepoint_name: Option<String>,

    /// Kernel-to-user transport of the record map
    #[clap(long, value_enum)]
    transport: Option<Transport>,

    /// Render IPv6 addresses in compressed form
    #[clap(long)]
    ipv6_compressed: bool,

    /// Report records that failed to decode to the output
    #[clap(long)]
    diagnostics: bool,

    /// Forward log output from the eBPF program (unsupported with aya 0.12)
    #[clap(long)]
    ebpf_log: bool,

    /// Progress reporting interval in seconds (0 = off)
    #[clap(long)]
    progress_interval: Option<u64>,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

impl Args {
    /// Build the effective config: file (or defaults), then flags
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if let Some(output) = self.output {
            config.output.path = Some(output);
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(object) = self.ebpf_object {
            config.probe.object_path = Some(object);
        }
        if let Some(program) = self.program {
            config.probe.program = program;
        }
        if let Some(map) = self.map {
            config.probe.map = map;
        }
        if let Some(category) = self.tracepoint_category {
            config.probe.tracepoint_category = category;
        }
        if let Some(name) = self.tracepoint_name {
            config.probe.tracepoint_name = name;
        }
        if let Some(transport) = self.transport {
            config.probe.transport = transport;
        }
        if let Some(interval) = self.progress_interval {
            config.session.progress_interval_secs = interval;
        }
        if self.ipv6_compressed {
            config.session.ipv6_style = Ipv6Style::Compressed;
        }
        config.session.diagnostics |= self.diagnostics;
        config.probe.ebpf_log |= self.ebpf_log;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let config = args.into_config()?;

    print_banner();

    info!("Starting eBPF retransmit probe...");
    info!(
        "   Duration: {} seconds",
        match config.duration() {
            Some(d) => d.as_secs().to_string(),
            None => "infinite".to_string(),
        }
    );
    info!(
        "   Output: {}",
        config
            .output
            .path
            .as_ref()
            .map_or_else(|| "stdout".to_string(), |p| format!("{:?}", p))
    );
    info!("   Format: {:?}", config.output.format);
    info!("   Transport: {:?}", config.probe.transport);

    // Load eBPF program
    let mut loader = ProbeLoader::load(&config.probe)?;
    if config.probe.ebpf_log {
        loader.init_logger();
    }
    loader.attach_tracepoint(&config.probe)?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    coordinator
        .spawn_signal_listener()
        .context("Failed to install signal handlers")?;
    if let Some(duration) = config.duration() {
        coordinator.spawn_deadline(duration);
    }

    let source = loader.open_source(&config.probe)?;
    let sink = build_sink(config.output.format, config.output.path.as_deref())?;

    let decoder = RecordDecoder::new(
        config.probe.transport.framing(),
        config.session.ipv6_style,
    );
    let mut session = ConsumerSession::new(source, coordinator.subscribe(), decoder);
    let mut consumer = RingBufferConsumer::new(sink)
        .with_diagnostics(config.session.diagnostics)
        .with_progress_interval(config.session.progress_interval());

    info!("Collecting retransmit events...");

    let start_time = Instant::now();
    let result = consumer.run(&mut session).await;

    print_summary(&session.stats(), start_time.elapsed().as_secs());

    result.context("Consumer session ended with a fault")?;
    Ok(())
}

fn print_banner() {
    eprintln!(
        r#"
╔═══════════════════════════════════════════════════╗
║         eBPF TCP Retransmit Probe                 ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_summary(stats: &SessionStats, elapsed_secs: u64) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Records received:   {}", stats.received());
    info!("  Events processed:   {}", stats.processed);
    info!("  Records dropped:    {}", stats.dropped);
    info!("  Duration:           {} seconds", elapsed_secs);
    info!("");
    info!("============================================");
}
