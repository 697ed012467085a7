//! sqlmetricsd - runs configured SQL jobs and prints the resulting metrics.
//!
//! Loads a configuration file or directory, then scrapes once or on a fixed
//! interval, writing each scrape to stdout in the Prometheus text format.
//! The configuration is reloaded automatically when its source changes.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use sqlmetrics::collector::{Collector, CollectorOptions, DEFAULT_PREFIX};
use sqlmetrics::metrics::encode_text;

/// Configuration-driven SQL metrics collector.
#[derive(Parser)]
#[command(name = "sqlmetricsd", about = "Configuration-driven SQL metrics collector", version)]
struct Args {
    /// Configuration file, or directory of configuration files.
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,

    /// Metric namespace prefix for query samples and scrape metrics.
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Scrape interval in seconds. 0 scrapes once and exits.
    #[arg(short, long, default_value = "0")]
    interval: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so stdout carries only metrics.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["sqlmetricsd", "sqlmetrics"] {
        match format!("{}={}", target, level).parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_scrape(collector: &Collector) -> std::io::Result<()> {
    let text = encode_text(&collector.collect()).map_err(|e| std::io::Error::other(e.to_string()))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("sqlmetricsd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: source={}, prefix={}, interval={}s",
        args.config.display(),
        args.prefix,
        args.interval
    );

    let options = CollectorOptions {
        prefix: args.prefix,
    };
    let collector = match Collector::from_path(&args.config, options) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.interval == 0 {
        return match print_scrape(&collector) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Failed to write metrics: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let interval = Duration::from_secs(args.interval);
    let mut scrape_count: u64 = 0;

    while running.load(Ordering::SeqCst) {
        scrape_count += 1;
        if let Err(e) = print_scrape(&collector) {
            error!("Failed to write metrics: {}", e);
            return ExitCode::FAILURE;
        }
        let counters = collector.reload_counters();
        info!(
            "Scrape #{} done (reloads: {} ok, {} failed)",
            scrape_count,
            counters.success(),
            counters.failure()
        );

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
