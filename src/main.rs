use anyhow::Result;
use clap::Parser;
use motioncam::app::{build_driver, spawn_event_logger, spawn_signal_handlers};
use motioncam::{EventBus, EventFilter, EventReceiver, MotionCamConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "motioncam")]
#[command(about = "Motion-triggered camera recorder with pre-roll buffering")]
#[command(version)]
#[command(long_about = "Watches a camera for motion and records clips while motion \
continues, starting each clip with buffered pre-roll footage from the latest keyframe. \
A cooldown after every clip suppresses immediate re-triggering.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "motioncam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the recorder")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build components but don't start the loop
    #[arg(long, help = "Perform dry run - build all components, then exit")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily-rolling files in this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily-rolling log files")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting motioncam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match MotionCamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let event_bus = EventBus::new(config.system.event_bus_capacity);
    let cancel = CancellationToken::new();

    // Motion edges and cooldown ends are only logged with --debug
    let filter = if args.debug {
        EventFilter::All
    } else {
        EventFilter::EventTypes(vec![
            "recording_started",
            "recording_stopped",
            "recording_failed",
            "capture_failed",
            "shutdown_requested",
        ])
    };
    let event_logger = spawn_event_logger(EventReceiver::new(
        event_bus.subscribe(),
        filter,
        "event-log".to_string(),
    ));

    let mut driver = build_driver(&config, event_bus, cancel.clone()).map_err(|e| {
        error!("Failed to build recorder: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components built but not started");
        println!("✓ Dry run completed successfully - all components built");
        return Ok(());
    }

    spawn_signal_handlers(cancel);

    let exit_code = match driver.run().await {
        Ok(reason) => {
            info!("Recorder stopped: {}", reason);
            0
        }
        Err(e) => {
            error!("Recorder stopped on error: {}", e);
            1
        }
    };

    let stats = driver.recording_stats();
    info!(
        "{} recordings completed, {} failed",
        stats.recordings_completed, stats.recordings_failed
    );

    // Dropping the driver closes the event bus; let the logger drain it
    drop(driver);
    if let Ok(logged) = event_logger.await {
        info!("{} events logged", logged);
    }

    // Flush buffered log lines before exiting
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("motioncam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_file {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "motioncam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# motioncam configuration file");
    println!("# Every key is optional; values shown are the defaults.");
    println!("# Environment overrides use MOTIONCAM_<SECTION>__<KEY>, e.g.");
    println!("# MOTIONCAM_DETECTION__SENSITIVITY_THRESHOLD=800");
    println!("# Pre-roll starts at the newest keyframe: with encoder = \"mjpeg\" only the");
    println!("# last buffered frame precedes a trigger, so keep pre_roll_window_seconds small.");
    println!();
    print!("{}", MotionCamConfig::default().to_toml()?);
    Ok(())
}
