//! inkframe - battery backed e-paper picture frame controller.
//!
//! Boots the panel, shows the configured image, arms the next wake alarm
//! on the power module, then either keeps refreshing (external power) or
//! schedules a host shutdown (battery). SIGINT and SIGTERM close the
//! display and exit cleanly.

use clap::Parser;
use inkframe::config::{self, Config, Overrides, CONFIG_PATH};
use inkframe::orchestrator::{self, FrameContext};
use tokio::signal;
use tracing::{error, info, Level};

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "inkframe",
    version,
    about = "Battery backed e-paper picture frame controller"
)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = CONFIG_PATH)]
    config: String,

    /// EPD driver name (overrides the config file)
    #[arg(short, long)]
    epd: Option<String>,

    /// Image URL (overrides the config file)
    #[arg(short, long)]
    url: Option<String>,

    /// Minutes between wake alarms (overrides the config file)
    #[arg(short, long)]
    alarm_minutes: Option<u64>,

    /// Never shut the host down, even on battery
    #[arg(long)]
    no_shutdown: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("inkframe v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config);
    let overrides = Overrides {
        epd: cli.epd,
        url: cli.url,
        alarm_minutes: cli.alarm_minutes,
        no_shutdown: cli.no_shutdown,
    };
    let settings = match config::merge(config, overrides) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(EXIT_FAILURE);
        }
    };

    let ctx = FrameContext::new();

    let result = tokio::select! {
        result = orchestrator::run(&settings, &ctx) => result,
        signal = shutdown_signal() => {
            info!("{} received, shutting down", signal);
            Ok(())
        }
    };

    // Single close point for every exit path.
    ctx.close_display().await;

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(e) => {
            error!("frame run failed: {}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}

/// Wait for SIGINT or SIGTERM and report which one arrived.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            error!("SIGTERM handler registration failed: {}", e);
            None
        }
    };

    match sigterm {
        Some(ref mut sigterm) => {
            tokio::select! {
                _ = wait_ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        None => {
            wait_ctrl_c().await;
            "SIGINT"
        }
    }
}

async fn wait_ctrl_c() {
    if signal::ctrl_c().await.is_err() {
        // Signal handling unavailable; park rather than trigger a bogus
        // shutdown.
        std::future::pending::<()>().await;
    }
}
