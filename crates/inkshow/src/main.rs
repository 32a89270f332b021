//! inkshow - put an image on an e-paper panel without the frame controller.
//!
//! Renders a local file once, or polls a URL on an interval until
//! interrupted. Useful for trying layouts against the mock driver and for
//! smoke-testing a panel after wiring it up.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ink_common::display::{list_supported, DisplayManager};
use ink_common::image_source::fetch_image;
use ink_common::{FrameError, RetryPolicy};
use tracing::{error, info, Level};

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "inkshow", version, about = "Show an image on an e-paper panel")]
struct Cli {
    /// List supported EPD drivers and exit
    #[arg(short, long)]
    list: bool,

    /// EPD driver name
    #[arg(short, long)]
    epd: Option<String>,

    /// Local image file to render once
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// URL to fetch and render on an interval
    #[arg(short, long)]
    remote: Option<String>,

    /// Seconds between remote refreshes
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,

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

    if cli.list {
        for name in list_supported() {
            println!("{}", name);
        }
        std::process::exit(EXIT_SUCCESS);
    }

    let mut display = DisplayManager::new();
    let result = run(&cli, &mut display).await;
    display.close().await;

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(e) => {
            error!("{}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}

async fn run(cli: &Cli, display: &mut DisplayManager) -> Result<(), FrameError> {
    let epd = cli
        .epd
        .as_deref()
        .ok_or_else(|| FrameError::Validation("no EPD driver named; pass --epd".into()))?;
    display.open(epd)?;

    if let Some(path) = &cli.image {
        let image = image::open(path)
            .map_err(|e| FrameError::Fetch(format!("open {}: {}", path.display(), e)))?;
        display.render(&image).await?;
        info!("rendered {}", path.display());
        return Ok(());
    }

    if let Some(url) = &cli.remote {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FrameError::Fetch(format!("HTTP client: {}", e)))?;
        let interval = Duration::from_secs(cli.interval_secs.max(1));

        loop {
            match fetch_image(&http, url, RetryPolicy::default()).await {
                Ok(image) => display.render(&image).await?,
                Err(e) => error!("fetch failed, keeping previous frame: {}", e),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    return Ok(());
                }
            }
        }
    }

    Err(FrameError::Validation(
        "nothing to do: pass --image or --remote".into(),
    ))
}
