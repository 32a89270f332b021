//! Frame orchestrator: one boot-to-shutdown run of the picture frame.
//!
//! Boot order is display first, then the first image (placeholder if the
//! fetch fails), then the power module. Once the wake alarm is armed the
//! frame either enters the continuous update loop (external power) or
//! falls through to the shutdown decision (battery).
//!
//! The orchestrator never closes the display: the caller owns the panel
//! through [`FrameContext`] and releases it exactly once on the way out,
//! whatever path got it there.

use std::sync::Arc;
use std::time::Duration;

use ink_common::display::DisplayManager;
use ink_common::image_source::{fetch_image, placeholder_image};
use ink_common::{FrameError, RetryPolicy};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::alarm::AlarmScheduler;
use crate::config::Settings;
use crate::net::ConnectivityProbe;
use crate::power::PowerModuleClient;
use crate::telemetry::Telemetry;
use crate::update_loop::UpdateLoop;

/// Handles that outlive a run so the process exit path can release
/// hardware no matter how the run ended.
pub struct FrameContext {
    pub display: Arc<Mutex<DisplayManager>>,
}

impl FrameContext {
    pub fn new() -> Self {
        Self {
            display: Arc::new(Mutex::new(DisplayManager::new())),
        }
    }

    /// Release the panel. Idempotent, so every exit path may call it.
    pub async fn close_display(&self) {
        self.display.lock().await.close().await;
    }
}

impl Default for FrameContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one run of the frame needs.
pub struct Frame {
    pub display: Arc<Mutex<DisplayManager>>,
    pub client: PowerModuleClient,
    pub scheduler: AlarmScheduler,
    pub http: reqwest::Client,
    pub image_url: String,
    pub fetch_policy: RetryPolicy,
    pub telemetry: Telemetry,
}

fn build_http_client() -> Result<reqwest::Client, FrameError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("inkframe/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FrameError::Fetch(format!("HTTP client: {}", e)))
}

fn build_power_client(settings: &Settings) -> PowerModuleClient {
    if settings.power.enabled {
        PowerModuleClient::over_socket(
            &settings.power.socket,
            settings.power.io_timeout(),
            settings.power.retry_policy(),
        )
    } else {
        warn!("power module support disabled, running display-only");
        PowerModuleClient::unavailable()
    }
}

/// Boot the frame and run it to completion.
pub async fn run(settings: &Settings, ctx: &FrameContext) -> Result<(), FrameError> {
    let http = build_http_client()?;
    let fetch_policy = RetryPolicy::default();

    // Display comes up first so something is on the panel as early as
    // possible after a cold wake.
    let (width, height) = {
        let mut display = ctx.display.lock().await;
        display.open(&settings.epd)?;
        display
            .dimensions()
            .ok_or_else(|| FrameError::Display("no EPD driver loaded".into()))?
    };

    let initial = match fetch_image(&http, &settings.image_url, fetch_policy).await {
        Ok(image) => image,
        Err(e) => {
            warn!("initial image fetch failed, showing placeholder: {}", e);
            placeholder_image(width, height)
        }
    };
    ctx.display.lock().await.render(&initial).await?;

    let probe = ConnectivityProbe::new(
        http.clone(),
        settings.connectivity.check_url.clone(),
        settings.connectivity.poll_interval(),
    );
    let mut frame = Frame {
        display: Arc::clone(&ctx.display),
        client: build_power_client(settings),
        scheduler: AlarmScheduler::new(probe),
        http,
        image_url: settings.image_url.clone(),
        fetch_policy,
        telemetry: Telemetry::new(settings.mqtt.clone()),
    };
    if !frame.telemetry.is_enabled() {
        info!("no MQTT broker configured, battery telemetry disabled");
    }

    let update_loop = UpdateLoop::from_minutes(settings.interval_minutes);
    run_frame(settings, &mut frame, &update_loop).await
}

/// Run a booted frame: arm the wake alarm, then either cycle on external
/// power or fall through to the shutdown decision on battery.
pub async fn run_frame(
    settings: &Settings,
    frame: &mut Frame,
    update_loop: &UpdateLoop,
) -> Result<(), FrameError> {
    let offset_seconds = update_loop.interval().as_secs() as i64;
    frame
        .scheduler
        .arm(&mut frame.client, offset_seconds)
        .await?;

    frame.telemetry.publish_discovery().await;
    frame.telemetry.publish_battery(&mut frame.client).await;

    if frame.client.is_externally_powered().await? {
        info!("externally powered, entering continuous update mode");
        update_loop.run(frame).await?;
    } else {
        info!("on battery, single refresh complete");
    }

    decide_shutdown(settings, frame).await
}

/// On battery the host powers down so the wake alarm can start it cold.
/// A replug between the last refresh and this check cancels the shutdown.
async fn decide_shutdown(settings: &Settings, frame: &mut Frame) -> Result<(), FrameError> {
    if settings.suppress_shutdown {
        info!("shutdown suppressed, leaving the host running");
        return Ok(());
    }
    if frame.client.is_externally_powered().await? {
        info!("external power restored, shutdown cancelled");
        return Ok(());
    }
    schedule_host_shutdown(settings.shutdown_delay_minutes).await;
    Ok(())
}

async fn schedule_host_shutdown(delay_minutes: u64) {
    info!(
        "on battery, scheduling host shutdown in {} minute(s)",
        delay_minutes
    );
    match Command::new("sudo")
        .args(["shutdown", &format!("+{}", delay_minutes)])
        .status()
        .await
    {
        Ok(status) if status.success() => {}
        Ok(status) => error!("shutdown command exited with {}", status),
        Err(e) => error!("failed to schedule shutdown: {}", e),
    }
}
