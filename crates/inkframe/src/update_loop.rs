//! Continuous refresh loop for externally powered frames.
//!
//! On battery the frame renders once and shuts down; on external power it
//! stays up and cycles here. Each cycle sleeps one interval in short
//! chunks, polling external power between chunks so a pulled plug is
//! noticed within seconds rather than at the end of the interval. The
//! wake alarm is re-armed every cycle, and always before the loop exits,
//! so a shutdown that follows power loss still has a wake scheduled.

use std::time::Duration;

use ink_common::{image_source::fetch_image, FrameError};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::orchestrator::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    /// Power was lost; re-arm the alarm, then stop without refreshing.
    Draining,
    Stopped,
}

/// One cycle's sleep diagnostics: how long was slept and what each
/// power poll saw. Lives for one iteration, for the debug log only.
struct UpdateCycle {
    interval: Duration,
    slept: Duration,
    polls: Vec<bool>,
}

/// Periodic refresh driver.
pub struct UpdateLoop {
    interval: Duration,
    check_interval: Duration,
}

impl UpdateLoop {
    /// How often external power is polled while sleeping an interval.
    pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);

    pub fn from_minutes(minutes: u64) -> Self {
        Self::new(
            Duration::from_secs(minutes.saturating_mul(60)),
            Self::CHECK_INTERVAL,
        )
    }

    pub fn new(interval: Duration, check_interval: Duration) -> Self {
        Self {
            interval,
            check_interval: check_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Cycle until external power is lost.
    ///
    /// Power poll failures are fatal: with the module unreachable the loop
    /// cannot tell whether it is safe to keep running. Fetch and render
    /// failures only skip the refresh; the previous frame stays up.
    pub async fn run(&self, frame: &mut Frame) -> Result<(), FrameError> {
        let offset_seconds = self.interval.as_secs() as i64;
        let mut state = LoopState::Running;

        info!(
            "update loop started, refreshing every {}s",
            self.interval.as_secs()
        );

        loop {
            match state {
                LoopState::Running => {}
                LoopState::Draining => {
                    state = LoopState::Stopped;
                    continue;
                }
                LoopState::Stopped => break,
            }

            let mut cycle = UpdateCycle {
                interval: self.interval,
                slept: Duration::ZERO,
                polls: Vec::new(),
            };
            let mut remaining = self.interval;
            while remaining > Duration::ZERO && state == LoopState::Running {
                let chunk = remaining.min(self.check_interval);
                sleep(chunk).await;
                remaining = remaining.saturating_sub(chunk);
                cycle.slept += chunk;

                let powered = frame.client.is_externally_powered().await?;
                cycle.polls.push(powered);
                if !powered {
                    info!("external power lost, stopping after re-arm");
                    state = LoopState::Draining;
                }
            }
            debug!(
                "cycle sleep done: {:?} of {:?}, power polls {:?}",
                cycle.slept, cycle.interval, cycle.polls
            );

            // Re-arm every cycle, and on the way out, so the module always
            // holds a wake time in the near future.
            frame
                .scheduler
                .arm(&mut frame.client, offset_seconds)
                .await?;
            frame.telemetry.publish_battery(&mut frame.client).await;

            if state == LoopState::Draining {
                continue;
            }

            match fetch_image(&frame.http, &frame.image_url, frame.fetch_policy).await {
                Ok(image) => {
                    let mut display = frame.display.lock().await;
                    if let Err(e) = display.render(&image).await {
                        warn!("display refresh failed, keeping previous frame: {}", e);
                    }
                }
                Err(e) => warn!("image fetch failed, skipping this refresh: {}", e),
            }

            if !frame.client.is_externally_powered().await? {
                info!("external power lost after refresh, stopping");
                state = LoopState::Draining;
            }
        }

        info!("update loop stopped");
        Ok(())
    }
}
