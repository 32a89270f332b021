//! Typed client for the battery power module.
//!
//! Sessions are lazy: the first operation opens the daemon socket, and a
//! `Connection` failure during a call drops the session so the next retry
//! reconnects. Every operation runs under the configured [`RetryPolicy`].
//!
//! How callers treat failures:
//!
//! | Operation            | On failure                                  |
//! |----------------------|---------------------------------------------|
//! | `ensure_connected`   | fatal for the caller                        |
//! | `rtc_time`           | fatal (no alarm without a clock)            |
//! | `sync_rtc_from_host` | warn and continue with the unsynced clock   |
//! | `set_alarm`          | fatal (frame would never wake)              |
//! | `power_state`        | fatal (cannot pick an operating mode)       |
//! | `battery_level`      | warn and skip the telemetry publish         |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use ink_common::{retry_with, FrameError, RetryPolicy};
use tokio::sync::Mutex;
use tracing::debug;

use crate::transport::{
    parse_bool, parse_done, parse_percent, parse_rtc_time, ModuleCommand, PowerModuleTransport,
    SocketTransport, UnavailableTransport,
};

/// Where the frame draws its power from right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    ExternallyPowered,
    OnBattery,
}

impl PowerState {
    pub fn from_plugged(plugged: bool) -> Self {
        if plugged {
            PowerState::ExternallyPowered
        } else {
            PowerState::OnBattery
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, PowerState::ExternallyPowered)
    }
}

/// Client for the power module daemon.
///
/// The transport lives behind an async mutex so retry attempts can each
/// take a fresh lock without borrowing the client across await points.
pub struct PowerModuleClient {
    transport: Arc<Mutex<Box<dyn PowerModuleTransport>>>,
    policy: RetryPolicy,
}

impl PowerModuleClient {
    pub fn new(transport: Box<dyn PowerModuleTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            policy,
        }
    }

    /// Production client over the daemon Unix socket.
    pub fn over_socket(path: &str, io_timeout: Duration, policy: RetryPolicy) -> Self {
        Self::new(Box::new(SocketTransport::new(path, io_timeout)), policy)
    }

    /// Client whose every operation fails with `Connection`.
    pub fn unavailable() -> Self {
        Self::new(Box::new(UnavailableTransport), RetryPolicy::new(1, Duration::ZERO))
    }

    /// Open the daemon session, retrying connect failures.
    pub async fn ensure_connected(&mut self) -> Result<(), FrameError> {
        let transport = Arc::clone(&self.transport);
        retry_with(
            self.policy,
            "power module connect",
            FrameError::is_retryable,
            move || {
                let transport = Arc::clone(&transport);
                async move {
                    let mut link = transport.lock().await;
                    link.open().await
                }
            },
        )
        .await
    }

    /// Run one command under the retry policy and parse its reply.
    ///
    /// The parse runs inside the retry so a garbled reply line is retried
    /// like any other module failure.
    async fn call<T, P>(&mut self, cmd: ModuleCommand, parse: P) -> Result<T, FrameError>
    where
        P: Fn(&str) -> Result<T, FrameError> + Copy,
    {
        let transport = Arc::clone(&self.transport);
        retry_with(
            self.policy,
            cmd.describe(),
            FrameError::is_retryable,
            move || {
                let transport = Arc::clone(&transport);
                let cmd = cmd.clone();
                async move {
                    let mut link = transport.lock().await;
                    if !link.is_open() {
                        debug!("no power module session, connecting");
                        link.open().await?;
                    }
                    match link.call(&cmd).await {
                        Ok(line) => parse(&line),
                        Err(e) => {
                            if matches!(e, FrameError::Connection(_)) {
                                link.close();
                            }
                            Err(e)
                        }
                    }
                }
            },
        )
        .await
    }

    /// Current time from the module's hardware clock.
    pub async fn rtc_time(&mut self) -> Result<DateTime<FixedOffset>, FrameError> {
        self.call(ModuleCommand::GetRtcTime, parse_rtc_time).await
    }

    /// Copy the host system clock into the module RTC.
    pub async fn sync_rtc_from_host(&mut self) -> Result<(), FrameError> {
        self.call(ModuleCommand::RtcSyncFromHost, |r| {
            parse_done(r, "rtc_pi2rtc")
        })
        .await
    }

    /// Program the wake alarm. `repeat_mask` selects weekdays, one bit each.
    pub async fn set_alarm(
        &mut self,
        fire_time: DateTime<FixedOffset>,
        repeat_mask: u8,
    ) -> Result<(), FrameError> {
        self.call(
            ModuleCommand::SetRtcAlarm {
                fire_time,
                repeat_mask,
            },
            |r| parse_done(r, "rtc_alarm_set"),
        )
        .await
    }

    pub async fn power_state(&mut self) -> Result<PowerState, FrameError> {
        self.call(ModuleCommand::GetPowerPlugged, |r| {
            parse_bool(r, "battery_power_plugged").map(PowerState::from_plugged)
        })
        .await
    }

    pub async fn is_externally_powered(&mut self) -> Result<bool, FrameError> {
        Ok(self.power_state().await?.is_external())
    }

    /// Battery charge as a rounded percentage.
    pub async fn battery_level(&mut self) -> Result<u8, FrameError> {
        self.call(ModuleCommand::GetBatteryLevel, |r| {
            parse_percent(r, "battery")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use std::sync::atomic::Ordering;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_session_opens_lazily_and_once() {
        let transport = ScriptedTransport::new()
            .always("rtc_time", "2025-01-01T00:00:00+00:00");
        let opens = transport.open_counter();

        let mut client = PowerModuleClient::new(Box::new(transport), fast_policy());
        client.rtc_time().await.unwrap();
        client.rtc_time().await.unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_module_failures_are_retried_until_success() {
        let transport = ScriptedTransport::new()
            .fail_next("battery", FrameError::Module("busy".into()))
            .fail_next("battery", FrameError::Module("busy".into()))
            .reply("battery", "42.0");
        let wire = transport.wire_log();

        let mut client = PowerModuleClient::new(Box::new(transport), fast_policy());
        assert_eq!(client.battery_level().await.unwrap(), 42);
        assert_eq!(wire.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_connection_failure_drops_session_and_reconnects() {
        let transport = ScriptedTransport::new()
            .fail_opens(1)
            .always("battery_power_plugged", "true");
        let opens = transport.open_counter();

        let mut client = PowerModuleClient::new(Box::new(transport), fast_policy());
        assert!(client.is_externally_powered().await.unwrap());

        // First open fails, the retry reconnects.
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_exhaust_with_the_last_error() {
        let transport = ScriptedTransport::new()
            .always_fail("rtc_time", FrameError::Module("clock fault".into()));
        let wire = transport.wire_log();

        let mut client = PowerModuleClient::new(Box::new(transport), fast_policy());
        let err = client.rtc_time().await.unwrap_err();

        assert!(matches!(err, FrameError::Module(m) if m == "clock fault"));
        assert_eq!(wire.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_client_fails_with_connection() {
        let mut client = PowerModuleClient::unavailable();
        let err = client.ensure_connected().await.unwrap_err();
        assert!(matches!(err, FrameError::Connection(_)));

        let err = client.power_state().await.unwrap_err();
        assert!(matches!(err, FrameError::Connection(_)));
    }

    #[tokio::test]
    async fn test_battery_level_rounds_and_clamps() {
        let transport = ScriptedTransport::new()
            .reply("battery", "84.52")
            .reply("battery", "123.4");

        let mut client = PowerModuleClient::new(Box::new(transport), fast_policy());
        assert_eq!(client.battery_level().await.unwrap(), 85);
        assert_eq!(client.battery_level().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_set_alarm_sends_rfc3339_and_mask_on_the_wire() {
        let transport = ScriptedTransport::new().always("rtc_alarm_set", "done");
        let wire = transport.wire_log();

        let mut client = PowerModuleClient::new(Box::new(transport), fast_policy());
        let fire_time = DateTime::parse_from_rfc3339("2025-03-01T10:00:00+05:30").unwrap();
        client.set_alarm(fire_time, 127).await.unwrap();

        let log = wire.lock().unwrap();
        assert_eq!(log.as_slice(), ["rtc_alarm_set 2025-03-01T10:00:00+05:30 127"]);
    }

    #[tokio::test]
    async fn test_garbled_reply_is_retried() {
        let transport = ScriptedTransport::new()
            .reply("battery_power_plugged", "maybe")
            .reply("battery_power_plugged", "true");
        let wire = transport.wire_log();

        let mut client = PowerModuleClient::new(Box::new(transport), fast_policy());
        assert!(client.is_externally_powered().await.unwrap());
        assert_eq!(wire.lock().unwrap().len(), 2);
    }
}
