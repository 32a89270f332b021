//! Wake alarm scheduling against the power module RTC.
//!
//! The module clock is authoritative for the fire time: the host clock may
//! drift while the frame is powered down, so the alarm is computed from a
//! fresh RTC read taken after the best-effort host sync.

use chrono::{DateTime, FixedOffset};
use ink_common::FrameError;
use tracing::{info, warn};

use crate::net::ConnectivityProbe;
use crate::power::PowerModuleClient;

/// Repeat mask with all seven weekday bits set, so the alarm fires daily.
pub const REPEAT_EVERY_DAY: u8 = 127;

/// Fire time `offset_seconds` after `base`, in the base's own offset.
pub fn compute_fire_time(
    base: DateTime<FixedOffset>,
    offset_seconds: i64,
) -> Result<DateTime<FixedOffset>, FrameError> {
    if offset_seconds < 0 {
        return Err(FrameError::Validation(format!(
            "alarm offset must not be negative, got {}s",
            offset_seconds
        )));
    }
    let delta = chrono::Duration::try_seconds(offset_seconds).ok_or_else(|| {
        FrameError::Validation(format!("alarm offset {}s out of range", offset_seconds))
    })?;
    base.checked_add_signed(delta).ok_or_else(|| {
        FrameError::Validation(format!(
            "alarm offset {}s overflows the fire time",
            offset_seconds
        ))
    })
}

/// Arms the daily wake alarm once the network is reachable.
pub struct AlarmScheduler {
    probe: ConnectivityProbe,
}

impl AlarmScheduler {
    pub fn new(probe: ConnectivityProbe) -> Self {
        Self { probe }
    }

    /// Program the module to wake the frame `offset_seconds` from now.
    ///
    /// Waits for connectivity first: the host clock is only trustworthy
    /// for the RTC sync once NTP has had a chance to run. The sync itself
    /// is best-effort, everything else is fatal.
    pub async fn arm(
        &self,
        client: &mut PowerModuleClient,
        offset_seconds: i64,
    ) -> Result<DateTime<FixedOffset>, FrameError> {
        self.probe.wait_until_online().await;
        client.ensure_connected().await?;

        let initial = client.rtc_time().await?;

        match client.sync_rtc_from_host().await {
            Ok(()) => info!("module RTC synced from host clock"),
            Err(e) => warn!(
                "RTC sync failed, alarm will use the unsynced module clock: {}",
                e
            ),
        }

        // Authoritative re-read: the sync may have stepped the clock.
        let base = client.rtc_time().await?;
        if base != initial {
            info!("module RTC adjusted from {} to {}", initial, base);
        }

        let fire_time = compute_fire_time(base, offset_seconds)?;
        client.set_alarm(fire_time, REPEAT_EVERY_DAY).await?;

        info!(
            "wake alarm set for {} (repeat mask {})",
            fire_time.to_rfc3339(),
            REPEAT_EVERY_DAY
        );
        Ok(fire_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap()
    }

    #[test]
    fn test_fire_time_is_base_plus_offset() {
        let base = at("2025-01-01T00:00:00+00:00");
        let fire = compute_fire_time(base, 300).unwrap();
        assert_eq!(fire.to_rfc3339(), "2025-01-01T00:05:00+00:00");
    }

    #[test]
    fn test_fire_time_keeps_the_base_offset() {
        let base = at("2025-03-01T09:55:00+05:30");
        let fire = compute_fire_time(base, 300).unwrap();
        assert_eq!(fire.to_rfc3339(), "2025-03-01T10:00:00+05:30");
        assert_eq!(fire.offset(), base.offset());
    }

    #[test]
    fn test_negative_offset_is_rejected() {
        let base = at("2025-01-01T00:00:00+00:00");
        let err = compute_fire_time(base, -1).unwrap_err();
        assert!(matches!(err, FrameError::Validation(_)));
    }

    #[test]
    fn test_zero_offset_fires_immediately() {
        let base = at("2025-01-01T00:00:00+00:00");
        assert_eq!(compute_fire_time(base, 0).unwrap(), base);
    }

    #[test]
    fn test_absurd_offset_is_rejected_not_panicked() {
        let base = at("2025-01-01T00:00:00+00:00");
        let err = compute_fire_time(base, i64::MAX).unwrap_err();
        assert!(matches!(err, FrameError::Validation(_)));
    }
}
