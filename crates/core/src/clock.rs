//! Wall-clock rendering of the simulation clock.
//!
//! The store clock counts from zero. Tools that print dates (`dmesg -T`,
//! `ipmitool sel list`, `sinfo -R`) anchor it at a fixed boot time so output
//! stays deterministic.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Unix time of simulated boot: 2024-03-01 08:00:00 UTC.
pub const BOOT_UNIX_SECS: u64 = 1_709_280_000;

/// Calendar time derived from the simulation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock(DateTime<Utc>);

impl WallClock {
    /// Wall time `since_boot` after simulated boot. Clamps at chrono's
    /// latest representable instant.
    pub fn at(since_boot: Duration) -> Self {
        let unix = BOOT_UNIX_SECS.saturating_add(since_boot.as_secs());
        let time = i64::try_from(unix)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self(time)
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// `Fri Mar  1 08:00:00 2024`, as printed by `dmesg -T`.
    pub fn ctime(&self) -> String {
        self.0.format("%a %b %e %H:%M:%S %Y").to_string()
    }

    /// `2024-03-01T08:00:00`, as printed by Slurm.
    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S").to_string()
    }

    /// `03/01/2024`, as printed by `ipmitool sel`.
    pub fn us_date(&self) -> String {
        self.0.format("%m/%d/%Y").to_string()
    }

    /// `08:00:00`.
    pub fn time_of_day(&self) -> String {
        self.0.format("%H:%M:%S").to_string()
    }
}

/// `[  123.456789]` kernel-log uptime prefix.
pub fn uptime_stamp(secs: f64) -> String {
    format!("[{secs:>12.6}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Weekday};

    #[test]
    fn test_boot_time() {
        let t = WallClock::at(Duration::ZERO);
        assert_eq!(t.ctime(), "Fri Mar  1 08:00:00 2024");
        assert_eq!(t.iso(), "2024-03-01T08:00:00");
        assert_eq!(t.us_date(), "03/01/2024");
        assert_eq!(t.time_of_day(), "08:00:00");
    }

    #[test]
    fn test_rollover() {
        // 16h later crosses midnight into Saturday.
        let t = WallClock::at(Duration::from_secs(16 * 3600 + 61));
        assert_eq!(t.iso(), "2024-03-02T00:01:01");
        assert_eq!(t.date_time().weekday(), Weekday::Sat);
        // 2024 is a leap year but March has 31 days.
        let t = WallClock::at(Duration::from_secs(31 * 86_400));
        assert_eq!(t.iso(), "2024-04-01T08:00:00");
    }

    #[test]
    fn test_far_future_does_not_panic() {
        let t = WallClock::at(Duration::MAX);
        assert_eq!(t.date_time(), DateTime::<Utc>::MAX_UTC);
        assert!(!t.ctime().is_empty());
    }

    #[test]
    fn test_uptime_stamp() {
        assert_eq!(uptime_stamp(12.5), "[   12.500000]");
    }
}
