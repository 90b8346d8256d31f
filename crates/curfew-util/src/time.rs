//! Time utilities for curfew
//!
//! Lock windows are daily wall-clock intervals at minute resolution, possibly
//! wrapping past midnight.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `CURFEW_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations. This is useful
//! for exercising lock windows without waiting for the evening.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 21:58:00`)
//!
//! Example:
//! ```bash
//! CURFEW_MOCK_TIME="2025-12-25 21:58:00" curfewd run
//! ```

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::CurfewError;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "CURFEW_MOCK_TIME";

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Cached mock time offset from the real time when the process started.
/// This allows mock time to advance naturally.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S") {
                    if let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() {
                        let offset = mock_dt.signed_duration_since(chrono::Local::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    tracing::warn!(mock_time = %mock_time_str, "Failed to convert mock time to local timezone");
                } else {
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        expected_format = "%Y-%m-%d %H:%M:%S",
                        "Invalid mock time format"
                    );
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Time of day at minute resolution, written as `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Minutes since midnight
    pub fn minutes_from_midnight(&self) -> u32 {
        (self.hour as u32) * 60 + self.minute as u32
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.minutes_from_midnight().cmp(&other.minutes_from_midnight())
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for WallClock {
    type Err = CurfewError;

    /// Accepts `H:MM` or `HH:MM`; seconds are rejected so stored values stay
    /// at minute resolution.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CurfewError::InvalidTimeOfDay(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for WallClock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WallClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Whether `now` falls inside the daily window `[start, end)`.
///
/// `start == end` is a degenerate window and never matches. When
/// `start > end` the window wraps past midnight.
pub fn in_window(now: NaiveTime, start: WallClock, end: WallClock) -> bool {
    let cur = WallClock::from_naive_time(now);

    if start == end {
        return false;
    }
    if start < end {
        start <= cur && cur < end
    } else {
        cur >= start || cur < end
    }
}

/// Whole minutes from `now` until the next occurrence of `start`.
///
/// If `start` has already passed today (or is exactly now), the next
/// occurrence is tomorrow. Partial minutes round down.
pub fn minutes_until(now: NaiveTime, start: WallClock) -> u32 {
    let now_secs = now.num_seconds_from_midnight();
    let start_secs = start.minutes_from_midnight() * 60;

    let diff = if start_secs > now_secs {
        start_secs - now_secs
    } else {
        start_secs + MINUTES_PER_DAY * 60 - now_secs
    };

    diff / 60
}

/// A daily lock window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockWindow {
    pub start: WallClock,
    pub end: WallClock,
}

impl LockWindow {
    pub fn new(start: WallClock, end: WallClock) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, dt: &DateTime<Local>) -> bool {
        in_window(dt.time(), self.start, self.end)
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for LockWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wc(s: &str) -> WallClock {
        s.parse().unwrap()
    }

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_wall_clock_ordering() {
        assert!(wc("08:00") < wc("12:00"));
        assert!(wc("12:00") < wc("18:30"));
    }

    #[test]
    fn test_parse_wall_clock() {
        assert_eq!(wc("7:05"), WallClock::new(7, 5).unwrap());
        assert_eq!(wc("23:59"), WallClock::new(23, 59).unwrap());
        assert_eq!(wc("22:00").to_string(), "22:00");

        for bad in ["24:00", "12:60", "1200", "12:0", "", "ab:cd", "12:00:00", "123:00"] {
            assert!(bad.parse::<WallClock>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_parse_error_names_the_input() {
        let err = "25:00".parse::<WallClock>().unwrap_err();
        assert_eq!(err, CurfewError::InvalidTimeOfDay("25:00".into()));
        assert_eq!(err.to_string(), "Invalid time of day '25:00', expected HH:MM");
    }

    #[test]
    fn test_wall_clock_serde_as_string() {
        let json = serde_json::to_string(&wc("06:30")).unwrap();
        assert_eq!(json, "\"06:30\"");
        let parsed: WallClock = serde_json::from_str("\"22:15\"").unwrap();
        assert_eq!(parsed, wc("22:15"));
        assert!(serde_json::from_str::<WallClock>("\"25:00\"").is_err());
    }

    #[test]
    fn test_overnight_window_scenario() {
        let (start, end) = (wc("22:00"), wc("07:00"));
        assert!(in_window(t(23, 30, 0), start, end));
        assert!(!in_window(t(12, 0, 0), start, end));
        assert!(in_window(t(6, 59, 0), start, end));
        assert!(in_window(t(6, 59, 59), start, end));
        assert!(!in_window(t(7, 0, 0), start, end));
        assert!(in_window(t(22, 0, 0), start, end));
        assert!(!in_window(t(21, 59, 59), start, end));
    }

    #[test]
    fn test_same_day_window() {
        let (start, end) = (wc("14:00"), wc("18:00"));
        assert!(in_window(t(14, 0, 0), start, end));
        assert!(in_window(t(17, 59, 0), start, end));
        assert!(!in_window(t(18, 0, 0), start, end));
        assert!(!in_window(t(13, 59, 0), start, end));
    }

    #[test]
    fn test_degenerate_window_never_matches() {
        let same = wc("09:00");
        for minute in 0..MINUTES_PER_DAY {
            let now = t(minute / 60, minute % 60, 0);
            assert!(!in_window(now, same, same));
        }
    }

    #[test]
    fn test_window_partitions_day_into_one_region() {
        let pairs = [("22:00", "07:00"), ("00:00", "23:59"), ("13:15", "13:16"), ("23:59", "00:00")];
        for (s, e) in pairs {
            let (start, end) = (wc(s), wc(e));
            let inside: Vec<bool> = (0..MINUTES_PER_DAY)
                .map(|m| in_window(t(m / 60, m % 60, 0), start, end))
                .collect();

            // Count transitions around the circular day: one contiguous "in"
            // region means exactly two edges.
            let edges = (0..inside.len())
                .filter(|&i| inside[i] != inside[(i + 1) % inside.len()])
                .count();
            assert_eq!(edges, 2, "window {s}-{e}");

            let expected_len = (end.minutes_from_midnight() + MINUTES_PER_DAY
                - start.minutes_from_midnight())
                % MINUTES_PER_DAY;
            assert_eq!(inside.iter().filter(|b| **b).count() as u32, expected_len);
        }
    }

    #[test]
    fn test_minutes_until() {
        let start = wc("22:00");
        assert_eq!(minutes_until(t(21, 55, 0), start), 5);
        assert_eq!(minutes_until(t(21, 55, 30), start), 4);
        assert_eq!(minutes_until(t(21, 59, 59), start), 0);
        // Already passed today: wraps to tomorrow
        assert_eq!(minutes_until(t(22, 0, 0), start), 24 * 60);
        assert_eq!(minutes_until(t(23, 0, 0), start), 23 * 60);
    }

    #[test]
    fn test_lock_window_display() {
        let window = LockWindow::new(wc("22:00"), wc("07:00"));
        assert_eq!(window.to_string(), "22:00-07:00");
        assert!(window.wraps_midnight());
    }

    #[test]
    fn test_lock_window_contains_datetime() {
        let window = LockWindow::new(wc("22:00"), wc("07:00"));
        let late = Local.with_ymd_and_hms(2025, 12, 25, 23, 30, 0).unwrap();
        let noon = Local.with_ymd_and_hms(2025, 12, 25, 12, 0, 0).unwrap();
        assert!(window.contains(&late));
        assert!(!window.contains(&noon));
    }

    #[test]
    fn test_mock_time_env_var_name() {
        assert_eq!(MOCK_TIME_ENV_VAR, "CURFEW_MOCK_TIME");
    }

    #[test]
    fn test_now_consistency() {
        let t1 = now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let t2 = now();
        assert!(t2 > t1, "Time should advance forward");
    }
}
