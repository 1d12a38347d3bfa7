use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;

use crate::date_util::{day_start, floor_to_second, parse_date, start_of_day};
use crate::error::{Error, Result};

static RE_TRAILING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,5})[dD]$").unwrap());
static RE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})\.\.(\d{4}-\d{2}-\d{2})$").unwrap());

/// Earliest instant any window may reach back to.
pub const WINDOW_FLOOR: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Longest trailing window, in days, accepted from user input.
pub const MAX_TRAILING_DAYS: u32 = 36_500;

/// A half-open time range `[start, end)` in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let start = floor_to_second(start);
        let end = floor_to_second(end);
        if end < start {
            return Err(Error::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// `[midnight, now)` for the UTC day containing `now`.
    pub fn today(now: DateTime<Utc>) -> Self {
        let now = floor_to_second(now);
        Self {
            start: start_of_day(now),
            end: now,
        }
    }

    /// `[now - days, now)`, never reaching back past [`WINDOW_FLOOR`].
    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        let now = floor_to_second(now);
        let start = now
            .checked_sub_signed(Duration::days(days as i64))
            .unwrap_or(WINDOW_FLOOR)
            .max(WINDOW_FLOOR);
        Self { start, end: now }
    }

    /// Everything up to `now`.
    pub fn all_time(now: DateTime<Utc>) -> Self {
        Self {
            start: WINDOW_FLOOR,
            end: floor_to_second(now).max(WINDOW_FLOOR),
        }
    }

    /// Parse a window expression relative to `now`.
    ///
    /// Supported formats:
    /// - `today`: since UTC midnight
    /// - `7d`: trailing N days
    /// - `all`: all recorded history
    /// - `2024-01-05`: one UTC day
    /// - `2024-01-01..2024-01-31`: inclusive range of UTC days
    pub fn parse(s: &str, now: DateTime<Utc>) -> Result<Self> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "today" => return Ok(Self::today(now)),
            "all" | "all-time" => return Ok(Self::all_time(now)),
            _ => {}
        }

        if let Some(caps) = RE_TRAILING.captures(s) {
            let days: u32 = caps[1]
                .parse()
                .map_err(|_| Error::WindowParse(format!("invalid day count: {s}")))?;
            if days == 0 || days > MAX_TRAILING_DAYS {
                return Err(Error::WindowParse(format!(
                    "day count must be between 1 and {MAX_TRAILING_DAYS}: {s}"
                )));
            }
            return Ok(Self::trailing_days(now, days));
        }

        if let Some(caps) = RE_RANGE.captures(s) {
            let from = parse_date(&caps[1])
                .ok_or_else(|| Error::WindowParse(format!("invalid date: {}", &caps[1])))?;
            let to = parse_date(&caps[2])
                .ok_or_else(|| Error::WindowParse(format!("invalid date: {}", &caps[2])))?;
            if to < from {
                return Err(Error::WindowParse(format!("range ends before it starts: {s}")));
            }
            return Self::new(day_start(from), day_start(to) + Duration::days(1));
        }

        if let Some(date) = parse_date(s) {
            return Self::new(day_start(date), day_start(date) + Duration::days(1));
        }

        Err(Error::WindowParse(format!("unrecognized window: {s}")))
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// Length in whole seconds.
    pub fn seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    /// Smallest window covering both.
    pub fn union(&self, other: &Window) -> Window {
        Window {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Canonical key string, e.g. for JSON output.
    pub fn to_key(&self) -> String {
        format!(
            "{}..{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}
