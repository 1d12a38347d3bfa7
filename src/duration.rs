use serde::Serialize;

use crate::error::{Error, Result};

/// A number of seconds split into clock components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DurationParts {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl DurationParts {
    /// Negative input is treated as zero.
    pub fn from_seconds(total: i64) -> Self {
        let total = total.max(0);
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }
}

/// How durations are rendered for people.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationStyle {
    /// `1 hour, 2 minutes, 5 seconds`
    #[default]
    Long,
    /// `01:02:05`
    Clock,
    /// `1h 2m 5s`
    Compact,
}

impl DurationStyle {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(DurationStyle::Long),
            "clock" => Ok(DurationStyle::Clock),
            "compact" => Ok(DurationStyle::Compact),
            other => Err(Error::Config(format!(
                "unknown duration style '{other}' (expected long, clock or compact)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DurationStyle::Long => "long",
            DurationStyle::Clock => "clock",
            DurationStyle::Compact => "compact",
        }
    }

    pub fn format(&self, seconds: i64) -> String {
        match self {
            DurationStyle::Long => format_duration(seconds),
            DurationStyle::Clock => format_clock(seconds),
            DurationStyle::Compact => format_compact(seconds),
        }
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Render seconds as `2 hours, 1 minute, 5 seconds`, omitting zero
/// components. Zero renders as `0 seconds`.
pub fn format_duration(seconds: i64) -> String {
    let p = DurationParts::from_seconds(seconds);
    let mut parts = Vec::new();
    if p.hours > 0 {
        parts.push(plural(p.hours, "hour"));
    }
    if p.minutes > 0 {
        parts.push(plural(p.minutes, "minute"));
    }
    if p.seconds > 0 || parts.is_empty() {
        parts.push(plural(p.seconds, "second"));
    }
    parts.join(", ")
}

/// Render seconds as `HH:MM:SS`. Hours are not capped at 99.
pub fn format_clock(seconds: i64) -> String {
    let p = DurationParts::from_seconds(seconds);
    format!("{:02}:{:02}:{:02}", p.hours, p.minutes, p.seconds)
}

/// Render seconds as `1h 2m 5s`; the seconds component is always present.
pub fn format_compact(seconds: i64) -> String {
    let p = DurationParts::from_seconds(seconds);
    let mut parts = Vec::new();
    if p.hours > 0 {
        parts.push(format!("{}h", p.hours));
    }
    if p.minutes > 0 {
        parts.push(format!("{}m", p.minutes));
    }
    parts.push(format!("{}s", p.seconds));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts() {
        assert_eq!(
            DurationParts::from_seconds(3725),
            DurationParts {
                hours: 1,
                minutes: 2,
                seconds: 5
            }
        );
        assert_eq!(DurationParts::from_seconds(-5), DurationParts::from_seconds(0));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0 seconds");
        assert_eq!(format_duration(1), "1 second");
        assert_eq!(format_duration(60), "1 minute");
        assert_eq!(format_duration(3725), "1 hour, 2 minutes, 5 seconds");
        assert_eq!(format_duration(7200), "2 hours");
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(3725), "01:02:05");
        assert_eq!(format_clock(360_000), "100:00:00");
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_compact(0), "0s");
        assert_eq!(format_compact(3605), "1h 5s");
        assert_eq!(format_compact(125), "2m 5s");
    }

    #[test]
    fn test_style_parse() {
        assert_eq!(DurationStyle::parse("Clock").unwrap(), DurationStyle::Clock);
        assert_eq!(DurationStyle::parse(" long ").unwrap(), DurationStyle::Long);
        assert!(DurationStyle::parse("fancy").is_err());
        assert_eq!(DurationStyle::Compact.format(61), "1m 1s");
    }
}
