use serde::Serialize;

use crate::duration::DurationStyle;
use crate::error::{Error, Result};
use crate::query::window::MAX_TRAILING_DAYS;
use crate::storage::{repository, Database};

pub const KEY_WEEKLY_DAYS: &str = "leaderboard.weekly_days";
pub const KEY_MONTHLY_DAYS: &str = "leaderboard.monthly_days";
pub const KEY_DURATION_STYLE: &str = "duration.style";

pub const KNOWN_KEYS: &[&str] = &[KEY_WEEKLY_DAYS, KEY_MONTHLY_DAYS, KEY_DURATION_STYLE];

/// Tunables stored in the `app_config` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Length of the weekly leaderboard window.
    pub weekly_days: u32,
    /// Length of the monthly leaderboard window.
    pub monthly_days: u32,
    pub duration_style: DurationStyle,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            weekly_days: 7,
            monthly_days: 30,
            duration_style: DurationStyle::Long,
        }
    }
}

fn parse_days(key: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(days) if (1..=MAX_TRAILING_DAYS).contains(&days) => Ok(days),
        _ => Err(Error::Config(format!(
            "{key} must be between 1 and {MAX_TRAILING_DAYS} days, got {value:?}"
        ))),
    }
}

impl Settings {
    /// Check a single key/value before it is stored.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        match key {
            KEY_WEEKLY_DAYS | KEY_MONTHLY_DAYS => parse_days(key, value).map(|_| ()),
            KEY_DURATION_STYLE => DurationStyle::parse(value).map(|_| ()),
            _ => Err(Error::Config(format!(
                "unknown setting {key:?} (known: {})",
                KNOWN_KEYS.join(", ")
            ))),
        }
    }

    /// Build settings from stored pairs. Unknown keys are ignored and
    /// invalid values fall back to the default with a warning.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Settings::default();
        for (key, value) in pairs {
            let applied = match key {
                KEY_WEEKLY_DAYS => parse_days(key, value).map(|d| settings.weekly_days = d),
                KEY_MONTHLY_DAYS => parse_days(key, value).map(|d| settings.monthly_days = d),
                KEY_DURATION_STYLE => {
                    DurationStyle::parse(value).map(|s| settings.duration_style = s)
                }
                _ => Ok(()),
            };
            if let Err(e) = applied {
                log::warn!("Ignoring stored setting: {e}");
            }
        }
        settings
    }

    pub async fn load(db: &Database) -> Result<Self> {
        let pairs = db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        Ok(Self::from_pairs(
            pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ))
    }
}
