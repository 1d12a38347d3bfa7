use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{compute_aggregation, AggregateEntry, GroupBy};
use crate::error::{Error, Result};
use crate::query::window::Window;
use crate::settings::Settings;
use crate::storage::Database;

/// Ranking order: total descending, then worker id, then task id ascending.
fn by_rank(a: &AggregateEntry, b: &AggregateEntry) -> Ordering {
    b.total_seconds
        .cmp(&a.total_seconds)
        .then_with(|| a.worker_id.cmp(&b.worker_id))
        .then_with(|| a.task_id.cmp(&b.task_id))
}

/// Order entries by total time. The result does not depend on the input
/// order, and ranking an already ranked list leaves it unchanged.
pub fn rank(mut entries: Vec<AggregateEntry>) -> Vec<AggregateEntry> {
    entries.sort_by(by_rank);
    entries
}

/// The entry with the most time, or `None` when nobody has any.
pub fn top_performer<I>(entries: I) -> Option<AggregateEntry>
where
    I: IntoIterator<Item = AggregateEntry>,
{
    entries
        .into_iter()
        .filter(|e| e.total_seconds > 0)
        .min_by(by_rank)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl LeaderboardPeriod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" | "today" => Ok(LeaderboardPeriod::Daily),
            "weekly" | "week" => Ok(LeaderboardPeriod::Weekly),
            "monthly" | "month" => Ok(LeaderboardPeriod::Monthly),
            other => Err(Error::WindowParse(format!("unknown leaderboard period: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardPeriod::Daily => "daily",
            LeaderboardPeriod::Weekly => "weekly",
            LeaderboardPeriod::Monthly => "monthly",
        }
    }

    /// Daily is today since midnight; weekly and monthly are trailing
    /// windows whose length comes from settings.
    pub fn window(&self, now: DateTime<Utc>, settings: &Settings) -> Window {
        match self {
            LeaderboardPeriod::Daily => Window::today(now),
            LeaderboardPeriod::Weekly => Window::trailing_days(now, settings.weekly_days),
            LeaderboardPeriod::Monthly => Window::trailing_days(now, settings.monthly_days),
        }
    }
}

impl std::fmt::Display for LeaderboardPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workers ranked by time over one period. Workers with no time in the
/// period are left out.
#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    pub period: LeaderboardPeriod,
    pub window: Window,
    pub rows: Vec<AggregateEntry>,
}

/// Per-worker totals over `window`, ranked.
pub async fn compute_ranking(
    db: &Database,
    window: Window,
    now: DateTime<Utc>,
) -> Result<Vec<AggregateEntry>> {
    let aggregation = compute_aggregation(db, window, GroupBy::Worker, now).await?;
    Ok(rank(aggregation.entries))
}

pub async fn compute_leaderboard(
    db: &Database,
    period: LeaderboardPeriod,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<Leaderboard> {
    let window = period.window(now, settings);
    let rows = compute_ranking(db, window, now)
        .await?
        .into_iter()
        .filter(|e| e.total_seconds > 0)
        .collect();
    Ok(Leaderboard {
        period,
        window,
        rows,
    })
}

/// The worker with the most time across all recorded history, running
/// sessions included up to `now`.
pub async fn compute_top_performer(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Option<AggregateEntry>> {
    let aggregation = compute_aggregation(db, Window::all_time(now), GroupBy::Worker, now).await?;
    Ok(top_performer(aggregation.entries))
}
