pub mod rank;
pub mod split;
pub mod types;

pub use rank::{Leaderboard, LeaderboardPeriod};
pub use split::{split_by_day, DaySegment, DaySplit};
pub use types::*;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;

use crate::date_util::floor_to_second;
use crate::error::Result;
use crate::query::builder::SessionFilter;
use crate::query::window::{Window, WINDOW_FLOOR};
use crate::session::{machine, Session};
use crate::storage::{repository, Database};

type GroupKey = (Option<String>, Option<String>);

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    today: i64,
    window: i64,
}

/// Folds sessions into per-group totals for a window and for today in a
/// single pass.
///
/// Each session's effective interval (running sessions end at `now`) is
/// clamped to the window, split at UTC midnights and the day segments are
/// summed. Sessions with an interval that ends before it starts contribute
/// nothing and are reported in [`Aggregation::flagged`].
#[derive(Debug)]
pub struct Aggregator {
    window: Window,
    today: Window,
    group_by: GroupBy,
    now: DateTime<Utc>,
    totals: BTreeMap<GroupKey, Totals>,
    daily: BTreeMap<NaiveDate, i64>,
    flagged: Vec<FlaggedSession>,
    scanned: usize,
}

impl Aggregator {
    pub fn new(window: Window, group_by: GroupBy, now: DateTime<Utc>) -> Self {
        let now = floor_to_second(now);
        Self {
            window,
            today: Window::today(now),
            group_by,
            now,
            totals: BTreeMap::new(),
            daily: BTreeMap::new(),
            flagged: Vec::new(),
            scanned: 0,
        }
    }

    /// Range the store has to be scanned over to feed both the window and
    /// today.
    pub fn scan_window(&self) -> Window {
        self.window.union(&self.today)
    }

    pub fn push(&mut self, session: &Session) {
        self.scanned += 1;
        let Some(start) = session.start_time else {
            return;
        };
        let Some(end) = machine::effective_end(session, self.now) else {
            self.flag(session, "stopped session has no end time".to_string());
            return;
        };
        let start = floor_to_second(start);
        if end < start {
            self.flag(session, format!("interval ends at {end} before it starts at {start}"));
            return;
        }

        let window = self.window;
        let today = self.today;
        let total = self.fold_segments(&window, start, end, true);
        let today = self.fold_segments(&today, start, end, false);
        if total == 0 && today == 0 {
            return;
        }

        let key = (
            self.group_by
                .by_worker()
                .then(|| session.worker_id.clone()),
            self.group_by.by_task().then(|| session.task_id.clone()),
        );
        let slot = self.totals.entry(key).or_default();
        slot.window += total;
        slot.today += today;
    }

    /// Sum the day segments of `[start, end)` clamped to `window`.
    fn fold_segments(
        &mut self,
        window: &Window,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        record_days: bool,
    ) -> i64 {
        let clamped_start = start.max(window.start).max(WINDOW_FLOOR);
        let clamped_end = end.min(window.end);
        if clamped_end <= clamped_start {
            return 0;
        }
        let Ok(segments) = split_by_day(clamped_start, clamped_end, ()) else {
            return 0;
        };
        let mut sum = 0;
        for seg in segments {
            if record_days {
                *self.daily.entry(seg.date).or_default() += seg.seconds;
            }
            sum += seg.seconds;
        }
        sum
    }

    fn flag(&mut self, session: &Session, reason: String) {
        log::warn!(
            "Skipping session {:?} ({}/{}): {reason}",
            session.id,
            session.worker_id,
            session.task_id
        );
        self.flagged.push(FlaggedSession {
            session_id: session.id,
            worker_id: session.worker_id.clone(),
            task_id: session.task_id.clone(),
            reason,
        });
    }

    pub fn finish(self) -> Aggregation {
        let entries = self
            .totals
            .into_iter()
            .map(|((worker_id, task_id), t)| AggregateEntry {
                worker_id,
                task_id,
                worker_name: None,
                task_title: None,
                today_seconds: t.today,
                total_seconds: t.window,
            })
            .collect();
        Aggregation {
            window: self.window,
            today: self.today,
            group_by: self.group_by,
            entries,
            daily: self
                .daily
                .into_iter()
                .map(|(date, seconds)| DailyTotal { date, seconds })
                .collect(),
            flagged: self.flagged,
            sessions_scanned: self.scanned,
        }
    }
}

/// Aggregate an in-memory set of sessions.
pub fn aggregate<'a, I>(sessions: I, window: Window, group_by: GroupBy, now: DateTime<Utc>) -> Aggregation
where
    I: IntoIterator<Item = &'a Session>,
{
    let mut agg = Aggregator::new(window, group_by, now);
    for session in sessions {
        agg.push(session);
    }
    agg.finish()
}

/// Stream the sessions matching `filter` (narrowed to the aggregator's scan
/// window) through the aggregator.
fn fold_store(
    conn: &Connection,
    filter: SessionFilter,
    mut agg: Aggregator,
) -> std::result::Result<Aggregation, rusqlite::Error> {
    let scan = agg.scan_window();
    let filter = filter.overlapping(scan.start, scan.end);
    repository::for_each_session(conn, &filter, |s| agg.push(&s))?;
    Ok(agg.finish())
}

fn annotate(conn: &Connection, entries: &mut [AggregateEntry]) -> std::result::Result<(), rusqlite::Error> {
    let names = repository::worker_names(conn)?;
    let titles = repository::task_titles(conn)?;
    for entry in entries.iter_mut() {
        entry.worker_name = entry.worker_id.as_ref().and_then(|id| names.get(id).cloned());
        entry.task_title = entry.task_id.as_ref().and_then(|id| titles.get(id).cloned());
    }
    Ok(())
}

/// Aggregate stored sessions over `window`, grouped by `group_by`.
pub async fn compute_aggregation(
    db: &Database,
    window: Window,
    group_by: GroupBy,
    now: DateTime<Utc>,
) -> Result<Aggregation> {
    db.read_tx(move |tx| {
        let agg = Aggregator::new(window, group_by, now);
        let mut result = fold_store(tx, SessionFilter::new(), agg)?;
        annotate(tx, &mut result.entries)?;
        log::debug!(
            "Aggregated {} sessions over {} into {} entries ({} flagged)",
            result.sessions_scanned,
            result.window,
            result.entries.len(),
            result.flagged.len()
        );
        Ok(result)
    })
    .await
}

/// Every worker's today and all-time seconds on every task that has time.
pub async fn compute_task_overview(db: &Database, now: DateTime<Utc>) -> Result<Vec<TaskOverview>> {
    let aggregation = compute_aggregation(db, Window::all_time(now), GroupBy::WorkerTask, now).await?;

    let mut by_task: BTreeMap<String, TaskOverview> = BTreeMap::new();
    for entry in aggregation.entries {
        let (Some(worker_id), Some(task_id)) = (entry.worker_id, entry.task_id) else {
            continue;
        };
        let overview = by_task
            .entry(task_id.clone())
            .or_insert_with(|| TaskOverview {
                task_id,
                task_title: entry.task_title.clone(),
                workers: Vec::new(),
            });
        overview.workers.push(WorkerTime {
            worker_id,
            worker_name: entry.worker_name,
            today_seconds: entry.today_seconds,
            total_seconds: entry.total_seconds,
        });
    }
    Ok(by_task.into_values().collect())
}

/// Today and all-time seconds for each task assigned to `worker_id`.
/// Assigned tasks without time are listed with zeros; tasks with time that
/// are not assigned are appended after them.
pub async fn compute_worker_breakdown(
    db: &Database,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<TaskBreakdown>> {
    let worker_id = worker_id.to_string();
    db.read_tx(move |tx| {
        let agg = Aggregator::new(Window::all_time(now), GroupBy::Task, now);
        let aggregation = fold_store(tx, SessionFilter::new().worker(&worker_id), agg)?;
        let mut totals: BTreeMap<String, AggregateEntry> = aggregation
            .entries
            .into_iter()
            .filter_map(|e| e.task_id.clone().map(|id| (id, e)))
            .collect();

        let mut rows = Vec::new();
        for task in repository::list_assigned_tasks(tx, &worker_id)? {
            let entry = totals.remove(&task.task_id);
            rows.push(TaskBreakdown {
                task_id: task.task_id,
                title: task.title,
                status: task.status,
                today_seconds: entry.as_ref().map_or(0, |e| e.today_seconds),
                total_seconds: entry.as_ref().map_or(0, |e| e.total_seconds),
            });
        }
        for (task_id, entry) in totals {
            let task = repository::get_task(tx, &task_id)?;
            rows.push(TaskBreakdown {
                title: task.as_ref().map_or_else(|| task_id.clone(), |t| t.title.clone()),
                status: task.map(|t| t.status).unwrap_or_default(),
                task_id,
                today_seconds: entry.today_seconds,
                total_seconds: entry.total_seconds,
            });
        }
        Ok(rows)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use chrono::{Duration, TimeZone};

    fn ts(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    fn held(worker: &str, task: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Session {
        Session {
            id: None,
            worker_id: worker.into(),
            task_id: task.into(),
            status: SessionStatus::OnHold,
            start_time: Some(start),
            end_time: Some(end),
            elapsed_seconds: (end - start).num_seconds().max(0),
        }
    }

    fn running(worker: &str, task: &str, start: DateTime<Utc>) -> Session {
        Session {
            status: SessionStatus::InProgress,
            end_time: None,
            elapsed_seconds: 0,
            ..held(worker, task, start, start)
        }
    }

    #[test]
    fn test_today_and_total_in_one_pass() {
        let now = ts(2, 12, 0);
        let sessions = vec![
            // Spans midnight: 1h yesterday, 1h30 today.
            held("alice", "t1", ts(1, 23, 0), ts(2, 1, 30)),
            // Entirely yesterday.
            held("alice", "t2", ts(1, 9, 0), ts(1, 10, 0)),
            // Running since 11:00.
            running("bob", "t1", ts(2, 11, 0)),
        ];
        let agg = aggregate(&sessions, Window::all_time(now), GroupBy::Worker, now);

        let alice = agg.entry_for_worker("alice").unwrap();
        assert_eq!(alice.total_seconds, 3600 + 5400 + 3600);
        assert_eq!(alice.today_seconds, 5400);

        let bob = agg.entry_for_worker("bob").unwrap();
        assert_eq!(bob.total_seconds, 3600);
        assert_eq!(bob.today_seconds, 3600);
        assert!(agg.flagged.is_empty());
        assert_eq!(agg.sessions_scanned, 3);
    }

    #[test]
    fn test_window_clamps_both_ends() {
        let now = ts(5, 12, 0);
        let window = Window::new(ts(2, 0, 0), ts(3, 0, 0)).unwrap();
        let sessions = vec![held("alice", "t1", ts(1, 22, 0), ts(3, 2, 0))];
        let agg = aggregate(&sessions, window, GroupBy::Worker, now);
        assert_eq!(agg.entries.len(), 1);
        assert_eq!(agg.entries[0].total_seconds, 86_400);
        assert_eq!(agg.entries[0].today_seconds, 0);
        assert_eq!(
            agg.daily,
            vec![DailyTotal {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                seconds: 86_400
            }]
        );
    }

    #[test]
    fn test_sessions_outside_window_produce_no_entry() {
        let now = ts(10, 12, 0);
        let sessions = vec![held("alice", "t1", ts(1, 9, 0), ts(1, 10, 0))];
        let agg = aggregate(&sessions, Window::trailing_days(now, 7), GroupBy::Worker, now);
        assert!(agg.entries.is_empty());
    }

    #[test]
    fn test_running_session_counts_to_now() {
        let now = ts(2, 1, 0) + Duration::milliseconds(700);
        let sessions = vec![running("alice", "t1", ts(1, 23, 30))];
        let agg = aggregate(&sessions, Window::all_time(now), GroupBy::Worker, now);
        let alice = agg.entry_for_worker("alice").unwrap();
        assert_eq!(alice.total_seconds, 5400);
        assert_eq!(alice.today_seconds, 3600);
        assert_eq!(alice.total_seconds, machine::live_elapsed(&sessions[0], now));
    }

    #[test]
    fn test_negative_interval_is_flagged_not_subtracted() {
        let now = ts(2, 12, 0);
        let sessions = vec![
            held("alice", "t1", ts(2, 9, 0), ts(2, 10, 0)),
            held("alice", "t2", ts(2, 11, 0), ts(2, 10, 0)),
            // Clock skew: running session started in the future.
            running("bob", "t1", ts(2, 13, 0)),
        ];
        let agg = aggregate(&sessions, Window::all_time(now), GroupBy::Worker, now);
        assert_eq!(agg.entry_for_worker("alice").unwrap().total_seconds, 3600);
        assert!(agg.entry_for_worker("bob").is_none());
        assert_eq!(agg.flagged.len(), 2);
        assert_eq!(agg.flagged[0].task_id, "t2");
    }

    #[test]
    fn test_not_started_sessions_are_ignored() {
        let now = ts(2, 12, 0);
        let sessions = vec![Session::new("alice", "t1")];
        let agg = aggregate(&sessions, Window::all_time(now), GroupBy::Worker, now);
        assert!(agg.entries.is_empty());
        assert!(agg.flagged.is_empty());
    }

    #[test]
    fn test_group_by_task_and_worker_task() {
        let now = ts(2, 12, 0);
        let sessions = vec![
            held("alice", "t1", ts(2, 8, 0), ts(2, 9, 0)),
            held("bob", "t1", ts(2, 8, 0), ts(2, 8, 30)),
            held("alice", "t2", ts(2, 9, 0), ts(2, 9, 10)),
        ];

        let by_task = aggregate(&sessions, Window::all_time(now), GroupBy::Task, now);
        assert_eq!(by_task.entries.len(), 2);
        assert_eq!(by_task.entries[0].task_id.as_deref(), Some("t1"));
        assert_eq!(by_task.entries[0].worker_id, None);
        assert_eq!(by_task.entries[0].total_seconds, 5400);

        let pairs = aggregate(&sessions, Window::all_time(now), GroupBy::WorkerTask, now);
        assert_eq!(pairs.entries.len(), 3);
        assert_eq!(pairs.total_seconds(), 3600 + 1800 + 600);
    }

    #[test]
    fn test_today_never_exceeds_all_time() {
        let now = ts(9, 15, 45);
        let mut sessions = Vec::new();
        for i in 0..40i64 {
            let start = ts(1, 0, 0) + Duration::minutes(i * 311);
            let worker = format!("w{}", i % 5);
            if i % 7 == 0 {
                sessions.push(running(&worker, "t", start.min(now)));
            } else {
                sessions.push(held(&worker, "t", start, start + Duration::minutes(i * 17 + 5)));
            }
        }
        let today = aggregate(&sessions, Window::today(now), GroupBy::Worker, now);
        let all = aggregate(&sessions, Window::all_time(now), GroupBy::Worker, now);
        for entry in &all.entries {
            assert!(entry.today_seconds <= entry.total_seconds);
            let id = entry.worker_id.as_deref().unwrap();
            let today_total = today.entry_for_worker(id).map_or(0, |e| e.total_seconds);
            assert_eq!(today_total, entry.today_seconds);
        }
    }

    #[tokio::test]
    async fn test_compute_aggregation_from_store() {
        let db = Database::open_memory().await.unwrap();
        let now = ts(2, 12, 0);

        db.writer()
            .call(move |conn| {
                repository::upsert_worker(conn, "alice", "Alice", None)?;
                repository::upsert_task(conn, "t1", "Design", None)?;
                repository::save_session(conn, &held("alice", "t1", ts(1, 23, 0), ts(2, 1, 30)))?;
                repository::save_session(conn, &running("bob", "t1", ts(2, 11, 0)))?;
                repository::save_session(conn, &held("bob", "t2", ts(1, 1, 0), ts(1, 2, 0)))?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let today = compute_aggregation(&db, Window::today(now), GroupBy::Worker, now)
            .await
            .unwrap();
        let alice = today.entry_for_worker("alice").unwrap();
        assert_eq!(alice.total_seconds, 5400);
        assert_eq!(alice.worker_name.as_deref(), Some("Alice"));
        // bob's session from yesterday is outside the scan window.
        assert_eq!(today.entry_for_worker("bob").unwrap().total_seconds, 3600);

        let pairs = compute_aggregation(&db, Window::all_time(now), GroupBy::WorkerTask, now)
            .await
            .unwrap();
        assert_eq!(pairs.entries.len(), 3);
        let design = pairs
            .entries
            .iter()
            .find(|e| e.task_id.as_deref() == Some("t1") && e.worker_id.as_deref() == Some("alice"))
            .unwrap();
        assert_eq!(design.task_title.as_deref(), Some("Design"));
        assert_eq!(design.total_seconds, 9000);
    }

    #[tokio::test]
    async fn test_task_overview_and_worker_breakdown() {
        let db = Database::open_memory().await.unwrap();
        let now = ts(2, 12, 0);

        db.writer()
            .call(move |conn| {
                repository::upsert_worker(conn, "alice", "Alice", None)?;
                repository::upsert_task(conn, "t1", "Design", None)?;
                repository::upsert_task(conn, "t2", "Docs", None)?;
                repository::upsert_task(conn, "t3", "Tests", None)?;
                repository::assign_task(conn, "t1", "alice")?;
                repository::assign_task(conn, "t2", "alice")?;
                repository::save_session(conn, &held("alice", "t1", ts(2, 9, 0), ts(2, 10, 0)))?;
                repository::save_session(conn, &held("alice", "t3", ts(1, 9, 0), ts(1, 9, 30)))?;
                repository::save_session(conn, &held("bob", "t1", ts(1, 9, 0), ts(1, 9, 20)))?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let overview = compute_task_overview(&db, now).await.unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].task_id, "t1");
        assert_eq!(overview[0].task_title.as_deref(), Some("Design"));
        assert_eq!(overview[0].workers.len(), 2);
        assert_eq!(overview[0].workers[0].worker_id, "alice");
        assert_eq!(overview[0].workers[0].today_seconds, 3600);
        assert_eq!(overview[0].workers[1].today_seconds, 0);
        assert_eq!(overview[0].workers[1].total_seconds, 1200);

        let breakdown = compute_worker_breakdown(&db, "alice", now).await.unwrap();
        let ids: Vec<_> = breakdown.iter().map(|b| b.task_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        assert_eq!(breakdown[0].total_seconds, 3600);
        assert_eq!(breakdown[1].total_seconds, 0);
        assert_eq!(breakdown[2].title, "Tests");
        assert_eq!(breakdown[2].today_seconds, 0);
        assert_eq!(breakdown[2].total_seconds, 1800);
    }
}
