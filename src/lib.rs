pub mod date_util;
pub mod duration;
pub mod error;
pub mod metrics;
pub mod query;
pub mod session;
pub mod settings;
pub mod storage;

pub use duration::{format_clock, format_compact, format_duration, DurationParts, DurationStyle};
pub use error::{Error, Result};
pub use metrics::{
    AggregateEntry, Aggregation, GroupBy, Leaderboard, LeaderboardPeriod, TaskBreakdown,
    TaskOverview, WorkerTime,
};
pub use query::builder::SessionFilter;
pub use query::window::Window;
pub use session::{Session, SessionStatus, TaskStatus};
pub use settings::Settings;
pub use storage::Database;

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::{TaskRecord, Worker};

use chrono::{DateTime, Utc};
use serde::Serialize;

use session::machine;
use storage::repository;

/// What a successful start did.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    /// The new running interval.
    pub started: Session,
    /// The worker's previously running session, now on hold.
    pub held: Option<Session>,
}

/// A running session and how long it has been running.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentSession {
    pub session: Session,
    pub elapsed_seconds: i64,
}

/// Main entry point: session lifecycle, reporting and the worker/task
/// registry over one store.
#[derive(Clone)]
pub struct TimeTracker {
    db: Database,
    settings: Settings,
}

impl TimeTracker {
    pub async fn new(db: Database) -> Result<Self> {
        let settings = Settings::load(&db).await?;
        Ok(Self { db, settings })
    }

    /// Access the underlying store, for queries the tracker does not wrap.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn reload_settings(&mut self) -> Result<()> {
        self.settings = Settings::load(&self.db).await?;
        Ok(())
    }

    // ── Session lifecycle ──────────────────────────────────────────

    /// Start `worker_id` on `task_id` at `now`.
    ///
    /// Whatever the worker is currently running is put on hold at the same
    /// instant, in the same transaction, so the worker never has two running
    /// sessions. Starting the pair that is already running fails with
    /// [`Error::AlreadyInProgress`]. A start that loses a race against
    /// another writer fails with [`Error::ConcurrentStartConflict`] and
    /// changes nothing.
    pub async fn start(
        &self,
        worker_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome> {
        let (w, t) = (worker_id.to_string(), task_id.to_string());
        let outcome = self
            .db
            .write_tx(worker_id, move |tx| {
                let previous = repository::find_session(tx, &w, &t)?;
                let started = machine::begin(previous.as_ref(), &w, &t, now)?;

                let held = match repository::find_active_session(tx, &w)? {
                    Some(active) => {
                        let held = machine::hold(&active, now)?;
                        repository::save_session(tx, &held)?;
                        repository::set_task_status(tx, &held.task_id, TaskStatus::OnHold)?;
                        Some(held)
                    }
                    None => None,
                };

                let id = repository::save_session(tx, &started).map_err(|e| {
                    if storage::is_unique_violation(&e) {
                        Error::ConcurrentStartConflict(w.clone())
                    } else {
                        Error::from(e)
                    }
                })?;
                repository::set_task_status(tx, &t, TaskStatus::InProgress)?;

                Ok(StartOutcome {
                    started: Session {
                        id: Some(id),
                        ..started
                    },
                    held,
                })
            })
            .await?;

        match &outcome.held {
            Some(held) => log::info!(
                "Started {worker_id}/{task_id}, held {} after {}s",
                held.task_id,
                held.elapsed_seconds
            ),
            None => log::info!("Started {worker_id}/{task_id}"),
        }
        Ok(outcome)
    }

    /// Pause the running session of `worker_id` on `task_id`.
    pub async fn hold(&self, worker_id: &str, task_id: &str, now: DateTime<Utc>) -> Result<Session> {
        let (w, t) = (worker_id.to_string(), task_id.to_string());
        let held = self
            .db
            .write_tx(worker_id, move |tx| {
                let current = repository::find_session(tx, &w, &t)?
                    .ok_or_else(|| Error::NoActiveSession {
                        worker_id: w.clone(),
                        task_id: t.clone(),
                    })?;
                let held = machine::hold(&current, now)?;
                repository::save_session(tx, &held)?;
                repository::set_task_status(tx, &t, TaskStatus::OnHold)?;
                Ok(held)
            })
            .await?;
        log::info!("Held {worker_id}/{task_id} after {}s", held.elapsed_seconds);
        Ok(held)
    }

    /// Mark the held session of `worker_id` on `task_id` as done. The task
    /// itself is marked completed when it is registered.
    pub async fn complete(&self, worker_id: &str, task_id: &str) -> Result<Session> {
        let (w, t) = (worker_id.to_string(), task_id.to_string());
        let completed = self
            .db
            .write_tx(worker_id, move |tx| {
                let current = repository::find_session(tx, &w, &t)?
                    .ok_or_else(|| Error::NoActiveSession {
                        worker_id: w.clone(),
                        task_id: t.clone(),
                    })?;
                let completed = machine::complete(&current)?;
                repository::save_session(tx, &completed)?;
                if !repository::set_task_status(tx, &t, TaskStatus::Completed)? {
                    log::debug!("Task {t} is not registered, status not tracked");
                }
                Ok(completed)
            })
            .await?;
        log::info!("Completed {worker_id}/{task_id}");
        Ok(completed)
    }

    /// The worker's running session with its live elapsed time.
    pub async fn current_session(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CurrentSession>> {
        let w = worker_id.to_string();
        let active = self
            .db
            .reader()
            .call(move |conn| repository::find_active_session(conn, &w))
            .await?;
        Ok(active.map(|session| CurrentSession {
            elapsed_seconds: machine::live_elapsed(&session, now),
            session,
        }))
    }

    /// Latest session of every kind for one worker/task pair.
    pub async fn session(&self, worker_id: &str, task_id: &str) -> Result<Option<Session>> {
        let (w, t) = (worker_id.to_string(), task_id.to_string());
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::find_session(conn, &w, &t))
            .await?)
    }

    pub async fn sessions(&self, filter: SessionFilter) -> Result<Vec<Session>> {
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::list_sessions(conn, &filter))
            .await?)
    }

    pub async fn status_counts(&self) -> Result<Vec<(SessionStatus, i64)>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::count_sessions_by_status(conn))
            .await?)
    }

    // ── Reporting ──────────────────────────────────────────────────

    pub async fn aggregate(
        &self,
        window: Window,
        group_by: GroupBy,
        now: DateTime<Utc>,
    ) -> Result<Aggregation> {
        metrics::compute_aggregation(&self.db, window, group_by, now).await
    }

    pub async fn rank(&self, window: Window, now: DateTime<Utc>) -> Result<Vec<AggregateEntry>> {
        metrics::rank::compute_ranking(&self.db, window, now).await
    }

    pub async fn leaderboard(
        &self,
        period: LeaderboardPeriod,
        now: DateTime<Utc>,
    ) -> Result<Leaderboard> {
        metrics::rank::compute_leaderboard(&self.db, period, &self.settings, now).await
    }

    pub async fn top_performer(&self, now: DateTime<Utc>) -> Result<Option<AggregateEntry>> {
        metrics::rank::compute_top_performer(&self.db, now).await
    }

    pub async fn task_overview(&self, now: DateTime<Utc>) -> Result<Vec<TaskOverview>> {
        metrics::compute_task_overview(&self.db, now).await
    }

    pub async fn worker_breakdown(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskBreakdown>> {
        metrics::compute_worker_breakdown(&self.db, worker_id, now).await
    }

    // ── Registry ───────────────────────────────────────────────────

    pub async fn add_worker(&self, worker_id: &str, name: &str, email: Option<&str>) -> Result<()> {
        let (id, name, email) = (
            worker_id.to_string(),
            name.to_string(),
            email.map(str::to_string),
        );
        self.db
            .writer()
            .call(move |conn| repository::upsert_worker(conn, &id, &name, email.as_deref()))
            .await?;
        Ok(())
    }

    pub async fn add_task(&self, task_id: &str, title: &str, description: Option<&str>) -> Result<()> {
        let (id, title, description) = (
            task_id.to_string(),
            title.to_string(),
            description.map(str::to_string),
        );
        self.db
            .writer()
            .call(move |conn| repository::upsert_task(conn, &id, &title, description.as_deref()))
            .await?;
        Ok(())
    }

    pub async fn assign_task(&self, task_id: &str, worker_id: &str) -> Result<()> {
        let (t, w) = (task_id.to_string(), worker_id.to_string());
        self.db
            .write_tx(worker_id, move |tx| {
                if repository::get_task(tx, &t)?.is_none() {
                    return Err(Error::NotFound(format!("task {t}")));
                }
                if repository::get_worker(tx, &w)?.is_none() {
                    return Err(Error::NotFound(format!("worker {w}")));
                }
                repository::assign_task(tx, &t, &w)?;
                Ok(())
            })
            .await
    }

    /// Override a task's aggregate status directly. `status` accepts storage
    /// keys and display labels. Session records are not touched.
    pub async fn set_task_status(&self, task_id: &str, status: &str) -> Result<TaskStatus> {
        let status = SessionStatus::parse_input(status)
            .ok_or_else(|| Error::InvalidStatus(status.to_string()))?;
        let t = task_id.to_string();
        let updated = self
            .db
            .writer()
            .call(move |conn| repository::set_task_status(conn, &t, status))
            .await?;
        if !updated {
            return Err(Error::NotFound(format!("task {task_id}")));
        }
        log::info!("Set status of task {task_id} to {status}");
        Ok(status)
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_workers(conn))
            .await?)
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_tasks(conn))
            .await?)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Store a validated setting and apply it to this tracker.
    pub async fn config_set(&mut self, key: &str, value: &str) -> Result<()> {
        Settings::validate(key, value)?;
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.trim().to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        self.reload_settings().await
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
