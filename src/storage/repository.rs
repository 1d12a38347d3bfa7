use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::date_util::{from_unix, to_unix};
use crate::query::builder::SessionFilter;
use crate::session::{Session, SessionStatus, TaskStatus};

impl ToSql for SessionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SessionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        SessionStatus::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown status: {s}").into()))
    }
}

// ── Workers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Worker {
    pub worker_id: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: String,
}

pub fn upsert_worker(
    conn: &Connection,
    worker_id: &str,
    name: &str,
    email: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO workers (worker_id, name, email, created_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(worker_id) DO UPDATE SET
           name = excluded.name,
           email = COALESCE(excluded.email, workers.email)",
        params![worker_id, name, email],
    )?;
    Ok(())
}

pub fn get_worker(conn: &Connection, worker_id: &str) -> Result<Option<Worker>, rusqlite::Error> {
    conn.query_row(
        "SELECT worker_id, name, email, created_at FROM workers WHERE worker_id = ?1",
        params![worker_id],
        worker_from_row,
    )
    .optional()
}

pub fn list_workers(conn: &Connection) -> Result<Vec<Worker>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT worker_id, name, email, created_at FROM workers ORDER BY worker_id")?;
    let rows = stmt.query_map([], worker_from_row)?;
    rows.collect()
}

/// Display names keyed by worker id.
pub fn worker_names(conn: &Connection) -> Result<HashMap<String, String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT worker_id, name FROM workers")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

fn worker_from_row(row: &Row<'_>) -> Result<Worker, rusqlite::Error> {
    Ok(Worker {
        worker_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

// ── Tasks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: String,
}

pub fn upsert_task(
    conn: &Connection,
    task_id: &str,
    title: &str,
    description: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO tasks (task_id, title, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'), datetime('now'))
         ON CONFLICT(task_id) DO UPDATE SET
           title = excluded.title,
           description = COALESCE(excluded.description, tasks.description),
           updated_at = excluded.updated_at",
        params![task_id, title, description],
    )?;
    Ok(())
}

pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<TaskRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT task_id, title, description, status, created_at FROM tasks WHERE task_id = ?1",
        params![task_id],
        task_from_row,
    )
    .optional()
}

pub fn list_tasks(conn: &Connection) -> Result<Vec<TaskRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT task_id, title, description, status, created_at FROM tasks ORDER BY task_id",
    )?;
    let rows = stmt.query_map([], task_from_row)?;
    rows.collect()
}

/// Titles keyed by task id.
pub fn task_titles(conn: &Connection) -> Result<HashMap<String, String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT task_id, title FROM tasks")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Returns false when the task is not registered.
pub fn set_task_status(
    conn: &Connection,
    task_id: &str,
    status: TaskStatus,
) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE tasks SET status = ?2, updated_at = datetime('now') WHERE task_id = ?1",
        params![task_id, status],
    )?;
    Ok(count > 0)
}

pub fn assign_task(conn: &Connection, task_id: &str, worker_id: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO task_assignments (task_id, worker_id, assigned_at)
         VALUES (?1, ?2, datetime('now'))",
        params![task_id, worker_id],
    )?;
    Ok(())
}

pub fn list_assigned_tasks(
    conn: &Connection,
    worker_id: &str,
) -> Result<Vec<TaskRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT t.task_id, t.title, t.description, t.status, t.created_at
         FROM tasks t
         JOIN task_assignments a ON a.task_id = t.task_id
         WHERE a.worker_id = ?1
         ORDER BY t.task_id",
    )?;
    let rows = stmt.query_map(params![worker_id], task_from_row)?;
    rows.collect()
}

fn task_from_row(row: &Row<'_>) -> Result<TaskRecord, rusqlite::Error> {
    Ok(TaskRecord {
        task_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}

// ── Sessions ───────────────────────────────────────────────────────

const SESSION_COLUMNS: &str =
    "id, worker_id, task_id, status, start_time, end_time, elapsed_seconds";

/// The worker's running session, if any.
pub fn find_active_session(
    conn: &Connection,
    worker_id: &str,
) -> Result<Option<Session>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE worker_id = ?1 AND status = 'in_progress'"
        ),
        params![worker_id],
        session_from_row,
    )
    .optional()
}

/// The most recent session of `worker_id` on `task_id`.
pub fn find_session(
    conn: &Connection,
    worker_id: &str,
    task_id: &str,
) -> Result<Option<Session>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE worker_id = ?1 AND task_id = ?2
             ORDER BY id DESC LIMIT 1"
        ),
        params![worker_id, task_id],
        session_from_row,
    )
    .optional()
}

/// Insert a new session or update an existing one. Returns the row id.
pub fn save_session(conn: &Connection, session: &Session) -> Result<i64, rusqlite::Error> {
    let start = session.start_time.map(to_unix);
    let end = session.end_time.map(to_unix);
    match session.id {
        None => {
            conn.execute(
                "INSERT INTO sessions (worker_id, task_id, status, start_time, end_time, elapsed_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.worker_id,
                    session.task_id,
                    session.status,
                    start,
                    end,
                    session.elapsed_seconds
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
        Some(id) => {
            let count = conn.execute(
                "UPDATE sessions SET
                    status = ?2, start_time = ?3, end_time = ?4, elapsed_seconds = ?5
                 WHERE id = ?1",
                params![id, session.status, start, end, session.elapsed_seconds],
            )?;
            if count == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            Ok(id)
        }
    }
}

pub fn list_sessions(
    conn: &Connection,
    filter: &SessionFilter,
) -> Result<Vec<Session>, rusqlite::Error> {
    let mut sessions = Vec::new();
    for_each_session(conn, filter, |s| sessions.push(s))?;
    Ok(sessions)
}

/// Stream matching sessions into `f` one row at a time, without collecting
/// them. Returns the number of rows visited.
pub fn for_each_session<F>(
    conn: &Connection,
    filter: &SessionFilter,
    mut f: F,
) -> Result<usize, rusqlite::Error>
where
    F: FnMut(Session),
{
    let (sql, params) = filter.build_sql();
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(param_refs.as_slice())?;
    let mut visited = 0;
    while let Some(row) = rows.next()? {
        f(session_from_row(row)?);
        visited += 1;
    }
    Ok(visited)
}

pub fn count_sessions_by_status(
    conn: &Connection,
) -> Result<Vec<(SessionStatus, i64)>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM sessions GROUP BY status ORDER BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

fn session_from_row(row: &Row<'_>) -> Result<Session, rusqlite::Error> {
    Ok(Session {
        id: Some(row.get(0)?),
        worker_id: row.get(1)?,
        task_id: row.get(2)?,
        status: row.get(3)?,
        start_time: time_column(row, 4)?,
        end_time: time_column(row, 5)?,
        elapsed_seconds: row.get(6)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let secs: Option<i64> = row.get(idx)?;
    secs.map(|s| from_unix(s).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, s)))
        .transpose()
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn running(worker: &str, task: &str, start: DateTime<Utc>) -> Session {
        Session {
            status: SessionStatus::InProgress,
            start_time: Some(start),
            ..Session::new(worker, task)
        }
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "leaderboard.weekly_days", "14")?;
                let val = get_config(conn, "leaderboard.weekly_days")?;
                assert_eq!(val, Some("14".to_string()));

                let missing = get_config(conn, "nonexistent")?;
                assert_eq!(missing, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_upsert_keeps_email() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_worker(conn, "alice", "Alice", Some("alice@example.com"))?;
                upsert_worker(conn, "alice", "Alice B.", None)?;

                let w = get_worker(conn, "alice")?.unwrap();
                assert_eq!(w.name, "Alice B.");
                assert_eq!(w.email.as_deref(), Some("alice@example.com"));

                let names = worker_names(conn)?;
                assert_eq!(names.get("alice").map(String::as_str), Some("Alice B."));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_task_status_and_assignments() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_worker(conn, "alice", "Alice", None)?;
                upsert_task(conn, "t1", "Write report", Some("Q1 numbers"))?;
                upsert_task(conn, "t2", "Review", None)?;
                assign_task(conn, "t2", "alice")?;
                assign_task(conn, "t1", "alice")?;
                assign_task(conn, "t1", "alice")?;

                let tasks = list_assigned_tasks(conn, "alice")?;
                let ids: Vec<_> = tasks.iter().map(|t| t.task_id.as_str()).collect();
                assert_eq!(ids, vec!["t1", "t2"]);
                assert_eq!(tasks[0].status, SessionStatus::NotStarted);

                assert!(set_task_status(conn, "t1", SessionStatus::Completed)?);
                assert!(!set_task_status(conn, "missing", SessionStatus::Completed)?);
                assert_eq!(get_task(conn, "t1")?.unwrap().status, SessionStatus::Completed);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_save_and_find() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut s = running("alice", "t1", ts(10, 0));
                let id = save_session(conn, &s)?;
                s.id = Some(id);

                let active = find_active_session(conn, "alice")?.unwrap();
                assert_eq!(active, s);
                assert!(find_active_session(conn, "bob")?.is_none());

                s.status = SessionStatus::OnHold;
                s.end_time = Some(ts(10, 30));
                s.elapsed_seconds = 1800;
                assert_eq!(save_session(conn, &s)?, id);

                assert!(find_active_session(conn, "alice")?.is_none());
                assert_eq!(find_session(conn, "alice", "t1")?.unwrap(), s);

                // Latest interval wins.
                let later = running("alice", "t1", ts(11, 0));
                let later_id = save_session(conn, &later)?;
                assert_eq!(find_session(conn, "alice", "t1")?.unwrap().id, Some(later_id));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_session_fails() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let s = Session {
                    id: Some(42),
                    ..running("alice", "t1", ts(10, 0))
                };
                assert!(matches!(
                    save_session(conn, &s),
                    Err(rusqlite::Error::QueryReturnedNoRows)
                ));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_sessions_overlap_filter() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let held = |w: &str, start, end, secs| Session {
                    status: SessionStatus::OnHold,
                    end_time: Some(end),
                    elapsed_seconds: secs,
                    ..running(w, "t1", start)
                };
                save_session(conn, &held("alice", ts(8, 0), ts(9, 0), 3600))?;
                save_session(conn, &held("bob", ts(9, 30), ts(10, 30), 3600))?;
                save_session(conn, &running("carol", "t2", ts(7, 0)))?;
                save_session(conn, &Session::new("dave", "t3"))?;

                let window = SessionFilter::new().overlapping(ts(9, 0), ts(12, 0));
                let workers: Vec<_> = list_sessions(conn, &window)?
                    .into_iter()
                    .map(|s| s.worker_id)
                    .collect();
                // alice ended exactly at the window start; dave never started.
                assert_eq!(workers, vec!["carol", "bob"]);

                let held_only = SessionFilter::new().status_in(&[SessionStatus::OnHold]);
                assert_eq!(list_sessions(conn, &held_only)?.len(), 2);

                let mut seen = 0;
                let visited = for_each_session(conn, &SessionFilter::new().worker("bob"), |s| {
                    assert_eq!(s.worker_id, "bob");
                    seen += 1;
                })?;
                assert_eq!((visited, seen), (1, 1));

                let counts = count_sessions_by_status(conn)?;
                assert!(counts.contains(&(SessionStatus::OnHold, 2)));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
