//! Session lifecycle transitions.
//!
//! Every transition takes the current record by reference and returns the
//! next record, so a rejected transition can never leave a half-updated
//! record behind. Persisting the result is the caller's job.

use chrono::{DateTime, Utc};

use super::{Session, SessionStatus};
use crate::date_util::{floor_to_second, whole_seconds};
use crate::error::{Error, Result};

/// Open a new running interval for `worker_id` on `task_id`.
///
/// `previous` is the latest record for the same pair, if any. Starting a pair
/// that is already running is rejected; any other prior state (including
/// `Completed`) allows a fresh interval. Holding a different task the worker
/// is running is the caller's responsibility, see [`hold`].
pub fn begin(
    previous: Option<&Session>,
    worker_id: &str,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<Session> {
    if previous.is_some_and(Session::is_running) {
        return Err(Error::AlreadyInProgress {
            worker_id: worker_id.to_string(),
            task_id: task_id.to_string(),
        });
    }
    Ok(Session {
        id: None,
        worker_id: worker_id.to_string(),
        task_id: task_id.to_string(),
        status: SessionStatus::InProgress,
        start_time: Some(floor_to_second(now)),
        end_time: None,
        elapsed_seconds: 0,
    })
}

/// Pause a running session and commit its interval.
pub fn hold(session: &Session, now: DateTime<Utc>) -> Result<Session> {
    let start = match (session.status, session.start_time) {
        (SessionStatus::InProgress, Some(start)) => start,
        _ => {
            return Err(Error::NoActiveSession {
                worker_id: session.worker_id.clone(),
                task_id: session.task_id.clone(),
            })
        }
    };

    let now = floor_to_second(now);
    // A clock that went backwards must not produce end < start.
    let end = now.max(start);
    if now < start {
        log::warn!(
            "Clock skew holding {}/{}: now {now} precedes start {start}",
            session.worker_id,
            session.task_id
        );
    }

    Ok(Session {
        status: SessionStatus::OnHold,
        end_time: Some(end),
        elapsed_seconds: whole_seconds(start, end).max(0),
        ..session.clone()
    })
}

/// Mark a held session as done. The interval was already committed by
/// [`hold`], so only the status changes.
pub fn complete(session: &Session) -> Result<Session> {
    if session.status != SessionStatus::OnHold {
        return Err(Error::NotOnHold {
            worker_id: session.worker_id.clone(),
            task_id: session.task_id.clone(),
            status: session.status,
        });
    }
    Ok(Session {
        status: SessionStatus::Completed,
        ..session.clone()
    })
}

/// Where the session's interval ends as seen at `now`: `now` while running,
/// the committed end otherwise. `None` for records that never started or
/// lack an end time.
pub fn effective_end(session: &Session, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    session.start_time?;
    match session.status {
        SessionStatus::InProgress => Some(floor_to_second(now)),
        SessionStatus::NotStarted => None,
        SessionStatus::OnHold | SessionStatus::Completed => session.end_time.map(floor_to_second),
    }
}

/// Current duration of a session in whole seconds.
pub fn live_elapsed(session: &Session, now: DateTime<Utc>) -> i64 {
    match (session.status, session.start_time) {
        (SessionStatus::InProgress, Some(start)) => {
            session.elapsed_seconds.max(0) + whole_seconds(start, now).max(0)
        }
        _ => session.elapsed_seconds,
    }
}
