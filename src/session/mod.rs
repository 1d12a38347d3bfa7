pub mod machine;

pub use machine::{begin, complete, effective_end, hold, live_elapsed};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session record. Tasks reuse the same vocabulary for
/// their aggregate status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    InProgress,
    OnHold,
    Completed,
}

pub type TaskStatus = SessionStatus;

impl SessionStatus {
    /// Storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::OnHold => "on_hold",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(SessionStatus::NotStarted),
            "in_progress" => Some(SessionStatus::InProgress),
            "on_hold" => Some(SessionStatus::OnHold),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }

    /// Parse a status typed by a person: storage keys, labels such as
    /// `In Progress`, dashed forms and the short `hold`.
    pub fn parse_input(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "hold" => Some(SessionStatus::OnHold),
            other => Self::parse(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "Not Started",
            SessionStatus::InProgress => "In Progress",
            SessionStatus::OnHold => "On Hold",
            SessionStatus::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One running interval of a worker on a task.
///
/// `elapsed_seconds` holds the committed length of the interval once it has
/// left `InProgress`; while running it is the prior committed total (zero for
/// a freshly started interval) and [`live_elapsed`] adds the running part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Assigned by the store on first save.
    pub id: Option<i64>,
    pub worker_id: String,
    pub task_id: String,
    pub status: SessionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed_seconds: i64,
}

impl Session {
    /// A record that has not been started yet.
    pub fn new(worker_id: &str, task_id: &str) -> Self {
        Self {
            id: None,
            worker_id: worker_id.to_string(),
            task_id: task_id.to_string(),
            status: SessionStatus::NotStarted,
            start_time: None,
            end_time: None,
            elapsed_seconds: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::NotStarted,
            SessionStatus::InProgress,
            SessionStatus::OnHold,
            SessionStatus::Completed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("Hold"), None);
    }

    #[test]
    fn test_new_session_is_not_started() {
        let s = Session::new("w1", "t1");
        assert_eq!(s.status, SessionStatus::NotStarted);
        assert!(s.start_time.is_none());
        assert!(!s.is_running());
    }

    #[test]
    fn test_parse_input_accepts_labels() {
        assert_eq!(SessionStatus::parse_input("In Progress"), Some(SessionStatus::InProgress));
        assert_eq!(SessionStatus::parse_input("not-started"), Some(SessionStatus::NotStarted));
        assert_eq!(SessionStatus::parse_input(" Hold "), Some(SessionStatus::OnHold));
        assert_eq!(SessionStatus::parse_input("completed"), Some(SessionStatus::Completed));
        assert_eq!(SessionStatus::parse_input("done"), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::OnHold).unwrap();
        assert_eq!(json, "\"on_hold\"");
    }
}
