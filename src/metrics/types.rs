use chrono::NaiveDate;
use serde::Serialize;

use crate::query::window::Window;

/// Which keys totals are grouped by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Worker,
    Task,
    WorkerTask,
}

impl GroupBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "worker" | "user" => Some(GroupBy::Worker),
            "task" => Some(GroupBy::Task),
            "worker-task" | "worker_task" | "user-task" => Some(GroupBy::WorkerTask),
            _ => None,
        }
    }

    pub fn by_worker(&self) -> bool {
        matches!(self, GroupBy::Worker | GroupBy::WorkerTask)
    }

    pub fn by_task(&self) -> bool {
        matches!(self, GroupBy::Task | GroupBy::WorkerTask)
    }
}

/// Totals for one group over a window, plus the same group's share of today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateEntry {
    pub worker_id: Option<String>,
    pub task_id: Option<String>,
    pub worker_name: Option<String>,
    pub task_title: Option<String>,
    /// Seconds inside `[today midnight, now)`.
    pub today_seconds: i64,
    /// Seconds inside the requested window.
    pub total_seconds: i64,
}

/// Seconds contributed to one calendar day inside the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub seconds: i64,
}

/// A session whose stored interval could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlaggedSession {
    pub session_id: Option<i64>,
    pub worker_id: String,
    pub task_id: String,
    pub reason: String,
}

/// Result of one aggregation pass.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregation {
    pub window: Window,
    pub today: Window,
    pub group_by: GroupBy,
    pub entries: Vec<AggregateEntry>,
    /// Window seconds per UTC day, across all groups.
    pub daily: Vec<DailyTotal>,
    pub flagged: Vec<FlaggedSession>,
    pub sessions_scanned: usize,
}

impl Aggregation {
    pub fn total_seconds(&self) -> i64 {
        self.entries.iter().map(|e| e.total_seconds).sum()
    }

    pub fn today_seconds(&self) -> i64 {
        self.entries.iter().map(|e| e.today_seconds).sum()
    }

    pub fn entry_for_worker(&self, worker_id: &str) -> Option<&AggregateEntry> {
        self.entries
            .iter()
            .find(|e| e.worker_id.as_deref() == Some(worker_id))
    }

    /// Entries as CSV with a header row. Seconds are written raw.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str("worker_id,worker_name,task_id,task_title,today_seconds,total_seconds\n");
        for e in &self.entries {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                csv_escape(e.worker_id.as_deref().unwrap_or("")),
                csv_escape(e.worker_name.as_deref().unwrap_or("")),
                csv_escape(e.task_id.as_deref().unwrap_or("")),
                csv_escape(e.task_title.as_deref().unwrap_or("")),
                e.today_seconds,
                e.total_seconds,
            ));
        }
        out
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// One worker's time on one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerTime {
    pub worker_id: String,
    pub worker_name: Option<String>,
    pub today_seconds: i64,
    pub total_seconds: i64,
}

/// Every worker's time on one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOverview {
    pub task_id: String,
    pub task_title: Option<String>,
    pub workers: Vec<WorkerTime>,
}

/// One assigned task's time for a single worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskBreakdown {
    pub task_id: String,
    pub title: String,
    pub status: crate::session::TaskStatus,
    pub today_seconds: i64,
    pub total_seconds: i64,
}
