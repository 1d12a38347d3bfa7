use chrono::{DateTime, Utc};

use crate::date_util::to_unix;
use crate::session::SessionStatus;

/// Builder for session listings with optional filters.
///
/// The overlap filter keeps every session whose effective interval touches
/// `[start, end)`: running sessions are treated as open-ended, since their
/// effective end is only known at aggregation time.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    worker_id: Option<String>,
    task_id: Option<String>,
    status_in: Vec<SessionStatus>,
    overlapping: Option<(DateTime<Utc>, DateTime<Utc>)>,
    limit: Option<u32>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker(mut self, worker_id: &str) -> Self {
        self.worker_id = Some(worker_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn status_in(mut self, statuses: &[SessionStatus]) -> Self {
        self.status_in = statuses.to_vec();
        self
    }

    pub fn overlapping(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.overlapping = Some((start, end));
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub(crate) fn build_sql(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut wheres = Vec::new();
        let mut param_idx = 1;

        let select = "SELECT id, worker_id, task_id, status, start_time, end_time, elapsed_seconds
            FROM sessions";

        if let Some(ref id) = self.worker_id {
            wheres.push(format!("worker_id = ?{param_idx}"));
            params.push(Box::new(id.clone()));
            param_idx += 1;
        }

        if let Some(ref id) = self.task_id {
            wheres.push(format!("task_id = ?{param_idx}"));
            params.push(Box::new(id.clone()));
            param_idx += 1;
        }

        if !self.status_in.is_empty() {
            let mut placeholders = Vec::new();
            for status in &self.status_in {
                placeholders.push(format!("?{param_idx}"));
                params.push(Box::new(status.as_str()));
                param_idx += 1;
            }
            wheres.push(format!("status IN ({})", placeholders.join(",")));
        }

        if let Some((start, end)) = self.overlapping {
            wheres.push(format!(
                "start_time IS NOT NULL AND start_time < ?{param_idx} \
                 AND (status = 'in_progress' OR end_time > ?{})",
                param_idx + 1
            ));
            params.push(Box::new(to_unix(end)));
            params.push(Box::new(to_unix(start)));
            param_idx += 2;
        }

        let mut sql = select.to_string();
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }
        sql.push_str(" ORDER BY start_time ASC, id ASC");

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT ?{param_idx}"));
            params.push(Box::new(limit));
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_build_sql_default() {
        let (sql, params) = SessionFilter::new().build_sql();
        assert!(sql.contains("FROM sessions"));
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY start_time ASC, id ASC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_sql_with_filters() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let (sql, params) = SessionFilter::new()
            .worker("alice")
            .task("t1")
            .status_in(&[SessionStatus::OnHold, SessionStatus::Completed])
            .overlapping(start, end)
            .limit(10)
            .build_sql();
        assert!(sql.contains("worker_id = ?1"));
        assert!(sql.contains("task_id = ?2"));
        assert!(sql.contains("status IN (?3,?4)"));
        assert!(sql.contains("start_time < ?5"));
        assert!(sql.contains("end_time > ?6"));
        assert!(sql.contains("LIMIT ?7"));
        assert_eq!(params.len(), 7);
    }
}
