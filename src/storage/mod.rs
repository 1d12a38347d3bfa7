pub mod repository;

use rusqlite::{Transaction, TransactionBehavior};
use rusqlite_migration::{Migrations, M};

use crate::error::{Error, Result};

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Database {
    /// Open the database at the default path (`~/.tasktally/tasktally.db`).
    pub async fn open() -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".tasktally");
        std::fs::create_dir_all(&dir).map_err(|e| Error::Config(e.to_string()))?;
        Self::open_at(dir.join("tasktally.db")).await
    }

    /// Open the database at the given path.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // For in-memory, we share the same connection for reader/writer
        // since in-memory DBs are per-connection.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(|e| e.to_string())?;
            let migrations =
                Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))]);
            migrations.to_latest(conn).map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| Error::Migration(e.to_string()))
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Get a reference to the writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// Get a reference to the reader connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }

    /// Run `f` as one atomic read-modify-write on the writer.
    ///
    /// The transaction is `IMMEDIATE`, so it holds the write lock from its
    /// first statement. `f` returning an error rolls everything back. A lock
    /// that cannot be taken (another process is writing) surfaces as
    /// [`Error::ConcurrentStartConflict`] for `worker_id`.
    pub async fn write_tx<T, F>(&self, worker_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let worker_id = worker_id.to_string();
        let outcome = self
            .writer
            .call(move |conn| {
                let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                    Ok(tx) => tx,
                    Err(e) if is_busy(&e) => {
                        return Ok(Err(Error::ConcurrentStartConflict(worker_id)));
                    }
                    Err(e) => return Err(e),
                };
                let result = f(&tx);
                if result.is_ok() {
                    if let Err(e) = tx.commit() {
                        if is_busy(&e) {
                            return Ok(Err(Error::ConcurrentStartConflict(worker_id)));
                        }
                        return Err(e);
                    }
                }
                Ok::<Result<T>, rusqlite::Error>(result)
            })
            .await?;
        outcome
    }

    /// Run `f` on the reader inside one read transaction, so every query in
    /// `f` sees the same snapshot.
    pub async fn read_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let outcome = self
            .reader
            .call(move |conn| {
                let tx = conn.transaction()?;
                let result = f(&tx);
                // Read-only: dropping the transaction rolls it back.
                drop(tx);
                Ok::<Result<T>, rusqlite::Error>(result)
            })
            .await?;
        outcome
    }
}

pub(crate) fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory() {
        let db = Database::open_memory().await.unwrap();

        let tables: Vec<String> = db
            .reader()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok::<Vec<String>, rusqlite::Error>(rows.filter_map(|r| r.ok()).collect())
            })
            .await
            .unwrap();

        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"workers".to_string()));
        assert!(tables.contains(&"tasks".to_string()));
        assert!(tables.contains(&"task_assignments".to_string()));
        assert!(tables.contains(&"app_config".to_string()));
    }

    #[tokio::test]
    async fn test_one_running_session_per_worker_index() {
        let db = Database::open_memory().await.unwrap();

        let second = db
            .writer()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO sessions (worker_id, task_id, status, start_time)
                     VALUES ('w1', 't1', 'in_progress', 100)",
                    [],
                )?;
                // Another worker may run concurrently.
                conn.execute(
                    "INSERT INTO sessions (worker_id, task_id, status, start_time)
                     VALUES ('w2', 't1', 'in_progress', 100)",
                    [],
                )?;
                Ok::<_, rusqlite::Error>(conn.execute(
                    "INSERT INTO sessions (worker_id, task_id, status, start_time)
                     VALUES ('w1', 't2', 'in_progress', 200)",
                    [],
                ))
            })
            .await
            .unwrap();

        let err = second.unwrap_err();
        assert!(is_unique_violation(&err), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_write_tx_rolls_back_on_error() {
        let db = Database::open_memory().await.unwrap();

        let result: Result<()> = db
            .write_tx("w1", |tx| {
                tx.execute(
                    "INSERT INTO sessions (worker_id, task_id, status, start_time)
                     VALUES ('w1', 't1', 'in_progress', 100)",
                    [],
                )?;
                Err(Error::Other("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = db
            .read_tx(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_file_database_reader_sees_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("tally.db")).await.unwrap();

        db.write_tx("w1", |tx| {
            tx.execute(
                "INSERT INTO sessions (worker_id, task_id, status, start_time)
                 VALUES ('w1', 't1', 'in_progress', 100)",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let count: i64 = db
            .read_tx(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
