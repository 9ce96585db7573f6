use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::models::ProcessedRecord;
use super::{DedupStore, StoreError};

/// SQLite-backed record of processed paper identifiers
pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                path: path_ref.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let path_str = path_ref.to_string_lossy().to_string();
        let conn = Connection::open(path_ref).map_err(|e| StoreError::Open {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        // processed_date is an ISO-8601 local timestamp, kept as TEXT so existing
        // databases written by earlier trackers stay readable.
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS processed_papers (
                paper_id TEXT PRIMARY KEY,
                processed_date TEXT
            );
            "
        )?;

        Ok(())
    }

    /// Check whether a paper id has already been processed
    pub fn is_processed(&self, paper_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_papers WHERE paper_id = ?1",
                params![paper_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Record a paper as processed. Inserting an existing id is a no-op.
    ///
    /// Returns true when a new row was written.
    pub fn insert_processed(&self, paper_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let now = chrono::Local::now()
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO processed_papers (paper_id, processed_date) VALUES (?1, ?2)",
            params![paper_id, now],
        )?;
        Ok(changed > 0)
    }

    pub fn count_processed(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM processed_papers", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Most recently processed records, newest first
    pub fn recent_processed(&self, limit: usize) -> Result<Vec<ProcessedRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT paper_id, processed_date FROM processed_papers
             ORDER BY processed_date DESC, paper_id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ProcessedRecord {
                paper_id: row.get(0)?,
                processed_date: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    #[cfg(test)]
    pub fn get_processed(&self, paper_id: &str) -> Result<Option<ProcessedRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT paper_id, processed_date FROM processed_papers WHERE paper_id = ?1",
                params![paper_id],
                |row| {
                    Ok(ProcessedRecord {
                        paper_id: row.get(0)?,
                        processed_date: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

impl DedupStore for Database {
    fn has(&self, paper_id: &str) -> Result<bool, StoreError> {
        self.is_processed(paper_id)
    }

    fn mark_processed(&self, paper_id: &str) -> Result<(), StoreError> {
        self.insert_processed(paper_id).map(|_| ())
    }
}
