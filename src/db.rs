//! Database module
//!
//! SQLite-backed checkpoint store. Every write appends a new snapshot of the
//! thread's merged state; reads return the newest snapshot.

mod schema;

pub use schema::*;

use crate::graph::{ConversationState, StateUpdate, ThreadId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt checkpoint state: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

type CheckpointRow = (i64, String, String, String);

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Checkpoint Operations ====================

    /// Latest state for a thread, or None if it was never written
    pub fn latest_state(&self, thread_id: &ThreadId) -> DbResult<Option<ConversationState>> {
        let conn = self.lock()?;
        Self::latest_state_internal(&conn, thread_id)
    }

    fn latest_state_internal(
        conn: &Connection,
        thread_id: &ThreadId,
    ) -> DbResult<Option<ConversationState>> {
        let state_json: Option<String> = conn
            .query_row(
                "SELECT state FROM checkpoints WHERE thread_id = ?1
                 ORDER BY checkpoint_id DESC LIMIT 1",
                params![thread_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match state_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Merge an update into the thread's latest state and store the result
    /// as a new checkpoint. The read and the insert share one transaction
    /// under the connection lock.
    pub fn append_checkpoint(
        &self,
        thread_id: &ThreadId,
        update: &StateUpdate,
    ) -> DbResult<Checkpoint> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut state = Self::latest_state_internal(&tx, thread_id)?.unwrap_or_default();
        state.apply(update);

        let now = Utc::now();
        tx.execute(
            "INSERT INTO checkpoints (thread_id, state, created_at) VALUES (?1, ?2, ?3)",
            params![
                thread_id.as_str(),
                serde_json::to_string(&state)?,
                now.to_rfc3339()
            ],
        )?;
        let checkpoint_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Checkpoint {
            checkpoint_id,
            thread_id: thread_id.clone(),
            state,
            created_at: now,
        })
    }

    /// Distinct thread ids, most recently written first. Snapshot bodies are
    /// not read, so a corrupt state only affects that thread's own reads.
    pub fn list_thread_ids(&self) -> DbResult<Vec<ThreadId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT thread_id FROM checkpoints
             GROUP BY thread_id ORDER BY MAX(checkpoint_id) DESC",
        )?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|id| id.map(ThreadId::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// All checkpoints, newest first
    pub fn list_checkpoints(&self) -> DbResult<Vec<Checkpoint>> {
        self.query_checkpoints(None)
    }

    /// The newest `limit` checkpoints
    pub fn list_recent_checkpoints(&self, limit: usize) -> DbResult<Vec<Checkpoint>> {
        self.query_checkpoints(Some(limit))
    }

    fn query_checkpoints(&self, limit: Option<usize>) -> DbResult<Vec<Checkpoint>> {
        let conn = self.lock()?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let mut stmt = conn.prepare(
            "SELECT checkpoint_id, thread_id, state, created_at
             FROM checkpoints ORDER BY checkpoint_id DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<CheckpointRow>, _>>()?;

        rows.into_iter()
            .map(|(checkpoint_id, thread_id, state, created_at)| {
                Ok(Checkpoint {
                    checkpoint_id,
                    thread_id: ThreadId::from(thread_id),
                    state: serde_json::from_str(&state)?,
                    created_at: parse_datetime(&created_at),
                })
            })
            .collect()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
