// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! History log: per-layer subset snapshots with undo semantics.
//!
//! One row per applied subset, keyed by `(project_uuid, layer_id)` and
//! totally ordered by `seq_order`. Appends serialize behind a single
//! writer lock so `seq_order` can never race. Failures here are surfaced
//! but never fatal to the filter operation that triggered them.
//!

use crate::FilterError;
use jiff::Timestamp;
use sqlx::{FromRow, Pool, Sqlite, sqlite::SqliteConnectOptions};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

// Wire-exact persistence schema.
const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS filter_history (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    project_uuid TEXT NOT NULL,
    layer_id TEXT NOT NULL,
    source_layer_id TEXT,
    seq_order INTEGER NOT NULL,
    subset_string TEXT NOT NULL
)";
const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS filter_history_key \
    ON filter_history (project_uuid, layer_id, seq_order)";

/// One recorded subset snapshot.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Row id.
    pub id: String,
    /// When the subset was applied.
    pub timestamp: String,
    /// Owning project.
    pub project_uuid: String,
    /// Layer the subset was applied to.
    pub layer_id: String,
    /// Source layer that drove the filter, when applicable.
    pub source_layer_id: Option<String>,
    /// Position in the per-layer sequence.
    pub seq_order: i64,
    /// The applied subset string.
    pub subset_string: String,
}

/// The log itself. Cheap to clone a handle around via `Arc`.
#[derive(Debug)]
pub struct HistoryLog {
    pool: Pool<Sqlite>,
    // Single-writer append lock; read-max + insert must be atomic.
    write_lock: Mutex<()>,
}

impl HistoryLog {
    /// Open (or create) the log in a SQLite database file.
    pub async fn open(url: &str) -> Result<Self, FilterError> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = sqlx::pool::PoolOptions::new().connect_with(opts).await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;
        Ok(HistoryLog {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// An in-memory log; used by headless hosts and tests.
    pub async fn in_memory() -> Result<Self, FilterError> {
        Self::open("sqlite::memory:").await
    }

    /// Append a snapshot, assigning the next `seq_order` for the
    /// `(project, layer)` pair. One transparent retry on transient errors.
    pub async fn append(
        &self,
        project_uuid: &str,
        layer_id: &str,
        source_layer_id: Option<&str>,
        subset_string: &str,
    ) -> Result<HistoryEntry, FilterError> {
        match self
            .append_once(project_uuid, layer_id, source_layer_id, subset_string)
            .await
        {
            Ok(x) => Ok(x),
            Err(x) if x.is_transient() => {
                warn!("history append failed ({x}); retrying once");
                self.append_once(project_uuid, layer_id, source_layer_id, subset_string)
                    .await
            }
            Err(x) => Err(x),
        }
    }

    async fn append_once(
        &self,
        project_uuid: &str,
        layer_id: &str,
        source_layer_id: Option<&str>,
        subset_string: &str,
    ) -> Result<HistoryEntry, FilterError> {
        let _guard = self.write_lock.lock().await;

        let (last,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(seq_order) FROM filter_history \
             WHERE project_uuid = $1 AND layer_id = $2",
        )
        .bind(project_uuid)
        .bind(layer_id)
        .fetch_one(&self.pool)
        .await?;

        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Timestamp::now().to_string(),
            project_uuid: project_uuid.to_owned(),
            layer_id: layer_id.to_owned(),
            source_layer_id: source_layer_id.map(str::to_owned),
            seq_order: last.unwrap_or(0) + 1,
            subset_string: subset_string.to_owned(),
        };

        sqlx::query(
            "INSERT INTO filter_history \
             (id, timestamp, project_uuid, layer_id, source_layer_id, seq_order, subset_string) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&entry.id)
        .bind(&entry.timestamp)
        .bind(&entry.project_uuid)
        .bind(&entry.layer_id)
        .bind(&entry.source_layer_id)
        .bind(entry.seq_order)
        .bind(&entry.subset_string)
        .execute(&self.pool)
        .await?;

        debug!(
            "history: appended seq {} for ({project_uuid}, {layer_id})",
            entry.seq_order
        );
        Ok(entry)
    }

    /// Most-recent entry for the pair, or `None`.
    pub async fn last(
        &self,
        project_uuid: &str,
        layer_id: &str,
    ) -> Result<Option<HistoryEntry>, FilterError> {
        self.last_unlocked(project_uuid, layer_id).await
    }

    /// Remove and return the tail entry (undo).
    pub async fn pop_last(
        &self,
        project_uuid: &str,
        layer_id: &str,
    ) -> Result<Option<HistoryEntry>, FilterError> {
        let _guard = self.write_lock.lock().await;
        let Some(tail) = self.last_unlocked(project_uuid, layer_id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM filter_history WHERE id = $1")
            .bind(&tail.id)
            .execute(&self.pool)
            .await?;
        Ok(Some(tail))
    }

    async fn last_unlocked(
        &self,
        project_uuid: &str,
        layer_id: &str,
    ) -> Result<Option<HistoryEntry>, FilterError> {
        let it = sqlx::query_as::<_, HistoryEntry>(
            "SELECT * FROM filter_history \
             WHERE project_uuid = $1 AND layer_id = $2 \
             ORDER BY seq_order DESC LIMIT 1",
        )
        .bind(project_uuid)
        .bind(layer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(it)
    }

    /// Remove every entry for the pair.
    pub async fn delete_all(
        &self,
        project_uuid: &str,
        layer_id: &str,
    ) -> Result<u64, FilterError> {
        let _guard = self.write_lock.lock().await;
        let done = sqlx::query(
            "DELETE FROM filter_history WHERE project_uuid = $1 AND layer_id = $2",
        )
        .bind(project_uuid)
        .bind(layer_id)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_append_assigns_increasing_seq() {
        let log = HistoryLog::in_memory().await.unwrap();
        let a = log.append("p1", "roads", Some("towns"), "fid IN (1)").await.unwrap();
        let b = log.append("p1", "roads", Some("towns"), "fid IN (2)").await.unwrap();
        assert_eq!(a.seq_order, 1);
        assert_eq!(b.seq_order, 2);

        // Another pair starts its own sequence.
        let c = log.append("p1", "parcels", None, "fid IN (9)").await.unwrap();
        assert_eq!(c.seq_order, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_last_and_pop() {
        let log = HistoryLog::in_memory().await.unwrap();
        assert!(log.last("p1", "roads").await.unwrap().is_none());

        log.append("p1", "roads", None, "a").await.unwrap();
        log.append("p1", "roads", None, "b").await.unwrap();

        let last = log.last("p1", "roads").await.unwrap().unwrap();
        assert_eq!(last.subset_string, "b");

        let popped = log.pop_last("p1", "roads").await.unwrap().unwrap();
        assert_eq!(popped.subset_string, "b");
        let last = log.last("p1", "roads").await.unwrap().unwrap();
        assert_eq!(last.subset_string, "a");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_all() {
        let log = HistoryLog::in_memory().await.unwrap();
        log.append("p1", "roads", None, "a").await.unwrap();
        log.append("p1", "roads", None, "b").await.unwrap();
        let removed = log.delete_all("p1", "roads").await.unwrap();
        assert_eq!(removed, 2);
        assert!(log.last("p1", "roads").await.unwrap().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_concurrent_appends_serialize() {
        let log = std::sync::Arc::new(HistoryLog::in_memory().await.unwrap());
        let mut handles = Vec::new();
        for i in 0..16 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append("p1", "roads", None, &format!("s{i}")).await.unwrap()
            }));
        }
        let mut seqs: Vec<i64> = Vec::new();
        for h in handles {
            seqs.push(h.await.unwrap().seq_order);
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=16).collect::<Vec<i64>>());
    }
}
