//! SQLite queue store.

use super::{resolve_conflict, ConflictResolution, EnqueueOutcome, QueueStore, QueuedCommandRecord, RecordId};
use crate::command::{CommandSpec, Priority};
use crate::config::StoreConfig;
use crate::error::CommandResult;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SELECT_COLUMNS: &str =
    "SELECT id, dedup_key, command_type, lane, priority, submitted_at, parameters FROM queued_command";

/// Database row representation of a queued command.
#[derive(Debug, FromRow)]
struct QueuedCommandRow {
    id: i64,
    dedup_key: String,
    command_type: String,
    lane: String,
    priority: i64,
    submitted_at: i64,
    parameters: Vec<u8>,
}

impl From<QueuedCommandRow> for QueuedCommandRecord {
    fn from(row: QueuedCommandRow) -> Self {
        Self {
            id: RecordId::new(row.id),
            dedup_key: row.dedup_key,
            command_type: row.command_type,
            lane: row.lane,
            priority: Priority::new(i32::try_from(row.priority).unwrap_or(i32::MAX)),
            submitted_at: row.submitted_at,
            parameters: row.parameters,
        }
    }
}

/// Queue store backed by a SQLite table.
pub struct SqliteQueueStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteQueueStore {
    /// Connects to the configured database and applies migrations.
    pub async fn connect(config: &StoreConfig) -> CommandResult<Self> {
        info!(url = %config.url, "Opening command queue database");

        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await?;

        let store = Self::with_pool(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wraps an existing pool. Call [`run_migrations`](Self::run_migrations)
    /// before use if the schema may be missing.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Creates the queue table if needed.
    pub async fn run_migrations(&self) -> CommandResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
        debug!("Command queue migrations applied");
        Ok(())
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert(tx: &mut Transaction<'_, Sqlite>, spec: &CommandSpec) -> CommandResult<RecordId> {
        let result = sqlx::query(
            r#"
            INSERT INTO queued_command (dedup_key, command_type, lane, priority, submitted_at, parameters)
            VALUES (?, ?, ?, ?, (SELECT COALESCE(MAX(submitted_at), 0) + 1 FROM queued_command), ?)
            "#,
        )
        .bind(&spec.dedup_key)
        .bind(&spec.command_type)
        .bind(&spec.lane)
        .bind(i64::from(spec.priority.value()))
        .bind(&spec.parameters)
        .execute(&mut **tx)
        .await?;

        Ok(RecordId::new(result.last_insert_rowid()))
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn try_enqueue(&self, spec: &CommandSpec) -> CommandResult<EnqueueOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM queued_command WHERE lane = ? AND dedup_key = ?")
                .bind(&spec.lane)
                .bind(&spec.dedup_key)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match resolve_conflict(existing.map(RecordId::new), spec.conflict) {
            ConflictResolution::Insert => {
                let id = Self::insert(&mut tx, spec).await?;
                tx.commit().await?;
                EnqueueOutcome::Inserted(id)
            }
            ConflictResolution::Keep(id) => {
                tx.rollback().await?;
                EnqueueOutcome::Skipped(id)
            }
            ConflictResolution::Replace(removed) => {
                sqlx::query("DELETE FROM queued_command WHERE id = ?")
                    .bind(removed.get())
                    .execute(&mut *tx)
                    .await?;
                let inserted = Self::insert(&mut tx, spec).await?;
                tx.commit().await?;
                EnqueueOutcome::Replaced { removed, inserted }
            }
        };

        debug!(lane = %spec.lane, dedup_key = %spec.dedup_key, outcome = outcome.as_str(), "Enqueue resolved");
        Ok(outcome)
    }

    async fn load_all(&self, lane: &str) -> CommandResult<Vec<QueuedCommandRecord>> {
        let rows = sqlx::query_as::<_, QueuedCommandRow>(&format!(
            "{} WHERE lane = ? ORDER BY priority ASC, submitted_at ASC, id ASC",
            SELECT_COLUMNS
        ))
        .bind(lane)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(QueuedCommandRecord::from).collect())
    }

    async fn peek_next(&self, lane: &str) -> CommandResult<Option<QueuedCommandRecord>> {
        let row = sqlx::query_as::<_, QueuedCommandRow>(&format!(
            "{} WHERE lane = ? ORDER BY priority ASC, submitted_at ASC, id ASC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(lane)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QueuedCommandRecord::from))
    }

    async fn remove(&self, id: RecordId) -> CommandResult<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM queued_command WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_key(&self, lane: &str, dedup_key: &str) -> CommandResult<Option<QueuedCommandRecord>> {
        let row = sqlx::query_as::<_, QueuedCommandRow>(&format!(
            "{} WHERE lane = ? AND dedup_key = ?",
            SELECT_COLUMNS
        ))
        .bind(lane)
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QueuedCommandRecord::from))
    }

    async fn count(&self, lane: &str) -> CommandResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_command WHERE lane = ?")
            .bind(lane)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn clear_lane(&self, lane: &str) -> CommandResult<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM queued_command WHERE lane = ?")
            .bind(lane)
            .execute(&self.pool)
            .await?;
        info!(lane = %lane, removed = result.rows_affected(), "Command lane cleared");
        Ok(result.rows_affected())
    }
}
