//! SQLite result store
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the probe writers
//! - **Connection pooling**: Probe tasks write concurrently through the pool
//! - **Migrations**: Schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, HistoryQuery, ResultStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    ResultRow, UptimeStats, from_millis, state_from_parts, to_millis, transition_from_parts,
};
use crate::ProbeResult;
use crate::evaluator::{TargetState, Transition};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (and create if missing) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite result store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|source| StorageError::Open {
                path: db_path_str.clone(),
                source,
            })?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite result store ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn result_from_row(row: &SqliteRow) -> StorageResult<ProbeResult> {
        ResultRow {
            target_id: row.try_get("target_id")?,
            timestamp: from_millis(row.try_get("timestamp")?)?,
            outcome: row.try_get("outcome")?,
            latency_ms: row.try_get("latency_ms")?,
            packet_loss_pct: row.try_get("packet_loss_pct")?,
            metrics: row.try_get("metrics")?,
            error: row.try_get("error")?,
        }
        .into_result()
    }

    fn state_from_row(row: &SqliteRow) -> StorageResult<TargetState> {
        let status: String = row.try_get("status")?;
        state_from_parts(
            row.try_get("target_id")?,
            &status,
            row.try_get("consecutive_failures")?,
            row.try_get("consecutive_successes")?,
            row.try_get("last_transition")?,
            row.try_get("last_evaluated")?,
        )
    }

    fn transition_from_row(row: &SqliteRow) -> StorageResult<Transition> {
        let old_status: String = row.try_get("old_status")?;
        let new_status: String = row.try_get("new_status")?;
        transition_from_parts(
            row.try_get("target_id")?,
            &old_status,
            &new_status,
            row.try_get("timestamp")?,
        )
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    #[instrument(skip(self, result), fields(target_id = %result.target_id))]
    async fn append_result(&self, result: &ProbeResult) -> StorageResult<()> {
        let row = ResultRow::from_result(result)?;

        sqlx::query(
            r#"
            INSERT INTO probe_results (
                target_id, timestamp, outcome, latency_ms, packet_loss_pct, metrics, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.target_id)
        .bind(to_millis(&row.timestamp))
        .bind(&row.outcome)
        .bind(row.latency_ms)
        .bind(row.packet_loss_pct)
        .bind(&row.metrics)
        .bind(&row.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, state), fields(target_id = %state.target_id))]
    async fn upsert_state(&self, state: &TargetState) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO target_states (
                target_id, status, consecutive_failures, consecutive_successes,
                last_transition, last_evaluated
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (target_id) DO UPDATE SET
                status = excluded.status,
                consecutive_failures = excluded.consecutive_failures,
                consecutive_successes = excluded.consecutive_successes,
                last_transition = excluded.last_transition,
                last_evaluated = excluded.last_evaluated
            "#,
        )
        .bind(&state.target_id)
        .bind(state.status.as_str())
        .bind(state.consecutive_failures as i64)
        .bind(state.consecutive_successes as i64)
        .bind(state.last_transition.as_ref().map(to_millis))
        .bind(state.last_evaluated.as_ref().map(to_millis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, transition), fields(target_id = %transition.target_id))]
    async fn append_transition(&self, transition: &Transition) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transitions (target_id, old_status, new_status, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&transition.target_id)
        .bind(transition.old_status.as_str())
        .bind(transition.new_status.as_str())
        .bind(to_millis(&transition.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_state(&self, target_id: &str) -> StorageResult<Option<TargetState>> {
        let row = sqlx::query(
            r#"
            SELECT target_id, status, consecutive_failures, consecutive_successes,
                   last_transition, last_evaluated
            FROM target_states
            WHERE target_id = ?
            "#,
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::state_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn load_states(&self) -> StorageResult<Vec<TargetState>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id, status, consecutive_failures, consecutive_successes,
                   last_transition, last_evaluated
            FROM target_states
            ORDER BY target_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let states = rows
            .iter()
            .map(Self::state_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("loaded {} target states", states.len());
        Ok(states)
    }

    #[instrument(skip(self), fields(target_id = %query.target_id))]
    async fn query_history(&self, query: HistoryQuery) -> StorageResult<Vec<ProbeResult>> {
        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1); // SQLite: negative LIMIT means no limit

        let rows = sqlx::query(
            r#"
            SELECT target_id, timestamp, outcome, latency_ms, packet_loss_pct, metrics, error
            FROM probe_results
            WHERE target_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(&query.target_id)
        .bind(to_millis(&query.start))
        .bind(to_millis(&query.end))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let results = rows
            .iter()
            .map(Self::result_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("history query returned {} results", results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn query_transitions(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Transition>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id, old_status, new_status, timestamp
            FROM transitions
            WHERE target_id = ? AND timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(target_id)
        .bind(to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::transition_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn calculate_uptime(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<UptimeStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END), 0) AS successful,
                AVG(latency_ms) AS avg_latency
            FROM probe_results
            WHERE target_id = ? AND timestamp >= ?
            "#,
        )
        .bind(target_id)
        .bind(to_millis(&since))
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let successful: i64 = row.try_get("successful")?;
        let avg_latency: Option<f64> = row.try_get("avg_latency")?;

        Ok(UptimeStats::from_counts(
            target_id,
            since,
            total.max(0) as u64,
            successful.max(0) as u64,
            avg_latency,
        ))
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = to_millis(&before);

        info!("cleaning up results older than {}", before);

        let mut tx = self.pool.begin().await?;

        let results = sqlx::query("DELETE FROM probe_results WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&mut *tx)
            .await?;
        let transitions = sqlx::query("DELETE FROM transitions WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted = results.rows_affected() as usize;
        info!(
            "deleted {} old results and {} old transitions",
            deleted,
            transitions.rows_affected()
        );

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT COUNT(*) AS total FROM probe_results")
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => {
                let total: i64 = row.try_get("total")?;
                let file_size = std::fs::metadata(&self.db_path)
                    .map(|m| m.len())
                    .unwrap_or(0);

                let metadata = HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                    ("results".to_string(), total.to_string()),
                    ("file_size_bytes".to_string(), file_size.to_string()),
                ]);

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite result store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite result store");
        self.pool.close().await;
        Ok(())
    }
}
