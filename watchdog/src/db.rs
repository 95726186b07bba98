//! Watchdog state database backed by SQLite.
//!
//! Persists the sustained-high-CPU strike counters and kill/reload history
//! so a watchdog restart does not reset a container back to zero strikes
//! (the counters themselves are specified in-memory by the source; this is
//! an additive durability improvement, not a behavior change).

use std::path::Path;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// The watchdog's own SQLite state database.
pub struct StateDb {
    pool: SqlitePool,
}

/// A completed or attempted kill action, for audit/history queries.
#[derive(Debug, Clone)]
pub struct KillEvent {
    /// Container the kill action targeted.
    pub container_name: String,
    /// Human-readable reason the kill was triggered.
    pub reason: String,
    /// Action taken: `"restart"`, `"stop"`, or `"report_only"`.
    pub action: String,
    /// `"completed"` or `"failed"`.
    pub status: String,
}

impl StateDb {
    /// Open (or create) the state database at `path` and apply the
    /// watchdog schema migration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the migration
    /// fails to apply.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state db directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open state db at {}", path.display()))?;

        let migration_sql = include_str!("../migrations/001_watchdog_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .context("failed to apply watchdog schema migration")?;

        Ok(Self { pool })
    }

    /// In-memory-only database, for tests that don't need a real file.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration fails to apply.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory state db")?;
        let migration_sql = include_str!("../migrations/001_watchdog_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .context("failed to apply watchdog schema migration")?;
        Ok(Self { pool })
    }

    /// Current sustained-high-CPU strike count for `container_name`, or 0
    /// if it has never been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn cpu_strike_count(&self, container_name: &str) -> anyhow::Result<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT consecutive_high_cpu_count FROM sustained_cpu WHERE container_name = ?1",
        )
        .bind(container_name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read cpu strike count")?;

        Ok(row.map_or(0, |(count,)| count.try_into().unwrap_or(u32::MAX)))
    }

    /// Upsert the strike count for `container_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set_cpu_strike_count(&self, container_name: &str, count: u32) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO sustained_cpu (container_name, consecutive_high_cpu_count, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(container_name) DO UPDATE SET
                consecutive_high_cpu_count = ?2,
                updated_at = ?3",
        )
        .bind(container_name)
        .bind(i64::from(count))
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to write cpu strike count")?;
        Ok(())
    }

    /// Record a kill action attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn record_kill_event(&self, event: &KillEvent) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO kill_events (container_name, triggered_at, reason, action, status, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&event.container_name)
        .bind(&now)
        .bind(&event.reason)
        .bind(&event.action)
        .bind(&event.status)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("failed to record kill event")?;
        Ok(())
    }

    /// Record a policy reload, for history/debugging.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn record_policy_reload(&self, fingerprint: &str, load_count: u64) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO policy_reloads (reloaded_at, fingerprint, load_count) VALUES (?1, ?2, ?3)",
        )
        .bind(now)
        .bind(fingerprint)
        .bind(i64::try_from(load_count).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .context("failed to record policy reload")?;
        Ok(())
    }
}
