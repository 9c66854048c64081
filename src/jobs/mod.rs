//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks.
//! These jobs are run on a schedule to clean up expired data and maintain
//! system health.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::interval;

// =========================================================================
// Rate Limit Bucket Cleanup Job
// =========================================================================

/// Clean up expired rate limit buckets
/// Removes buckets older than 2 minutes to prevent unbounded growth
pub async fn cleanup_rate_limit_buckets(pool: &PgPool) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM rate_limit_buckets
        WHERE window_start < NOW() - INTERVAL '2 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Cleaned up expired rate limit buckets"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Idempotency Key Timeout Reset Job
// =========================================================================

/// Reset stale idempotency keys that are stuck in 'processing' status
/// Keys stuck for more than 5 minutes are reset to 'failed' to allow retry
pub async fn reset_stale_idempotency_keys(pool: &PgPool) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        UPDATE idempotency_keys
        SET processing_status = 'failed'
        WHERE processing_status = 'processing'
          AND processing_started_at < NOW() - INTERVAL '5 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    let rows_affected = result.rows_affected();

    if rows_affected > 0 {
        tracing::warn!(
            rows_affected = rows_affected,
            "Reset stale processing idempotency keys"
        );
    }

    Ok(rows_affected)
}

// =========================================================================
// Expired Idempotency Key Deletion Job
// =========================================================================

/// Delete expired idempotency keys
/// Keys older than their expiration time (default 24 hours) are removed
pub async fn delete_expired_idempotency_keys(pool: &PgPool) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM idempotency_keys
        WHERE expires_at < NOW()
        "#,
    )
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Deleted expired idempotency keys"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Retention Pruning Jobs
// =========================================================================

/// Delete audit events older than the retention window.
/// Audit rows are append-only in normal operation; retention is the only
/// path that removes them.
pub async fn prune_expired_audit_events(
    pool: &PgPool,
    retention_days: i64,
) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM audit_events
        WHERE created_at < NOW() - make_interval(days => $1)
        "#,
    )
    .bind(retention_days as i32)
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            retention_days = retention_days,
            "Pruned expired audit events"
        );
    }

    Ok(rows_deleted)
}

/// Delete journal rows older than the retention window.
/// Pruned rows narrow the window reconciliation can recompute, so this
/// job only runs when a retention is explicitly configured.
pub async fn prune_expired_journal_rows(
    pool: &PgPool,
    retention_days: i64,
) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM journal_entries
        WHERE created_at < NOW() - make_interval(days => $1)
        "#,
    )
    .bind(retention_days as i32)
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::warn!(
            rows_deleted = rows_deleted,
            retention_days = retention_days,
            "Pruned journal rows past retention"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for rate limit cleanup (default: 1 minute)
    pub rate_limit_cleanup_interval: Duration,
    /// Interval for idempotency key maintenance (default: 1 minute)
    pub idempotency_maintenance_interval: Duration,
    /// Interval for retention pruning (default: 1 hour)
    pub retention_interval: Duration,
    /// Audit event retention window in days
    pub audit_retention_days: i64,
    /// Journal retention window in days; None keeps rows forever
    pub journal_retention_days: Option<i64>,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            rate_limit_cleanup_interval: Duration::from_secs(60),
            idempotency_maintenance_interval: Duration::from_secs(60),
            retention_interval: Duration::from_secs(3600),
            audit_retention_days: 365,
            journal_retention_days: None,
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    pool: PgPool,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(pool: PgPool, config: JobSchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut rate_limit_interval = interval(self.config.rate_limit_cleanup_interval);
        let mut idempotency_interval = interval(self.config.idempotency_maintenance_interval);
        let mut retention_interval = interval(self.config.retention_interval);

        loop {
            tokio::select! {
                _ = rate_limit_interval.tick() => {
                    if let Err(e) = cleanup_rate_limit_buckets(&self.pool).await {
                        tracing::error!(error = %e, "Rate limit cleanup failed");
                    }
                }
                _ = idempotency_interval.tick() => {
                    if let Err(e) = reset_stale_idempotency_keys(&self.pool).await {
                        tracing::error!(error = %e, "Idempotency key reset failed");
                    }
                    if let Err(e) = delete_expired_idempotency_keys(&self.pool).await {
                        tracing::error!(error = %e, "Idempotency key deletion failed");
                    }
                }
                _ = retention_interval.tick() => {
                    if let Err(e) = prune_expired_audit_events(&self.pool, self.config.audit_retention_days).await {
                        tracing::error!(error = %e, "Audit retention pruning failed");
                    }
                    if let Some(days) = self.config.journal_retention_days {
                        if let Err(e) = prune_expired_journal_rows(&self.pool, days).await {
                            tracing::error!(error = %e, "Journal retention pruning failed");
                        }
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match cleanup_rate_limit_buckets(&self.pool).await {
            Ok(count) => report.rate_limit_buckets_cleaned = count,
            Err(e) => report.errors.push(format!("Rate limit cleanup: {}", e)),
        }

        match reset_stale_idempotency_keys(&self.pool).await {
            Ok(count) => report.idempotency_keys_reset = count,
            Err(e) => report.errors.push(format!("Idempotency reset: {}", e)),
        }

        match delete_expired_idempotency_keys(&self.pool).await {
            Ok(count) => report.idempotency_keys_deleted = count,
            Err(e) => report.errors.push(format!("Idempotency deletion: {}", e)),
        }

        match prune_expired_audit_events(&self.pool, self.config.audit_retention_days).await {
            Ok(count) => report.audit_events_pruned = count,
            Err(e) => report.errors.push(format!("Audit retention: {}", e)),
        }

        if let Some(days) = self.config.journal_retention_days {
            match prune_expired_journal_rows(&self.pool, days).await {
                Ok(count) => report.journal_rows_pruned = count,
                Err(e) => report.errors.push(format!("Journal retention: {}", e)),
            }
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub rate_limit_buckets_cleaned: u64,
    pub idempotency_keys_reset: u64,
    pub idempotency_keys_deleted: u64,
    pub audit_events_pruned: u64,
    pub journal_rows_pruned: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// =========================================================================
// Tests
// =========================================================================
