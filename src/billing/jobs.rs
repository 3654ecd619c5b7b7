use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config;

use super::accrual::{accrue_late_fees, promote_overdue_bills};
use super::scheduler::{Cadence, Clock, ScheduledJob, Scheduler, SystemClock};

const LATE_FEE_LOCK_KEY: i64 = 0x6269_6c6c_0001;
const OVERDUE_LOCK_KEY: i64 = 0x6269_6c6c_0002;

/// Daily recomputation of late fees for overdue bills.
pub struct LateFeeAccrualJob {
    pool: PgPool,
    fallback_daily_fee: Decimal,
    use_advisory_lock: bool,
}

impl LateFeeAccrualJob {
    pub fn new(pool: PgPool, fallback_daily_fee: Decimal, use_advisory_lock: bool) -> Self {
        Self {
            pool,
            fallback_daily_fee,
            use_advisory_lock,
        }
    }
}

#[async_trait]
impl ScheduledJob for LateFeeAccrualJob {
    fn name(&self) -> &str {
        "late_fee_accrual"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let fallback = self.fallback_daily_fee;
        run_exclusive(
            &self.pool,
            self.use_advisory_lock,
            LATE_FEE_LOCK_KEY,
            self.name(),
            || async move {
                accrue_late_fees(&self.pool, now, fallback).await?;
                Ok(())
            },
        )
        .await
    }
}

/// Frequent pending -> overdue sweep that keeps statuses fresh between accrual runs.
pub struct OverduePromotionJob {
    pool: PgPool,
    use_advisory_lock: bool,
}

impl OverduePromotionJob {
    pub fn new(pool: PgPool, use_advisory_lock: bool) -> Self {
        Self {
            pool,
            use_advisory_lock,
        }
    }
}

#[async_trait]
impl ScheduledJob for OverduePromotionJob {
    fn name(&self) -> &str {
        "overdue_promotion"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        run_exclusive(
            &self.pool,
            self.use_advisory_lock,
            OVERDUE_LOCK_KEY,
            self.name(),
            || async move {
                promote_overdue_bills(&self.pool, now).await?;
                Ok(())
            },
        )
        .await
    }
}

/// Runs `work` only while holding the session advisory lock `key`. Another instance
/// holding the lock means this run is skipped.
async fn run_exclusive<F, Fut>(
    pool: &PgPool,
    use_lock: bool,
    key: i64,
    job: &str,
    work: F,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if !use_lock {
        return work().await;
    }

    let mut conn = pool.acquire().await?;
    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(key)
        .fetch_one(&mut *conn)
        .await?;
    if !acquired {
        info!(job, "advisory lock held elsewhere; skipping run");
        return Ok(());
    }

    let outcome = work().await;

    let released = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .execute(&mut *conn)
        .await;
    if let Err(err) = released {
        // The lock is session scoped; dropping the connection releases it.
        warn!(?err, job, "failed to release advisory lock");
        conn.detach();
    }
    outcome
}

/// key: billing-scheduler -> production wiring from config
pub fn billing_scheduler(pool: PgPool) -> Scheduler {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let use_lock = *config::BILLING_SCHEDULER_ADVISORY_LOCK;

    Scheduler::new(clock)
        .with_job(
            Cadence::Daily {
                at: *config::BILLING_LATE_FEE_RUN_AT,
                utc_offset: *config::BILLING_SCHEDULE_UTC_OFFSET,
            },
            Arc::new(LateFeeAccrualJob::new(
                pool.clone(),
                *config::BILLING_FALLBACK_DAILY_LATE_FEE,
                use_lock,
            )),
        )
        .with_job(
            Cadence::Interval {
                every: StdDuration::from_secs(*config::BILLING_STATUS_SCAN_INTERVAL_SECS),
                run_immediately: true,
            },
            Arc::new(OverduePromotionJob::new(pool, use_lock)),
        )
}
