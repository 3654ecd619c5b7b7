use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::late_fee::{days_overdue, LateFeeSchedule};
use super::models::{BillStatus, LateFeeType};

/// key: late-fee-accrual -> per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccrualReport {
    pub scanned: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, FromRow)]
struct OverdueCandidate {
    id: Uuid,
    tenant_id: Uuid,
    amount: Decimal,
    late_fee: Decimal,
    due_date: NaiveDate,
    status: BillStatus,
    template_id: Option<Uuid>,
    late_fee_type: Option<LateFeeType>,
    template_late_fee: Option<Decimal>,
    late_fee_percentage: Option<Decimal>,
    late_fee_max: Option<Decimal>,
}

impl OverdueCandidate {
    fn schedule(&self, fallback_daily_fee: Decimal) -> LateFeeSchedule {
        match (self.template_id, self.late_fee_type) {
            (Some(_), Some(late_fee_type)) => LateFeeSchedule::from_settings(
                late_fee_type,
                self.template_late_fee.unwrap_or(Decimal::ZERO),
                self.late_fee_percentage,
                self.late_fee_max,
            ),
            _ => LateFeeSchedule::flat(fallback_daily_fee),
        }
    }
}

/// key: late-fee-accrual -> recompute late fees for open overdue bills
///
/// Recomputes `late_fee` from scratch on every run so repeated runs on the same day
/// converge on the same value. Bills matching no template accrue `fallback_daily_fee`.
pub async fn accrue_late_fees(
    pool: &PgPool,
    now: DateTime<Utc>,
    fallback_daily_fee: Decimal,
) -> Result<AccrualReport, sqlx::Error> {
    let today = now.date_naive();
    let candidates = sqlx::query_as::<_, OverdueCandidate>(
        r#"
        SELECT
            b.id,
            b.tenant_id,
            b.amount,
            b.late_fee,
            b.due_date,
            b.status,
            t.id AS template_id,
            t.late_fee_type,
            t.late_fee AS template_late_fee,
            t.late_fee_percentage,
            t.late_fee_max
        FROM bills b
        LEFT JOIN LATERAL (
            SELECT id, late_fee_type, late_fee, late_fee_percentage, late_fee_max
            FROM billing_templates
            WHERE tenant_id = b.tenant_id
              AND category = b.category
              AND deleted_at IS NULL
            ORDER BY updated_at DESC
            LIMIT 1
        ) t ON TRUE
        WHERE b.status IN ('pending', 'overdue')
          AND b.due_date IS NOT NULL
          AND b.due_date < $1
          AND b.deleted_at IS NULL
        ORDER BY b.due_date ASC
        "#,
    )
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut report = AccrualReport {
        scanned: candidates.len(),
        ..AccrualReport::default()
    };

    for bill in candidates {
        let days = days_overdue(now, bill.due_date);
        if days <= 0 {
            report.skipped += 1;
            continue;
        }

        let late_fee = bill.schedule(fallback_daily_fee).accrued(bill.amount, days);
        if late_fee == bill.late_fee && bill.status == BillStatus::Overdue {
            report.skipped += 1;
            continue;
        }

        let result = sqlx::query(
            r#"
            UPDATE bills
            SET late_fee = $2, status = 'overdue', updated_at = NOW()
            WHERE id = $1
              AND tenant_id = $3
              AND status IN ('pending', 'overdue')
              AND deleted_at IS NULL
            "#,
        )
        .bind(bill.id)
        .bind(late_fee)
        .bind(bill.tenant_id)
        .execute(pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                debug!(
                    bill_id = %bill.id,
                    tenant_id = %bill.tenant_id,
                    days_overdue = days,
                    %late_fee,
                    "late fee accrued"
                );
                report.updated += 1;
            }
            Ok(_) => report.skipped += 1,
            Err(err) => {
                warn!(?err, bill_id = %bill.id, "failed to update late fee");
                report.failed += 1;
            }
        }
    }

    info!(
        scanned = report.scanned,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "late fee accrual finished"
    );
    Ok(report)
}

/// key: late-fee-accrual -> pending to overdue promotion
pub async fn promote_overdue_bills(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE bills
        SET status = 'overdue', updated_at = NOW()
        WHERE status = 'pending'
          AND due_date IS NOT NULL
          AND due_date < $1
          AND deleted_at IS NULL
        "#,
    )
    .bind(now.date_naive())
    .execute(pool)
    .await?;

    let promoted = result.rows_affected();
    if promoted > 0 {
        info!(promoted, "pending bills promoted to overdue");
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate() -> OverdueCandidate {
        OverdueCandidate {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            amount: dec!(100000),
            late_fee: Decimal::ZERO,
            due_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            status: BillStatus::Pending,
            template_id: None,
            late_fee_type: None,
            template_late_fee: None,
            late_fee_percentage: None,
            late_fee_max: None,
        }
    }

    #[test]
    fn unmatched_bills_use_fallback_rate() {
        let bill = candidate();
        assert_eq!(bill.schedule(dec!(5000)), LateFeeSchedule::flat(dec!(5000)));
    }

    #[test]
    fn matched_template_policy_wins() {
        let bill = OverdueCandidate {
            template_id: Some(Uuid::new_v4()),
            late_fee_type: Some(LateFeeType::Percentage),
            template_late_fee: Some(Decimal::ZERO),
            late_fee_percentage: Some(dec!(1)),
            late_fee_max: Some(dec!(50000)),
            ..candidate()
        };
        let schedule = bill.schedule(dec!(5000));
        assert_eq!(schedule.cap, Some(dec!(50000)));
        assert_eq!(schedule.accrued(bill.amount, 2), dec!(2000));
    }
}
