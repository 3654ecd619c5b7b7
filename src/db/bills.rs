use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

// key: bill-db -> shared write path for generator and ledger
pub struct NewBill<'a> {
    pub tenant_id: Uuid,
    pub unit_id: Uuid,
    pub category: &'a str,
    pub period: &'a str,
    pub amount: Decimal,
    pub late_fee: Decimal,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<&'a str>,
    pub created_by: Uuid,
}

/// Serializes writers of one (tenant, unit, category, period) key until the
/// surrounding transaction ends.
pub async fn lock_bill_key<'c, E>(
    executor: E,
    tenant_id: Uuid,
    unit_id: Uuid,
    category: &str,
    period: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("bill:{tenant_id}:{unit_id}:{category}:{period}"))
        .execute(executor)
        .await?;
    Ok(())
}

/// Whether a live bill already occupies (tenant, unit, category, period).
pub async fn bill_key_taken<'c, E>(
    executor: E,
    tenant_id: Uuid,
    unit_id: Uuid,
    category: &str,
    period: &str,
    excluding: Option<Uuid>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM bills
            WHERE tenant_id = $1
              AND unit_id = $2
              AND category = $3
              AND period = $4
              AND deleted_at IS NULL
              AND ($5::uuid IS NULL OR id <> $5)
        )
        "#,
    )
    .bind(tenant_id)
    .bind(unit_id)
    .bind(category)
    .bind(period)
    .bind(excluding)
    .fetch_one(executor)
    .await
}

/// Inserts a pending bill and returns its id.
pub async fn insert_bill<'c, E>(executor: E, bill: &NewBill<'_>) -> Result<Uuid, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO bills (
            id,
            tenant_id,
            unit_id,
            category,
            period,
            amount,
            late_fee,
            due_date,
            status,
            notes,
            created_by
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, $10)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(bill.tenant_id)
    .bind(bill.unit_id)
    .bind(bill.category)
    .bind(bill.period)
    .bind(bill.amount)
    .bind(bill.late_fee)
    .bind(bill.due_date)
    .bind(bill.notes)
    .bind(bill.created_by)
    .fetch_one(executor)
    .await
}
