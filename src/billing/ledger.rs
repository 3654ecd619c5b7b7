use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::db::bills::{bill_key_taken, insert_bill, lock_bill_key, NewBill};
use crate::db::units::{find_unit, member_unit, UnitRef};

use super::error::BillingError;
use super::models::{
    bill_page_window, Bill, BillListQuery, BillPage, BillScope, BillStatus,
    BulkCreateBillsRequest, BulkCreateOutcome, CreateBillRequest, Pagination,
    ProcessPaymentRequest, UpdateBillRequest,
};
use super::period::{parse_due_date, Period};
use super::templates::search_pattern;

const BILL_SELECT: &str = r#"
    SELECT
        b.id,
        b.tenant_id,
        b.unit_id,
        b.category,
        b.period,
        b.amount,
        b.late_fee,
        (b.amount + b.late_fee) AS total_amount,
        b.due_date,
        b.status,
        b.paid_at,
        b.payment_method,
        b.payment_reference,
        b.notes,
        b.created_by,
        b.created_at,
        b.updated_at,
        u.code AS unit_code,
        u.unit_type
    FROM bills b
    JOIN units u ON u.id = b.unit_id
"#;

/// key: bill-ledger -> bill lifecycle and payment
#[derive(Clone)]
pub struct BillLedger {
    pool: PgPool,
}

/// Validated fields shared by single and bulk creation.
struct BillDraft {
    category: String,
    period: String,
    amount: Decimal,
    late_fee: Decimal,
    due_date: Option<NaiveDate>,
    notes: Option<String>,
}

impl BillDraft {
    fn parse(
        category: &str,
        period: &str,
        amount: Decimal,
        late_fee: Option<Decimal>,
        due_date: Option<&str>,
        notes: Option<String>,
    ) -> Result<Self, BillingError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(BillingError::validation("category is required"));
        }
        let period: Period = period.trim().parse()?;
        if amount <= Decimal::ZERO {
            return Err(BillingError::validation("amount must be greater than 0"));
        }
        let late_fee = late_fee.unwrap_or(Decimal::ZERO);
        if late_fee.is_sign_negative() {
            return Err(BillingError::validation("late_fee must not be negative"));
        }
        Ok(Self {
            category: category.to_string(),
            period: period.to_string(),
            amount,
            late_fee,
            due_date: optional_due_date(due_date)?,
            notes,
        })
    }

    fn as_new_bill(&self, tenant_id: Uuid, unit_id: Uuid, actor_id: Uuid) -> NewBill<'_> {
        NewBill {
            tenant_id,
            unit_id,
            category: &self.category,
            period: &self.period,
            amount: self.amount,
            late_fee: self.late_fee,
            due_date: self.due_date,
            notes: self.notes.as_deref(),
            created_by: actor_id,
        }
    }
}

impl BillLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        request: CreateBillRequest,
    ) -> Result<Bill, BillingError> {
        let draft = BillDraft::parse(
            &request.category,
            &request.period,
            request.amount,
            request.late_fee,
            request.due_date.as_deref(),
            request.notes,
        )?;

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let unit = find_unit(&mut *tx, tenant_id, request.unit_id)
            .await?
            .ok_or_else(|| BillingError::not_found("unit not found"))?;
        ensure_key_free(&mut tx, tenant_id, &unit, &draft.category, &draft.period, None).await?;

        let bill_id = insert_bill(&mut *tx, &draft.as_new_bill(tenant_id, unit.id, actor_id))
            .await?;
        tx.commit().await?;
        info!(
            tenant_id = %tenant_id,
            bill_id = %bill_id,
            unit = %unit.code,
            period = %draft.period,
            "bill created"
        );
        self.get(tenant_id, bill_id).await
    }

    pub async fn get(&self, tenant_id: Uuid, bill_id: Uuid) -> Result<Bill, BillingError> {
        self.find(tenant_id, bill_id)
            .await?
            .ok_or_else(|| BillingError::not_found("bill not found"))
    }

    async fn find(&self, tenant_id: Uuid, bill_id: Uuid) -> Result<Option<Bill>, BillingError> {
        let bill = sqlx::query_as::<_, Bill>(&format!(
            "{BILL_SELECT} WHERE b.id = $1 AND b.tenant_id = $2 AND b.deleted_at IS NULL"
        ))
        .bind(bill_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bill)
    }

    /// Members only see their own unit's bills; a member with no unit sees none.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        scope: BillScope,
        query: BillListQuery,
    ) -> Result<BillPage, BillingError> {
        let (page, limit) = bill_page_window(query.page, query.limit);
        let search = search_pattern(query.search.as_deref());

        let member_unit_id = match scope {
            BillScope::Tenant => None,
            BillScope::Member(user_id) => match member_unit(&self.pool, tenant_id, user_id).await? {
                Some(unit_id) => Some(unit_id),
                None => {
                    return Ok(BillPage {
                        bills: Vec::new(),
                        pagination: Pagination::new(page, limit, 0),
                    })
                }
            },
        };

        let filter = r#"
            WHERE b.tenant_id = $1
              AND b.deleted_at IS NULL
              AND ($2::bill_status IS NULL OR b.status = $2)
              AND ($3::uuid IS NULL OR b.unit_id = $3)
              AND ($4::text IS NULL OR u.code ILIKE $4 OR b.category ILIKE $4)
              AND ($5::uuid IS NULL OR b.unit_id = $5)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM bills b JOIN units u ON u.id = b.unit_id {filter}"
        ))
        .bind(tenant_id)
        .bind(query.status)
        .bind(query.unit_id)
        .bind(search.as_deref())
        .bind(member_unit_id)
        .fetch_one(&self.pool)
        .await?;

        let pagination = Pagination::new(page, limit, total);
        let bills = sqlx::query_as::<_, Bill>(&format!(
            r#"
            {BILL_SELECT}
            {filter}
            ORDER BY b.due_date DESC NULLS LAST, b.created_at DESC
            LIMIT $6 OFFSET $7
            "#
        ))
        .bind(tenant_id)
        .bind(query.status)
        .bind(query.unit_id)
        .bind(search.as_deref())
        .bind(member_unit_id)
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(BillPage { bills, pagination })
    }

    /// Partial update. `status = paid` only goes through [`BillLedger::process_payment`].
    pub async fn update(
        &self,
        tenant_id: Uuid,
        bill_id: Uuid,
        request: UpdateBillRequest,
    ) -> Result<Bill, BillingError> {
        if request.is_empty() {
            return Err(BillingError::validation("no fields to update"));
        }
        let existing = self.get(tenant_id, bill_id).await?;
        if request.status == Some(BillStatus::Paid) {
            return Err(BillingError::validation(
                "use the payment endpoint to mark a bill as paid",
            ));
        }
        if request.status.is_some() && existing.status == BillStatus::Paid {
            return Err(BillingError::conflict("bill is already paid"));
        }

        let category = match request.category.as_deref().map(str::trim) {
            Some("") => return Err(BillingError::validation("category is required")),
            Some(category) => Some(category.to_string()),
            None => None,
        };
        let period = request
            .period
            .as_deref()
            .map(|raw| raw.trim().parse::<Period>())
            .transpose()?
            .map(|period| period.to_string());
        if request.amount.map_or(false, |amount| amount <= Decimal::ZERO) {
            return Err(BillingError::validation("amount must be greater than 0"));
        }
        if request.late_fee.map_or(false, |fee| fee.is_sign_negative()) {
            return Err(BillingError::validation("late_fee must not be negative"));
        }

        // None leaves the column alone, Some(None) clears it.
        let due_date: Option<Option<NaiveDate>> = match request.due_date.as_deref() {
            None => None,
            Some(raw) => Some(optional_due_date(Some(raw))?),
        };

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let target_category = category.as_deref().unwrap_or(&existing.category);
        let target_period = period.as_deref().unwrap_or(&existing.period);
        if target_category != existing.category || target_period != existing.period {
            let unit = UnitRef {
                id: existing.unit_id,
                code: existing.unit_code.clone(),
                unit_type: existing.unit_type,
            };
            ensure_key_free(
                &mut tx,
                tenant_id,
                &unit,
                target_category,
                target_period,
                Some(bill_id),
            )
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE bills
            SET
                category = COALESCE($3, category),
                period = COALESCE($4, period),
                amount = COALESCE($5, amount),
                late_fee = COALESCE($6, late_fee),
                due_date = CASE WHEN $7 THEN $8 ELSE due_date END,
                status = COALESCE($9, status),
                notes = COALESCE($10, notes),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(bill_id)
        .bind(tenant_id)
        .bind(category)
        .bind(period)
        .bind(request.amount)
        .bind(request.late_fee)
        .bind(due_date.is_some())
        .bind(due_date.flatten())
        .bind(request.status)
        .bind(request.notes)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(tenant_id = %tenant_id, bill_id = %bill_id, "bill updated");
        self.get(tenant_id, bill_id).await
    }

    pub async fn delete(&self, tenant_id: Uuid, bill_id: Uuid) -> Result<(), BillingError> {
        let result = sqlx::query(
            r#"
            UPDATE bills
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(bill_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::not_found("bill not found"));
        }
        info!(tenant_id = %tenant_id, bill_id = %bill_id, "bill deleted");
        Ok(())
    }

    /// All-or-nothing: the first unknown unit or occupied key aborts the whole batch.
    pub async fn bulk_create(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        request: BulkCreateBillsRequest,
    ) -> Result<BulkCreateOutcome, BillingError> {
        if request.unit_ids.is_empty() {
            return Err(BillingError::validation("unit_ids must not be empty"));
        }
        let draft = BillDraft::parse(
            &request.category,
            &request.period,
            request.amount,
            request.late_fee,
            request.due_date.as_deref(),
            request.notes,
        )?;

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let mut bill_ids = Vec::with_capacity(request.unit_ids.len());
        for unit_id in &request.unit_ids {
            let unit = find_unit(&mut *tx, tenant_id, *unit_id)
                .await?
                .ok_or_else(|| BillingError::not_found(format!("unit {unit_id} not found")))?;
            ensure_key_free(&mut tx, tenant_id, &unit, &draft.category, &draft.period, None)
                .await?;
            let bill_id = insert_bill(&mut *tx, &draft.as_new_bill(tenant_id, unit.id, actor_id))
                .await?;
            bill_ids.push(bill_id);
        }
        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            period = %draft.period,
            created = bill_ids.len(),
            "bulk bills created"
        );
        Ok(BulkCreateOutcome {
            created_count: bill_ids.len(),
            bill_ids,
        })
    }

    /// One-way transition to `paid`. The status guard lives in the UPDATE itself so a
    /// concurrent second payment also ends in Conflict.
    pub async fn process_payment(
        &self,
        tenant_id: Uuid,
        bill_id: Uuid,
        request: ProcessPaymentRequest,
    ) -> Result<Bill, BillingError> {
        let method = request.payment_method.trim();
        if method.is_empty() {
            return Err(BillingError::validation("payment_method is required"));
        }
        let reference = request
            .payment_reference
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let existing = self.get(tenant_id, bill_id).await?;
        if existing.status == BillStatus::Paid {
            return Err(BillingError::conflict("bill is already paid"));
        }

        let result = sqlx::query(
            r#"
            UPDATE bills
            SET
                status = 'paid',
                paid_at = NOW(),
                payment_method = $3,
                payment_reference = $4,
                updated_at = NOW()
            WHERE id = $1
              AND tenant_id = $2
              AND deleted_at IS NULL
              AND status <> 'paid'
            "#,
        )
        .bind(bill_id)
        .bind(tenant_id)
        .bind(method)
        .bind(reference)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::conflict("bill is already paid"));
        }
        info!(
            tenant_id = %tenant_id,
            bill_id = %bill_id,
            method = %method,
            "bill payment recorded"
        );
        self.get(tenant_id, bill_id).await
    }
}

/// Takes the key lock first so the check holds until the transaction commits.
async fn ensure_key_free(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    unit: &UnitRef,
    category: &str,
    period: &str,
    excluding: Option<Uuid>,
) -> Result<(), BillingError> {
    lock_bill_key(&mut **tx, tenant_id, unit.id, category, period).await?;
    if bill_key_taken(&mut **tx, tenant_id, unit.id, category, period, excluding).await? {
        return Err(BillingError::conflict(format!(
            "bill already exists for unit {} for period {}",
            unit.code, period
        )));
    }
    Ok(())
}

/// Empty or whitespace-only input means "no due date".
fn optional_due_date(raw: Option<&str>) -> Result<Option<NaiveDate>, BillingError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => Ok(Some(parse_due_date(value)?)),
    }
}
