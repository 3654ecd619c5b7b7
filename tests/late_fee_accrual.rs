use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rukun_billing::billing::{
    accrue_late_fees, promote_overdue_bills, BillStatus, LateFeeAccrualJob, ScheduledJob,
    UnitType,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_unit(pool: &PgPool, tenant_id: Uuid) -> Uuid {
    let unit_id = Uuid::new_v4();
    sqlx::query("INSERT INTO units (id, tenant_id, code, unit_type) VALUES ($1, $2, $3, $4)")
        .bind(unit_id)
        .bind(tenant_id)
        .bind(format!("U-{}", &unit_id.to_string()[..4]))
        .bind(UnitType::House)
        .execute(pool)
        .await
        .unwrap();
    unit_id
}

async fn seed_bill(
    pool: &PgPool,
    tenant_id: Uuid,
    category: &str,
    amount: Decimal,
    due_date: NaiveDate,
) -> Uuid {
    let unit_id = seed_unit(pool, tenant_id).await;
    let bill_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO bills (id, tenant_id, unit_id, category, period, amount, due_date) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(bill_id)
    .bind(tenant_id)
    .bind(unit_id)
    .bind(category)
    .bind(due_date.format("%Y-%m").to_string())
    .bind(amount)
    .bind(due_date)
    .execute(pool)
    .await
    .unwrap();
    bill_id
}

async fn bill_state(pool: &PgPool, bill_id: Uuid) -> (Decimal, BillStatus) {
    sqlx::query_as("SELECT late_fee, status FROM bills WHERE id = $1")
        .bind(bill_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(day: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(hour, 0, 0).unwrap())
}

// key: late-fee-accrual-tests -> fixed policy
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn fixed_policy_accrues_daily_and_marks_overdue(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO billing_templates (id, tenant_id, name, category, amount, late_fee, late_fee_type) VALUES ($1, $2, $3, $4, $5, $6, 'fixed')",
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind("Iuran Keamanan")
    .bind("keamanan")
    .bind(dec!(100000))
    .bind(dec!(5000))
    .execute(&pool)
    .await
    .unwrap();

    let bill_id = seed_bill(&pool, tenant_id, "keamanan", dec!(100000), date(2024, 1, 10)).await;
    let now = at(date(2024, 1, 13), 1);

    let report = accrue_late_fees(&pool, now, dec!(5000)).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(bill_state(&pool, bill_id).await, (dec!(15000), BillStatus::Overdue));

    // Same-day reruns converge on the same value.
    let rerun = accrue_late_fees(&pool, now, dec!(5000)).await.unwrap();
    assert_eq!(rerun.updated, 0);
    assert_eq!(bill_state(&pool, bill_id).await, (dec!(15000), BillStatus::Overdue));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn percentage_policy_is_capped(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO billing_templates (id, tenant_id, name, category, amount, late_fee_type, late_fee_percentage, late_fee_max) VALUES ($1, $2, $3, $4, $5, 'percentage', $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind("Sewa Kios")
    .bind("sewa")
    .bind(dec!(1000000))
    .bind(dec!(1))
    .bind(dec!(50000))
    .execute(&pool)
    .await
    .unwrap();

    let capped = seed_bill(&pool, tenant_id, "sewa", dec!(1000000), date(2024, 1, 1)).await;
    let recent = seed_bill(&pool, tenant_id, "sewa", dec!(1000000), date(2024, 1, 8)).await;

    accrue_late_fees(&pool, at(date(2024, 1, 11), 0), dec!(5000))
        .await
        .unwrap();

    assert_eq!(bill_state(&pool, capped).await, (dec!(50000), BillStatus::Overdue));
    assert_eq!(bill_state(&pool, recent).await, (dec!(30000), BillStatus::Overdue));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unmatched_category_uses_fallback_and_other_tenants_are_ignored(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    // Same category in another tenant must not drive this tenant's fee.
    sqlx::query(
        "INSERT INTO billing_templates (id, tenant_id, name, category, amount, late_fee) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .bind("Iuran Lain")
    .bind("lain-lain")
    .bind(dec!(10000))
    .bind(dec!(100))
    .execute(&pool)
    .await
    .unwrap();

    let bill_id = seed_bill(&pool, tenant_id, "lain-lain", dec!(40000), date(2024, 2, 1)).await;
    accrue_late_fees(&pool, at(date(2024, 2, 3), 12), dec!(5000))
        .await
        .unwrap();

    assert_eq!(bill_state(&pool, bill_id).await, (dec!(10000), BillStatus::Overdue));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn paid_deleted_and_future_bills_are_untouched(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    let paid = seed_bill(&pool, tenant_id, "air", dec!(50000), date(2024, 1, 1)).await;
    sqlx::query("UPDATE bills SET status = 'paid', paid_at = NOW() WHERE id = $1")
        .bind(paid)
        .execute(&pool)
        .await
        .unwrap();
    let deleted = seed_bill(&pool, tenant_id, "air", dec!(50000), date(2024, 1, 1)).await;
    sqlx::query("UPDATE bills SET deleted_at = NOW() WHERE id = $1")
        .bind(deleted)
        .execute(&pool)
        .await
        .unwrap();
    let future = seed_bill(&pool, tenant_id, "air", dec!(50000), date(2024, 1, 20)).await;

    let report = accrue_late_fees(&pool, at(date(2024, 1, 10), 8), dec!(5000))
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);

    assert_eq!(bill_state(&pool, paid).await, (Decimal::ZERO, BillStatus::Paid));
    assert_eq!(bill_state(&pool, deleted).await, (Decimal::ZERO, BillStatus::Pending));
    assert_eq!(bill_state(&pool, future).await, (Decimal::ZERO, BillStatus::Pending));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn status_pass_promotes_without_touching_fees(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    let overdue = seed_bill(&pool, tenant_id, "air", dec!(50000), date(2024, 1, 1)).await;
    let due_today = seed_bill(&pool, tenant_id, "air", dec!(50000), date(2024, 1, 5)).await;

    let promoted = promote_overdue_bills(&pool, at(date(2024, 1, 5), 9)).await.unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(bill_state(&pool, overdue).await, (Decimal::ZERO, BillStatus::Overdue));
    assert_eq!(bill_state(&pool, due_today).await, (Decimal::ZERO, BillStatus::Pending));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn accrual_job_runs_under_advisory_lock(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    let bill_id = seed_bill(&pool, tenant_id, "air", dec!(50000), date(2024, 1, 1)).await;
    let job = LateFeeAccrualJob::new(pool.clone(), dec!(1000), true);

    job.run(at(date(2024, 1, 3), 0)).await.unwrap();
    assert_eq!(bill_state(&pool, bill_id).await, (dec!(2000), BillStatus::Overdue));

    // Back-to-back runs both get the lock.
    job.run(at(date(2024, 1, 4), 0)).await.unwrap();
    assert_eq!(bill_state(&pool, bill_id).await, (dec!(3000), BillStatus::Overdue));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn each_tenant_accrues_under_its_own_template(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let mut bills = Vec::new();
    for daily_fee in [dec!(1000), dec!(4000)] {
        let tenant_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO billing_templates (id, tenant_id, name, category, amount, late_fee, late_fee_type) VALUES ($1, $2, $3, $4, $5, $6, 'fixed')",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind("Iuran Keamanan")
        .bind("keamanan")
        .bind(dec!(100000))
        .bind(daily_fee)
        .execute(&pool)
        .await
        .unwrap();
        bills.push(seed_bill(&pool, tenant_id, "keamanan", dec!(100000), date(2024, 3, 1)).await);
    }

    let report = accrue_late_fees(&pool, at(date(2024, 3, 3), 0), dec!(5000))
        .await
        .unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(bill_state(&pool, bills[0]).await, (dec!(2000), BillStatus::Overdue));
    assert_eq!(bill_state(&pool, bills[1]).await, (dec!(8000), BillStatus::Overdue));
}
