use rukun_billing::billing::{
    BillingError, ChargeType, CreateTemplateRequest, LateFeeType, TemplateListQuery,
    TemplateRegistry, UnitType, UpdateTemplateRequest,
};
use rust_decimal_macros::dec;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn security_fee() -> CreateTemplateRequest {
    serde_json::from_value(json!({
        "name": "Iuran Keamanan",
        "category": "keamanan",
        "charge_type": "monthly",
        "amount": 50000,
        "late_fee": 5000,
        "due_day": 10,
        "amount_rules": [
            { "unit_type": "kios", "amount": 75000 },
            { "unit_type": "ruko", "amount": 100000 }
        ]
    }))
    .unwrap()
}

// key: billing-template-tests -> registry lifecycle
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn template_create_and_update_replaces_rules(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    let registry = TemplateRegistry::new(pool.clone());
    let created = registry
        .create(tenant_id, Uuid::new_v4(), security_fee())
        .await
        .unwrap();

    assert_eq!(created.template.charge_type, ChargeType::Monthly);
    assert_eq!(created.template.late_fee_type, LateFeeType::Fixed);
    assert!(created.template.is_active);
    assert!(!created.template.is_system);
    assert_eq!(created.amount_rules.len(), 2);

    let fetched = registry.get(tenant_id, created.template.id).await.unwrap();
    assert_eq!(fetched.template.amount, dec!(50000));
    assert_eq!(fetched.amount_rules.len(), 2);

    let updated = registry
        .update(
            tenant_id,
            created.template.id,
            serde_json::from_value::<UpdateTemplateRequest>(json!({
                "amount": 60000,
                "amount_rules": [{ "unit_type": "rumah", "amount": 55000 }]
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(updated.template.amount, dec!(60000));
    assert_eq!(updated.template.name, "Iuran Keamanan");
    assert_eq!(updated.amount_rules.len(), 1);
    assert_eq!(updated.amount_rules[0].unit_type, UnitType::House);
    assert_eq!(updated.amount_rules[0].amount, dec!(55000));

    // Omitting amount_rules leaves them untouched.
    let renamed = registry
        .update(
            tenant_id,
            created.template.id,
            UpdateTemplateRequest {
                name: Some("Iuran Keamanan Bulanan".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.template.name, "Iuran Keamanan Bulanan");
    assert_eq!(renamed.amount_rules.len(), 1);

    // An empty rule list clears every rule.
    let cleared = registry
        .update(
            tenant_id,
            created.template.id,
            UpdateTemplateRequest {
                amount_rules: Some(Vec::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(cleared.amount_rules.is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn template_rules_reject_empty_and_conflicting_updates(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    let registry = TemplateRegistry::new(pool.clone());
    let first = registry
        .create(tenant_id, Uuid::new_v4(), security_fee())
        .await
        .unwrap();

    let duplicate = registry
        .create(tenant_id, Uuid::new_v4(), security_fee())
        .await;
    assert!(matches!(duplicate, Err(BillingError::Conflict(_))));

    // Names are unique per tenant only.
    registry
        .create(Uuid::new_v4(), Uuid::new_v4(), security_fee())
        .await
        .unwrap();

    let empty = registry
        .update(tenant_id, first.template.id, UpdateTemplateRequest::default())
        .await;
    assert!(matches!(empty, Err(BillingError::Validation(_))));

    let mut other = security_fee();
    other.name = "Iuran Sampah".into();
    other.category = "sampah".into();
    let second = registry.create(tenant_id, Uuid::new_v4(), other).await.unwrap();
    let rename = registry
        .update(
            tenant_id,
            second.template.id,
            UpdateTemplateRequest {
                name: Some("Iuran Keamanan".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(rename, Err(BillingError::Conflict(_))));

    let bad_day = registry
        .update(
            tenant_id,
            second.template.id,
            UpdateTemplateRequest {
                due_day: Some(32),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(bad_day, Err(BillingError::Validation(_))));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn system_templates_are_immutable(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    let template_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO billing_templates (id, tenant_id, name, category, amount, is_system) VALUES ($1, $2, $3, $4, $5, TRUE)",
    )
    .bind(template_id)
    .bind(tenant_id)
    .bind("Iuran Wajib")
    .bind("wajib")
    .bind(dec!(25000))
    .execute(&pool)
    .await
    .unwrap();

    let registry = TemplateRegistry::new(pool.clone());
    let update = registry
        .update(
            tenant_id,
            template_id,
            UpdateTemplateRequest {
                amount: Some(dec!(30000)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(update, Err(BillingError::Forbidden(_))));

    let delete = registry.delete(tenant_id, template_id).await;
    assert!(matches!(delete, Err(BillingError::Forbidden(_))));

    let still_there = registry.get(tenant_id, template_id).await.unwrap();
    assert_eq!(still_there.template.amount, dec!(25000));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn template_list_orders_system_first_and_hides_deleted(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tenant_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO billing_templates (id, tenant_id, name, category, amount, is_system) VALUES ($1, $2, $3, $4, $5, TRUE)",
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind("Zakat Lingkungan")
    .bind("sosial")
    .bind(dec!(10000))
    .execute(&pool)
    .await
    .unwrap();

    let registry = TemplateRegistry::new(pool.clone());
    let keamanan = registry
        .create(tenant_id, Uuid::new_v4(), security_fee())
        .await
        .unwrap();
    let mut water = security_fee();
    water.name = "Air Bersih".into();
    water.category = "air".into();
    water.amount_rules.clear();
    registry.create(tenant_id, Uuid::new_v4(), water).await.unwrap();
    let mut trash = security_fee();
    trash.name = "Sampah".into();
    trash.category = "sampah".into();
    let trash = registry.create(tenant_id, Uuid::new_v4(), trash).await.unwrap();
    registry.delete(tenant_id, trash.template.id).await.unwrap();

    let page = registry
        .list(tenant_id, TemplateListQuery::default())
        .await
        .unwrap();
    let names: Vec<&str> = page
        .templates
        .iter()
        .map(|detail| detail.template.name.as_str())
        .collect();
    assert_eq!(names, vec!["Zakat Lingkungan", "Air Bersih", "Iuran Keamanan"]);
    assert_eq!(page.pagination.total, 3);
    assert_eq!(page.pagination.limit, 20);
    let listed_rules = page
        .templates
        .iter()
        .find(|detail| detail.template.id == keamanan.template.id)
        .map(|detail| detail.amount_rules.len());
    assert_eq!(listed_rules, Some(2));

    let searched = registry
        .list(
            tenant_id,
            TemplateListQuery {
                search: Some("KEAMANAN".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(searched.templates.len(), 1);

    let paged = registry
        .list(
            tenant_id,
            TemplateListQuery {
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(paged.templates.len(), 1);
    assert_eq!(paged.pagination.total_pages, 2);

    let deleted = registry.get(tenant_id, trash.template.id).await;
    assert!(matches!(deleted, Err(BillingError::NotFound(_))));
}
