use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::billing::UnitType;

// key: unit-directory -> read-only lookups
#[derive(Debug, Clone, FromRow)]
pub struct UnitRef {
    pub id: Uuid,
    pub code: String,
    pub unit_type: UnitType,
}

pub async fn find_unit<'c, E>(
    executor: E,
    tenant_id: Uuid,
    unit_id: Uuid,
) -> Result<Option<UnitRef>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UnitRef>(
        r#"
        SELECT id, code, unit_type
        FROM units
        WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(unit_id)
    .bind(tenant_id)
    .fetch_optional(executor)
    .await
}

pub async fn list_active_units<'c, E>(
    executor: E,
    tenant_id: Uuid,
) -> Result<Vec<UnitRef>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UnitRef>(
        r#"
        SELECT id, code, unit_type
        FROM units
        WHERE tenant_id = $1 AND deleted_at IS NULL
        ORDER BY code ASC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(executor)
    .await
}

pub async fn units_by_ids<'c, E>(
    executor: E,
    tenant_id: Uuid,
    unit_ids: &[Uuid],
) -> Result<Vec<UnitRef>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UnitRef>(
        r#"
        SELECT id, code, unit_type
        FROM units
        WHERE tenant_id = $1 AND id = ANY($2) AND deleted_at IS NULL
        "#,
    )
    .bind(tenant_id)
    .bind(unit_ids)
    .fetch_all(executor)
    .await
}

/// Unit a tenant member lives in, if the directory links one.
pub async fn member_unit<'c, E>(
    executor: E,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let unit: Option<Option<Uuid>> = sqlx::query_scalar(
        r#"
        SELECT unit_id
        FROM tenant_users
        WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    Ok(unit.flatten())
}
