use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use super::error::BillingError;
use super::models::{
    page_window, AmountRule, AmountRuleInput, BillingTemplate, CreateTemplateRequest,
    LateFeeType, Pagination, TemplateDetail, TemplateListQuery, TemplatePage,
    UpdateTemplateRequest,
};

const TEMPLATE_COLUMNS: &str = r#"
    id, tenant_id, name, category, charge_type, description, amount, late_fee,
    due_day, late_fee_type, late_fee_percentage, late_fee_max,
    is_active, is_system, created_by, created_at, updated_at
"#;

/// key: template-registry -> billing templates and amount rules
#[derive(Clone)]
pub struct TemplateRegistry {
    pool: PgPool,
}

impl TemplateRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        request: CreateTemplateRequest,
    ) -> Result<TemplateDetail, BillingError> {
        let name = required_text("name", &request.name)?;
        let category = required_text("category", &request.category)?;
        require_positive("amount", request.amount)?;
        validate_policy(
            request.late_fee,
            request.due_day,
            request.late_fee_percentage,
            request.late_fee_max,
        )?;
        validate_rules(&request.amount_rules)?;

        if self.name_taken(tenant_id, &name, None).await? {
            return Err(BillingError::conflict("template name already exists"));
        }

        let description = request
            .description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let template = sqlx::query_as::<_, BillingTemplate>(&format!(
            r#"
            INSERT INTO billing_templates (
                id, tenant_id, name, category, charge_type, description, amount, late_fee,
                due_day, late_fee_type, late_fee_percentage, late_fee_max,
                is_active, is_system, created_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, FALSE, $14)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&name)
        .bind(&category)
        .bind(request.charge_type)
        .bind(description)
        .bind(request.amount)
        .bind(request.late_fee.unwrap_or(Decimal::ZERO))
        .bind(request.due_day)
        .bind(request.late_fee_type.unwrap_or(LateFeeType::Fixed))
        .bind(request.late_fee_percentage)
        .bind(request.late_fee_max)
        .bind(request.is_active.unwrap_or(true))
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await?;

        let amount_rules = insert_rules(&mut tx, template.id, &request.amount_rules).await?;
        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            template_id = %template.id,
            rules = amount_rules.len(),
            "billing template created"
        );
        Ok(TemplateDetail {
            template,
            amount_rules,
        })
    }

    pub async fn get(
        &self,
        tenant_id: Uuid,
        template_id: Uuid,
    ) -> Result<TemplateDetail, BillingError> {
        let template = self
            .find(tenant_id, template_id)
            .await?
            .ok_or_else(|| BillingError::not_found("template not found"))?;
        let amount_rules = self.rules_for(template.id).await?;
        Ok(TemplateDetail {
            template,
            amount_rules,
        })
    }

    /// Tenant-scoped lookup that ignores soft-deleted templates.
    pub async fn find(
        &self,
        tenant_id: Uuid,
        template_id: Uuid,
    ) -> Result<Option<BillingTemplate>, BillingError> {
        let template = sqlx::query_as::<_, BillingTemplate>(&format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM billing_templates
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#
        ))
        .bind(template_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }

    pub async fn rules_for(&self, template_id: Uuid) -> Result<Vec<AmountRule>, BillingError> {
        let rules = sqlx::query_as::<_, AmountRule>(
            r#"
            SELECT id, template_id, unit_type, amount, created_at, updated_at
            FROM billing_template_amount_rules
            WHERE template_id = $1
            ORDER BY unit_type
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        query: TemplateListQuery,
    ) -> Result<TemplatePage, BillingError> {
        let (page, limit) = page_window(query.page, query.limit);
        let search = search_pattern(query.search.as_deref());
        let category = query
            .category
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let filter = r#"
            WHERE tenant_id = $1
              AND deleted_at IS NULL
              AND ($2::text IS NULL OR name ILIKE $2 OR category ILIKE $2)
              AND ($3::text IS NULL OR category = $3)
              AND ($4::boolean IS NULL OR is_active = $4)
        "#;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM billing_templates {filter}"))
                .bind(tenant_id)
                .bind(search.as_deref())
                .bind(category.as_deref())
                .bind(query.is_active)
                .fetch_one(&self.pool)
                .await?;

        let pagination = Pagination::new(page, limit, total);
        let templates = sqlx::query_as::<_, BillingTemplate>(&format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM billing_templates
            {filter}
            ORDER BY is_system DESC, name ASC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(tenant_id)
        .bind(search.as_deref())
        .bind(category.as_deref())
        .bind(query.is_active)
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = templates.iter().map(|template| template.id).collect();
        let rules = sqlx::query_as::<_, AmountRule>(
            r#"
            SELECT id, template_id, unit_type, amount, created_at, updated_at
            FROM billing_template_amount_rules
            WHERE template_id = ANY($1)
            ORDER BY unit_type
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut rules_by_template: HashMap<Uuid, Vec<AmountRule>> = HashMap::new();
        for rule in rules {
            rules_by_template.entry(rule.template_id).or_default().push(rule);
        }

        let templates = templates
            .into_iter()
            .map(|template| TemplateDetail {
                amount_rules: rules_by_template.remove(&template.id).unwrap_or_default(),
                template,
            })
            .collect();

        Ok(TemplatePage {
            templates,
            pagination,
        })
    }

    pub async fn update(
        &self,
        tenant_id: Uuid,
        template_id: Uuid,
        request: UpdateTemplateRequest,
    ) -> Result<TemplateDetail, BillingError> {
        let existing = self
            .find(tenant_id, template_id)
            .await?
            .ok_or_else(|| BillingError::not_found("template not found"))?;
        if existing.is_system {
            return Err(BillingError::Forbidden(
                "cannot update system template".into(),
            ));
        }
        if request.is_empty() {
            return Err(BillingError::validation("no fields to update"));
        }

        let name = request
            .name
            .as_deref()
            .map(|value| required_text("name", value))
            .transpose()?;
        let category = request
            .category
            .as_deref()
            .map(|value| required_text("category", value))
            .transpose()?;
        if let Some(amount) = request.amount {
            require_positive("amount", amount)?;
        }
        validate_policy(
            request.late_fee,
            request.due_day,
            request.late_fee_percentage,
            request.late_fee_max,
        )?;
        if let Some(rules) = &request.amount_rules {
            validate_rules(rules)?;
        }

        if let Some(name) = &name {
            if self.name_taken(tenant_id, name, Some(template_id)).await? {
                return Err(BillingError::conflict("template name already exists"));
            }
        }

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE billing_templates
            SET
                name = COALESCE($3, name),
                category = COALESCE($4, category),
                charge_type = COALESCE($5, charge_type),
                description = COALESCE($6, description),
                amount = COALESCE($7, amount),
                late_fee = COALESCE($8, late_fee),
                due_day = COALESCE($9, due_day),
                late_fee_type = COALESCE($10, late_fee_type),
                late_fee_percentage = COALESCE($11, late_fee_percentage),
                late_fee_max = COALESCE($12, late_fee_max),
                is_active = COALESCE($13, is_active),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(template_id)
        .bind(tenant_id)
        .bind(name)
        .bind(category)
        .bind(request.charge_type)
        .bind(request.description)
        .bind(request.amount)
        .bind(request.late_fee)
        .bind(request.due_day)
        .bind(request.late_fee_type)
        .bind(request.late_fee_percentage)
        .bind(request.late_fee_max)
        .bind(request.is_active)
        .execute(&mut *tx)
        .await?;

        if let Some(rules) = &request.amount_rules {
            sqlx::query("DELETE FROM billing_template_amount_rules WHERE template_id = $1")
                .bind(template_id)
                .execute(&mut *tx)
                .await?;
            insert_rules(&mut tx, template_id, rules).await?;
        }
        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            template_id = %template_id,
            rules_replaced = request.amount_rules.is_some(),
            "billing template updated"
        );
        self.get(tenant_id, template_id).await
    }

    pub async fn delete(&self, tenant_id: Uuid, template_id: Uuid) -> Result<(), BillingError> {
        let existing = self
            .find(tenant_id, template_id)
            .await?
            .ok_or_else(|| BillingError::not_found("template not found"))?;
        if existing.is_system {
            return Err(BillingError::Forbidden(
                "cannot delete system template".into(),
            ));
        }

        sqlx::query(
            r#"
            UPDATE billing_templates
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(template_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        info!(tenant_id = %tenant_id, template_id = %template_id, "billing template deleted");
        Ok(())
    }

    async fn name_taken(
        &self,
        tenant_id: Uuid,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool, BillingError> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM billing_templates
                WHERE tenant_id = $1
                  AND name = $2
                  AND deleted_at IS NULL
                  AND ($3::uuid IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(tenant_id)
        .bind(name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }
}

async fn insert_rules(
    tx: &mut Transaction<'_, Postgres>,
    template_id: Uuid,
    rules: &[AmountRuleInput],
) -> Result<Vec<AmountRule>, BillingError> {
    let mut inserted = Vec::with_capacity(rules.len());
    for rule in rules {
        let row = sqlx::query_as::<_, AmountRule>(
            r#"
            INSERT INTO billing_template_amount_rules (id, template_id, unit_type, amount)
            VALUES ($1, $2, $3, $4)
            RETURNING id, template_id, unit_type, amount, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(template_id)
        .bind(rule.unit_type)
        .bind(rule.amount)
        .fetch_one(&mut **tx)
        .await?;
        inserted.push(row);
    }
    Ok(inserted)
}

fn required_text(field: &str, value: &str) -> Result<String, BillingError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BillingError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn require_positive(field: &str, value: Decimal) -> Result<(), BillingError> {
    if value <= Decimal::ZERO {
        return Err(BillingError::validation(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

fn validate_policy(
    late_fee: Option<Decimal>,
    due_day: Option<i32>,
    percentage: Option<Decimal>,
    cap: Option<Decimal>,
) -> Result<(), BillingError> {
    if let Some(day) = due_day {
        if !(1..=31).contains(&day) {
            return Err(BillingError::validation("due_day must be between 1 and 31"));
        }
    }
    if late_fee.map_or(false, |fee| fee.is_sign_negative()) {
        return Err(BillingError::validation("late_fee must not be negative"));
    }
    if let Some(percent) = percentage {
        if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
            return Err(BillingError::validation(
                "late_fee_percentage must be between 0 and 100",
            ));
        }
    }
    if cap.map_or(false, |cap| cap.is_sign_negative()) {
        return Err(BillingError::validation("late_fee_max must not be negative"));
    }
    Ok(())
}

fn validate_rules(rules: &[AmountRuleInput]) -> Result<(), BillingError> {
    let mut seen = HashSet::new();
    for rule in rules {
        require_positive("amount_rules.amount", rule.amount)?;
        if !seen.insert(rule.unit_type) {
            return Err(BillingError::validation(
                "amount_rules contains a unit_type more than once",
            ));
        }
    }
    Ok(())
}

pub(crate) fn search_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("%{value}%"))
}
