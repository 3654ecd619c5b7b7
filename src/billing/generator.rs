use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::bills::{bill_key_taken, insert_bill, lock_bill_key, NewBill};
use crate::db::units::{list_active_units, units_by_ids, UnitRef};

use super::error::BillingError;
use super::models::{BillingTemplate, GenerateBillsRequest, UnitType};
use super::period::Period;
use super::templates::TemplateRegistry;

/// A unit the generator skipped, with the reason it was skipped.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationFailure {
    pub unit_id: Uuid,
    pub reason: String,
}

/// key: bill-generator-outcome -> per-unit partial success
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<GenerationFailure>,
}

impl GenerationOutcome {
    pub fn generated_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|failure| failure.reason.clone())
            .collect()
    }
}

/// key: bill-generator -> template driven bulk issuance
#[derive(Clone)]
pub struct BillGenerator {
    pool: PgPool,
    templates: TemplateRegistry,
}

enum UnitResult {
    Created(Uuid),
    AlreadyBilled,
}

impl BillGenerator {
    pub fn new(pool: PgPool) -> Self {
        let templates = TemplateRegistry::new(pool.clone());
        Self { pool, templates }
    }

    /// Raises one bill per target unit for `period`. Units that already hold a live bill
    /// for the template's category are reported in `failed` and never billed twice.
    pub async fn generate(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        template_id: Uuid,
        request: GenerateBillsRequest,
    ) -> Result<GenerationOutcome, BillingError> {
        let period: Period = request.period.trim().parse()?;
        let template = self
            .templates
            .find(tenant_id, template_id)
            .await?
            .ok_or_else(|| BillingError::not_found("template not found"))?;
        if !template.is_active {
            return Err(BillingError::validation("template is not active"));
        }

        let overrides: HashMap<UnitType, Decimal> = self
            .templates
            .rules_for(template.id)
            .await?
            .into_iter()
            .map(|rule| (rule.unit_type, rule.amount))
            .collect();

        let mut outcome = GenerationOutcome::default();
        let units = self
            .target_units(tenant_id, &request.unit_ids, &mut outcome)
            .await?;
        let due_date = period.due_date(template.due_day);
        let period_token = period.to_string();

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        for unit in &units {
            let amount = resolve_amount(&template, &overrides, unit.unit_type);
            let mut savepoint = tx.begin().await?;
            let result = bill_unit(
                &mut savepoint,
                tenant_id,
                actor_id,
                &template,
                unit,
                &period_token,
                amount,
                due_date,
            )
            .await;

            match result {
                Ok(UnitResult::Created(bill_id)) => {
                    savepoint.commit().await?;
                    debug!(%bill_id, unit = %unit.code, %amount, "bill generated");
                    outcome.succeeded.push(bill_id);
                }
                Ok(UnitResult::AlreadyBilled) => {
                    savepoint.rollback().await?;
                    outcome.failed.push(GenerationFailure {
                        unit_id: unit.id,
                        reason: format!(
                            "bill already exists for unit {} for period {}",
                            unit.code, period_token
                        ),
                    });
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    warn!(?err, unit = %unit.code, "failed to generate bill for unit");
                    outcome.failed.push(GenerationFailure {
                        unit_id: unit.id,
                        reason: format!("error creating bill for unit {}: {err}", unit.code),
                    });
                }
            }
        }
        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            template_id = %template.id,
            period = %period_token,
            generated = outcome.succeeded.len(),
            skipped = outcome.failed.len(),
            "bill generation finished"
        );
        Ok(outcome)
    }

    /// Explicit ids are checked against the tenant's live units; unknown ids become failures.
    async fn target_units(
        &self,
        tenant_id: Uuid,
        requested: &[Uuid],
        outcome: &mut GenerationOutcome,
    ) -> Result<Vec<UnitRef>, BillingError> {
        if requested.is_empty() {
            return Ok(list_active_units(&self.pool, tenant_id).await?);
        }

        let mut seen = HashSet::new();
        let requested: Vec<Uuid> = requested
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        let mut found: HashMap<Uuid, UnitRef> = units_by_ids(&self.pool, tenant_id, &requested)
            .await?
            .into_iter()
            .map(|unit| (unit.id, unit))
            .collect();

        let mut units = Vec::with_capacity(found.len());
        for unit_id in requested {
            match found.remove(&unit_id) {
                Some(unit) => units.push(unit),
                None => outcome.failed.push(GenerationFailure {
                    unit_id,
                    reason: format!("unit {unit_id} not found"),
                }),
            }
        }
        // Same lock order as a full run, so concurrent generations cannot deadlock.
        units.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(units)
    }
}

#[allow(clippy::too_many_arguments)]
async fn bill_unit(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    actor_id: Uuid,
    template: &BillingTemplate,
    unit: &UnitRef,
    period: &str,
    amount: Decimal,
    due_date: NaiveDate,
) -> Result<UnitResult, sqlx::Error> {
    lock_bill_key(&mut **tx, tenant_id, unit.id, &template.category, period).await?;
    if bill_key_taken(&mut **tx, tenant_id, unit.id, &template.category, period, None).await? {
        return Ok(UnitResult::AlreadyBilled);
    }

    let bill_id = insert_bill(
        &mut **tx,
        &NewBill {
            tenant_id,
            unit_id: unit.id,
            category: &template.category,
            period,
            amount,
            late_fee: Decimal::ZERO,
            due_date: Some(due_date),
            notes: None,
            created_by: actor_id,
        },
    )
    .await?;
    Ok(UnitResult::Created(bill_id))
}

/// A rule for the unit's type wins over the template's base amount.
pub fn resolve_amount(
    template: &BillingTemplate,
    overrides: &HashMap<UnitType, Decimal>,
    unit_type: UnitType,
) -> Decimal {
    overrides
        .get(&unit_type)
        .copied()
        .unwrap_or(template.amount)
}
