use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::extractor::TenantContext;

use super::generator::{BillGenerator, GenerationFailure, GenerationOutcome};
use super::ledger::BillLedger;
use super::models::{
    Bill, BillListQuery, BillPage, BillScope, BulkCreateBillsRequest, BulkCreateOutcome,
    CreateBillRequest, CreateTemplateRequest, GenerateBillsRequest, ProcessPaymentRequest, TemplateDetail,
    TemplateListQuery, TemplatePage, UpdateBillRequest, UpdateTemplateRequest,
};
use super::templates::TemplateRegistry;

/// key: billing-api -> rest endpoints
pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/billing/templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/api/billing/templates/:template_id",
            get(get_template)
                .put(update_template)
                .delete(delete_template),
        )
        .route(
            "/api/billing/templates/:template_id/generate",
            post(generate_bills),
        )
        .route("/api/billing", get(list_bills).post(create_bill))
        .route("/api/billing/bulk", post(bulk_create_bills))
        .route(
            "/api/billing/:bill_id",
            get(get_bill).put(update_bill).delete(delete_bill),
        )
        .route("/api/billing/:bill_id/payment", post(process_payment))
}

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub generated_count: usize,
    pub bill_ids: Vec<Uuid>,
    pub failures: Vec<GenerationFailure>,
    pub errors: Vec<String>,
}

impl From<GenerationOutcome> for GenerationResponse {
    fn from(outcome: GenerationOutcome) -> Self {
        Self {
            generated_count: outcome.generated_count(),
            errors: outcome.error_messages(),
            bill_ids: outcome.succeeded,
            failures: outcome.failed,
        }
    }
}

async fn list_templates(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Query(query): Query<TemplateListQuery>,
) -> AppResult<Json<TemplatePage>> {
    let page = TemplateRegistry::new(pool)
        .list(tenant.tenant_id, query)
        .await?;
    Ok(Json(page))
}

async fn create_template(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Json(payload): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplateDetail>)> {
    let template = TemplateRegistry::new(pool)
        .create(tenant.tenant_id, tenant.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn get_template(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(template_id): Path<Uuid>,
) -> AppResult<Json<TemplateDetail>> {
    let template = TemplateRegistry::new(pool)
        .get(tenant.tenant_id, template_id)
        .await?;
    Ok(Json(template))
}

async fn update_template(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(template_id): Path<Uuid>,
    Json(payload): Json<UpdateTemplateRequest>,
) -> AppResult<Json<TemplateDetail>> {
    let template = TemplateRegistry::new(pool)
        .update(tenant.tenant_id, template_id, payload)
        .await?;
    Ok(Json(template))
}

async fn delete_template(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(template_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    TemplateRegistry::new(pool)
        .delete(tenant.tenant_id, template_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn generate_bills(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(template_id): Path<Uuid>,
    Json(payload): Json<GenerateBillsRequest>,
) -> AppResult<Json<GenerationResponse>> {
    let outcome = BillGenerator::new(pool)
        .generate(tenant.tenant_id, tenant.user_id, template_id, payload)
        .await?;
    Ok(Json(outcome.into()))
}

async fn list_bills(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Query(query): Query<BillListQuery>,
) -> AppResult<Json<BillPage>> {
    let scope = BillScope::for_role(&tenant.role, tenant.user_id);
    let page = BillLedger::new(pool)
        .list(tenant.tenant_id, scope, query)
        .await?;
    Ok(Json(page))
}

async fn create_bill(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Json(payload): Json<CreateBillRequest>,
) -> AppResult<(StatusCode, Json<Bill>)> {
    let bill = BillLedger::new(pool)
        .create(tenant.tenant_id, tenant.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(bill)))
}

async fn bulk_create_bills(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Json(payload): Json<BulkCreateBillsRequest>,
) -> AppResult<(StatusCode, Json<BulkCreateOutcome>)> {
    let outcome = BillLedger::new(pool)
        .bulk_create(tenant.tenant_id, tenant.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn get_bill(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(bill_id): Path<Uuid>,
) -> AppResult<Json<Bill>> {
    let bill = BillLedger::new(pool).get(tenant.tenant_id, bill_id).await?;
    Ok(Json(bill))
}

async fn update_bill(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(bill_id): Path<Uuid>,
    Json(payload): Json<UpdateBillRequest>,
) -> AppResult<Json<Bill>> {
    let bill = BillLedger::new(pool)
        .update(tenant.tenant_id, bill_id, payload)
        .await?;
    Ok(Json(bill))
}

async fn delete_bill(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(bill_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    BillLedger::new(pool)
        .delete(tenant.tenant_id, bill_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn process_payment(
    Extension(pool): Extension<PgPool>,
    tenant: TenantContext,
    Path(bill_id): Path<Uuid>,
    Json(payload): Json<ProcessPaymentRequest>,
) -> AppResult<Json<Bill>> {
    let bill = BillLedger::new(pool)
        .process_payment(tenant.tenant_id, bill_id, payload)
        .await?;
    Ok(Json(bill))
}
