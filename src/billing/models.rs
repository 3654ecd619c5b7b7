use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Physical unit kinds recognised by amount rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "unit_type")]
pub enum UnitType {
    #[sqlx(rename = "rumah")]
    #[serde(rename = "rumah")]
    House,
    #[sqlx(rename = "ruko")]
    #[serde(rename = "ruko")]
    Shophouse,
    #[sqlx(rename = "kios")]
    #[serde(rename = "kios")]
    Kiosk,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "charge_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChargeType {
    Monthly,
    Yearly,
    OneTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "late_fee_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LateFeeType {
    Fixed,
    Percentage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "bill_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Pending,
    Overdue,
    Paid,
    Cancelled,
}

/// key: billing-template-model -> recurring charge definition
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BillingTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub category: String,
    pub charge_type: ChargeType,
    pub description: Option<String>,
    pub amount: Decimal,
    pub late_fee: Decimal,
    pub due_day: Option<i32>,
    pub late_fee_type: LateFeeType,
    pub late_fee_percentage: Option<Decimal>,
    pub late_fee_max: Option<Decimal>,
    pub is_active: bool,
    pub is_system: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// key: billing-amount-rule -> per-unit-type override
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AmountRule {
    pub id: Uuid,
    pub template_id: Uuid,
    pub unit_type: UnitType,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateDetail {
    #[serde(flatten)]
    pub template: BillingTemplate,
    pub amount_rules: Vec<AmountRule>,
}

/// key: bill-model -> ledger row joined with its unit
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub unit_id: Uuid,
    pub category: String,
    pub period: String,
    pub amount: Decimal,
    pub late_fee: Decimal,
    pub total_amount: Decimal,
    pub due_date: Option<NaiveDate>,
    pub status: BillStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub unit_code: String,
    pub unit_type: UnitType,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// Normalizes `page`/`limit` query params; out-of-range limits fall back to 20.
pub fn page_window(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.filter(|page| *page >= 1).unwrap_or(1);
    let limit = limit.filter(|limit| (1..=100).contains(limit)).unwrap_or(20);
    (page, limit)
}

/// Bill listings default a non-positive `limit` to 20 and cap it at 100.
pub fn bill_page_window(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.filter(|page| *page >= 1).unwrap_or(1);
    let limit = limit.filter(|limit| *limit >= 1).unwrap_or(20).min(100);
    (page, limit)
}

#[derive(Debug, Serialize)]
pub struct TemplatePage {
    pub templates: Vec<TemplateDetail>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct BillPage {
    pub bills: Vec<Bill>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountRuleInput {
    pub unit_type: UnitType,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub category: String,
    #[serde(default = "default_charge_type")]
    pub charge_type: ChargeType,
    pub description: Option<String>,
    pub amount: Decimal,
    pub late_fee: Option<Decimal>,
    pub due_day: Option<i32>,
    pub late_fee_type: Option<LateFeeType>,
    pub late_fee_percentage: Option<Decimal>,
    pub late_fee_max: Option<Decimal>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub amount_rules: Vec<AmountRuleInput>,
}

fn default_charge_type() -> ChargeType {
    ChargeType::OneTime
}

/// Absent fields are left untouched. `amount_rules`, when present, replaces every rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub charge_type: Option<ChargeType>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub late_fee: Option<Decimal>,
    pub due_day: Option<i32>,
    pub late_fee_type: Option<LateFeeType>,
    pub late_fee_percentage: Option<Decimal>,
    pub late_fee_max: Option<Decimal>,
    pub is_active: Option<bool>,
    pub amount_rules: Option<Vec<AmountRuleInput>>,
}

impl UpdateTemplateRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.charge_type.is_none()
            && self.description.is_none()
            && self.amount.is_none()
            && self.late_fee.is_none()
            && self.due_day.is_none()
            && self.late_fee_type.is_none()
            && self.late_fee_percentage.is_none()
            && self.late_fee_max.is_none()
            && self.is_active.is_none()
            && self.amount_rules.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateBillsRequest {
    pub period: String,
    #[serde(default)]
    pub unit_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBillRequest {
    pub unit_id: Uuid,
    pub category: String,
    pub period: String,
    pub amount: Decimal,
    pub late_fee: Option<Decimal>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

/// `due_date: ""` clears the due date.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBillRequest {
    pub category: Option<String>,
    pub period: Option<String>,
    pub amount: Option<Decimal>,
    pub late_fee: Option<Decimal>,
    pub due_date: Option<String>,
    pub status: Option<BillStatus>,
    pub notes: Option<String>,
}

impl UpdateBillRequest {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.period.is_none()
            && self.amount.is_none()
            && self.late_fee.is_none()
            && self.due_date.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkCreateBillsRequest {
    pub category: String,
    pub period: String,
    pub amount: Decimal,
    pub late_fee: Option<Decimal>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub unit_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCreateOutcome {
    pub created_count: usize,
    pub bill_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessPaymentRequest {
    pub payment_method: String,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<BillStatus>,
    pub unit_id: Option<Uuid>,
    pub search: Option<String>,
}

/// Which bills a caller may see in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillScope {
    /// Every bill in the tenant.
    Tenant,
    /// Only bills of the unit the member lives in.
    Member(Uuid),
}

impl BillScope {
    /// Admins and treasurers (`Bendahara`) see the whole tenant.
    pub fn for_role(role: &str, user_id: Uuid) -> Self {
        let role = role.trim();
        if role.eq_ignore_ascii_case("admin") || role.eq_ignore_ascii_case("bendahara") {
            BillScope::Tenant
        } else {
            BillScope::Member(user_id)
        }
    }
}
