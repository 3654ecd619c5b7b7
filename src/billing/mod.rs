pub mod accrual;
pub mod api;
pub mod error;
pub mod generator;
pub mod jobs;
pub mod late_fee;
pub mod ledger;
pub mod models;
pub mod period;
pub mod scheduler;
pub mod templates;

pub use accrual::{accrue_late_fees, promote_overdue_bills, AccrualReport};
pub use api::{routes, GenerationResponse};
pub use error::BillingError;
pub use generator::{BillGenerator, GenerationFailure, GenerationOutcome};
pub use jobs::{billing_scheduler, LateFeeAccrualJob, OverduePromotionJob};
pub use late_fee::{LateFeePolicy, LateFeeSchedule};
pub use ledger::BillLedger;
pub use models::{
    AmountRule, AmountRuleInput, Bill, BillListQuery, BillPage, BillScope, BillStatus,
    BillingTemplate, BulkCreateBillsRequest, BulkCreateOutcome, ChargeType, CreateBillRequest,
    CreateTemplateRequest, GenerateBillsRequest, LateFeeType, Pagination, ProcessPaymentRequest,
    TemplateDetail, TemplateListQuery, TemplatePage, UnitType, UpdateBillRequest,
    UpdateTemplateRequest,
};
pub use period::Period;
pub use scheduler::{Cadence, Clock, ScheduledJob, Scheduler, SystemClock};
pub use templates::TemplateRegistry;
