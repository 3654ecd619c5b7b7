use thiserror::Error;

use super::period::PeriodError;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
}

impl BillingError {
    pub fn not_found(what: impl Into<String>) -> Self {
        BillingError::NotFound(what.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        BillingError::Validation(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        BillingError::Conflict(reason.into())
    }
}

impl From<PeriodError> for BillingError {
    fn from(err: PeriodError) -> Self {
        BillingError::Validation(err.to_string())
    }
}
