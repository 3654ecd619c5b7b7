use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use super::models::LateFeeType;

/// key: late-fee-policy -> daily accrual rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateFeePolicy {
    /// Flat amount charged per day overdue.
    Fixed { daily: Decimal },
    /// Percent of the bill amount charged per day overdue.
    Percentage { percent: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateFeeSchedule {
    pub policy: LateFeePolicy,
    pub cap: Option<Decimal>,
}

impl LateFeeSchedule {
    /// A percentage policy without a configured rate degrades to the fixed daily fee.
    pub fn from_settings(
        late_fee_type: LateFeeType,
        daily_fee: Decimal,
        percentage: Option<Decimal>,
        cap: Option<Decimal>,
    ) -> Self {
        let policy = match (late_fee_type, percentage) {
            (LateFeeType::Percentage, Some(percent)) => LateFeePolicy::Percentage { percent },
            _ => LateFeePolicy::Fixed { daily: daily_fee },
        };
        Self { policy, cap }
    }

    pub fn flat(daily: Decimal) -> Self {
        Self {
            policy: LateFeePolicy::Fixed { daily },
            cap: None,
        }
    }

    pub fn daily_fee(&self, amount: Decimal) -> Decimal {
        match self.policy {
            LateFeePolicy::Fixed { daily } => daily,
            LateFeePolicy::Percentage { percent } => amount * percent / Decimal::ONE_HUNDRED,
        }
    }

    /// Total late fee owed after `days_overdue` full days, capped and rounded to cents.
    pub fn accrued(&self, amount: Decimal, days_overdue: i64) -> Decimal {
        if days_overdue <= 0 {
            return Decimal::ZERO;
        }
        let mut fee = self.daily_fee(amount) * Decimal::from(days_overdue);
        if let Some(cap) = self.cap {
            fee = fee.min(cap);
        }
        fee.max(Decimal::ZERO).round_dp(2)
    }
}

/// Whole days elapsed since midnight UTC of `due_date`.
pub fn days_overdue(now: DateTime<Utc>, due_date: NaiveDate) -> i64 {
    let due_at = Utc.from_utc_datetime(&due_date.and_time(NaiveTime::MIN));
    (now - due_at).num_days()
}
