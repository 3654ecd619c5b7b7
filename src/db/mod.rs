pub mod bills;
pub mod units;
