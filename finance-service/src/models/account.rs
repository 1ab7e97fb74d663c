//! Monetary account model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A pool of money the ledger moves value between.
///
/// One account exists per user, plus the fixed Main and Gateway singletons
/// created at bootstrap. `balance` is a cached projection of ledger history:
/// at any instant it equals the sum of amounts credited minus the sum of
/// amounts debited across all committed transactions touching the account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MonetaryAccount {
    pub account_id: Uuid,
    pub account_name: String,
    pub user_id: Option<Uuid>,
    pub balance: Decimal,
    pub is_closed: bool,
    pub closed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub account_name: String,
    pub user_id: Option<Uuid>,
}
