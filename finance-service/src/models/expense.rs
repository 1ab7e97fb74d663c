//! Expense model.

use super::Transaction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Money spent on upkeep, debited from the paying user's account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Expense {
    pub expense_id: Uuid,
    pub property_id: Option<Uuid>,
    pub paying_account_id: Uuid,
    pub paying_user_id: Uuid,
    pub category: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording an expense.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordExpense {
    pub property_id: Option<Uuid>,
    pub paying_user_id: Uuid,
    #[validate(length(min = 1, message = "Category cannot be empty"))]
    pub category: String,
    pub description: Option<String>,
    pub amount: Decimal,
}

/// The expense plus the ledger transaction it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub expense: Expense,
    pub transaction: Transaction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_category_fails_validation() {
        let input = RecordExpense {
            property_id: None,
            paying_user_id: Uuid::new_v4(),
            category: String::new(),
            description: None,
            amount: dec!(100),
        };
        assert!(input.validate().is_err());
    }
}
