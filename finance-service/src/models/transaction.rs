//! Immutable ledger transaction model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use thiserror::Error;
use uuid::Uuid;

/// What a transaction records, together with the row it correlates to.
///
/// The kind is persisted as a type column plus an optional reference column;
/// carrying the reference inside the variant means a rent-payment transaction
/// can only ever point at a rent-payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    RentPayment { payment_id: Uuid },
    Expense { expense_id: Uuid },
    ReturnedRent { payment_id: Uuid },
}

#[derive(Debug, Error)]
pub enum TransactionKindError {
    #[error("unknown transaction type '{0}'")]
    UnknownType(String),
    #[error("transaction type '{0}' requires a reference id")]
    MissingReference(&'static str),
}

impl TransactionKind {
    /// String stored in the `transaction_type` column.
    pub fn type_str(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::RentPayment { .. } => "rent_payment",
            TransactionKind::Expense { .. } => "expense",
            TransactionKind::ReturnedRent { .. } => "returned_rent",
        }
    }

    /// Id of the originating domain row, if the kind has one.
    pub fn reference_id(&self) -> Option<Uuid> {
        match self {
            TransactionKind::Transfer => None,
            TransactionKind::RentPayment { payment_id } => Some(*payment_id),
            TransactionKind::Expense { expense_id } => Some(*expense_id),
            TransactionKind::ReturnedRent { payment_id } => Some(*payment_id),
        }
    }

    /// Rebuild the kind from its persisted columns.
    pub fn from_columns(
        transaction_type: &str,
        reference_id: Option<Uuid>,
    ) -> Result<Self, TransactionKindError> {
        match transaction_type {
            "transfer" => Ok(TransactionKind::Transfer),
            "rent_payment" => reference_id
                .map(|payment_id| TransactionKind::RentPayment { payment_id })
                .ok_or(TransactionKindError::MissingReference("rent_payment")),
            "expense" => reference_id
                .map(|expense_id| TransactionKind::Expense { expense_id })
                .ok_or(TransactionKindError::MissingReference("expense")),
            "returned_rent" => reference_id
                .map(|payment_id| TransactionKind::ReturnedRent { payment_id })
                .ok_or(TransactionKindError::MissingReference("returned_rent")),
            other => Err(TransactionKindError::UnknownType(other.to_string())),
        }
    }
}

/// One movement of money, append-only once written.
///
/// At least one of the two account sides is set: a transfer names both, a
/// rent payment only credits a destination, an expense only debits a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub kind: TransactionKind,
    pub source_account_id: Option<Uuid>,
    pub destination_account_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub created_utc: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Transaction {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let transaction_type: String = row.try_get("transaction_type")?;
        let reference_id: Option<Uuid> = row.try_get("reference_id")?;
        let kind = TransactionKind::from_columns(&transaction_type, reference_id).map_err(|e| {
            sqlx::Error::ColumnDecode {
                index: "transaction_type".to_string(),
                source: Box::new(e),
            }
        })?;

        Ok(Self {
            transaction_id: row.try_get("transaction_id")?,
            kind,
            source_account_id: row.try_get("source_account_id")?,
            destination_account_id: row.try_get("destination_account_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            created_utc: row.try_get("created_utc")?,
        })
    }
}

/// Input for moving money between two named accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTransfer {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_columns() {
        let payment_id = Uuid::new_v4();
        let kinds = [
            TransactionKind::Transfer,
            TransactionKind::RentPayment { payment_id },
            TransactionKind::Expense {
                expense_id: payment_id,
            },
            TransactionKind::ReturnedRent { payment_id },
        ];

        for kind in kinds {
            let rebuilt = TransactionKind::from_columns(kind.type_str(), kind.reference_id())
                .expect("persisted columns parse back");
            assert_eq!(rebuilt, kind);
        }
    }

    #[test]
    fn transfer_carries_no_reference() {
        assert_eq!(TransactionKind::Transfer.reference_id(), None);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = TransactionKind::from_columns("chargeback", None).unwrap_err();
        assert!(matches!(err, TransactionKindError::UnknownType(_)));
    }

    #[test]
    fn correlated_kinds_require_a_reference() {
        for kind in ["rent_payment", "expense", "returned_rent"] {
            let err = TransactionKind::from_columns(kind, None).unwrap_err();
            assert!(matches!(err, TransactionKindError::MissingReference(_)));
        }
    }
}
