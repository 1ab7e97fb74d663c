//! Rent payment model.

use super::Transaction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a rent payment reached us, which decides the receiving account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Handed to a caretaker; lands in the recording user's own account.
    Cash,
    /// Wired straight into the fixed Main account.
    BankTransferToMain,
    /// Settled by the payment gateway into its designated account.
    GatewayPayment,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransferToMain => "bank_transfer_to_main",
            PaymentMethod::GatewayPayment => "gateway_payment",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "bank_transfer_to_main" => Some(PaymentMethod::BankTransferToMain),
            "gateway_payment" => Some(PaymentMethod::GatewayPayment),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded rent payment. Written exactly once per payment event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RentPayment {
    pub payment_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub tenant_id: Uuid,
    pub amount: Decimal,
    pub receiver_account_id: Uuid,
    pub payment_method: String,
    pub recorded_by_user_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl RentPayment {
    pub fn parsed_method(&self) -> Option<PaymentMethod> {
        PaymentMethod::from_string(&self.payment_method)
    }
}

/// Input for recording a rent payment against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRentPayment {
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
}

/// The payment plus the ledger transaction it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment: RentPayment,
    pub transaction: Transaction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips() {
        for method in [
            PaymentMethod::Cash,
            PaymentMethod::BankTransferToMain,
            PaymentMethod::GatewayPayment,
        ] {
            assert_eq!(PaymentMethod::from_string(method.as_str()), Some(method));
        }
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert_eq!(PaymentMethod::from_string("cheque"), None);
    }
}
