//! Payment-gateway checkout session model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Gateway session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            _ => SessionStatus::Pending,
        }
    }
}

/// A checkout session opened with the payment gateway.
///
/// The session is the webhook's idempotency anchor: a completed notification
/// for an already-completed session is skipped.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_id: Uuid,
    /// The gateway's own identifier for the checkout.
    pub session_ref: String,
    pub tenant_id: Uuid,
    pub invoice_ids: Vec<Uuid>,
    pub total_amount: Decimal,
    pub status: String,
    pub completed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl PaymentSession {
    pub fn parsed_status(&self) -> SessionStatus {
        SessionStatus::from_string(&self.status)
    }
}

/// Input for persisting a newly opened checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentSession {
    pub session_ref: String,
    pub tenant_id: Uuid,
    pub invoice_ids: Vec<Uuid>,
}
