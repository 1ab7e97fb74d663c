//! Invoice and invoice item models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice lifecycle status.
///
/// `Draft -> Pending -> Outstanding <-> Paid`; status only ever moves through
/// `refresh_status` once payments start arriving, and `Paid` is terminal for
/// ordinary flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Outstanding,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Outstanding => "outstanding",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pending" => InvoiceStatus::Pending,
            "outstanding" => InvoiceStatus::Outstanding,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Draft,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One billable period for a tenancy.
///
/// Rows are never deleted; tenants keep their full payment history even after
/// they leave. Only `status` changes after creation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenancy_id: Uuid,
    pub tenant_id: Uuid,
    pub discount: Option<Decimal>,
    pub period_start: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: String,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn parsed_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Immutable line item; an invoice's gross total is the sum of its items.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub invoice_item_id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Invoice together with its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceWithItems {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

/// Input for one line item on a new invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceItem {
    pub description: String,
    pub amount: Decimal,
}

/// Input for creating an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub tenancy_id: Uuid,
    pub tenant_id: Uuid,
    pub discount: Option<Decimal>,
    /// Defaults to "now" when not supplied.
    pub period_start: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub items: Vec<CreateInvoiceItem>,
}

/// Input for opening a tenancy together with its first invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenancyWithInvoice {
    pub tenant_id: Uuid,
    pub property_id: Uuid,
    pub sub_unit_id: Option<Uuid>,
    pub assigned_rent: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_renewable: bool,
    pub renewal_period_days: Option<i32>,
    pub discount: Option<Decimal>,
    pub due_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Pending,
            InvoiceStatus::Outstanding,
            InvoiceStatus::Paid,
        ] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_falls_back_to_draft() {
        assert_eq!(InvoiceStatus::from_string("archived"), InvoiceStatus::Draft);
    }
}
