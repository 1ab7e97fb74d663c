//! Services module for finance-service.

pub mod database;
pub mod gateway;
pub mod invoices;
pub mod ledger;
pub mod metrics;
pub mod payments;
pub mod reporting;

pub use database::Database;
pub use gateway::{CheckoutOutcome, GatewayService};
pub use invoices::InvoiceService;
pub use ledger::LedgerService;
pub use metrics::{get_metrics, init_metrics};
pub use payments::PaymentService;
pub use reporting::ReportingService;
