//! Domain models for finance-service.

mod account;
mod expense;
mod invoice;
mod payment;
mod session;
mod tenancy;
mod transaction;

pub use account::{CreateAccount, MonetaryAccount};
pub use expense::{Expense, ExpenseRecord, RecordExpense};
pub use invoice::{
    CreateInvoice, CreateInvoiceItem, CreateTenancyWithInvoice, Invoice, InvoiceItem,
    InvoiceStatus, InvoiceWithItems,
};
pub use payment::{PaymentMethod, PaymentRecord, RecordRentPayment, RentPayment};
pub use session::{CreatePaymentSession, PaymentSession, SessionStatus};
pub use tenancy::Tenancy;
pub use transaction::{RecordTransfer, Transaction, TransactionKind, TransactionKindError};
