//! Rent payment and expense processors.
//!
//! Each processor runs "business event -> ledger entry -> status update" as
//! one database transaction: the domain row, the ledger row, the balance
//! deltas and the invoice status either all commit together or none do.

use crate::config::LedgerConfig;
use crate::models::{
    Expense, ExpenseRecord, Invoice, PaymentMethod, PaymentRecord, RecordExpense,
    RecordRentPayment, RecordTransfer, RentPayment, Transaction, TransactionKind,
};
use crate::services::metrics::{ERRORS_TOTAL, RENT_PAYMENTS_TOTAL, TRANSACTIONS_TOTAL};
use crate::services::{Database, InvoiceService, LedgerService};
use finance_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction as DbTransaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct PaymentService {
    db: Database,
    ledger: LedgerService,
    invoices: InvoiceService,
    config: LedgerConfig,
}

impl PaymentService {
    pub fn new(
        db: Database,
        ledger: LedgerService,
        invoices: InvoiceService,
        config: LedgerConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            invoices,
            config,
        }
    }

    /// Record a rent payment against an invoice.
    ///
    /// The invoice row is locked for the whole unit of work, so two racing
    /// payments for the same invoice serialize: the first commits, the second
    /// re-reads the settled state and gets `Conflict`.
    #[instrument(skip(self, request), fields(invoice_id = %request.invoice_id, method = %request.payment_method))]
    pub async fn record_rent_payment(
        &self,
        acting_user_id: Uuid,
        request: &RecordRentPayment,
    ) -> Result<PaymentRecord, AppError> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be positive"
            )));
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let result = self
            .record_rent_payment_in_tx(&mut tx, acting_user_id, request)
            .await;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                RENT_PAYMENTS_TOTAL
                    .with_label_values(&[request.payment_method.as_str(), "error"])
                    .inc();
                ERRORS_TOTAL.with_label_values(&[error_label(&e)]).inc();
                // Dropping the transaction rolls everything back.
                return Err(e);
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        RENT_PAYMENTS_TOTAL
            .with_label_values(&[request.payment_method.as_str(), "ok"])
            .inc();
        TRANSACTIONS_TOTAL
            .with_label_values(&["rent_payment", "ok"])
            .inc();

        info!(
            payment_id = %record.payment.payment_id,
            invoice_id = %request.invoice_id,
            amount = %request.amount,
            "Rent payment recorded"
        );

        Ok(record)
    }

    async fn record_rent_payment_in_tx(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        acting_user_id: Uuid,
        request: &RecordRentPayment,
    ) -> Result<PaymentRecord, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes, created_utc
            FROM invoices
            WHERE invoice_id = $1
            FOR UPDATE
            "#,
        )
        .bind(request.invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if self.is_paid_in_tx(tx, &invoice).await? {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice already paid"
            )));
        }

        let receiver_account_id = self
            .resolve_receiver_account(tx, acting_user_id, request.payment_method)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Invalid payment method"))
            })?;

        let payment = sqlx::query_as::<_, RentPayment>(
            r#"
            INSERT INTO rent_payments (payment_id, invoice_id, tenant_id, amount, receiver_account_id, payment_method, recorded_by_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING payment_id, invoice_id, tenant_id, amount, receiver_account_id, payment_method, recorded_by_user_id, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.invoice_id)
        .bind(request.tenant_id)
        .bind(request.amount)
        .bind(receiver_account_id)
        .bind(request.payment_method.as_str())
        .bind(acting_user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert rent payment: {}", e))
        })?;

        let transaction = self
            .ledger
            .insert_transaction(
                tx,
                TransactionKind::RentPayment {
                    payment_id: payment.payment_id,
                },
                None,
                Some(receiver_account_id),
                request.amount,
            )
            .await?;

        self.ledger.apply_transaction(tx, &transaction).await?;

        self.invoices.refresh_status(tx, request.invoice_id).await?;

        Ok(PaymentRecord {
            payment,
            transaction,
        })
    }

    async fn is_paid_in_tx(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        invoice: &Invoice,
    ) -> Result<bool, AppError> {
        let items_sum: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM invoice_items WHERE invoice_id = $1",
        )
        .bind(invoice.invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoice items: {}", e))
        })?;

        let paid: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM rent_payments WHERE invoice_id = $1",
        )
        .bind(invoice.invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

        let total = items_sum.unwrap_or(Decimal::ZERO)
            - invoice.discount.unwrap_or(Decimal::ZERO);
        let paid = paid.unwrap_or(Decimal::ZERO);

        Ok(crate::services::invoices::payments_satisfy_total(
            paid,
            total,
            self.config.tolerance,
        ))
    }

    /// Map a payment method to the account that receives the money.
    async fn resolve_receiver_account(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        acting_user_id: Uuid,
        method: PaymentMethod,
    ) -> Result<Option<Uuid>, AppError> {
        let account_id = match method {
            PaymentMethod::Cash => sqlx::query_scalar::<_, Uuid>(
                "SELECT account_id FROM monetary_accounts WHERE user_id = $1",
            )
            .bind(acting_user_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to resolve cash account: {}",
                    e
                ))
            })?,
            PaymentMethod::BankTransferToMain => Some(self.config.main_account_id),
            PaymentMethod::GatewayPayment => Some(self.config.gateway_account_id),
        };

        Ok(account_id)
    }

    /// Record an expense paid out of the paying user's account.
    ///
    /// No invoice interaction; the unit of work covers the expense row, the
    /// ledger row and the debit.
    #[instrument(skip(self, request), fields(paying_user_id = %request.paying_user_id, category = %request.category))]
    pub async fn record_expense(&self, request: &RecordExpense) -> Result<ExpenseRecord, AppError> {
        request.validate()?;

        if request.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Expense amount must be positive"
            )));
        }

        let paying_account = self
            .db
            .account_for_user(request.paying_user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "No monetary account for user {}",
                    request.paying_user_id
                ))
            })?;

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let expense = sqlx::query_as::<_, Expense>(
            r#"
            INSERT INTO expenses (expense_id, property_id, paying_account_id, paying_user_id, category, description, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING expense_id, property_id, paying_account_id, paying_user_id, category, description, amount, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.property_id)
        .bind(paying_account.account_id)
        .bind(request.paying_user_id)
        .bind(&request.category)
        .bind(&request.description)
        .bind(request.amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert expense: {}", e)))?;

        let transaction = self
            .ledger
            .insert_transaction(
                &mut tx,
                TransactionKind::Expense {
                    expense_id: expense.expense_id,
                },
                Some(paying_account.account_id),
                None,
                request.amount,
            )
            .await?;

        if let Err(e) = self.ledger.apply_transaction(&mut tx, &transaction).await {
            TRANSACTIONS_TOTAL
                .with_label_values(&["expense", "error"])
                .inc();
            ERRORS_TOTAL.with_label_values(&[error_label(&e)]).inc();
            warn!(
                paying_account_id = %paying_account.account_id,
                amount = %request.amount,
                "Expense rejected by ledger"
            );
            return Err(e);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        TRANSACTIONS_TOTAL
            .with_label_values(&["expense", "ok"])
            .inc();

        info!(
            expense_id = %expense.expense_id,
            amount = %expense.amount,
            "Expense recorded"
        );

        Ok(ExpenseRecord {
            expense,
            transaction,
        })
    }

    /// Move money between two named accounts (see `LedgerService`).
    pub async fn record_transfer(&self, request: &RecordTransfer) -> Result<Transaction, AppError> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Transfer amount must be positive"
            )));
        }
        self.ledger.record_transfer(request).await
    }

    /// Payments recorded against an invoice, each with the transaction it
    /// produced (when one exists).
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn payments_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<(RentPayment, Option<Transaction>)>, AppError> {
        let payments = sqlx::query_as::<_, RentPayment>(
            r#"
            SELECT payment_id, invoice_id, tenant_id, amount, receiver_account_id, payment_method, recorded_by_user_id, created_utc
            FROM rent_payments
            WHERE invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        let payment_ids: Vec<Uuid> = payments.iter().map(|p| p.payment_id).collect();
        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, transaction_type, reference_id, source_account_id, destination_account_id, amount, currency, created_utc
            FROM transactions
            WHERE transaction_type = 'rent_payment' AND reference_id = ANY($1)
            "#,
        )
        .bind(&payment_ids)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e))
        })?;

        let records = payments
            .into_iter()
            .map(|payment| {
                let transaction = transactions
                    .iter()
                    .find(|t| t.kind.reference_id() == Some(payment.payment_id))
                    .cloned();
                (payment, transaction)
            })
            .collect();

        Ok(records)
    }

    /// A single payment with its transaction.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn payment_record(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<(RentPayment, Option<Transaction>)>, AppError> {
        let payment = sqlx::query_as::<_, RentPayment>(
            r#"
            SELECT payment_id, invoice_id, tenant_id, amount, receiver_account_id, payment_method, recorded_by_user_id, created_utc
            FROM rent_payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        let payment = match payment {
            Some(payment) => payment,
            None => return Ok(None),
        };

        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, transaction_type, reference_id, source_account_id, destination_account_id, amount, currency, created_utc
            FROM transactions
            WHERE transaction_type = 'rent_payment' AND reference_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e))
        })?;

        Ok(Some((payment, transaction)))
    }
}

fn error_label(err: &AppError) -> &'static str {
    match err {
        AppError::NotFound(_) => "not_found",
        AppError::Conflict(_) => "conflict",
        AppError::BadRequest(_) | AppError::ValidationError(_) => "bad_request",
        AppError::InsufficientFunds(_) => "insufficient_funds",
        AppError::AlreadyPaid(_) => "already_paid",
        _ => "db_error",
    }
}
