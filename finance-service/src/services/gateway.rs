//! Payment-gateway collaborator: turns completed checkout notifications into
//! ordinary rent payments attributed to the gateway account.

use crate::config::LedgerConfig;
use crate::models::{
    CreatePaymentSession, PaymentMethod, PaymentSession, RecordRentPayment, SessionStatus,
};
use crate::services::{Database, InvoiceService, PaymentService};
use chrono::Utc;
use finance_core::error::AppError;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

/// What a completed-checkout notification amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// Payments were recorded for every invoice in the session.
    Completed { payments: usize },
    /// The session was already settled; nothing was recorded.
    AlreadyCompleted,
}

#[derive(Clone)]
pub struct GatewayService {
    db: Database,
    invoices: InvoiceService,
    payments: PaymentService,
    config: LedgerConfig,
}

impl GatewayService {
    pub fn new(
        db: Database,
        invoices: InvoiceService,
        payments: PaymentService,
        config: LedgerConfig,
    ) -> Self {
        Self {
            db,
            invoices,
            payments,
            config,
        }
    }

    /// Persist a newly opened checkout session.
    ///
    /// The session total is the sum of the named invoices' current totals;
    /// the row is what the completion webhook later keys its idempotency on.
    #[instrument(skip(self, input), fields(session_ref = %input.session_ref, invoice_count = input.invoice_ids.len()))]
    pub async fn create_session(
        &self,
        input: &CreatePaymentSession,
    ) -> Result<PaymentSession, AppError> {
        if input.invoice_ids.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A checkout session needs at least one invoice"
            )));
        }

        let mut total_amount = Decimal::ZERO;
        for invoice_id in &input.invoice_ids {
            let invoice = self
                .invoices
                .get_invoice(*invoice_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Invoice not found: {}", invoice_id))
                })?;
            total_amount += self.invoices.total(&invoice).await?;
        }

        let session = sqlx::query_as::<_, PaymentSession>(
            r#"
            INSERT INTO payment_sessions (session_id, session_ref, tenant_id, invoice_ids, total_amount, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING session_id, session_ref, tenant_id, invoice_ids, total_amount, status, completed_utc, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.session_ref)
        .bind(input.tenant_id)
        .bind(&input.invoice_ids)
        .bind(total_amount)
        .bind(SessionStatus::Pending.as_str())
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "A session already exists for checkout '{}'",
                    input.session_ref
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create session: {}", e)),
        })?;

        info!(session_id = %session.session_id, "Checkout session created");

        Ok(session)
    }

    /// Look up a session by the gateway's checkout identifier.
    #[instrument(skip(self))]
    pub async fn get_session(&self, session_ref: &str) -> Result<Option<PaymentSession>, AppError> {
        let session = sqlx::query_as::<_, PaymentSession>(
            r#"
            SELECT session_id, session_ref, tenant_id, invoice_ids, total_amount, status, completed_utc, created_utc
            FROM payment_sessions
            WHERE session_ref = $1
            "#,
        )
        .bind(session_ref)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get session: {}", e)))?;

        Ok(session)
    }

    /// Handle a completed-checkout notification from the gateway.
    ///
    /// Idempotent per session: a repeat notification for a completed session
    /// is skipped. For each named invoice a rent payment for its full current
    /// total is recorded under the gateway user with the gateway method.
    #[instrument(skip(self), fields(session_ref = %session_ref))]
    pub async fn checkout_completed(
        &self,
        session_ref: &str,
    ) -> Result<CheckoutOutcome, AppError> {
        let session = self
            .get_session(session_ref)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Payment session not found: {}", session_ref))
            })?;

        if session.parsed_status() == SessionStatus::Completed {
            info!(session_id = %session.session_id, "Session already completed, skipping");
            return Ok(CheckoutOutcome::AlreadyCompleted);
        }

        let mut recorded = 0;
        for invoice_id in &session.invoice_ids {
            let invoice = self
                .invoices
                .get_invoice(*invoice_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Invoice not found: {}", invoice_id))
                })?;

            let amount = self.invoices.total(&invoice).await?;
            let request = RecordRentPayment {
                tenant_id: invoice.tenant_id,
                invoice_id: invoice.invoice_id,
                amount,
                payment_method: PaymentMethod::GatewayPayment,
            };

            self.payments
                .record_rent_payment(self.config.gateway_user_id, &request)
                .await?;
            recorded += 1;
        }

        sqlx::query(
            "UPDATE payment_sessions SET status = $2, completed_utc = $3 WHERE session_id = $1",
        )
        .bind(session.session_id)
        .bind(SessionStatus::Completed.as_str())
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to complete session: {}", e))
        })?;

        info!(
            session_id = %session.session_id,
            payments = recorded,
            "Checkout session completed"
        );

        Ok(CheckoutOutcome::Completed { payments: recorded })
    }
}
