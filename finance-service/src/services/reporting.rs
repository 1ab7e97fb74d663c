//! Read-only outstanding-balance aggregations for dashboards.

use crate::models::{Invoice, InvoiceStatus};
use crate::services::{Database, InvoiceService};
use chrono::{DateTime, Utc};
use finance_core::error::AppError;
use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct ReportingService {
    db: Database,
    invoices: InvoiceService,
}

impl ReportingService {
    pub fn new(db: Database, invoices: InvoiceService) -> Self {
        Self { db, invoices }
    }

    async fn open_invoices_where(
        &self,
        clause: &str,
        id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let query = format!(
            r#"
            SELECT invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes, created_utc
            FROM invoices
            WHERE {} AND status IN ($2, $3)
            "#,
            clause
        );

        sqlx::query_as::<_, Invoice>(&query)
            .bind(id)
            .bind(InvoiceStatus::Pending.as_str())
            .bind(InvoiceStatus::Outstanding.as_str())
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list open invoices: {}", e))
            })
    }

    async fn sum_remaining(&self, invoices: &[Invoice]) -> Result<Decimal, AppError> {
        let mut total = Decimal::ZERO;
        for invoice in invoices {
            total += self.invoices.remaining(invoice).await?;
        }
        Ok(total)
    }

    /// Sum of remaining amounts across a tenant's pending and outstanding
    /// invoices.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn tenant_outstanding(&self, tenant_id: Uuid) -> Result<Decimal, AppError> {
        let invoices = self.open_invoices_where("tenant_id = $1", tenant_id).await?;
        self.sum_remaining(&invoices).await
    }

    /// Same, scoped to one tenancy.
    #[instrument(skip(self), fields(tenancy_id = %tenancy_id))]
    pub async fn tenancy_outstanding(&self, tenancy_id: Uuid) -> Result<Decimal, AppError> {
        let invoices = self
            .open_invoices_where("tenancy_id = $1", tenancy_id)
            .await?;
        self.sum_remaining(&invoices).await
    }

    /// Sum of remaining amounts across every open invoice under a property's
    /// tenancies.
    #[instrument(skip(self), fields(property_id = %property_id))]
    pub async fn property_outstanding(&self, property_id: Uuid) -> Result<Decimal, AppError> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT i.invoice_id, i.tenancy_id, i.tenant_id, i.discount, i.period_start, i.due_date, i.status, i.notes, i.created_utc
            FROM invoices i
            JOIN tenancies t ON t.tenancy_id = i.tenancy_id
            WHERE t.property_id = $1 AND i.status IN ($2, $3)
            "#,
        )
        .bind(property_id)
        .bind(InvoiceStatus::Pending.as_str())
        .bind(InvoiceStatus::Outstanding.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list property invoices: {}", e))
        })?;

        self.sum_remaining(&invoices).await
    }

    /// Everything ever paid against a tenancy's invoices.
    #[instrument(skip(self), fields(tenancy_id = %tenancy_id))]
    pub async fn tenancy_total_paid(&self, tenancy_id: Uuid) -> Result<Decimal, AppError> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(p.amount), 0)
            FROM rent_payments p
            JOIN invoices i ON i.invoice_id = p.invoice_id
            WHERE i.tenancy_id = $1
            "#,
        )
        .bind(tenancy_id)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum tenancy payments: {}", e))
        })?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }

    /// Date and amount of the most recent payment against a tenancy, if any.
    #[instrument(skip(self), fields(tenancy_id = %tenancy_id))]
    pub async fn tenancy_last_payment(
        &self,
        tenancy_id: Uuid,
    ) -> Result<Option<(DateTime<Utc>, Decimal)>, AppError> {
        let row: Option<(DateTime<Utc>, Decimal)> = sqlx::query_as(
            r#"
            SELECT p.created_utc, p.amount
            FROM rent_payments p
            JOIN invoices i ON i.invoice_id = p.invoice_id
            WHERE i.tenancy_id = $1
            ORDER BY p.created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(tenancy_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get last payment: {}", e))
        })?;

        Ok(row)
    }
}
