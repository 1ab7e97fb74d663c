//! Invoice engine: totals, remaining amounts and status transitions.

use crate::config::LedgerConfig;
use crate::models::{
    CreateInvoice, CreateTenancyWithInvoice, Invoice, InvoiceItem, InvoiceStatus,
    InvoiceWithItems, Tenancy,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::Database;
use chrono::Utc;
use finance_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::{PgConnection, Postgres, Transaction as DbTransaction};
use tracing::{info, instrument};
use uuid::Uuid;

/// Invoice totals are never stored; they are recomputed from line items and
/// recorded payments on every read so they cannot go stale.
#[derive(Clone)]
pub struct InvoiceService {
    db: Database,
    config: LedgerConfig,
}

/// `SUM(items) - discount`. A discount larger than the item sum yields a
/// negative total; the engine passes that through unclamped.
fn total_minus_discount(items_sum: Decimal, discount: Option<Decimal>) -> Decimal {
    items_sum - discount.unwrap_or(Decimal::ZERO)
}

/// Whether payments equal-or-exceed the total within tolerance, i.e. the
/// invoice can no longer accept money.
pub(crate) fn payments_satisfy_total(paid: Decimal, total: Decimal, tolerance: Decimal) -> bool {
    paid >= total - tolerance
}

/// Payments exceeding the total beyond tolerance means the paid check
/// upstream was skipped; that is an invariant fault, not a user error.
fn status_for_payments(
    paid: Decimal,
    total: Decimal,
    tolerance: Decimal,
) -> Result<InvoiceStatus, AppError> {
    if paid - tolerance > total {
        return Err(AppError::AlreadyPaid(anyhow::anyhow!(
            "Invoice already completely paid: payments {} exceed total {}",
            paid,
            total
        )));
    }

    if (paid - total).abs() <= tolerance {
        Ok(InvoiceStatus::Paid)
    } else {
        Ok(InvoiceStatus::Outstanding)
    }
}

impl InvoiceService {
    pub fn new(db: Database, config: LedgerConfig) -> Self {
        Self { db, config }
    }

    async fn items_total(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Decimal, AppError> {
        let sum: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM invoice_items WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoice items: {}", e))
        })?;

        Ok(sum.unwrap_or(Decimal::ZERO))
    }

    async fn payments_total(
        conn: &mut PgConnection,
        invoice_id: Uuid,
    ) -> Result<Decimal, AppError> {
        let sum: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM rent_payments WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

        Ok(sum.unwrap_or(Decimal::ZERO))
    }

    async fn total_on(conn: &mut PgConnection, invoice: &Invoice) -> Result<Decimal, AppError> {
        let items_sum = Self::items_total(conn, invoice.invoice_id).await?;
        Ok(total_minus_discount(items_sum, invoice.discount))
    }

    /// Sum of the invoice's items minus its discount.
    pub async fn total(&self, invoice: &Invoice) -> Result<Decimal, AppError> {
        let mut conn = self.db.pool().acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        Self::total_on(&mut conn, invoice).await
    }

    /// Total minus everything paid against the invoice so far.
    pub async fn remaining(&self, invoice: &Invoice) -> Result<Decimal, AppError> {
        let mut conn = self.db.pool().acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        let total = Self::total_on(&mut conn, invoice).await?;
        let paid = Self::payments_total(&mut conn, invoice.invoice_id).await?;
        Ok(total - paid)
    }

    /// Whether recorded payments already satisfy the invoice within
    /// tolerance. Once this is true, further payments must be rejected
    /// upstream before `refresh_status` can trip over an overpayment.
    pub async fn is_paid(&self, invoice: &Invoice) -> Result<bool, AppError> {
        let mut conn = self.db.pool().acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        let total = Self::total_on(&mut conn, invoice).await?;
        let paid = Self::payments_total(&mut conn, invoice.invoice_id).await?;
        Ok(payments_satisfy_total(paid, total, self.config.tolerance))
    }

    /// Recompute and persist an invoice's status inside the given unit of
    /// work.
    ///
    /// Loads the invoice `FOR UPDATE` so a racing payment on the same invoice
    /// waits for this unit to finish. Idempotent: re-running without new
    /// payments lands on the same status.
    pub(crate) async fn refresh_status(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        invoice_id: Uuid,
    ) -> Result<InvoiceStatus, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes, created_utc
            FROM invoices
            WHERE invoice_id = $1
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

        let total = Self::total_on(&mut **tx, &invoice).await?;
        let paid = Self::payments_total(&mut **tx, invoice.invoice_id).await?;

        let status = status_for_payments(paid, total, self.config.tolerance)?;

        sqlx::query("UPDATE invoices SET status = $2 WHERE invoice_id = $1")
            .bind(invoice_id)
            .bind(status.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice status: {}", e))
            })?;

        Ok(status)
    }

    /// `refresh_status` in its own unit of work, for callers outside a
    /// payment flow (administrative corrections, backfills).
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn refresh_status_now(&self, invoice_id: Uuid) -> Result<InvoiceStatus, AppError> {
        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let status = self.refresh_status(&mut tx, invoice_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        Ok(status)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes, created_utc
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// All invoices issued under a tenancy, newest first.
    #[instrument(skip(self), fields(tenancy_id = %tenancy_id))]
    pub async fn invoices_for_tenancy(&self, tenancy_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes, created_utc
            FROM invoices
            WHERE tenancy_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(tenancy_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list tenancy invoices: {}", e))
        })?;

        Ok(invoices)
    }

    /// Get an invoice together with its line items.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn invoice_with_items(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceWithItems>, AppError> {
        let invoice = match self.get_invoice(invoice_id).await? {
            Some(invoice) => invoice,
            None => return Ok(None),
        };

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT invoice_item_id, invoice_id, description, amount, created_utc
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY created_utc, invoice_item_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice items: {}", e))
        })?;

        Ok(Some(InvoiceWithItems { invoice, items }))
    }

    /// Create an invoice with its line items as one atomic unit.
    #[instrument(skip(self, input), fields(tenancy_id = %input.tenancy_id, item_count = input.items.len()))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<InvoiceWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let created = self.create_invoice_in_tx(&mut tx, input).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(invoice_id = %created.invoice.invoice_id, "Invoice created");

        Ok(created)
    }

    pub(crate) async fn create_invoice_in_tx(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        input: &CreateInvoice,
    ) -> Result<InvoiceWithItems, AppError> {
        let invoice_id = Uuid::new_v4();
        let period_start = input.period_start.unwrap_or_else(Utc::now);

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes, created_utc
            "#,
        )
        .bind(invoice_id)
        .bind(input.tenancy_id)
        .bind(input.tenant_id)
        .bind(input.discount)
        .bind(period_start)
        .bind(input.due_date)
        .bind(InvoiceStatus::Pending.as_str())
        .bind(&input.notes)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let inserted = sqlx::query_as::<_, InvoiceItem>(
                r#"
                INSERT INTO invoice_items (invoice_item_id, invoice_id, description, amount)
                VALUES ($1, $2, $3, $4)
                RETURNING invoice_item_id, invoice_id, description, amount, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(&item.description)
            .bind(item.amount)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice item: {}", e))
            })?;
            items.push(inserted);
        }

        Ok(InvoiceWithItems { invoice, items })
    }

    /// Open a tenancy and issue its first invoice as one atomic unit.
    ///
    /// The first invoice carries a single "New Tenancy Rent" item for the
    /// assigned rent.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, property_id = %input.property_id))]
    pub async fn create_tenancy_with_invoice(
        &self,
        input: &CreateTenancyWithInvoice,
    ) -> Result<(Tenancy, InvoiceWithItems), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_tenancy_with_invoice"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let tenancy = sqlx::query_as::<_, Tenancy>(
            r#"
            INSERT INTO tenancies (tenancy_id, tenant_id, property_id, sub_unit_id, assigned_rent, start_date, end_date, is_renewable, renewal_period_days, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
            RETURNING tenancy_id, tenant_id, property_id, sub_unit_id, assigned_rent, start_date, end_date, is_renewable, renewal_period_days, is_active, evacuation_date, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.property_id)
        .bind(input.sub_unit_id)
        .bind(input.assigned_rent)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.is_renewable)
        .bind(input.renewal_period_days)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create tenancy: {}", e)))?;

        let invoice_input = CreateInvoice {
            tenancy_id: tenancy.tenancy_id,
            tenant_id: input.tenant_id,
            discount: input.discount,
            period_start: Some(input.start_date),
            due_date: input.due_date,
            notes: None,
            items: vec![crate::models::CreateInvoiceItem {
                description: "New Tenancy Rent".to_string(),
                amount: input.assigned_rent,
            }],
        };

        let invoice = self.create_invoice_in_tx(&mut tx, &invoice_input).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            tenancy_id = %tenancy.tenancy_id,
            invoice_id = %invoice.invoice.invoice_id,
            "Tenancy opened with first invoice"
        );

        Ok((tenancy, invoice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_subtracts_discount() {
        assert_eq!(
            total_minus_discount(dec!(1200), Some(dec!(100))),
            dec!(1100)
        );
        assert_eq!(total_minus_discount(dec!(1200), None), dec!(1200));
    }

    #[test]
    fn oversized_discount_goes_negative() {
        // Observed behavior: the total is not clamped at zero.
        assert_eq!(total_minus_discount(dec!(100), Some(dec!(500))), dec!(-400));
    }

    #[test]
    fn exact_payment_settles_the_invoice() {
        let status = status_for_payments(dec!(1100), dec!(1100), dec!(1)).unwrap();
        assert_eq!(status, InvoiceStatus::Paid);
    }

    #[test]
    fn payment_within_tolerance_settles_the_invoice() {
        let status = status_for_payments(dec!(1099.50), dec!(1100), dec!(1)).unwrap();
        assert_eq!(status, InvoiceStatus::Paid);

        let status = status_for_payments(dec!(1101), dec!(1100), dec!(1)).unwrap();
        assert_eq!(status, InvoiceStatus::Paid);
    }

    #[test]
    fn short_payment_leaves_the_invoice_outstanding() {
        let status = status_for_payments(dec!(500), dec!(1100), dec!(1)).unwrap();
        assert_eq!(status, InvoiceStatus::Outstanding);

        let status = status_for_payments(Decimal::ZERO, dec!(1100), dec!(1)).unwrap();
        assert_eq!(status, InvoiceStatus::Outstanding);
    }

    #[test]
    fn overpayment_beyond_tolerance_is_an_invariant_fault() {
        let err = status_for_payments(dec!(1102), dec!(1100), dec!(1)).unwrap_err();
        assert!(matches!(err, AppError::AlreadyPaid(_)));
    }

    #[test]
    fn settled_invoices_accept_no_more_money() {
        // Exactly paid, paid within tolerance, and overpaid all count as
        // satisfied; a partial payment does not.
        assert!(payments_satisfy_total(dec!(1100), dec!(1100), dec!(1)));
        assert!(payments_satisfy_total(dec!(1099.50), dec!(1100), dec!(1)));
        assert!(payments_satisfy_total(dec!(1200), dec!(1100), dec!(1)));
        assert!(!payments_satisfy_total(dec!(1098), dec!(1100), dec!(1)));
        assert!(!payments_satisfy_total(Decimal::ZERO, dec!(1100), dec!(1)));
    }

    #[test]
    fn refresh_is_idempotent_on_unchanged_sums() {
        let first = status_for_payments(dec!(1100), dec!(1100), dec!(1)).unwrap();
        let second = status_for_payments(dec!(1100), dec!(1100), dec!(1)).unwrap();
        assert_eq!(first, second);
    }
}
