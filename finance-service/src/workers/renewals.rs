//! Invoice renewal worker.
//!
//! Runs on its own timer, fully decoupled from request handling, and re-issues
//! invoices for renewable tenancies whose latest billing period has elapsed.
//! The scan is a catch-up: it always compares "now" against the tenancy's
//! latest invoice, so a tenancy renews at most once per due period no matter
//! how often the worker ticks.

use crate::config::RenewalConfig;
use crate::models::{Invoice, InvoiceItem, InvoiceStatus, Tenancy};
use crate::services::metrics::INVOICES_RENEWED_TOTAL;
use crate::services::Database;
use chrono::{DateTime, Datelike, Duration, Months, Utc};
use finance_core::error::AppError;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy)]
pub struct RenewalStats {
    pub scanned: usize,
    pub renewed: usize,
}

#[derive(Clone)]
pub struct RenewalWorker {
    db: Database,
    config: RenewalConfig,
}

/// When the period after `start` begins.
///
/// A 30-day period means "same calendar day next month", which lets month-end
/// start dates clamp naturally (Jan 31 -> Feb 28). A period starting on the
/// 1st whose length matches that month's day count also advances one calendar
/// month. Everything else advances by the literal day count.
pub(crate) fn next_period_start(start: DateTime<Utc>, renewal_days: i32) -> DateTime<Utc> {
    if renewal_days == 30 {
        start + Months::new(1)
    } else if start.day() == 1 {
        if i64::from(renewal_days) == days_in_month(start) {
            start + Months::new(1)
        } else {
            start + Duration::days(i64::from(renewal_days))
        }
    } else {
        start + Duration::days(i64::from(renewal_days))
    }
}

fn days_in_month(date: DateTime<Utc>) -> i64 {
    let first = date
        .date_naive()
        .with_day(1)
        .expect("day 1 exists in every month");
    (first + Months::new(1) - first).num_days()
}

impl RenewalWorker {
    pub fn new(db: Database, config: RenewalConfig) -> Self {
        Self { db, config }
    }

    /// Tick until cancelled. Each pass is independent; a failed pass is
    /// logged and the next tick tries again.
    pub async fn run(self, token: tokio_util::sync::CancellationToken) {
        let period = std::time::Duration::from_secs(self.config.interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.config.interval_secs, "Renewal worker started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Renewal worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.renew_due_invoices(&token).await {
                        error!(error = %e, "Renewal pass failed");
                    }
                }
            }
        }
    }

    /// One scan over all renewable tenancies.
    ///
    /// Each tenancy renews inside its own transaction so one failure cannot
    /// poison the rest of the pass, and the cancellation token is checked
    /// between tenancies so shutdown never waits for a whole batch.
    #[instrument(skip(self, token))]
    pub async fn renew_due_invoices(
        &self,
        token: &tokio_util::sync::CancellationToken,
    ) -> Result<RenewalStats, AppError> {
        let now = Utc::now();

        let tenancies = sqlx::query_as::<_, Tenancy>(
            r#"
            SELECT tenancy_id, tenant_id, property_id, sub_unit_id, assigned_rent, start_date, end_date, is_renewable, renewal_period_days, is_active, evacuation_date, created_utc
            FROM tenancies
            WHERE is_renewable = TRUE AND renewal_period_days IS NOT NULL
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list renewable tenancies: {}", e))
        })?;

        let mut stats = RenewalStats {
            scanned: tenancies.len(),
            ..Default::default()
        };

        for tenancy in &tenancies {
            if token.is_cancelled() {
                warn!("Renewal pass interrupted by shutdown");
                break;
            }

            match self.renew_tenancy(tenancy, now).await {
                Ok(true) => {
                    stats.renewed += 1;
                    INVOICES_RENEWED_TOTAL.with_label_values(&["ok"]).inc();
                }
                Ok(false) => {}
                Err(e) => {
                    INVOICES_RENEWED_TOTAL.with_label_values(&["error"]).inc();
                    warn!(
                        tenancy_id = %tenancy.tenancy_id,
                        error = %e,
                        "Failed to renew tenancy, continuing"
                    );
                }
            }
        }

        info!(
            scanned = stats.scanned,
            renewed = stats.renewed,
            "Renewal pass finished"
        );

        Ok(stats)
    }

    /// Renew one tenancy if its latest invoice's period has elapsed.
    ///
    /// The successor clones the predecessor's items verbatim and starts with
    /// zero payments.
    async fn renew_tenancy(&self, tenancy: &Tenancy, now: DateTime<Utc>) -> Result<bool, AppError> {
        let renewal_days = match tenancy.renewal_period_days {
            Some(days) => days,
            None => return Ok(false),
        };

        let latest = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenancy_id, tenant_id, discount, period_start, due_date, status, notes, created_utc
            FROM invoices
            WHERE tenancy_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(tenancy.tenancy_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load latest invoice: {}", e))
        })?;

        let latest = match latest {
            Some(invoice) => invoice,
            None => return Ok(false),
        };

        let next_start = next_period_start(latest.period_start, renewal_days);
        if now < next_start {
            return Ok(false);
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT invoice_item_id, invoice_id, description, amount, created_utc
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY created_utc, invoice_item_id
            "#,
        )
        .bind(latest.invoice_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice items: {}", e))
        })?;

        let successor_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoices (invoice_id, tenancy_id, tenant_id, period_start, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(successor_id)
        .bind(tenancy.tenancy_id)
        .bind(tenancy.tenant_id)
        .bind(next_start)
        .bind(InvoiceStatus::Pending.as_str())
        .bind(&latest.notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert successor invoice: {}", e))
        })?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (invoice_item_id, invoice_id, description, amount)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(successor_id)
            .bind(&item.description)
            .bind(item.amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clone invoice item: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        info!(
            tenancy_id = %tenancy.tenancy_id,
            predecessor = %latest.invoice_id,
            successor = %successor_id,
            period_start = %next_start,
            "Invoice renewed"
        );

        Ok(true)
    }
}
