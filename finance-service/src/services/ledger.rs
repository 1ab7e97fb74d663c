//! Account ledger: appends transactions and applies their balance effect.

use crate::config::LedgerConfig;
use crate::models::{RecordTransfer, Transaction, TransactionKind};
use crate::services::metrics::{DB_QUERY_DURATION, TRANSACTIONS_TOTAL};
use crate::services::Database;
use chrono::Utc;
use finance_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction as DbTransaction};
use tracing::{info, instrument};
use uuid::Uuid;

/// Moves money between accounts inside a caller-owned unit of work.
///
/// The transaction log is the source of truth; cached account balances are
/// only ever updated in the same database transaction as the ledger row they
/// reflect, so the two can never drift apart on a crash.
#[derive(Clone)]
pub struct LedgerService {
    db: Database,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(db: Database, config: LedgerConfig) -> Self {
        Self { db, config }
    }

    /// Append a ledger row inside the given unit of work.
    pub(crate) async fn insert_transaction(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        kind: TransactionKind,
        source_account_id: Option<Uuid>,
        destination_account_id: Option<Uuid>,
        amount: Decimal,
    ) -> Result<Transaction, AppError> {
        let transaction = Transaction {
            transaction_id: Uuid::new_v4(),
            kind,
            source_account_id,
            destination_account_id,
            amount,
            currency: self.config.currency.clone(),
            created_utc: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO transactions
                (transaction_id, transaction_type, reference_id, source_account_id, destination_account_id, amount, currency, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transaction.transaction_id)
        .bind(transaction.kind.type_str())
        .bind(transaction.kind.reference_id())
        .bind(transaction.source_account_id)
        .bind(transaction.destination_account_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(anyhow::anyhow!("Transaction references an unknown account"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to insert transaction: {}", e)),
        })?;

        Ok(transaction)
    }

    /// Apply a transaction's effect to the accounts it touches.
    ///
    /// Must run in the same unit of work that inserted the transaction row.
    /// The touched rows are locked `FOR UPDATE` in ascending-id order, so two
    /// units racing over the same accounts serialize instead of both reading
    /// a stale balance. Fails with `InsufficientFunds` when the source would
    /// drop below zero beyond the configured tolerance; on any failure the
    /// caller's rollback discards the transaction row and both balances
    /// together.
    pub(crate) async fn apply_transaction(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        transaction: &Transaction,
    ) -> Result<(), AppError> {
        if transaction.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Transaction amount must be positive"
            )));
        }
        if transaction.source_account_id.is_none() && transaction.destination_account_id.is_none()
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Transaction must touch at least one account"
            )));
        }

        let mut lock_order: Vec<Uuid> = transaction
            .source_account_id
            .iter()
            .chain(transaction.destination_account_id.iter())
            .copied()
            .collect();
        lock_order.sort();
        lock_order.dedup();

        for account_id in &lock_order {
            let balance: Option<Decimal> = sqlx::query_scalar(
                "SELECT balance FROM monetary_accounts WHERE account_id = $1 FOR UPDATE",
            )
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to lock account: {}", e))
            })?;

            let balance = balance.ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id))
            })?;

            if Some(*account_id) == transaction.source_account_id
                && balance < transaction.amount - self.config.tolerance
            {
                return Err(AppError::InsufficientFunds(anyhow::anyhow!(
                    "Insufficient balance in source account {}",
                    account_id
                )));
            }
        }

        if let Some(source) = transaction.source_account_id {
            sqlx::query("UPDATE monetary_accounts SET balance = balance - $2 WHERE account_id = $1")
                .bind(source)
                .bind(transaction.amount)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to debit account: {}", e))
                })?;
        }

        if let Some(destination) = transaction.destination_account_id {
            sqlx::query("UPDATE monetary_accounts SET balance = balance + $2 WHERE account_id = $1")
                .bind(destination)
                .bind(transaction.amount)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to credit account: {}", e))
                })?;
        }

        Ok(())
    }

    /// Move money between two named accounts as one atomic unit.
    ///
    /// Used for caretaker deposits into the Main account.
    #[instrument(skip(self, input), fields(source = %input.source_account_id, destination = %input.destination_account_id))]
    pub async fn record_transfer(&self, input: &RecordTransfer) -> Result<Transaction, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_transfer"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let transaction = self
            .insert_transaction(
                &mut tx,
                TransactionKind::Transfer,
                Some(input.source_account_id),
                Some(input.destination_account_id),
                input.amount,
            )
            .await?;

        if let Err(e) = self.apply_transaction(&mut tx, &transaction).await {
            TRANSACTIONS_TOTAL
                .with_label_values(&["transfer", "error"])
                .inc();
            return Err(e);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSACTIONS_TOTAL
            .with_label_values(&["transfer", "ok"])
            .inc();

        info!(
            transaction_id = %transaction.transaction_id,
            amount = %transaction.amount,
            "Transfer recorded"
        );

        Ok(transaction)
    }

    /// Ledger history touching an account, newest first.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn transactions_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transactions_for_account"])
            .start_timer();

        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, transaction_type, reference_id, source_account_id, destination_account_id, amount, currency, created_utc
            FROM transactions
            WHERE source_account_id = $1 OR destination_account_id = $1
            ORDER BY created_utc DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e))
        })?;

        timer.observe_duration();

        Ok(transactions)
    }
}
