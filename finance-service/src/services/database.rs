//! Database service: connection pool, migrations and the account store.

use crate::config::LedgerConfig;
use crate::models::{CreateAccount, MonetaryAccount};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::Utc;
use finance_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "finance-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Account Operations
    // -------------------------------------------------------------------------

    /// Create the fixed Main and Gateway accounts if they do not exist yet.
    ///
    /// Runs at startup; the ids come from configuration so every deployment
    /// agrees on where bank transfers and gateway settlements land.
    #[instrument(skip(self, config))]
    pub async fn ensure_system_accounts(&self, config: &LedgerConfig) -> Result<(), AppError> {
        let system_accounts = [
            (config.main_account_id, "Main", None),
            (
                config.gateway_account_id,
                "Gateway",
                Some(config.gateway_user_id),
            ),
        ];

        for (account_id, name, user_id) in system_accounts {
            let inserted = sqlx::query(
                r#"
                INSERT INTO monetary_accounts (account_id, account_name, user_id, balance)
                VALUES ($1, $2, $3, 0)
                ON CONFLICT (account_id) DO NOTHING
                "#,
            )
            .bind(account_id)
            .bind(name)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to ensure system account '{}': {}",
                    name,
                    e
                ))
            })?;

            if inserted.rows_affected() > 0 {
                info!(account_id = %account_id, name = name, "System account created");
            }
        }

        Ok(())
    }

    /// Create a new account.
    #[instrument(skip(self, input), fields(account_name = %input.account_name))]
    pub async fn create_account(&self, input: &CreateAccount) -> Result<MonetaryAccount, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account_id = Uuid::new_v4();
        let account = sqlx::query_as::<_, MonetaryAccount>(
            r#"
            INSERT INTO monetary_accounts (account_id, account_name, user_id, balance)
            VALUES ($1, $2, $3, 0)
            RETURNING account_id, account_name, user_id, balance, is_closed, closed_utc, created_utc
            "#,
        )
        .bind(account_id)
        .bind(&input.account_name)
        .bind(input.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "An account already exists for user {:?}",
                    input.user_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)),
        })?;

        timer.observe_duration();

        info!(account_id = %account.account_id, "Account created");

        Ok(account)
    }

    /// Get an account by ID.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<MonetaryAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, MonetaryAccount>(
            r#"
            SELECT account_id, account_name, user_id, balance, is_closed, closed_utc, created_utc
            FROM monetary_accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(account)
    }

    /// Get the account owned by a user, if any.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn account_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<MonetaryAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["account_for_user"])
            .start_timer();

        let account = sqlx::query_as::<_, MonetaryAccount>(
            r#"
            SELECT account_id, account_name, user_id, balance, is_closed, closed_utc, created_utc
            FROM monetary_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get account for user: {}", e))
        })?;

        timer.observe_duration();

        Ok(account)
    }

    /// List accounts with keyset pagination.
    #[instrument(skip(self))]
    pub async fn list_accounts(
        &self,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<Vec<MonetaryAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let limit = page_size.clamp(1, 100) as i64;

        let accounts = if let Some(cursor) = page_token {
            sqlx::query_as::<_, MonetaryAccount>(
                r#"
                SELECT account_id, account_name, user_id, balance, is_closed, closed_utc, created_utc
                FROM monetary_accounts
                WHERE account_id > $1
                ORDER BY account_id
                LIMIT $2
                "#,
            )
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, MonetaryAccount>(
                r#"
                SELECT account_id, account_name, user_id, balance, is_closed, closed_utc, created_utc
                FROM monetary_accounts
                ORDER BY account_id
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list accounts: {}", e)))?;

        timer.observe_duration();

        Ok(accounts)
    }

    /// Mark an account closed. Closed accounts keep their history; rows are
    /// never deleted.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn close_account(&self, account_id: Uuid) -> Result<MonetaryAccount, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["close_account"])
            .start_timer();

        let account = sqlx::query_as::<_, MonetaryAccount>(
            r#"
            UPDATE monetary_accounts
            SET is_closed = TRUE, closed_utc = $2
            WHERE account_id = $1
            RETURNING account_id, account_name, user_id, balance, is_closed, closed_utc, created_utc
            "#,
        )
        .bind(account_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to close account: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id)))?;

        timer.observe_duration();

        info!(account_id = %account.account_id, "Account closed");

        Ok(account)
    }

    /// Recompute an account's balance straight from ledger history.
    ///
    /// `balance == SUM(credits) - SUM(debits)` must hold at all times; this is
    /// the reconciliation side of that invariant.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn ledger_balance(&self, account_id: Uuid) -> Result<Decimal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ledger_balance"])
            .start_timer();

        let balance: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(
                SUM(
                    CASE WHEN destination_account_id = $1 THEN amount ELSE 0 END
                  - CASE WHEN source_account_id = $1 THEN amount ELSE 0 END
                ),
                0
            )
            FROM transactions
            WHERE destination_account_id = $1 OR source_account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to compute ledger balance: {}", e))
        })?;

        timer.observe_duration();

        Ok(balance.unwrap_or(Decimal::ZERO))
    }
}
