use anyhow::{Context, Result};
use dotenvy::dotenv;
use finance_core::config::Config as CommonConfig;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use std::env;
use uuid::Uuid;

/// Well-known account ids used when the environment does not override them.
/// These match the ids the production database was seeded with.
const DEFAULT_MAIN_ACCOUNT_ID: &str = "7e174c5d-3756-4f9d-87b3-8f5e59f7f69e";
const DEFAULT_GATEWAY_ACCOUNT_ID: &str = "d24bde15-7ab2-46e9-9852-d99b51bc5e19";
const DEFAULT_GATEWAY_USER_ID: &str = "a83de33a-5bcc-43f1-8350-342159576e31";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub common: CommonConfig,
    pub service_name: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub renewal: RenewalConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Knobs for the ledger and the invoice engine.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Currency label stamped on every transaction. Amounts are never
    /// converted; the label only travels with the row.
    pub currency: String,
    /// Margin used when comparing monetary sums. The ledger historically ran
    /// on floating-point amounts and callers still round to whole currency
    /// units, so settlement checks accept anything within this distance.
    pub tolerance: Decimal,
    /// The fixed "Main" account receiving bank transfers.
    pub main_account_id: Uuid,
    /// The fixed account receiving payment-gateway settlements.
    pub gateway_account_id: Uuid,
    /// The user the gateway's payments are recorded under.
    pub gateway_user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenewalConfig {
    /// Seconds between renewal scans.
    pub interval_secs: u64,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let port = env::var("FINANCE_SERVICE_PORT")
            .unwrap_or_else(|_| "8086".to_string())
            .parse()
            .context("FINANCE_SERVICE_PORT must be a port number")?;

        let db_url = env::var("FINANCE_DATABASE_URL").context("FINANCE_DATABASE_URL must be set")?;
        let max_connections = env::var("FINANCE_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("FINANCE_DATABASE_MAX_CONNECTIONS must be a number")?;
        let min_connections = env::var("FINANCE_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("FINANCE_DATABASE_MIN_CONNECTIONS must be a number")?;

        let currency = env::var("FINANCE_CURRENCY").unwrap_or_else(|_| "AED".to_string());
        let tolerance = env::var("FINANCE_LEDGER_TOLERANCE")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<Decimal>()
            .context("FINANCE_LEDGER_TOLERANCE must be a decimal amount")?;

        let main_account_id = parse_uuid_env("FINANCE_MAIN_ACCOUNT_ID", DEFAULT_MAIN_ACCOUNT_ID)?;
        let gateway_account_id =
            parse_uuid_env("FINANCE_GATEWAY_ACCOUNT_ID", DEFAULT_GATEWAY_ACCOUNT_ID)?;
        let gateway_user_id = parse_uuid_env("FINANCE_GATEWAY_USER_ID", DEFAULT_GATEWAY_USER_ID)?;

        let interval_secs = env::var("FINANCE_RENEWAL_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("FINANCE_RENEWAL_INTERVAL_SECS must be a number of seconds")?;

        Ok(Self {
            common: CommonConfig { port },
            service_name: "finance-service".to_string(),
            log_level: env::var("FINANCE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            ledger: LedgerConfig {
                currency,
                tolerance,
                main_account_id,
                gateway_account_id,
                gateway_user_id,
            },
            renewal: RenewalConfig { interval_secs },
        })
    }
}

fn parse_uuid_env(var: &str, default: &str) -> Result<Uuid> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    Uuid::parse_str(&raw).with_context(|| format!("{} must be a UUID", var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_account_ids_parse() {
        assert!(Uuid::parse_str(DEFAULT_MAIN_ACCOUNT_ID).is_ok());
        assert!(Uuid::parse_str(DEFAULT_GATEWAY_ACCOUNT_ID).is_ok());
        assert!(Uuid::parse_str(DEFAULT_GATEWAY_USER_ID).is_ok());
    }

    #[test]
    fn fallback_uuid_is_used_when_env_is_absent() {
        let parsed = parse_uuid_env(
            "FINANCE_TEST_UNSET_ACCOUNT_ID",
            DEFAULT_MAIN_ACCOUNT_ID,
        )
        .expect("default parses");
        assert_eq!(parsed.to_string(), DEFAULT_MAIN_ACCOUNT_ID);
    }
}
