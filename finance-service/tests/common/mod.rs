//! Common test utilities for finance-service integration tests.
//!
//! These tests need a disposable PostgreSQL; point TEST_DATABASE_URL at one
//! and run with `cargo test -- --ignored`.

use chrono::{DateTime, Utc};
use finance_core::config::Config as CommonConfig;
use finance_service::config::{DatabaseConfig, EngineConfig, LedgerConfig, RenewalConfig};
use finance_service::models::{
    CreateAccount, CreateInvoice, CreateInvoiceItem, CreateTenancyWithInvoice, InvoiceWithItems,
    MonetaryAccount, PaymentMethod, RecordRentPayment, Tenancy,
};
use finance_service::services::{
    Database, GatewayService, InvoiceService, LedgerService, PaymentService, ReportingService,
};
use rust_decimal::Decimal;
use secrecy::Secret;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,finance_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub db: Database,
    pub ledger: LedgerService,
    pub invoices: InvoiceService,
    pub payments: PaymentService,
    pub reporting: ReportingService,
    pub gateway: GatewayService,
    pub config: EngineConfig,
}

/// Stand up the engine against the test database.
///
/// Every app gets its own Main/Gateway account ids so concurrently running
/// tests never share singleton balances.
pub async fn spawn_engine() -> TestApp {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set - these tests need a disposable PostgreSQL");

    let config = EngineConfig {
        common: CommonConfig { port: 0 },
        service_name: "finance-service-test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: Secret::new(database_url.clone()),
            max_connections: 5,
            min_connections: 1,
        },
        ledger: LedgerConfig {
            currency: "AED".to_string(),
            tolerance: Decimal::ONE,
            main_account_id: Uuid::new_v4(),
            gateway_account_id: Uuid::new_v4(),
            gateway_user_id: Uuid::new_v4(),
        },
        renewal: RenewalConfig {
            interval_secs: 3600,
        },
    };

    let db = Database::new(&database_url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db.ensure_system_accounts(&config.ledger)
        .await
        .expect("Failed to create system accounts");

    let ledger = LedgerService::new(db.clone(), config.ledger.clone());
    let invoices = InvoiceService::new(db.clone(), config.ledger.clone());
    let payments = PaymentService::new(
        db.clone(),
        ledger.clone(),
        invoices.clone(),
        config.ledger.clone(),
    );
    let reporting = ReportingService::new(db.clone(), invoices.clone());
    let gateway = GatewayService::new(
        db.clone(),
        invoices.clone(),
        payments.clone(),
        config.ledger.clone(),
    );

    TestApp {
        db,
        ledger,
        invoices,
        payments,
        reporting,
        gateway,
        config,
    }
}

/// Create an account owned by a fresh user; returns the account.
pub async fn create_user_account(app: &TestApp, name: &str) -> MonetaryAccount {
    app.db
        .create_account(&CreateAccount {
            account_name: name.to_string(),
            user_id: Some(Uuid::new_v4()),
        })
        .await
        .expect("Failed to create account")
}

/// Open a tenancy with its first invoice.
pub async fn open_tenancy(
    app: &TestApp,
    rent: Decimal,
    start_date: DateTime<Utc>,
    is_renewable: bool,
    renewal_period_days: Option<i32>,
) -> (Tenancy, InvoiceWithItems) {
    app.invoices
        .create_tenancy_with_invoice(&CreateTenancyWithInvoice {
            tenant_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            sub_unit_id: None,
            assigned_rent: rent,
            start_date,
            end_date: None,
            is_renewable,
            renewal_period_days,
            discount: None,
            due_date: None,
        })
        .await
        .expect("Failed to open tenancy")
}

/// Create an additional invoice under an existing tenancy.
pub async fn create_invoice_for(
    app: &TestApp,
    tenancy: &Tenancy,
    items: &[(&str, Decimal)],
    discount: Option<Decimal>,
) -> InvoiceWithItems {
    app.invoices
        .create_invoice(&CreateInvoice {
            tenancy_id: tenancy.tenancy_id,
            tenant_id: tenancy.tenant_id,
            discount,
            period_start: None,
            due_date: None,
            notes: None,
            items: items
                .iter()
                .map(|(description, amount)| CreateInvoiceItem {
                    description: description.to_string(),
                    amount: *amount,
                })
                .collect(),
        })
        .await
        .expect("Failed to create invoice")
}

/// Put money into a user's account by recording a cash rent payment against
/// a scratch invoice. Balances only ever move through the ledger, so tests
/// fund accounts the same way production does.
pub async fn fund_account(app: &TestApp, account: &MonetaryAccount, amount: Decimal) {
    let user_id = account.user_id.expect("funded account must have an owner");
    let (tenancy, _) = open_tenancy(app, amount, Utc::now(), false, None).await;
    let invoice = create_invoice_for(app, &tenancy, &[("Funding", amount)], None).await;

    app.payments
        .record_rent_payment(
            user_id,
            &RecordRentPayment {
                tenant_id: tenancy.tenant_id,
                invoice_id: invoice.invoice.invoice_id,
                amount,
                payment_method: PaymentMethod::Cash,
            },
        )
        .await
        .expect("Failed to fund account");
}
