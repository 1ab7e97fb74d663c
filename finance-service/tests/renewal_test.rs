//! Renewal worker integration tests.
//!
//! The worker scans every renewable tenancy in the database, so these tests
//! run serially to keep their counts stable.
//!
//! Run with: TEST_DATABASE_URL=... cargo test -- --ignored

mod common;

use chrono::{Duration, Utc};
use common::{open_tenancy, spawn_engine};
use finance_service::config::RenewalConfig;
use finance_service::models::InvoiceStatus;
use finance_service::workers::RenewalWorker;
use rust_decimal_macros::dec;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

fn worker_for(app: &common::TestApp) -> RenewalWorker {
    RenewalWorker::new(
        app.db.clone(),
        RenewalConfig {
            interval_secs: 3600,
        },
    )
}

#[tokio::test]
#[ignore]
#[serial]
async fn due_tenancy_gets_exactly_one_successor_invoice() {
    let app = spawn_engine().await;

    // Latest invoice started over a month ago; a 30-day tenancy is due.
    let start = Utc::now() - Duration::days(32);
    let (tenancy, first_invoice) = open_tenancy(&app, dec!(1500), start, true, Some(30)).await;

    let worker = worker_for(&app);
    let token = CancellationToken::new();
    worker.renew_due_invoices(&token).await.unwrap();

    let invoices = app
        .invoices
        .invoices_for_tenancy(tenancy.tenancy_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 2, "one successor invoice is issued");

    let successor = &invoices[0];
    assert_eq!(successor.parsed_status(), InvoiceStatus::Pending);
    assert_eq!(successor.tenant_id, tenancy.tenant_id);
    assert_eq!(successor.period_start, first_invoice.invoice.period_start + chrono::Months::new(1));

    // Items are cloned verbatim as fresh rows.
    let successor_items = app
        .invoices
        .invoice_with_items(successor.invoice_id)
        .await
        .unwrap()
        .unwrap()
        .items;
    assert_eq!(successor_items.len(), 1);
    assert_eq!(successor_items[0].description, "New Tenancy Rent");
    assert_eq!(successor_items[0].amount, dec!(1500));
    assert_ne!(
        successor_items[0].invoice_item_id,
        first_invoice.items[0].invoice_item_id
    );

    // The successor starts with zero payments.
    assert_eq!(app.invoices.remaining(successor).await.unwrap(), dec!(1500));

    // A second pass compares against the successor, which is not yet due.
    worker.renew_due_invoices(&token).await.unwrap();
    let invoices = app
        .invoices
        .invoices_for_tenancy(tenancy.tenancy_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 2, "catch-up scan must not renew twice");
}

#[tokio::test]
#[ignore]
#[serial]
async fn tenancy_not_yet_due_is_left_untouched() {
    let app = spawn_engine().await;

    let start = Utc::now() - Duration::days(5);
    let (tenancy, _) = open_tenancy(&app, dec!(900), start, true, Some(30)).await;

    let worker = worker_for(&app);
    worker
        .renew_due_invoices(&CancellationToken::new())
        .await
        .unwrap();

    let invoices = app
        .invoices
        .invoices_for_tenancy(tenancy.tenancy_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn non_renewable_tenancy_is_never_scanned() {
    let app = spawn_engine().await;

    let start = Utc::now() - Duration::days(90);
    let (tenancy, _) = open_tenancy(&app, dec!(900), start, false, None).await;

    let worker = worker_for(&app);
    worker
        .renew_due_invoices(&CancellationToken::new())
        .await
        .unwrap();

    let invoices = app
        .invoices
        .invoices_for_tenancy(tenancy.tenancy_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn weekly_tenancy_catches_up_one_period_per_pass() {
    let app = spawn_engine().await;

    let start = Utc::now() - Duration::days(15);
    let (tenancy, _) = open_tenancy(&app, dec!(250), start, true, Some(7)).await;

    let worker = worker_for(&app);
    let token = CancellationToken::new();

    // Two periods have elapsed. Each pass only looks at the latest invoice,
    // so catching up takes one pass per missed period; the third pass finds
    // the newest invoice still inside its period and does nothing.
    worker.renew_due_invoices(&token).await.unwrap();
    worker.renew_due_invoices(&token).await.unwrap();
    worker.renew_due_invoices(&token).await.unwrap();

    let invoices = app
        .invoices
        .invoices_for_tenancy(tenancy.tenancy_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 3, "two catch-up renewals, then none");
}

#[tokio::test]
#[ignore]
#[serial]
async fn cancelled_pass_stops_between_tenancies() {
    let app = spawn_engine().await;

    let start = Utc::now() - Duration::days(40);
    let (tenancy, _) = open_tenancy(&app, dec!(600), start, true, Some(30)).await;

    let token = CancellationToken::new();
    token.cancel();

    let worker = worker_for(&app);
    worker.renew_due_invoices(&token).await.unwrap();

    let invoices = app
        .invoices
        .invoices_for_tenancy(tenancy.tenancy_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1, "a cancelled pass renews nothing");
}
