//! Gateway collaborator integration tests: checkout sessions and the
//! completed-notification flow.
//!
//! Run with: TEST_DATABASE_URL=... cargo test -- --ignored

mod common;

use chrono::Utc;
use common::{create_invoice_for, open_tenancy, spawn_engine};
use finance_core::error::AppError;
use finance_service::models::{CreatePaymentSession, InvoiceStatus, SessionStatus};
use finance_service::services::CheckoutOutcome;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn completed_checkout_settles_every_invoice_in_the_session() {
    let app = spawn_engine().await;

    let (tenancy, _) = open_tenancy(&app, dec!(500), Utc::now(), false, None).await;
    let first = create_invoice_for(&app, &tenancy, &[("Rent", dec!(500))], None).await;
    let second = create_invoice_for(&app, &tenancy, &[("Utilities", dec!(300))], None).await;

    let session = app
        .gateway
        .create_session(&CreatePaymentSession {
            session_ref: format!("cs_{}", Uuid::new_v4().simple()),
            tenant_id: tenancy.tenant_id,
            invoice_ids: vec![first.invoice.invoice_id, second.invoice.invoice_id],
        })
        .await
        .expect("session should be created");

    assert_eq!(session.total_amount, dec!(800));
    assert_eq!(session.parsed_status(), SessionStatus::Pending);

    let outcome = app
        .gateway
        .checkout_completed(&session.session_ref)
        .await
        .expect("completion should succeed");
    assert_eq!(outcome, CheckoutOutcome::Completed { payments: 2 });

    for invoice_id in [first.invoice.invoice_id, second.invoice.invoice_id] {
        let invoice = app.invoices.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.parsed_status(), InvoiceStatus::Paid);
    }

    let gateway_account = app
        .db
        .get_account(app.config.ledger.gateway_account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gateway_account.balance, dec!(800));

    let completed = app
        .gateway
        .get_session(&session.session_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.parsed_status(), SessionStatus::Completed);
    assert!(completed.completed_utc.is_some());
}

#[tokio::test]
#[ignore]
async fn repeated_completion_notification_is_skipped() {
    let app = spawn_engine().await;

    let (tenancy, _) = open_tenancy(&app, dec!(400), Utc::now(), false, None).await;
    let invoice = create_invoice_for(&app, &tenancy, &[("Rent", dec!(400))], None).await;

    let session = app
        .gateway
        .create_session(&CreatePaymentSession {
            session_ref: format!("cs_{}", Uuid::new_v4().simple()),
            tenant_id: tenancy.tenant_id,
            invoice_ids: vec![invoice.invoice.invoice_id],
        })
        .await
        .unwrap();

    app.gateway
        .checkout_completed(&session.session_ref)
        .await
        .unwrap();

    let outcome = app
        .gateway
        .checkout_completed(&session.session_ref)
        .await
        .expect("replayed notification is not an error");
    assert_eq!(outcome, CheckoutOutcome::AlreadyCompleted);

    // No double payment happened.
    let gateway_account = app
        .db
        .get_account(app.config.ledger.gateway_account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gateway_account.balance, dec!(400));
}

#[tokio::test]
#[ignore]
async fn unknown_session_is_not_found() {
    let app = spawn_engine().await;

    let result = app.gateway.checkout_completed("cs_missing").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
#[ignore]
async fn duplicate_session_ref_is_a_conflict() {
    let app = spawn_engine().await;

    let (tenancy, _) = open_tenancy(&app, dec!(200), Utc::now(), false, None).await;
    let invoice = create_invoice_for(&app, &tenancy, &[("Rent", dec!(200))], None).await;

    let input = CreatePaymentSession {
        session_ref: format!("cs_{}", Uuid::new_v4().simple()),
        tenant_id: tenancy.tenant_id,
        invoice_ids: vec![invoice.invoice.invoice_id],
    };

    app.gateway.create_session(&input).await.unwrap();
    let duplicate = app.gateway.create_session(&input).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));
}
