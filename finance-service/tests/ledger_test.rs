//! Ledger integration tests: transfers, balance application and the
//! balance-reconciles-to-history invariant.
//!
//! Run with: TEST_DATABASE_URL=... cargo test -- --ignored

mod common;

use common::{create_user_account, fund_account, spawn_engine};
use finance_core::error::AppError;
use finance_service::models::{RecordExpense, RecordTransfer, TransactionKind};
use rust_decimal_macros::dec;

#[tokio::test]
#[ignore]
async fn transfer_moves_funds_between_accounts() {
    let app = spawn_engine().await;

    let caretaker = create_user_account(&app, "Caretaker").await;
    fund_account(&app, &caretaker, dec!(1000)).await;

    let transaction = app
        .payments
        .record_transfer(&RecordTransfer {
            source_account_id: caretaker.account_id,
            destination_account_id: app.config.ledger.main_account_id,
            amount: dec!(400),
        })
        .await
        .expect("transfer should succeed");

    assert_eq!(transaction.kind, TransactionKind::Transfer);
    assert_eq!(transaction.source_account_id, Some(caretaker.account_id));
    assert_eq!(
        transaction.destination_account_id,
        Some(app.config.ledger.main_account_id)
    );

    let source = app
        .db
        .get_account(caretaker.account_id)
        .await
        .unwrap()
        .unwrap();
    let main = app
        .db
        .get_account(app.config.ledger.main_account_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.balance, dec!(600));
    assert_eq!(main.balance, dec!(400));
}

#[tokio::test]
#[ignore]
async fn transfer_without_funds_is_rejected_with_no_side_effects() {
    let app = spawn_engine().await;

    let empty = create_user_account(&app, "Empty").await;

    let result = app
        .payments
        .record_transfer(&RecordTransfer {
            source_account_id: empty.account_id,
            destination_account_id: app.config.ledger.main_account_id,
            amount: dec!(100),
        })
        .await;

    assert!(matches!(result, Err(AppError::InsufficientFunds(_))));

    let account = app.db.get_account(empty.account_id).await.unwrap().unwrap();
    assert_eq!(account.balance, dec!(0));

    let history = app
        .ledger
        .transactions_for_account(empty.account_id, 10)
        .await
        .unwrap();
    assert!(history.is_empty(), "rolled-back transfer must leave no ledger row");
}

#[tokio::test]
#[ignore]
async fn non_positive_transfer_amount_is_a_bad_request() {
    let app = spawn_engine().await;

    let account = create_user_account(&app, "Zero").await;
    let result = app
        .payments
        .record_transfer(&RecordTransfer {
            source_account_id: account.account_id,
            destination_account_id: app.config.ledger.main_account_id,
            amount: dec!(0),
        })
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
#[ignore]
async fn balances_reconcile_to_ledger_history_after_mixed_traffic() {
    let app = spawn_engine().await;

    let worker = create_user_account(&app, "Worker").await;
    fund_account(&app, &worker, dec!(2000)).await;

    app.payments
        .record_transfer(&RecordTransfer {
            source_account_id: worker.account_id,
            destination_account_id: app.config.ledger.main_account_id,
            amount: dec!(250),
        })
        .await
        .unwrap();

    app.payments
        .record_expense(&RecordExpense {
            property_id: None,
            paying_user_id: worker.user_id.unwrap(),
            category: "Maintenance".to_string(),
            description: Some("Pump repair".to_string()),
            amount: dec!(300),
        })
        .await
        .unwrap();

    for account_id in [worker.account_id, app.config.ledger.main_account_id] {
        let account = app.db.get_account(account_id).await.unwrap().unwrap();
        let replayed = app.db.ledger_balance(account_id).await.unwrap();
        assert_eq!(
            account.balance, replayed,
            "cached balance must equal the ledger replay for {}",
            account_id
        );
    }

    let worker_account = app.db.get_account(worker.account_id).await.unwrap().unwrap();
    assert_eq!(worker_account.balance, dec!(1450));
}
