//! Integration tests for pledges and analytics
//!
//! Postgres tests are ignored by default. Run them against a scratch
//! database with `DATABASE_URL=... cargo test -- --ignored --test-threads=1`.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crowdfund_core::domain::{CreatePledgeCommand, PageRequest, PaymentStatus};
use crowdfund_core::ledger::Settlement;
use crowdfund_core::payment::SimulatedPaymentGateway;
use crowdfund_core::store::{PgCredentialStore, PgLedgerStore};
use crowdfund_core::AppError;

mod common;

#[tokio::test]
async fn test_pledges_feed_analytics() {
    let m = common::memory_app(SimulatedPaymentGateway::approving());
    let app = &m.app;

    let owner = app.register("owner@example.com", "Olive Owner").await;
    let ann = app.register("ann@example.com", "Ann").await;
    let bo = app.register("bo@example.com", "Bo").await;
    m.ledger_store.insert_donor(ann.id, &ann.full_name).await;
    m.ledger_store.insert_donor(bo.id, &bo.full_name).await;

    let garden = common::campaign(owner.id, "Rooftop Garden", dec!(100));
    m.ledger_store.insert_campaign(garden.clone()).await;

    for (donor, amount) in [(ann.id, dec!(60)), (bo.id, dec!(30)), (ann.id, dec!(40))] {
        app.ledger
            .create_pledge(
                CreatePledgeCommand::new(donor, garden.id, amount, "pm_card"),
                &app.cancel,
            )
            .await
            .unwrap();
        app.clock.advance(Duration::minutes(5));
    }

    let top = app
        .analytics
        .top_donors(&PageRequest::default(), &app.cancel)
        .await
        .unwrap();
    let ranking: Vec<_> = top.items.iter().map(|t| (t.label.as_str(), t.total)).collect();
    assert_eq!(ranking, vec![("Ann", dec!(100)), ("Bo", dec!(30))]);

    let progress = app
        .analytics
        .campaign_progress(garden.id, &app.cancel)
        .await
        .unwrap();
    assert_eq!(progress.collected, dec!(130));
    assert_eq!(progress.completion_percentage, dec!(100));
    assert_eq!(progress.donor_count, 2);

    let owner_view = app
        .ledger
        .transaction_summary(owner.id, &app.cancel)
        .await
        .unwrap();
    assert_eq!(owner_view.received.total_amount, dec!(130));
    assert_eq!(owner_view.received.pledge_count, 3);

    let by_amount = app
        .ledger
        .list_by_campaign(
            &owner,
            garden.id,
            &PageRequest::new(1, 10).with_sort("amount"),
            &app.cancel,
        )
        .await
        .unwrap();
    let amounts: Vec<_> = by_amount.items.iter().map(|d| d.pledge.amount).collect();
    assert_eq!(amounts, vec![dec!(30), dec!(40), dec!(60)]);
}

#[tokio::test]
async fn test_declined_pledge_excluded_from_totals() {
    let m = common::memory_app(SimulatedPaymentGateway::declining("do not honor"));
    let app = &m.app;
    let owner = Uuid::new_v4();
    let campaign = common::campaign(owner, "Bike Lanes", dec!(500));
    m.ledger_store.insert_campaign(campaign.clone()).await;

    let result = app
        .ledger
        .create_pledge(
            CreatePledgeCommand::new(Uuid::new_v4(), campaign.id, dec!(75), "pm_card"),
            &app.cancel,
        )
        .await;
    let err = result.unwrap_err();
    assert_eq!(err.code(), "Payment.ProcessingFailed");
    assert_eq!(err.status_hint(), 402);

    assert_eq!(m.ledger_store.pledge_count().await, 1);
    let dashboard = app.analytics.dashboard(&app.cancel).await.unwrap();
    assert_eq!(dashboard.total_revenue, dec!(0));
    assert_eq!(dashboard.total_pledges, 0);
}

// =========================================================================
// Postgres
// =========================================================================

fn pg_app(pool: &sqlx::PgPool, gateway: SimulatedPaymentGateway) -> common::App {
    common::App::new(
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(PgLedgerStore::new(pool.clone())),
        gateway,
    )
}

#[tokio::test]
#[ignore]
async fn test_pg_gateway_error_writes_nothing() {
    let pool = common::setup_test_db().await;
    let app = pg_app(&pool, SimulatedPaymentGateway::unavailable());
    let owner = app.register("owner@example.com", "Owner").await;
    let donor = app.register("donor@example.com", "Donor").await;
    let campaign = common::campaign(owner.id, "Library", dec!(1000));
    common::insert_campaign(&pool, &campaign).await;

    let result = app
        .ledger
        .create_pledge(
            CreatePledgeCommand::new(donor.id, campaign.id, dec!(10), "pm_card"),
            &app.cancel,
        )
        .await;

    assert!(matches!(result, Err(AppError::PaymentGatewayUnavailable)));
    assert_eq!(common::count_rows(&pool, "pledges").await, 0);
    assert_eq!(common::count_rows(&pool, "payments").await, 0);
}

#[tokio::test]
#[ignore]
async fn test_pg_create_list_and_aggregate() {
    let pool = common::setup_test_db().await;
    let app = pg_app(&pool, SimulatedPaymentGateway::approving());
    let owner = app.register("owner@example.com", "Owner").await;
    let donor = app.register("donor@example.com", "Dee Donor").await;

    let solar = common::campaign(owner.id, "Solar_Panels 100%", dec!(200));
    let books = common::campaign(owner.id, "School Books", dec!(50));
    common::insert_campaign(&pool, &solar).await;
    common::insert_campaign(&pool, &books).await;

    for (campaign_id, amount) in [(solar.id, dec!(120.50)), (books.id, dec!(20)), (solar.id, dec!(9.99))] {
        app.ledger
            .create_pledge(
                CreatePledgeCommand::new(donor.id, campaign_id, amount, "pm_card"),
                &app.cancel,
            )
            .await
            .unwrap();
        app.clock.advance(Duration::seconds(1));
    }

    // Wildcards in the search term match literally
    let page = app
        .ledger
        .list_by_user(
            donor.id,
            &PageRequest::new(1, 10).with_search("panels 100%"),
            &app.cancel,
        )
        .await
        .unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.items[0].pledge.amount, dec!(9.99));
    assert_eq!(page.items[0].payment.status, PaymentStatus::Success);

    let none = app
        .ledger
        .list_by_user(donor.id, &PageRequest::new(1, 10).with_search("100_"), &app.cancel)
        .await;
    assert!(matches!(none, Err(AppError::NoPledgesFound)));

    let top = app
        .analytics
        .top_campaigns(&PageRequest::default(), &app.cancel)
        .await
        .unwrap();
    assert_eq!(top.items[0].id, solar.id);
    assert_eq!(top.items[0].total, dec!(130.49));

    let trend = app.analytics.monthly_trend(&app.cancel).await.unwrap();
    assert_eq!(trend.len(), 1);
    assert_eq!((trend[0].year, trend[0].month), (2026, 5));
    assert_eq!(trend[0].total, dec!(150.49));

    let dashboard = app.analytics.dashboard(&app.cancel).await.unwrap();
    assert_eq!(dashboard.current_month_revenue, dec!(150.49));
    assert_eq!(dashboard.donor_count, 1);
    assert_eq!(dashboard.approved_campaign_count, 2);
}

#[tokio::test]
#[ignore]
async fn test_pg_settle_pending_payment_once() {
    let pool = common::setup_test_db().await;
    let app = pg_app(&pool, SimulatedPaymentGateway::approving());
    let owner = app.register("owner@example.com", "Owner").await;
    let donor = app.register("donor@example.com", "Donor").await;
    let campaign = common::campaign(owner.id, "Well", dec!(300));
    common::insert_campaign(&pool, &campaign).await;

    let pledge_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO pledges (id, amount, created_at, user_id, campaign_id) VALUES ($1, 15, $2, $3, $4)",
    )
    .bind(pledge_id)
    .bind(common::start_time())
    .bind(donor.id)
    .bind(campaign.id)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO payments (id, pledge_id, status, method) VALUES ($1, $2, 'pending', 'bank')",
    )
    .bind(payment_id)
    .bind(pledge_id)
    .execute(&pool)
    .await
    .unwrap();

    let settled = app
        .ledger
        .record_payment_outcome(
            payment_id,
            Settlement::Succeeded {
                reference: Some("wire-77".to_string()),
            },
            &app.cancel,
        )
        .await
        .unwrap();
    assert_eq!(settled.status, PaymentStatus::Success);
    assert_eq!(settled.paid_at, Some(common::start_time()));

    let again = app
        .ledger
        .record_payment_outcome(payment_id, Settlement::Failed, &app.cancel)
        .await;
    assert!(matches!(again, Err(AppError::PaymentAlreadySettled(_))));

    let missing = app
        .ledger
        .record_payment_outcome(Uuid::new_v4(), Settlement::Failed, &app.cancel)
        .await;
    assert!(matches!(missing, Err(AppError::PaymentNotFound(_))));
}
