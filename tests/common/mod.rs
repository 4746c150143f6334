//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crowdfund_core::clock::ManualClock;
use crowdfund_core::config::AuthSettings;
use crowdfund_core::domain::{AuthTokens, Campaign, RegisterRequest, User};
use crowdfund_core::payment::SimulatedPaymentGateway;
use crowdfund_core::store::{
    CredentialStore, LedgerStore, MemoryCredentialStore, MemoryLedgerStore,
};
use crowdfund_core::{AnalyticsAggregator, AuthSessionManager, PledgeLedger};

pub const SECRET: &str = "integration-test-secret-at-least-32-bytes";
pub const PASSWORD: &str = "Corr3ct-Horse-Battery";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 20, 9, 30, 0).unwrap()
}

/// Every component wired against the given stores
pub struct App {
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<SimulatedPaymentGateway>,
    pub sessions: Arc<AuthSessionManager>,
    pub ledger: Arc<PledgeLedger>,
    pub analytics: Arc<AnalyticsAggregator>,
    pub cancel: CancellationToken,
}

impl App {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        ledger_store: Arc<dyn LedgerStore>,
        gateway: SimulatedPaymentGateway,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let gateway = Arc::new(gateway);

        let sessions = AuthSessionManager::new(
            credentials,
            AuthSettings::with_secret(SECRET),
            clock.clone(),
        )
        .expect("Failed to build session manager");

        Self {
            sessions: Arc::new(sessions),
            ledger: Arc::new(PledgeLedger::new(
                ledger_store.clone(),
                gateway.clone(),
                clock.clone(),
            )),
            analytics: Arc::new(AnalyticsAggregator::new(ledger_store, clock.clone())),
            clock,
            gateway,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn register(&self, email: &str, full_name: &str) -> User {
        self.sessions
            .register(
                RegisterRequest {
                    email: email.to_string(),
                    full_name: full_name.to_string(),
                    password: PASSWORD.to_string(),
                },
                &self.cancel,
            )
            .await
            .expect("Failed to register user")
    }

    pub async fn login(&self, email: &str) -> AuthTokens {
        self.sessions
            .login(email, PASSWORD, &self.cancel)
            .await
            .expect("Failed to log in")
    }
}

/// Memory-backed app plus direct handles on its stores
pub struct MemoryApp {
    pub app: App,
    pub credentials: Arc<MemoryCredentialStore>,
    pub ledger_store: Arc<MemoryLedgerStore>,
}

pub fn memory_app(gateway: SimulatedPaymentGateway) -> MemoryApp {
    let credentials = Arc::new(MemoryCredentialStore::new());
    let ledger_store = Arc::new(MemoryLedgerStore::new());
    MemoryApp {
        app: App::new(credentials.clone(), ledger_store.clone(), gateway),
        credentials,
        ledger_store,
    }
}

pub fn campaign(owner_id: Uuid, title: &str, goal: Decimal) -> Campaign {
    Campaign {
        id: Uuid::new_v4(),
        title: title.to_string(),
        goal_amount: goal,
        deadline: start_time() + Duration::days(45),
        is_approved: true,
        owner_id,
        category_id: Uuid::new_v4(),
    }
}

// =========================================================================
// Postgres
// =========================================================================

/// Setup test database - apply the schema and truncate all tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    pool.execute(include_str!("../../migrations/0001_init.sql"))
        .await
        .expect("Failed to apply schema");

    sqlx::query("TRUNCATE TABLE payments, pledges, campaigns, refresh_tokens, users CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}

pub async fn insert_campaign(pool: &PgPool, campaign: &Campaign) {
    sqlx::query(
        r#"
        INSERT INTO campaigns (id, title, goal_amount, deadline, is_approved, owner_id, category_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(campaign.id)
    .bind(&campaign.title)
    .bind(campaign.goal_amount)
    .bind(campaign.deadline)
    .bind(campaign.is_approved)
    .bind(campaign.owner_id)
    .bind(campaign.category_id)
    .execute(pool)
    .await
    .expect("Failed to seed campaign");
}

pub async fn count_rows(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("Failed to count rows")
}
