//! Ledger store
//!
//! Pledge/payment persistence and the raw aggregation primitives the
//! analytics layer builds on. Aggregates count only successful payments
//! and attribute money to the pledge's creation time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{
    Campaign, LedgerEntry, Page, Payment, PaymentStatus, Pledge, PledgeDetails, PledgeQuery,
    PledgeScope,
};
use crate::error::AppResult;

/// What `successful_totals` groups by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalsGroup {
    Donor,
    Campaign,
}

/// Successful money attributed to one donor or campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityTotal {
    pub id: Uuid,
    /// Donor full name or campaign title
    pub label: String,
    pub total: Decimal,
    pub pledge_count: i64,
}

/// Successful money in one calendar month
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyTotal {
    pub year: i32,
    pub month: u32,
    pub total: Decimal,
    pub pledge_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevenueTotal {
    pub total: Decimal,
    pub pledge_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    /// Pledges with a successful payment
    pub pledge_count: i64,
    /// Distinct donors with a successful payment
    pub donor_count: i64,
    pub approved_campaign_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignTotals {
    pub collected: Decimal,
    pub donor_count: i64,
}

/// Result of a settlement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled(Payment),
    AlreadySettled,
    NotFound,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_campaign(
        &self,
        campaign_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<Campaign>>;

    /// Write a pledge and its payment in one transaction
    async fn insert_pledge(
        &self,
        pledge: &Pledge,
        payment: &Payment,
        cancel: &CancellationToken,
    ) -> AppResult<()>;

    async fn find_pledge(
        &self,
        pledge_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<PledgeDetails>>;

    async fn list_pledges(
        &self,
        scope: PledgeScope,
        query: &PledgeQuery,
        cancel: &CancellationToken,
    ) -> AppResult<Page<PledgeDetails>>;

    /// Move a pending payment to `status`; a no-op for settled payments
    async fn settle_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        settled_at: DateTime<Utc>,
        gateway_reference: Option<String>,
        cancel: &CancellationToken,
    ) -> AppResult<SettleOutcome>;

    /// Every pledge made by `donor_id`
    async fn entries_for_donor(
        &self,
        donor_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<LedgerEntry>>;

    /// Every pledge made to campaigns owned by `owner_id`
    async fn entries_for_owner(
        &self,
        owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<LedgerEntry>>;

    /// Unordered per-entity successful totals
    async fn successful_totals(
        &self,
        group: TotalsGroup,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<EntityTotal>>;

    /// Unordered per-month successful totals
    async fn monthly_successful_totals(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<MonthlyTotal>>;

    /// Successful revenue in `[from, to)`; open bounds when `None`
    async fn successful_revenue(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> AppResult<RevenueTotal>;

    async fn ledger_counts(&self, cancel: &CancellationToken) -> AppResult<LedgerCounts>;

    async fn campaign_totals(
        &self,
        campaign_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<CampaignTotals>;
}
