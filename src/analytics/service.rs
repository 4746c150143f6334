//! Analytics Aggregator
//!
//! Read-only statistics over the ledger. Every figure counts successful
//! payments only and dates money by when the pledge was made. Results are
//! point-in-time snapshots; nothing here takes a lock across queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::metrics::{
    completion_percentage, growth_percentage, month_bounds, rank_totals, sort_months,
};
use crate::clock::Clock;
use crate::domain::{Page, PageRequest};
use crate::error::{AppError, AppResult};
use crate::store::{EntityTotal, LedgerStore, MonthlyTotal, TotalsGroup};

/// Platform-wide figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub total_revenue: Decimal,
    pub current_month_revenue: Decimal,
    pub previous_month_revenue: Decimal,
    pub revenue_growth_percentage: Decimal,
    pub total_pledges: i64,
    pub current_month_pledges: i64,
    pub previous_month_pledges: i64,
    pub pledge_growth_percentage: Decimal,
    pub donor_count: i64,
    pub approved_campaign_count: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignProgress {
    pub campaign_id: Uuid,
    pub title: String,
    pub goal_amount: Decimal,
    pub collected: Decimal,
    pub donor_count: i64,
    pub completion_percentage: Decimal,
}

pub struct AnalyticsAggregator {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn dashboard(&self, cancel: &CancellationToken) -> AppResult<Dashboard> {
        let now = self.clock.now();
        let (previous_start, current_start) = month_bounds(now)?;

        let (all_time, current, previous, counts) = tokio::try_join!(
            self.store.successful_revenue(None, None, cancel),
            self.store.successful_revenue(Some(current_start), None, cancel),
            self.store
                .successful_revenue(Some(previous_start), Some(current_start), cancel),
            self.store.ledger_counts(cancel),
        )?;

        let dashboard = Dashboard {
            total_revenue: all_time.total,
            current_month_revenue: current.total,
            previous_month_revenue: previous.total,
            revenue_growth_percentage: growth_percentage(current.total, previous.total),
            total_pledges: counts.pledge_count,
            current_month_pledges: current.pledge_count,
            previous_month_pledges: previous.pledge_count,
            pledge_growth_percentage: growth_percentage(
                Decimal::from(current.pledge_count),
                Decimal::from(previous.pledge_count),
            ),
            donor_count: counts.donor_count,
            approved_campaign_count: counts.approved_campaign_count,
            generated_at: now,
        };

        tracing::debug!(
            total_revenue = %dashboard.total_revenue,
            revenue_growth = %dashboard.revenue_growth_percentage,
            "Dashboard computed"
        );

        Ok(dashboard)
    }

    /// Donors ranked by successful total
    pub async fn top_donors(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Page<EntityTotal>> {
        self.ranked(TotalsGroup::Donor, request, cancel).await
    }

    /// Campaigns ranked by successful total
    pub async fn top_campaigns(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Page<EntityTotal>> {
        self.ranked(TotalsGroup::Campaign, request, cancel).await
    }

    /// One row per month that has successful pledges, oldest first
    pub async fn monthly_trend(&self, cancel: &CancellationToken) -> AppResult<Vec<MonthlyTotal>> {
        let months = self.store.monthly_successful_totals(cancel).await?;
        Ok(sort_months(months))
    }

    pub async fn campaign_progress(
        &self,
        campaign_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<CampaignProgress> {
        let campaign = self
            .store
            .find_campaign(campaign_id, cancel)
            .await?
            .ok_or(AppError::CampaignNotFound(campaign_id))?;
        let totals = self.store.campaign_totals(campaign_id, cancel).await?;

        Ok(CampaignProgress {
            campaign_id,
            completion_percentage: completion_percentage(totals.collected, campaign.goal_amount),
            title: campaign.title,
            goal_amount: campaign.goal_amount,
            collected: totals.collected,
            donor_count: totals.donor_count,
        })
    }

    async fn ranked(
        &self,
        group: TotalsGroup,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Page<EntityTotal>> {
        request.validate()?;

        let mut totals = self.store.successful_totals(group, cancel).await?;
        if let Some(term) = request.search_term().map(str::to_lowercase) {
            totals.retain(|t| t.label.to_lowercase().contains(&term));
        }

        Ok(Page::from_sorted(rank_totals(totals), request))
    }
}
