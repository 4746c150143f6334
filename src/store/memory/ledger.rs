use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ensure_live;
use crate::domain::{
    Campaign, LedgerEntry, Page, Payment, PaymentStatus, Pledge, PledgeDetails, PledgeQuery,
    PledgeScope, PledgeSortField,
};
use crate::error::{AppError, AppResult};
use crate::store::{
    CampaignTotals, EntityTotal, LedgerCounts, LedgerStore, MonthlyTotal, RevenueTotal,
    SettleOutcome, TotalsGroup,
};

#[derive(Debug, Default)]
struct State {
    campaigns: HashMap<Uuid, Campaign>,
    donor_names: HashMap<Uuid, String>,
    pledges: HashMap<Uuid, Pledge>,
    /// Keyed by pledge id
    payments: HashMap<Uuid, Payment>,
}

impl State {
    fn details(&self, pledge: &Pledge) -> AppResult<PledgeDetails> {
        let payment = self.payments.get(&pledge.id).ok_or_else(|| {
            AppError::Internal(format!("Pledge {} has no payment", pledge.id))
        })?;
        let campaign = self.campaigns.get(&pledge.campaign_id).ok_or_else(|| {
            AppError::Internal(format!("Pledge {} has no campaign", pledge.id))
        })?;

        Ok(PledgeDetails {
            pledge: pledge.clone(),
            payment: payment.clone(),
            campaign: campaign.snapshot(),
        })
    }

    fn entry(&self, pledge: &Pledge) -> Option<LedgerEntry> {
        self.payments.get(&pledge.id).map(|payment| LedgerEntry {
            pledge_id: pledge.id,
            donor_id: pledge.user_id,
            campaign_id: pledge.campaign_id,
            amount: pledge.amount,
            status: payment.status,
            created_at: pledge.created_at,
        })
    }

    /// Pledges whose payment succeeded
    fn successful(&self) -> impl Iterator<Item = &Pledge> {
        self.pledges.values().filter(|p| {
            self.payments
                .get(&p.id)
                .is_some_and(|pay| pay.status == PaymentStatus::Success)
        })
    }
}

/// Ledger store held in process memory
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: Mutex<State>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        self.state
            .lock()
            .await
            .campaigns
            .insert(campaign.id, campaign);
    }

    /// Name reported for `donor_id` in donor rankings. Donors never
    /// registered here rank under their id.
    pub async fn insert_donor(&self, donor_id: Uuid, full_name: impl Into<String>) {
        self.state
            .lock()
            .await
            .donor_names
            .insert(donor_id, full_name.into());
    }

    pub async fn pledge_count(&self) -> usize {
        self.state.lock().await.pledges.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.payments.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_campaign(
        &self,
        campaign_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<Campaign>> {
        ensure_live(cancel)?;
        Ok(self.state.lock().await.campaigns.get(&campaign_id).cloned())
    }

    async fn insert_pledge(
        &self,
        pledge: &Pledge,
        payment: &Payment,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;

        if !state.campaigns.contains_key(&pledge.campaign_id) {
            return Err(AppError::CampaignNotFound(pledge.campaign_id));
        }
        if payment.pledge_id != pledge.id {
            return Err(AppError::Internal(
                "Payment does not belong to pledge".to_string(),
            ));
        }
        if state.pledges.contains_key(&pledge.id) || state.payments.contains_key(&pledge.id) {
            return Err(AppError::Internal(format!(
                "Pledge {} already exists",
                pledge.id
            )));
        }

        state.pledges.insert(pledge.id, pledge.clone());
        state.payments.insert(pledge.id, payment.clone());
        Ok(())
    }

    async fn find_pledge(
        &self,
        pledge_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<PledgeDetails>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;
        state
            .pledges
            .get(&pledge_id)
            .map(|p| state.details(p))
            .transpose()
    }

    async fn list_pledges(
        &self,
        scope: PledgeScope,
        query: &PledgeQuery,
        cancel: &CancellationToken,
    ) -> AppResult<Page<PledgeDetails>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;
        let search = query.page.search_term().map(str::to_lowercase);

        let mut matching = state
            .pledges
            .values()
            .filter(|p| match scope {
                PledgeScope::All => true,
                PledgeScope::ByDonor(id) => p.user_id == id,
                PledgeScope::ByCampaign(id) => p.campaign_id == id,
            })
            .map(|p| state.details(p))
            .collect::<AppResult<Vec<_>>>()?;

        if let Some(term) = &search {
            matching.retain(|d| d.campaign.title.to_lowercase().contains(term.as_str()));
        }

        let sort = query.sort;
        matching.sort_by(|a, b| {
            let primary = match sort.field {
                PledgeSortField::Amount => a.pledge.amount.cmp(&b.pledge.amount),
                PledgeSortField::CreatedAt => a.pledge.created_at.cmp(&b.pledge.created_at),
            };
            let primary = if sort.descending {
                primary.reverse()
            } else {
                primary
            };
            primary.then_with(|| a.pledge.id.cmp(&b.pledge.id))
        });

        Ok(Page::from_sorted(matching, &query.page))
    }

    async fn settle_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        settled_at: DateTime<Utc>,
        gateway_reference: Option<String>,
        cancel: &CancellationToken,
    ) -> AppResult<SettleOutcome> {
        ensure_live(cancel)?;
        let mut state = self.state.lock().await;

        let Some(payment) = state.payments.values_mut().find(|p| p.id == payment_id) else {
            return Ok(SettleOutcome::NotFound);
        };
        if payment.status.is_settled() {
            return Ok(SettleOutcome::AlreadySettled);
        }

        payment.status = status;
        payment.paid_at = (status == PaymentStatus::Success).then_some(settled_at);
        if gateway_reference.is_some() {
            payment.gateway_reference = gateway_reference;
        }

        Ok(SettleOutcome::Settled(payment.clone()))
    }

    async fn entries_for_donor(
        &self,
        donor_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<LedgerEntry>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;
        Ok(state
            .pledges
            .values()
            .filter(|p| p.user_id == donor_id)
            .filter_map(|p| state.entry(p))
            .collect())
    }

    async fn entries_for_owner(
        &self,
        owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<LedgerEntry>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;
        Ok(state
            .pledges
            .values()
            .filter(|p| {
                state
                    .campaigns
                    .get(&p.campaign_id)
                    .is_some_and(|c| c.owner_id == owner_id)
            })
            .filter_map(|p| state.entry(p))
            .collect())
    }

    async fn successful_totals(
        &self,
        group: TotalsGroup,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<EntityTotal>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;

        let mut totals: HashMap<Uuid, EntityTotal> = HashMap::new();
        for pledge in state.successful() {
            let (id, label) = match group {
                TotalsGroup::Donor => (
                    pledge.user_id,
                    Some(
                        state
                            .donor_names
                            .get(&pledge.user_id)
                            .cloned()
                            .unwrap_or_else(|| pledge.user_id.to_string()),
                    ),
                ),
                TotalsGroup::Campaign => (
                    pledge.campaign_id,
                    state.campaigns.get(&pledge.campaign_id).map(|c| c.title.clone()),
                ),
            };
            let total = totals.entry(id).or_insert_with(|| EntityTotal {
                id,
                label: label.unwrap_or_default(),
                total: Decimal::ZERO,
                pledge_count: 0,
            });
            total.total += pledge.amount;
            total.pledge_count += 1;
        }

        Ok(totals.into_values().collect())
    }

    async fn monthly_successful_totals(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<MonthlyTotal>> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;

        let mut months: HashMap<(i32, u32), MonthlyTotal> = HashMap::new();
        for pledge in state.successful() {
            let key = (pledge.created_at.year(), pledge.created_at.month());
            let month = months.entry(key).or_insert_with(|| MonthlyTotal {
                year: key.0,
                month: key.1,
                total: Decimal::ZERO,
                pledge_count: 0,
            });
            month.total += pledge.amount;
            month.pledge_count += 1;
        }

        Ok(months.into_values().collect())
    }

    async fn successful_revenue(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> AppResult<RevenueTotal> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;

        Ok(state
            .successful()
            .filter(|p| from.map_or(true, |from| p.created_at >= from))
            .filter(|p| to.map_or(true, |to| p.created_at < to))
            .fold(RevenueTotal::default(), |mut acc, p| {
                acc.total += p.amount;
                acc.pledge_count += 1;
                acc
            }))
    }

    async fn ledger_counts(&self, cancel: &CancellationToken) -> AppResult<LedgerCounts> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;

        let mut donors: Vec<Uuid> = state.successful().map(|p| p.user_id).collect();
        let pledge_count = donors.len() as i64;
        donors.sort_unstable();
        donors.dedup();

        Ok(LedgerCounts {
            pledge_count,
            donor_count: donors.len() as i64,
            approved_campaign_count: state.campaigns.values().filter(|c| c.is_approved).count()
                as i64,
        })
    }

    async fn campaign_totals(
        &self,
        campaign_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<CampaignTotals> {
        ensure_live(cancel)?;
        let state = self.state.lock().await;

        let mut donors = Vec::new();
        let mut collected = Decimal::ZERO;
        for pledge in state.successful().filter(|p| p.campaign_id == campaign_id) {
            collected += pledge.amount;
            donors.push(pledge.user_id);
        }
        donors.sort_unstable();
        donors.dedup();

        Ok(CampaignTotals {
            collected,
            donor_count: donors.len() as i64,
        })
    }
}
