//! Pledges and payments
//!
//! Ledger records plus the query types used to read them back.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::page::{PageError, PageRequest};

/// Settlement state of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// A donor's commitment to one campaign. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pledge {
    pub id: Uuid,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub campaign_id: Uuid,
}

/// Settlement outcome, 1:1 with a pledge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub pledge_id: Uuid,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub method: String,
    pub gateway_reference: Option<String>,
}

/// Campaign fields this crate reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    pub goal_amount: Decimal,
    pub deadline: DateTime<Utc>,
    pub is_approved: bool,
    pub owner_id: Uuid,
    pub category_id: Uuid,
}

impl Campaign {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.deadline
    }

    pub fn snapshot(&self) -> CampaignSnapshot {
        CampaignSnapshot {
            id: self.id,
            title: self.title.clone(),
            goal_amount: self.goal_amount,
            deadline: self.deadline,
        }
    }
}

/// Campaign summary nested in pledge responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignSnapshot {
    pub id: Uuid,
    pub title: String,
    pub goal_amount: Decimal,
    pub deadline: DateTime<Utc>,
}

/// A pledge with its payment and campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PledgeDetails {
    pub pledge: Pledge,
    pub payment: Payment,
    pub campaign: CampaignSnapshot,
}

/// Input for creating a pledge
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePledgeCommand {
    pub user_id: Uuid,
    pub campaign_id: Uuid,
    pub amount: Decimal,
    pub payment_method_id: String,
}

impl CreatePledgeCommand {
    pub fn new(
        user_id: Uuid,
        campaign_id: Uuid,
        amount: Decimal,
        payment_method_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            campaign_id,
            amount,
            payment_method_id: payment_method_id.into(),
        }
    }
}

/// Flattened ledger row used by reductions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub pledge_id: Uuid,
    pub donor_id: Uuid,
    pub campaign_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

// =========================================================================
// Queries
// =========================================================================

/// Which pledges a list operation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PledgeScope {
    All,
    ByDonor(Uuid),
    ByCampaign(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PledgeSortField {
    Amount,
    CreatedAt,
}

/// Sort order for pledge lists; ties are always broken by pledge id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PledgeSort {
    pub field: PledgeSortField,
    pub descending: bool,
}

impl Default for PledgeSort {
    fn default() -> Self {
        Self {
            field: PledgeSortField::CreatedAt,
            descending: true,
        }
    }
}

impl PledgeSort {
    /// Parse `amount`, `created_at`, optionally prefixed with `-`
    pub fn parse(key: Option<&str>) -> Result<Self, PageError> {
        let Some(raw) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(Self::default());
        };

        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let field = match name {
            "amount" => PledgeSortField::Amount,
            "created_at" | "date" => PledgeSortField::CreatedAt,
            _ => return Err(PageError::UnknownSortKey(raw.to_string())),
        };

        Ok(Self { field, descending })
    }
}

/// A validated pledge list request
#[derive(Debug, Clone)]
pub struct PledgeQuery {
    pub page: PageRequest,
    pub sort: PledgeSort,
}

impl PledgeQuery {
    pub fn from_request(request: &PageRequest) -> Result<Self, PageError> {
        request.validate()?;
        Ok(Self {
            page: request.clone(),
            sort: PledgeSort::parse(request.sort.as_deref())?,
        })
    }
}

// =========================================================================
// Transaction summary
// =========================================================================

/// Totals for one direction of money flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    pub total_amount: Decimal,
    pub pledge_count: i64,
    pub last_pledge_at: Option<DateTime<Utc>>,
}

impl FlowSummary {
    /// Fold successful entries. Failed and pending payments move none of
    /// the figures: not the total, the count or the last pledge time.
    pub fn fold<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        entries
            .into_iter()
            .filter(|e| e.status == PaymentStatus::Success)
            .fold(Self::default(), |mut acc, entry| {
                acc.total_amount += entry.amount;
                acc.pledge_count += 1;
                acc.last_pledge_at = acc.last_pledge_at.max(Some(entry.created_at));
                acc
            })
    }
}

/// What a user gave as donor and received as campaign owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub user_id: Uuid,
    pub given: FlowSummary,
    pub received: FlowSummary,
}
