//! Postgres ledger store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{
    Campaign, CampaignSnapshot, LedgerEntry, Page, Payment, PaymentStatus, Pledge, PledgeDetails,
    PledgeQuery, PledgeScope, PledgeSort, PledgeSortField,
};
use crate::error::{AppError, AppResult};
use crate::store::{
    cancellable, CampaignTotals, EntityTotal, LedgerCounts, LedgerStore, MonthlyTotal,
    RevenueTotal, SettleOutcome, TotalsGroup,
};

const DETAILS_SELECT: &str = r#"
    SELECT
        p.id, p.amount, p.created_at, p.user_id, p.campaign_id,
        pay.id AS payment_id, pay.status, pay.paid_at, pay.method, pay.gateway_reference,
        c.title, c.goal_amount, c.deadline
    FROM pledges p
    JOIN payments pay ON pay.pledge_id = p.id
    JOIN campaigns c ON c.id = p.campaign_id
"#;

// $1 donor, $2 campaign, $3 search term; NULL disables a filter
const LIST_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR p.user_id = $1)
      AND ($2::uuid IS NULL OR p.campaign_id = $2)
      AND ($3::text IS NULL OR c.title ILIKE '%' || $3 || '%' ESCAPE '\')
"#;

const ENTRY_SELECT: &str = r#"
    SELECT p.id AS pledge_id, p.user_id AS donor_id, p.campaign_id, p.amount, pay.status, p.created_at
    FROM pledges p
    JOIN payments pay ON pay.pledge_id = p.id
"#;

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    title: String,
    goal_amount: Decimal,
    deadline: DateTime<Utc>,
    is_approved: bool,
    owner_id: Uuid,
    category_id: Uuid,
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            goal_amount: row.goal_amount,
            deadline: row.deadline,
            is_approved: row.is_approved,
            owner_id: row.owner_id,
            category_id: row.category_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DetailsRow {
    id: Uuid,
    amount: Decimal,
    created_at: DateTime<Utc>,
    user_id: Uuid,
    campaign_id: Uuid,
    payment_id: Uuid,
    status: String,
    paid_at: Option<DateTime<Utc>>,
    method: String,
    gateway_reference: Option<String>,
    title: String,
    goal_amount: Decimal,
    deadline: DateTime<Utc>,
}

impl TryFrom<DetailsRow> for PledgeDetails {
    type Error = AppError;

    fn try_from(row: DetailsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            payment: Payment {
                id: row.payment_id,
                pledge_id: row.id,
                status: parse_status(&row.status)?,
                paid_at: row.paid_at,
                method: row.method,
                gateway_reference: row.gateway_reference,
            },
            campaign: CampaignSnapshot {
                id: row.campaign_id,
                title: row.title,
                goal_amount: row.goal_amount,
                deadline: row.deadline,
            },
            pledge: Pledge {
                id: row.id,
                amount: row.amount,
                created_at: row.created_at,
                user_id: row.user_id,
                campaign_id: row.campaign_id,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    pledge_id: Uuid,
    donor_id: Uuid,
    campaign_id: Uuid,
    amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            pledge_id: row.pledge_id,
            donor_id: row.donor_id,
            campaign_id: row.campaign_id,
            amount: row.amount,
            status: parse_status(&row.status)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    pledge_id: Uuid,
    status: String,
    paid_at: Option<DateTime<Utc>>,
    method: String,
    gateway_reference: Option<String>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            pledge_id: row.pledge_id,
            status: parse_status(&row.status)?,
            paid_at: row.paid_at,
            method: row.method,
            gateway_reference: row.gateway_reference,
        })
    }
}

fn parse_status(raw: &str) -> AppResult<PaymentStatus> {
    raw.parse().map_err(AppError::Internal)
}

fn order_clause(sort: &PledgeSort) -> &'static str {
    match (sort.field, sort.descending) {
        (PledgeSortField::Amount, false) => "p.amount ASC, p.id ASC",
        (PledgeSortField::Amount, true) => "p.amount DESC, p.id ASC",
        (PledgeSortField::CreatedAt, false) => "p.created_at ASC, p.id ASC",
        (PledgeSortField::CreatedAt, true) => "p.created_at DESC, p.id ASC",
    }
}

/// Escape LIKE wildcards so the term matches literally
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Ledger store backed by the `pledges`, `payments` and `campaigns` tables
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_campaign(&self, campaign_id: Uuid) -> AppResult<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT id, title, goal_amount, deadline, is_approved, owner_id, category_id
            FROM campaigns WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Campaign::from))
    }

    async fn write_pledge(&self, pledge: &Pledge, payment: &Payment) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pledges (id, amount, created_at, user_id, campaign_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(pledge.id)
        .bind(pledge.amount)
        .bind(pledge.created_at)
        .bind(pledge.user_id)
        .bind(pledge.campaign_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO payments (id, pledge_id, status, paid_at, method, gateway_reference)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(payment.id)
        .bind(payment.pledge_id)
        .bind(payment.status.as_str())
        .bind(payment.paid_at)
        .bind(&payment.method)
        .bind(&payment.gateway_reference)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn fetch_pledge(&self, pledge_id: Uuid) -> AppResult<Option<PledgeDetails>> {
        let row = sqlx::query_as::<_, DetailsRow>(&format!("{DETAILS_SELECT} WHERE p.id = $1"))
            .bind(pledge_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PledgeDetails::try_from).transpose()
    }

    async fn fetch_page(
        &self,
        scope: PledgeScope,
        query: &PledgeQuery,
    ) -> AppResult<Page<PledgeDetails>> {
        let (donor, campaign) = match scope {
            PledgeScope::All => (None, None),
            PledgeScope::ByDonor(id) => (Some(id), None),
            PledgeScope::ByCampaign(id) => (None, Some(id)),
        };
        let search = query.page.search_term().map(escape_like);

        let total_count: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*)
            FROM pledges p
            JOIN campaigns c ON c.id = p.campaign_id
            {LIST_FILTER}
            "#
        ))
        .bind(donor)
        .bind(campaign)
        .bind(&search)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, DetailsRow>(&format!(
            "{DETAILS_SELECT} {LIST_FILTER} ORDER BY {} LIMIT $4 OFFSET $5",
            order_clause(&query.sort)
        ))
        .bind(donor)
        .bind(campaign)
        .bind(&search)
        .bind(query.page.limit())
        .bind(query.page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(PledgeDetails::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Page::new(items, total_count, &query.page))
    }

    async fn settle(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        settled_at: DateTime<Utc>,
        gateway_reference: Option<String>,
    ) -> AppResult<SettleOutcome> {
        let updated = sqlx::query_as::<_, PaymentRow>(
            r#"
            UPDATE payments
            SET
                status = $2,
                paid_at = CASE WHEN $2 = 'success' THEN $3 ELSE NULL END,
                gateway_reference = COALESCE($4, gateway_reference)
            WHERE id = $1 AND status = 'pending'
            RETURNING id, pledge_id, status, paid_at, method, gateway_reference
            "#,
        )
        .bind(payment_id)
        .bind(status.as_str())
        .bind(settled_at)
        .bind(gateway_reference)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(SettleOutcome::Settled(Payment::try_from(row)?));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM payments WHERE id = $1)")
                .bind(payment_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(if exists {
            SettleOutcome::AlreadySettled
        } else {
            SettleOutcome::NotFound
        })
    }

    async fn fetch_entries(&self, filter: &str, id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(&format!("{ENTRY_SELECT} {filter}"))
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect()
    }

    async fn fetch_totals(&self, group: TotalsGroup) -> AppResult<Vec<EntityTotal>> {
        let sql = match group {
            TotalsGroup::Donor => {
                r#"
                SELECT u.id, u.full_name AS label, SUM(p.amount) AS total, COUNT(*) AS pledge_count
                FROM pledges p
                JOIN payments pay ON pay.pledge_id = p.id
                JOIN users u ON u.id = p.user_id
                WHERE pay.status = 'success'
                GROUP BY u.id, u.full_name
                "#
            }
            TotalsGroup::Campaign => {
                r#"
                SELECT c.id, c.title AS label, SUM(p.amount) AS total, COUNT(*) AS pledge_count
                FROM pledges p
                JOIN payments pay ON pay.pledge_id = p.id
                JOIN campaigns c ON c.id = p.campaign_id
                WHERE pay.status = 'success'
                GROUP BY c.id, c.title
                "#
            }
        };

        let rows: Vec<(Uuid, String, Decimal, i64)> =
            sqlx::query_as(sql).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(id, label, total, pledge_count)| EntityTotal {
                id,
                label,
                total,
                pledge_count,
            })
            .collect())
    }

    async fn fetch_monthly(&self) -> AppResult<Vec<MonthlyTotal>> {
        let rows: Vec<(i32, i32, Decimal, i64)> = sqlx::query_as(
            r#"
            SELECT
                EXTRACT(YEAR FROM p.created_at AT TIME ZONE 'UTC')::INT AS year,
                EXTRACT(MONTH FROM p.created_at AT TIME ZONE 'UTC')::INT AS month,
                SUM(p.amount) AS total,
                COUNT(*) AS pledge_count
            FROM pledges p
            JOIN payments pay ON pay.pledge_id = p.id
            WHERE pay.status = 'success'
            GROUP BY 1, 2
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(year, month, total, pledge_count)| {
                let month = u32::try_from(month)
                    .map_err(|_| AppError::Internal(format!("invalid month {}", month)))?;
                Ok(MonthlyTotal {
                    year,
                    month,
                    total,
                    pledge_count,
                })
            })
            .collect()
    }

    async fn fetch_revenue(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<RevenueTotal> {
        let (total, pledge_count): (Decimal, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(p.amount), 0), COUNT(*)
            FROM pledges p
            JOIN payments pay ON pay.pledge_id = p.id
            WHERE pay.status = 'success'
              AND ($1::timestamptz IS NULL OR p.created_at >= $1)
              AND ($2::timestamptz IS NULL OR p.created_at < $2)
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(RevenueTotal {
            total,
            pledge_count,
        })
    }

    async fn fetch_counts(&self) -> AppResult<LedgerCounts> {
        let (pledge_count, donor_count, approved_campaign_count): (i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(DISTINCT p.user_id),
                    (SELECT COUNT(*) FROM campaigns WHERE is_approved)
                FROM pledges p
                JOIN payments pay ON pay.pledge_id = p.id
                WHERE pay.status = 'success'
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(LedgerCounts {
            pledge_count,
            donor_count,
            approved_campaign_count,
        })
    }

    async fn fetch_campaign_totals(&self, campaign_id: Uuid) -> AppResult<CampaignTotals> {
        let (collected, donor_count): (Decimal, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(p.amount), 0), COUNT(DISTINCT p.user_id)
            FROM pledges p
            JOIN payments pay ON pay.pledge_id = p.id
            WHERE p.campaign_id = $1 AND pay.status = 'success'
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CampaignTotals {
            collected,
            donor_count,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_campaign(
        &self,
        campaign_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<Campaign>> {
        cancellable(cancel, self.fetch_campaign(campaign_id)).await
    }

    async fn insert_pledge(
        &self,
        pledge: &Pledge,
        payment: &Payment,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        cancellable(cancel, self.write_pledge(pledge, payment)).await
    }

    async fn find_pledge(
        &self,
        pledge_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Option<PledgeDetails>> {
        cancellable(cancel, self.fetch_pledge(pledge_id)).await
    }

    async fn list_pledges(
        &self,
        scope: PledgeScope,
        query: &PledgeQuery,
        cancel: &CancellationToken,
    ) -> AppResult<Page<PledgeDetails>> {
        cancellable(cancel, self.fetch_page(scope, query)).await
    }

    async fn settle_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        settled_at: DateTime<Utc>,
        gateway_reference: Option<String>,
        cancel: &CancellationToken,
    ) -> AppResult<SettleOutcome> {
        cancellable(
            cancel,
            self.settle(payment_id, status, settled_at, gateway_reference),
        )
        .await
    }

    async fn entries_for_donor(
        &self,
        donor_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<LedgerEntry>> {
        cancellable(cancel, self.fetch_entries("WHERE p.user_id = $1", donor_id)).await
    }

    async fn entries_for_owner(
        &self,
        owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<LedgerEntry>> {
        cancellable(
            cancel,
            self.fetch_entries(
                "JOIN campaigns c ON c.id = p.campaign_id WHERE c.owner_id = $1",
                owner_id,
            ),
        )
        .await
    }

    async fn successful_totals(
        &self,
        group: TotalsGroup,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<EntityTotal>> {
        cancellable(cancel, self.fetch_totals(group)).await
    }

    async fn monthly_successful_totals(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<MonthlyTotal>> {
        cancellable(cancel, self.fetch_monthly()).await
    }

    async fn successful_revenue(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> AppResult<RevenueTotal> {
        cancellable(cancel, self.fetch_revenue(from, to)).await
    }

    async fn ledger_counts(&self, cancel: &CancellationToken) -> AppResult<LedgerCounts> {
        cancellable(cancel, self.fetch_counts()).await
    }

    async fn campaign_totals(
        &self,
        campaign_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<CampaignTotals> {
        cancellable(cancel, self.fetch_campaign_totals(campaign_id)).await
    }
}
