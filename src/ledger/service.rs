//! Pledge Ledger Service
//!
//! Creates pledges together with their payment outcome and reads pledge
//! history back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{
    Amount, CreatePledgeCommand, FlowSummary, Page, PageRequest, Payment, PaymentStatus, Pledge,
    PledgeDetails, PledgeQuery, PledgeScope, TransactionSummary, User,
};
use crate::error::{AppError, AppResult};
use crate::payment::{ChargeOutcome, PaymentGateway};
use crate::store::{LedgerStore, SettleOutcome};

/// Final state reported by a gateway callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Succeeded { reference: Option<String> },
    Failed,
}

pub struct PledgeLedger {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl PledgeLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Charge the donor and record the pledge with its payment.
    ///
    /// A declined charge is still recorded, with a failed payment, and then
    /// reported as `PaymentProcessingFailed`. A gateway fault records nothing.
    ///
    /// `cancel` is honoured up to the charge. The charge itself is not raced
    /// against it: once the gateway has answered, the pledge is written and
    /// the outcome returned even if the caller cancelled meanwhile, so a
    /// captured charge always has a ledger row.
    pub async fn create_pledge(
        &self,
        command: CreatePledgeCommand,
        cancel: &CancellationToken,
    ) -> AppResult<PledgeDetails> {
        let amount = Amount::new(command.amount)?;

        let campaign = self
            .store
            .find_campaign(command.campaign_id, cancel)
            .await?
            .filter(|c| c.is_approved)
            .ok_or(AppError::CampaignNotFound(command.campaign_id))?;

        let now = self.clock.now();
        if !campaign.is_open(now) {
            return Err(AppError::CampaignDeadlinePassed(campaign.id));
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let (status, gateway_reference, decline_reason) = match self
            .gateway
            .charge(&amount, &command.payment_method_id)
            .await
        {
            ChargeOutcome::Success { reference } => (PaymentStatus::Success, Some(reference), None),
            ChargeOutcome::Declined { reason } => (PaymentStatus::Failed, None, Some(reason)),
            ChargeOutcome::GatewayError(detail) => {
                tracing::warn!(
                    user_id = %command.user_id,
                    campaign_id = %campaign.id,
                    error = %detail,
                    "Payment gateway unavailable"
                );
                return Err(AppError::PaymentGatewayUnavailable);
            }
        };

        let pledge = Pledge {
            id: Uuid::new_v4(),
            amount: amount.value(),
            created_at: now,
            user_id: command.user_id,
            campaign_id: campaign.id,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            pledge_id: pledge.id,
            status,
            paid_at: (status == PaymentStatus::Success).then_some(now),
            method: command.payment_method_id,
            gateway_reference,
        };

        // The charge already happened, so the record is written even if the
        // caller has gone away.
        self.store
            .insert_pledge(&pledge, &payment, &CancellationToken::new())
            .await?;

        if let Some(reason) = decline_reason {
            tracing::info!(
                pledge_id = %pledge.id,
                user_id = %pledge.user_id,
                campaign_id = %pledge.campaign_id,
                reason = %reason,
                "Pledge payment declined"
            );
            return Err(AppError::PaymentProcessingFailed {
                pledge_id: pledge.id,
            });
        }

        tracing::info!(
            pledge_id = %pledge.id,
            user_id = %pledge.user_id,
            campaign_id = %pledge.campaign_id,
            amount = %amount,
            "Pledge created"
        );

        Ok(PledgeDetails {
            pledge,
            payment,
            campaign: campaign.snapshot(),
        })
    }

    /// Apply a gateway callback to a pending payment. Settles at most once.
    pub async fn record_payment_outcome(
        &self,
        payment_id: Uuid,
        settlement: Settlement,
        cancel: &CancellationToken,
    ) -> AppResult<Payment> {
        let (status, reference) = match settlement {
            Settlement::Succeeded { reference } => (PaymentStatus::Success, reference),
            Settlement::Failed => (PaymentStatus::Failed, None),
        };

        let outcome = self
            .store
            .settle_payment(payment_id, status, self.clock.now(), reference, cancel)
            .await?;

        match outcome {
            SettleOutcome::Settled(payment) => {
                tracing::info!(
                    payment_id = %payment.id,
                    pledge_id = %payment.pledge_id,
                    status = %payment.status,
                    "Payment settled"
                );
                Ok(payment)
            }
            SettleOutcome::AlreadySettled => Err(AppError::PaymentAlreadySettled(payment_id)),
            SettleOutcome::NotFound => Err(AppError::PaymentNotFound(payment_id)),
        }
    }

    // =========================================================================
    // Read
    // =========================================================================

    pub async fn get_pledge(
        &self,
        pledge_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<PledgeDetails> {
        self.store
            .find_pledge(pledge_id, cancel)
            .await?
            .ok_or(AppError::PledgeNotFound(pledge_id))
    }

    /// Pledges made by `user_id`
    pub async fn list_by_user(
        &self,
        user_id: Uuid,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Page<PledgeDetails>> {
        self.list(PledgeScope::ByDonor(user_id), request, cancel).await
    }

    /// Pledges made to one campaign. Only its owner or an admin may look.
    pub async fn list_by_campaign(
        &self,
        requester: &User,
        campaign_id: Uuid,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Page<PledgeDetails>> {
        let campaign = self
            .store
            .find_campaign(campaign_id, cancel)
            .await?
            .ok_or(AppError::CampaignNotFound(campaign_id))?;

        if campaign.owner_id != requester.id && !requester.is_admin() {
            tracing::warn!(
                user_id = %requester.id,
                campaign_id = %campaign_id,
                "Campaign pledge list denied"
            );
            return Err(AppError::UnauthorizedCampaignAccess);
        }

        self.list(PledgeScope::ByCampaign(campaign_id), request, cancel)
            .await
    }

    pub async fn list_all(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Page<PledgeDetails>> {
        self.list(PledgeScope::All, request, cancel).await
    }

    /// What `user_id` gave as a donor and received as a campaign owner
    pub async fn transaction_summary(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<TransactionSummary> {
        let given = self.store.entries_for_donor(user_id, cancel).await?;
        let received = self.store.entries_for_owner(user_id, cancel).await?;

        Ok(TransactionSummary {
            user_id,
            given: FlowSummary::fold(&given),
            received: FlowSummary::fold(&received),
        })
    }

    async fn list(
        &self,
        scope: PledgeScope,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> AppResult<Page<PledgeDetails>> {
        let query = PledgeQuery::from_request(request)?;
        let page = self.store.list_pledges(scope, &query, cancel).await?;

        if page.is_empty() {
            return Err(AppError::NoPledgesFound);
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{Campaign, ROLE_ADMIN, ROLE_USER};
    use crate::payment::SimulatedPaymentGateway;
    use crate::store::MemoryLedgerStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        gateway: Arc<SimulatedPaymentGateway>,
        clock: Arc<ManualClock>,
        ledger: PledgeLedger,
        campaign: Campaign,
        cancel: CancellationToken,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
    }

    async fn fixture(gateway: SimulatedPaymentGateway) -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let gateway = Arc::new(gateway);
        let clock = Arc::new(ManualClock::new(start()));
        let campaign = Campaign {
            id: Uuid::new_v4(),
            title: "Community Garden".to_string(),
            goal_amount: dec!(1000),
            deadline: start() + Duration::days(30),
            is_approved: true,
            owner_id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
        };
        store.insert_campaign(campaign.clone()).await;

        Fixture {
            ledger: PledgeLedger::new(store.clone(), gateway.clone(), clock.clone()),
            store,
            gateway,
            clock,
            campaign,
            cancel: CancellationToken::new(),
        }
    }

    fn user(id: Uuid, roles: &[&str]) -> User {
        User {
            id,
            email: "someone@example.com".to_string(),
            full_name: "Someone".to_string(),
            is_active: true,
            roles: roles.iter().map(|r| r.to_string()).collect::<BTreeSet<_>>(),
            created_at: start(),
        }
    }

    fn command(f: &Fixture, donor: Uuid, amount: Decimal) -> CreatePledgeCommand {
        CreatePledgeCommand::new(donor, f.campaign.id, amount, "pm_card_visa")
    }

    /// Approves the charge, cancelling the request while it is in flight
    struct CancelDuringCharge {
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl PaymentGateway for CancelDuringCharge {
        async fn charge(&self, _amount: &Amount, _payment_method_id: &str) -> ChargeOutcome {
            self.cancel.cancel();
            ChargeOutcome::Success {
                reference: "ch_in_flight".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_during_charge_still_records_pledge() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        let cancel = CancellationToken::new();
        let ledger = PledgeLedger::new(
            f.store.clone(),
            Arc::new(CancelDuringCharge {
                cancel: cancel.clone(),
            }),
            f.clock.clone(),
        );

        let details = ledger
            .create_pledge(command(&f, Uuid::new_v4(), dec!(42)), &cancel)
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(details.payment.status, PaymentStatus::Success);
        assert_eq!(details.payment.gateway_reference.as_deref(), Some("ch_in_flight"));
        assert_eq!(f.store.pledge_count().await, 1);
        assert_eq!(f.store.payment_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_pledge_success() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        let donor = Uuid::new_v4();

        let details = f
            .ledger
            .create_pledge(command(&f, donor, dec!(25.00)), &f.cancel)
            .await
            .unwrap();

        assert_eq!(details.pledge.amount, dec!(25.00));
        assert_eq!(details.payment.status, PaymentStatus::Success);
        assert_eq!(details.payment.paid_at, Some(start()));
        assert!(details.payment.gateway_reference.is_some());
        assert_eq!(details.campaign.title, "Community Garden");
        assert_eq!(f.store.pledge_count().await, 1);
    }

    #[tokio::test]
    async fn test_negative_amount_has_no_side_effects() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;

        let result = f
            .ledger
            .create_pledge(command(&f, Uuid::new_v4(), dec!(-5)), &f.cancel)
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), "Pledge.InvalidAmount");
        assert_eq!(f.gateway.charge_count(), 0);
        assert_eq!(f.store.pledge_count().await, 0);
        assert_eq!(f.store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_gateway_error_persists_nothing() {
        let f = fixture(SimulatedPaymentGateway::unavailable()).await;

        let result = f
            .ledger
            .create_pledge(command(&f, Uuid::new_v4(), dec!(10)), &f.cancel)
            .await;

        assert!(matches!(result, Err(AppError::PaymentGatewayUnavailable)));
        assert_eq!(f.store.pledge_count().await, 0);
        assert_eq!(f.store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_decline_records_failed_payment() {
        let f = fixture(SimulatedPaymentGateway::declining("card expired")).await;

        let result = f
            .ledger
            .create_pledge(command(&f, Uuid::new_v4(), dec!(10)), &f.cancel)
            .await;

        let Err(AppError::PaymentProcessingFailed { pledge_id }) = result else {
            panic!("expected PaymentProcessingFailed");
        };
        let stored = f.ledger.get_pledge(pledge_id, &f.cancel).await.unwrap();
        assert_eq!(stored.payment.status, PaymentStatus::Failed);
        assert_eq!(stored.payment.paid_at, None);
    }

    #[tokio::test]
    async fn test_unapproved_or_missing_campaign() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        let hidden = Campaign {
            id: Uuid::new_v4(),
            is_approved: false,
            ..f.campaign.clone()
        };
        f.store.insert_campaign(hidden.clone()).await;

        for campaign_id in [hidden.id, Uuid::new_v4()] {
            let cmd = CreatePledgeCommand::new(Uuid::new_v4(), campaign_id, dec!(5), "pm");
            let result = f.ledger.create_pledge(cmd, &f.cancel).await;
            assert!(matches!(result, Err(AppError::CampaignNotFound(id)) if id == campaign_id));
        }
        assert_eq!(f.gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_passed() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        f.clock.advance(Duration::days(30));

        let result = f
            .ledger
            .create_pledge(command(&f, Uuid::new_v4(), dec!(5)), &f.cancel)
            .await;
        assert!(matches!(result, Err(AppError::CampaignDeadlinePassed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_charge() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = f
            .ledger
            .create_pledge(command(&f, Uuid::new_v4(), dec!(5)), &cancel)
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(f.gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn test_list_by_user_and_empty() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        let donor = Uuid::new_v4();
        for amount in [dec!(5), dec!(15), dec!(10)] {
            f.ledger
                .create_pledge(command(&f, donor, amount), &f.cancel)
                .await
                .unwrap();
            f.clock.advance(Duration::minutes(1));
        }

        let page = f
            .ledger
            .list_by_user(donor, &PageRequest::new(1, 2), &f.cancel)
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        // Newest first by default
        let amounts: Vec<_> = page.items.iter().map(|d| d.pledge.amount).collect();
        assert_eq!(amounts, vec![dec!(10), dec!(15)]);

        let none = f
            .ledger
            .list_by_user(Uuid::new_v4(), &PageRequest::default(), &f.cancel)
            .await;
        assert!(matches!(none, Err(AppError::NoPledgesFound)));
    }

    #[tokio::test]
    async fn test_list_rejects_bad_pagination() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;

        let result = f
            .ledger
            .list_all(&PageRequest::new(1, 500), &f.cancel)
            .await;
        assert_eq!(result.unwrap_err().code(), "Request.InvalidPagination");

        let result = f
            .ledger
            .list_all(&PageRequest::default().with_sort("title"), &f.cancel)
            .await;
        assert_eq!(result.unwrap_err().code(), "Request.InvalidPagination");
    }

    #[tokio::test]
    async fn test_list_by_campaign_access() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        f.ledger
            .create_pledge(command(&f, Uuid::new_v4(), dec!(5)), &f.cancel)
            .await
            .unwrap();
        let request = PageRequest::default();

        let owner = user(f.campaign.owner_id, &[ROLE_USER]);
        let admin = user(Uuid::new_v4(), &[ROLE_USER, ROLE_ADMIN]);
        let stranger = user(Uuid::new_v4(), &[ROLE_USER]);

        assert!(f
            .ledger
            .list_by_campaign(&owner, f.campaign.id, &request, &f.cancel)
            .await
            .is_ok());
        assert!(f
            .ledger
            .list_by_campaign(&admin, f.campaign.id, &request, &f.cancel)
            .await
            .is_ok());
        let denied = f
            .ledger
            .list_by_campaign(&stranger, f.campaign.id, &request, &f.cancel)
            .await;
        assert!(matches!(denied, Err(AppError::UnauthorizedCampaignAccess)));
    }

    #[tokio::test]
    async fn test_transaction_summary_given_and_received() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        let owner = f.campaign.owner_id;
        let donor = Uuid::new_v4();

        f.ledger
            .create_pledge(command(&f, donor, dec!(40)), &f.cancel)
            .await
            .unwrap();
        f.clock.advance(Duration::hours(1));
        f.ledger
            .create_pledge(command(&f, donor, dec!(2.50)), &f.cancel)
            .await
            .unwrap();

        let donor_view = f.ledger.transaction_summary(donor, &f.cancel).await.unwrap();
        assert_eq!(donor_view.given.total_amount, dec!(42.50));
        assert_eq!(donor_view.given.pledge_count, 2);
        assert_eq!(
            donor_view.given.last_pledge_at,
            Some(start() + Duration::hours(1))
        );
        assert_eq!(donor_view.received.pledge_count, 0);

        let owner_view = f.ledger.transaction_summary(owner, &f.cancel).await.unwrap();
        assert_eq!(owner_view.received.total_amount, dec!(42.50));
        assert_eq!(owner_view.given, FlowSummary::default());
    }

    #[tokio::test]
    async fn test_record_payment_outcome_once() {
        let f = fixture(SimulatedPaymentGateway::approving()).await;
        let pledge = Pledge {
            id: Uuid::new_v4(),
            amount: dec!(20),
            created_at: start(),
            user_id: Uuid::new_v4(),
            campaign_id: f.campaign.id,
        };
        let pending = Payment {
            id: Uuid::new_v4(),
            pledge_id: pledge.id,
            status: PaymentStatus::Pending,
            paid_at: None,
            method: "bank_transfer".to_string(),
            gateway_reference: None,
        };
        f.store
            .insert_pledge(&pledge, &pending, &f.cancel)
            .await
            .unwrap();

        let settled = f
            .ledger
            .record_payment_outcome(
                pending.id,
                Settlement::Succeeded {
                    reference: Some("bt_123".to_string()),
                },
                &f.cancel,
            )
            .await
            .unwrap();
        assert_eq!(settled.status, PaymentStatus::Success);
        assert_eq!(settled.gateway_reference.as_deref(), Some("bt_123"));

        let again = f
            .ledger
            .record_payment_outcome(pending.id, Settlement::Failed, &f.cancel)
            .await;
        assert!(matches!(again, Err(AppError::PaymentAlreadySettled(_))));

        let missing = f
            .ledger
            .record_payment_outcome(Uuid::new_v4(), Settlement::Failed, &f.cancel)
            .await;
        assert!(matches!(missing, Err(AppError::PaymentNotFound(_))));
    }
}
