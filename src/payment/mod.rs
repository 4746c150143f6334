//! Payment gateway
//!
//! The ledger asks a gateway for an outcome before it persists a pledge.
//! Real processors live behind [`PaymentGateway`]; the crate ships a
//! simulated one for local runs and tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::Amount;

/// What the gateway said about one charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Funds captured
    Success { reference: String },
    /// The processor refused the charge
    Declined { reason: String },
    /// The processor could not be reached or answered garbage
    GatewayError(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, amount: &Amount, payment_method_id: &str) -> ChargeOutcome;
}

/// Behaviour of [`SimulatedPaymentGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedMode {
    Approve,
    Decline(String),
    Unavailable,
}

/// In-process gateway that answers every charge the same way
#[derive(Debug)]
pub struct SimulatedPaymentGateway {
    mode: SimulatedMode,
    charges: AtomicUsize,
}

impl SimulatedPaymentGateway {
    pub fn new(mode: SimulatedMode) -> Self {
        Self {
            mode,
            charges: AtomicUsize::new(0),
        }
    }

    pub fn approving() -> Self {
        Self::new(SimulatedMode::Approve)
    }

    pub fn declining(reason: impl Into<String>) -> Self {
        Self::new(SimulatedMode::Decline(reason.into()))
    }

    pub fn unavailable() -> Self {
        Self::new(SimulatedMode::Unavailable)
    }

    /// Number of charges attempted so far
    pub fn charge_count(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn charge(&self, amount: &Amount, payment_method_id: &str) -> ChargeOutcome {
        self.charges.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            amount = %amount,
            payment_method_id,
            mode = ?self.mode,
            "Simulated charge"
        );

        match &self.mode {
            SimulatedMode::Approve => ChargeOutcome::Success {
                reference: format!("sim_{}", Uuid::new_v4().simple()),
            },
            SimulatedMode::Decline(reason) => ChargeOutcome::Declined {
                reason: reason.clone(),
            },
            SimulatedMode::Unavailable => {
                ChargeOutcome::GatewayError("simulated gateway unavailable".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_modes() {
        let amount = Amount::from_integer(10).unwrap();

        let approve = SimulatedPaymentGateway::approving();
        assert!(matches!(
            approve.charge(&amount, "pm_card").await,
            ChargeOutcome::Success { ref reference } if reference.starts_with("sim_")
        ));

        let decline = SimulatedPaymentGateway::declining("insufficient funds");
        assert_eq!(
            decline.charge(&amount, "pm_card").await,
            ChargeOutcome::Declined {
                reason: "insufficient funds".to_string()
            }
        );

        let down = SimulatedPaymentGateway::unavailable();
        assert!(matches!(
            down.charge(&amount, "pm_card").await,
            ChargeOutcome::GatewayError(_)
        ));
        assert_eq!(down.charge_count(), 1);
    }
}
