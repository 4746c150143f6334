//! Persistence module
//!
//! Storage traits consumed by the session manager, the pledge ledger and
//! the analytics aggregator, with Postgres and in-memory implementations.
//!
//! Every operation takes a [`CancellationToken`]. A cancelled operation
//! drops its in-flight future, which rolls back any open transaction, and
//! returns [`AppError::Cancelled`].

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};

pub mod credentials;
pub mod ledger;
pub mod memory;
pub mod postgres;

pub use credentials::{CredentialStore, LockoutPolicy};
pub use ledger::{
    CampaignTotals, EntityTotal, LedgerCounts, LedgerStore, MonthlyTotal, RevenueTotal,
    SettleOutcome, TotalsGroup,
};
pub use memory::{MemoryCredentialStore, MemoryLedgerStore};
pub use postgres::{PgCredentialStore, PgLedgerStore};

/// Run `fut` unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, async { Ok::<_, AppError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { Ok::<_, AppError>(7) }).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = cancellable(&cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
