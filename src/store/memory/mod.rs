//! In-memory stores
//!
//! Same semantics as the Postgres stores, held behind one async mutex per
//! store so every operation is a single critical section. Used by tests and
//! local runs without a database.

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};

mod credentials;
mod ledger;

pub use credentials::MemoryCredentialStore;
pub use ledger::MemoryLedgerStore;

fn ensure_live(cancel: &CancellationToken) -> AppResult<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    Ok(())
}
