//! Postgres-backed stores

mod credentials;
mod ledger;

pub use credentials::PgCredentialStore;
pub use ledger::PgLedgerStore;
