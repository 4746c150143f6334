//! crowdfund_core Library
//!
//! Credential/session lifecycle and the pledge/payment core of a
//! crowdfunding backend. Re-exports modules for integration testing and
//! external use.

pub mod analytics;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod ledger;
pub mod payment;
pub mod store;

mod error;

pub use analytics::AnalyticsAggregator;
pub use auth::{AuthSessionManager, TokenIssuer};
pub use config::Config;
pub use error::{AppError, AppResult, ErrorEnvelope, ErrorKind};
pub use ledger::PledgeLedger;
