//! Analytics module
//!
//! Dashboards, leaderboards and trends computed from the ledger store.

pub mod metrics;
mod service;

pub use service::{AnalyticsAggregator, CampaignProgress, Dashboard};
