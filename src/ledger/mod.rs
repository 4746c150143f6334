//! Pledge ledger
//!
//! Pledge creation against the payment gateway, pledge history and
//! gateway settlement callbacks.

mod service;

pub use service::{PledgeLedger, Settlement};
