//! Domain module
//!
//! Core domain types shared by the session and ledger components.

pub mod amount;
pub mod page;
pub mod pledge;
pub mod session;
pub mod user;

pub use amount::{Amount, AmountError};
pub use page::{Page, PageError, PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use pledge::{
    Campaign, CampaignSnapshot, CreatePledgeCommand, FlowSummary, LedgerEntry, Payment,
    PaymentStatus, Pledge, PledgeDetails, PledgeQuery, PledgeScope, PledgeSort, PledgeSortField,
    TransactionSummary,
};
pub use session::{AuthTokens, RefreshToken, RevokeScope};
pub use user::{
    normalize_email, CredentialRecord, NewUser, RegisterRequest, User, UserAccount, ROLE_ADMIN,
    ROLE_USER,
};
