//! Authentication module
//!
//! Access token issuing, password and refresh-token hashing, and the
//! session manager that ties them to the credential store.

pub mod crypto;
pub mod session;
pub mod token;

pub use session::AuthSessionManager;
pub use token::{AccessClaims, IssuedAccessToken, TokenIssuer};
