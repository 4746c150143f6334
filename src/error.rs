//! Error handling module
//!
//! Centralized error types, the stable error-code catalog and HTTP
//! response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{AmountError, PageError};

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
///
/// Business outcomes are ordinary variants; `Database`, `Internal` and
/// `Config` are the unexpected-fault channel and render as an opaque 500.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Identity
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account has not been approved")]
    NotApproved,

    #[error("Email address has not been confirmed")]
    EmailNotConfirmed,

    #[error("Account is temporarily locked")]
    LockedOut,

    #[error("Email is already registered")]
    DuplicatedEmail,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    // Pledges
    #[error("Invalid pledge amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Pledge not found: {0}")]
    PledgeNotFound(Uuid),

    #[error("No pledges found")]
    NoPledgesFound,

    // Campaigns
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Campaign deadline has passed: {0}")]
    CampaignDeadlinePassed(Uuid),

    #[error("Not allowed to access this campaign")]
    UnauthorizedCampaignAccess,

    // Payments
    #[error("Payment was declined for pledge {pledge_id}")]
    PaymentProcessingFailed { pledge_id: Uuid },

    #[error("Payment gateway unavailable")]
    PaymentGatewayUnavailable,

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Payment already settled: {0}")]
    PaymentAlreadySettled(Uuid),

    // Request
    #[error("Invalid pagination: {0}")]
    InvalidPagination(#[from] PageError),

    #[error("Request was cancelled")]
    Cancelled,

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    Validation,
    Upstream,
    Cancelled,
    Unexpected,
}

/// Wire shape of every failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub status_hint: u16,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UserNotFound(_)
            | AppError::PledgeNotFound(_)
            | AppError::NoPledgesFound
            | AppError::CampaignNotFound(_)
            | AppError::PaymentNotFound(_) => ErrorKind::NotFound,

            AppError::InvalidCredentials
            | AppError::InvalidRefreshToken
            | AppError::InvalidAccessToken => ErrorKind::Unauthorized,

            AppError::NotApproved
            | AppError::EmailNotConfirmed
            | AppError::LockedOut
            | AppError::UnauthorizedCampaignAccess => ErrorKind::Forbidden,

            AppError::DuplicatedEmail | AppError::PaymentAlreadySettled(_) => ErrorKind::Conflict,

            AppError::InvalidAmount(_)
            | AppError::InvalidPagination(_)
            | AppError::CampaignDeadlinePassed(_) => ErrorKind::Validation,

            AppError::PaymentProcessingFailed { .. } | AppError::PaymentGatewayUnavailable => {
                ErrorKind::Upstream
            }

            AppError::Cancelled => ErrorKind::Cancelled,

            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) => {
                ErrorKind::Unexpected
            }
        }
    }

    /// Stable `Entity.Reason` code clients branch on
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials => "user.InvalidCredentials",
            AppError::NotApproved => "user.NotApproved",
            AppError::EmailNotConfirmed => "user.EmailNotConfirmed",
            AppError::LockedOut => "user.LockedOut",
            AppError::DuplicatedEmail => "user.DuplicatedEmail",
            AppError::InvalidRefreshToken => "user.InvalidRefreshToken",
            AppError::InvalidAccessToken => "user.InvalidAccessToken",
            AppError::UserNotFound(_) => "user.NotFound",
            AppError::InvalidAmount(_) => "Pledge.InvalidAmount",
            AppError::PledgeNotFound(_) => "Pledge.NotFound",
            AppError::NoPledgesFound => "Pledge.NoPledgesFound",
            AppError::CampaignNotFound(_) => "Campaign.NotFound",
            AppError::CampaignDeadlinePassed(_) => "Campaign.DeadlinePassed",
            AppError::UnauthorizedCampaignAccess => "Campaign.UnauthorizedAccess",
            AppError::PaymentProcessingFailed { .. } => "Payment.ProcessingFailed",
            AppError::PaymentGatewayUnavailable => "Payment.GatewayUnavailable",
            AppError::PaymentNotFound(_) => "Payment.NotFound",
            AppError::PaymentAlreadySettled(_) => "Payment.AlreadySettled",
            AppError::InvalidPagination(_) => "Request.InvalidPagination",
            AppError::Cancelled => "Request.Cancelled",
            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) => {
                "Server.Internal"
            }
        }
    }

    /// Transport status suggested for this failure
    pub fn status_hint(&self) -> u16 {
        match self {
            AppError::LockedOut => 423,
            AppError::PaymentProcessingFailed { .. } => 402,
            AppError::PaymentGatewayUnavailable => 502,
            AppError::Cancelled => 499,
            _ => match self.kind() {
                ErrorKind::NotFound => 404,
                ErrorKind::Unauthorized => 401,
                ErrorKind::Forbidden => 403,
                ErrorKind::Conflict => 409,
                ErrorKind::Validation => 400,
                ErrorKind::Upstream => 502,
                ErrorKind::Cancelled => 499,
                ErrorKind::Unexpected => 500,
            },
        }
    }

    /// Message safe to show a client; internals stay in the logs
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unexpected => "An unexpected error occurred".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.public_message(),
            status_hint: self.status_hint(),
        }
    }

    pub fn is_unexpected(&self) -> bool {
        self.kind() == ErrorKind::Unexpected
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => tracing::error!("Database error: {:?}", e),
            AppError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            AppError::Config(e) => tracing::error!("Config error: {:?}", e),
            _ => {}
        }

        let body = self.envelope();
        let status =
            StatusCode::from_u16(body.status_hint).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(body)).into_response()
    }
}
