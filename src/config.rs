//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::domain::RevokeScope;

/// Minimum signing secret length outside development
const MIN_SECRET_LEN: usize = 32;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Emit JSON log lines
    pub log_json: bool,

    pub auth: AuthSettings,
}

/// Token and login policy
#[derive(Clone)]
pub struct AuthSettings {
    /// HMAC signing secret for access tokens
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    /// Consecutive wrong passwords before the account locks
    pub max_failed_logins: i32,
    pub lockout_minutes: i64,
    pub require_confirmed_email: bool,
    /// New registrations start approved
    pub auto_approve_users: bool,
    pub revoke_scope: RevokeScope,
    /// Presenting a consumed refresh token kills its whole family
    pub revoke_family_on_reuse: bool,
    /// A token rotated less than this long ago is a lost refresh race,
    /// not a replay
    pub reuse_grace_seconds: i64,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("access_token_minutes", &self.access_token_minutes)
            .field("refresh_token_days", &self.refresh_token_days)
            .field("max_failed_logins", &self.max_failed_logins)
            .field("lockout_minutes", &self.lockout_minutes)
            .field("require_confirmed_email", &self.require_confirmed_email)
            .field("auto_approve_users", &self.auto_approve_users)
            .field("revoke_scope", &self.revoke_scope)
            .field("revoke_family_on_reuse", &self.revoke_family_on_reuse)
            .field("reuse_grace_seconds", &self.reuse_grace_seconds)
            .finish()
    }
}

impl AuthSettings {
    /// Defaults around a given secret
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            jwt_issuer: "crowdfund".to_string(),
            jwt_audience: "crowdfund-clients".to_string(),
            access_token_minutes: 15,
            refresh_token_days: 7,
            max_failed_logins: 5,
            lockout_minutes: 15,
            require_confirmed_email: false,
            auto_approve_users: true,
            revoke_scope: RevokeScope::Family,
            revoke_family_on_reuse: true,
            reuse_grace_seconds: 10,
        }
    }

    fn from_env(production: bool) -> Result<Self, ConfigError> {
        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingEnv("JWT_SECRET"))?;
        if production && jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue("JWT_SECRET"));
        }

        let defaults = Self::with_secret(jwt_secret);

        let revoke_scope = match env::var("REVOKE_SCOPE").ok().as_deref() {
            None | Some("family") => RevokeScope::Family,
            Some("single") => RevokeScope::Single,
            Some(_) => return Err(ConfigError::InvalidValue("REVOKE_SCOPE")),
        };

        let settings = Self {
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer.clone()),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or(defaults.jwt_audience.clone()),
            access_token_minutes: parse_or("ACCESS_TOKEN_MINUTES", defaults.access_token_minutes)?,
            refresh_token_days: parse_or("REFRESH_TOKEN_DAYS", defaults.refresh_token_days)?,
            max_failed_logins: parse_or("MAX_FAILED_LOGINS", defaults.max_failed_logins)?,
            lockout_minutes: parse_or("LOCKOUT_MINUTES", defaults.lockout_minutes)?,
            require_confirmed_email: parse_or(
                "REQUIRE_CONFIRMED_EMAIL",
                defaults.require_confirmed_email,
            )?,
            auto_approve_users: parse_or("AUTO_APPROVE_USERS", defaults.auto_approve_users)?,
            revoke_scope,
            revoke_family_on_reuse: parse_or(
                "REVOKE_FAMILY_ON_REUSE",
                defaults.revoke_family_on_reuse,
            )?,
            reuse_grace_seconds: parse_or("REUSE_GRACE_SECONDS", defaults.reuse_grace_seconds)?,
            ..defaults
        };

        if settings.access_token_minutes <= 0 {
            return Err(ConfigError::InvalidValue("ACCESS_TOKEN_MINUTES"));
        }
        if settings.refresh_token_days <= 0 {
            return Err(ConfigError::InvalidValue("REFRESH_TOKEN_DAYS"));
        }
        if settings.max_failed_logins <= 0 {
            return Err(ConfigError::InvalidValue("MAX_FAILED_LOGINS"));
        }
        if settings.reuse_grace_seconds < 0 {
            return Err(ConfigError::InvalidValue("REUSE_GRACE_SECONDS"));
        }

        Ok(settings)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_or("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_json = env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let auth = AuthSettings::from_env(environment == "production")?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_json,
            auth,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
