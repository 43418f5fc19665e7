//! Error types for Syndicast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyndicastError>;

#[derive(Error, Debug)]
pub enum SyndicastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Platform not configured: {0}")]
    PlatformNotConfigured(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Normalized failure taxonomy for adapter operations.
///
/// Every platform maps its own error vocabulary into these five variants
/// before the result reaches the dispatcher, so retry policy never branches
/// per platform. The free text is diagnostic payload only, never a dispatch
/// key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Expired or invalid access token. Recoverable by exactly one
    /// refresh-and-retry hop.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The platform already has equivalent content. Terminal but not an
    /// error: the post is absorbed as skipped.
    #[error("duplicate content: {0}")]
    Duplicate(String),

    /// Too many requests. Terminal for this attempt.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Remote 5xx or transport failure. Terminal for this attempt.
    #[error("server error: {0}")]
    ServerError(String),

    /// The platform rejected the content itself. Terminal.
    #[error("malformed content: {0}")]
    Malformed(String),
}

impl PublishError {
    /// Diagnostic payload attached to the variant.
    pub fn detail(&self) -> &str {
        match self {
            PublishError::Unauthorized(s)
            | PublishError::Duplicate(s)
            | PublishError::RateLimited(s)
            | PublishError::ServerError(s)
            | PublishError::Malformed(s) => s,
        }
    }
}

/// Closed error vocabulary for the OAuth callback redirect.
///
/// The value is carried back to the user's browser as
/// `{return_origin}/accounts?error=<code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorCode {
    /// Handshake state unknown or already consumed (replay).
    StateMismatch,
    /// Platform credentials/URLs missing on our side; operator fix required.
    ConfigMissing,
    TokenExchangeFailed,
    ProfileFetchFailed,
    DbSaveFailed,
    /// The user declined on the platform's consent screen.
    OauthDenied,
    InternalError,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthErrorCode::StateMismatch => "state_mismatch",
            OAuthErrorCode::ConfigMissing => "config_missing",
            OAuthErrorCode::TokenExchangeFailed => "token_exchange_failed",
            OAuthErrorCode::ProfileFetchFailed => "profile_fetch_failed",
            OAuthErrorCode::DbSaveFailed => "db_save_failed",
            OAuthErrorCode::OauthDenied => "oauth_denied",
            OAuthErrorCode::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
