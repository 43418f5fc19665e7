//! Core types for Syndicast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported delivery platforms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Linkedin,
    Bluesky,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Twitter, Platform::Linkedin, Platform::Bluesky];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Bluesky => "bluesky",
        }
    }

    /// Whether connecting this platform goes through the OAuth redirect
    /// handshake. Bluesky uses a direct app-password login instead.
    pub fn uses_oauth_redirect(&self) -> bool {
        !matches!(self, Platform::Bluesky)
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::Linkedin),
            "bluesky" => Ok(Platform::Bluesky),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Machine code recorded on a scheduled post once a dispatch concludes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusDetail {
    InitialSuccess,
    RetrySuccess,
    SkippedDuplicateTweet,
    SkippedDuplicatePost,
    InitialFailure,
    RetryFailed,
    RefreshFailed,
}

impl StatusDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusDetail::InitialSuccess => "initial_success",
            StatusDetail::RetrySuccess => "retry_success",
            StatusDetail::SkippedDuplicateTweet => "skipped_duplicate_tweet",
            StatusDetail::SkippedDuplicatePost => "skipped_duplicate_post",
            StatusDetail::InitialFailure => "initial_failure",
            StatusDetail::RetryFailed => "retry_failed",
            StatusDetail::RefreshFailed => "refresh_failed",
        }
    }

    /// The duplicate-absorption code for a platform.
    pub fn skipped_duplicate_for(platform: Platform) -> Self {
        match platform {
            Platform::Twitter => StatusDetail::SkippedDuplicateTweet,
            _ => StatusDetail::SkippedDuplicatePost,
        }
    }
}

impl std::str::FromStr for StatusDetail {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initial_success" => Ok(StatusDetail::InitialSuccess),
            "retry_success" => Ok(StatusDetail::RetrySuccess),
            "skipped_duplicate_tweet" => Ok(StatusDetail::SkippedDuplicateTweet),
            "skipped_duplicate_post" => Ok(StatusDetail::SkippedDuplicatePost),
            "initial_failure" => Ok(StatusDetail::InitialFailure),
            "retry_failed" => Ok(StatusDetail::RetryFailed),
            "refresh_failed" => Ok(StatusDetail::RefreshFailed),
            _ => Err(format!("Unknown status detail: {}", s)),
        }
    }
}

impl std::fmt::Display for StatusDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One in-flight authorization attempt.
///
/// Created when the user starts a "connect platform" flow, consumed (read +
/// deleted) exactly once when the platform redirects back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthHandshake {
    pub state: String,
    pub user_id: String,
    pub pkce_verifier: Option<String>,
    pub return_origin: String,
    pub user_email: String,
    pub user_timezone: String,
    pub created_at: i64,
}

/// One authorized connection between a user and a platform account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCredential {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub platform_account_id: String,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; None when the platform does not expire tokens.
    pub access_token_expiry: Option<i64>,
    pub timezone: String,
    pub activated: bool,
    pub error_message: Option<String>,
    pub updated_at: i64,
}

impl ChannelCredential {
    /// Build a fresh credential from an authorization result.
    pub fn new(
        user_id: String,
        platform: Platform,
        identity: ChannelIdentity,
        tokens: TokenSet,
        timezone: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            platform,
            platform_account_id: identity.platform_account_id,
            handle: identity.handle,
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_token_expiry: tokens.expires_at,
            timezone,
            activated: true,
            error_message: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One unit of work: a message body targeted at one credentialed channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub handle: String,
    pub content: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub scheduled_date: chrono::NaiveDate,
    /// Local wall clock, `HH:MM:SS`, no zone embedded. Interpreted against
    /// the owning credential's timezone.
    pub scheduled_time: chrono::NaiveTime,
    /// Still pending dispatch. Cleared the moment an attempt concludes,
    /// whatever the outcome.
    pub schedule_status: bool,
    /// Terminal, monotonic: once true it is never reset by this subsystem.
    pub sent_post: bool,
    pub posted_at: Option<i64>,
    pub remote_post_id: Option<String>,
    pub error_message: Option<String>,
    pub status_detail: Option<StatusDetail>,
    pub updated_at: i64,
}

impl ScheduledPost {
    pub fn new(
        user_id: String,
        platform: Platform,
        handle: String,
        content: String,
        scheduled_date: chrono::NaiveDate,
        scheduled_time: chrono::NaiveTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            platform,
            handle,
            content,
            scheduled_date,
            scheduled_time,
            schedule_status: true,
            sent_post: false,
            posted_at: None,
            remote_post_id: None,
            error_message: None,
            status_detail: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Tokens returned by a platform's exchange/refresh/login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
}

/// Who the access token belongs to on the remote platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub platform_account_id: String,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}
