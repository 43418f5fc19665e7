//! Syndicast - scheduled dispatch to third-party social platforms
//!
//! This library provides the core of a cross-posting service: OAuth
//! handshake brokering, credential storage and refresh, a timezone-aware
//! scheduler, and an idempotent per-post dispatcher.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod refresh;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{OAuthErrorCode, PublishError, Result, SyndicastError};
pub use oauth::{CallbackParams, ConnectService, PasswordConnectRequest, StateBroker};
pub use platforms::{AdapterRegistry, ChannelAdapter};
pub use refresh::{RefreshManager, RefreshOutcome};
pub use scheduler::{Scheduler, SweepSummary};
pub use types::{ChannelCredential, OAuthHandshake, Platform, ScheduledPost, StatusDetail};
