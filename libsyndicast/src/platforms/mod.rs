//! Channel adapter implementations
//!
//! Each platform implements the [`ChannelAdapter`] trait, which normalizes
//! authorization, token lifecycle, and publishing behind one interface. All
//! platform-specific error vocabulary is mapped into [`PublishError`] here,
//! so nothing above this layer branches on a platform.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::PublishError;
use crate::types::{ChannelIdentity, Platform, TokenSet};

pub mod bluesky;
pub mod linkedin;
pub mod twitter;

pub mod mock;

pub use bluesky::BlueskyAdapter;
pub use linkedin::LinkedinAdapter;
pub use twitter::TwitterAdapter;

/// Common interface for all delivery platforms.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Maximum allowed content length, checked before any network call.
    fn character_limit(&self) -> usize;

    /// Authorization URL for the platform's consent screen, or `None` for
    /// platforms that connect without a redirect.
    fn authorize_url(&self, state: &str, pkce_challenge: &str) -> Option<String>;

    /// Exchange an authorization code (plus the PKCE verifier) for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenSet, PublishError>;

    /// Create a session from an identifier and password. Only implemented by
    /// platforms that connect without the OAuth redirect.
    async fn login(
        &self,
        _identifier: &str,
        _password: &str,
    ) -> Result<(TokenSet, ChannelIdentity), PublishError> {
        Err(PublishError::Malformed(format!(
            "{} does not support password login",
            self.platform()
        )))
    }

    /// Trade a refresh token for a new access token.
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, PublishError>;

    /// Resolve the account an access token belongs to.
    async fn fetch_identity(&self, access_token: &str) -> Result<ChannelIdentity, PublishError>;

    /// Publish content, returning the platform's id for the created post.
    async fn publish(&self, access_token: &str, content: &str) -> Result<String, PublishError>;
}

/// Adapters for all configured platforms, keyed by [`Platform`].
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every platform the config carries settings for.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        if let Some(twitter) = &config.twitter {
            registry.insert(Arc::new(TwitterAdapter::new(twitter.clone())));
        }
        if let Some(linkedin) = &config.linkedin {
            registry.insert(Arc::new(LinkedinAdapter::new(linkedin.clone())));
        }
        if let Some(bluesky) = &config.bluesky {
            registry.insert(Arc::new(BlueskyAdapter::new(bluesky.clone())));
        }

        registry
    }

    pub fn insert(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}
