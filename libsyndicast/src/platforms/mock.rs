//! Scriptable adapter for tests
//!
//! Results for each operation are queued up front and consumed in order,
//! which lets dispatcher tests script sequences like "unauthorized, then
//! success after refresh" without a network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::PublishError;
use crate::platforms::ChannelAdapter;
use crate::types::{ChannelIdentity, Platform, TokenSet};

pub struct MockAdapter {
    platform: Platform,
    character_limit: usize,
    publish_results: Mutex<VecDeque<Result<String, PublishError>>>,
    refresh_results: Mutex<VecDeque<Result<TokenSet, PublishError>>>,
    exchange_results: Mutex<VecDeque<Result<TokenSet, PublishError>>>,
    identity_results: Mutex<VecDeque<Result<ChannelIdentity, PublishError>>>,
    login_results: Mutex<VecDeque<Result<(TokenSet, ChannelIdentity), PublishError>>>,
    publish_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            character_limit: 280,
            publish_results: Mutex::new(VecDeque::new()),
            refresh_results: Mutex::new(VecDeque::new()),
            exchange_results: Mutex::new(VecDeque::new()),
            identity_results: Mutex::new(VecDeque::new()),
            login_results: Mutex::new(VecDeque::new()),
            publish_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_character_limit(mut self, limit: usize) -> Self {
        self.character_limit = limit;
        self
    }

    pub fn queue_publish(&self, result: Result<String, PublishError>) {
        self.publish_results.lock().unwrap().push_back(result);
    }

    pub fn queue_refresh(&self, result: Result<TokenSet, PublishError>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub fn queue_exchange(&self, result: Result<TokenSet, PublishError>) {
        self.exchange_results.lock().unwrap().push_back(result);
    }

    pub fn queue_identity(&self, result: Result<ChannelIdentity, PublishError>) {
        self.identity_results.lock().unwrap().push_back(result);
    }

    pub fn queue_login(&self, result: Result<(TokenSet, ChannelIdentity), PublishError>) {
        self.login_results.lock().unwrap().push_back(result);
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

fn unscripted<T>(operation: &str) -> Result<T, PublishError> {
    Err(PublishError::ServerError(format!(
        "mock adapter has no scripted result for {}",
        operation
    )))
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn character_limit(&self) -> usize {
        self.character_limit
    }

    fn authorize_url(&self, state: &str, pkce_challenge: &str) -> Option<String> {
        Some(format!(
            "https://auth.invalid/authorize?state={}&code_challenge={}",
            state, pkce_challenge
        ))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _pkce_verifier: &str,
    ) -> Result<TokenSet, PublishError> {
        self.exchange_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("exchange_code"))
    }

    async fn login(
        &self,
        _identifier: &str,
        _password: &str,
    ) -> Result<(TokenSet, ChannelIdentity), PublishError> {
        self.login_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("login"))
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenSet, PublishError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("refresh_access_token"))
    }

    async fn fetch_identity(&self, _access_token: &str) -> Result<ChannelIdentity, PublishError> {
        self.identity_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("fetch_identity"))
    }

    async fn publish(&self, _access_token: &str, _content: &str) -> Result<String, PublishError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        self.publish_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("publish"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_results_consumed_in_order() {
        let mock = MockAdapter::new(Platform::Twitter);
        mock.queue_publish(Ok("post-1".to_string()));
        mock.queue_publish(Err(PublishError::RateLimited("slow down".to_string())));

        assert_eq!(mock.publish("at", "hello").await.unwrap(), "post-1");
        assert!(matches!(
            mock.publish("at", "hello").await,
            Err(PublishError::RateLimited(_))
        ));
        assert_eq!(mock.publish_calls(), 2);
    }

    #[tokio::test]
    async fn test_unscripted_operation_fails() {
        let mock = MockAdapter::new(Platform::Twitter);
        let result = mock.publish("at", "hello").await;
        assert!(matches!(result, Err(PublishError::ServerError(_))));
    }
}
