//! Bluesky platform implementation
//!
//! AT Protocol XRPC against a configurable PDS. Bluesky does not use the
//! OAuth redirect handshake: connecting happens through a direct
//! app-password login ([`BlueskyAdapter::login`]) which creates a session.
//! Sessions carry no OAuth-style refresh token in this subsystem, so a
//! refresh request fails as unauthorized and the user must reconnect.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::BlueskyConfig;
use crate::error::PublishError;
use crate::platforms::ChannelAdapter;
use crate::types::{ChannelIdentity, Platform, TokenSet};

pub const BLUESKY_CHARACTER_LIMIT: usize = 300;

/// Map an XRPC error response to PublishError
///
/// AT Protocol errors carry a machine `error` code in the JSON body, which
/// is preserved in the diagnostic payload.
fn map_bluesky_error(status: StatusCode, body: &str) -> PublishError {
    if status == StatusCode::UNAUTHORIZED
        || body.contains("AuthenticationRequired")
        || body.contains("ExpiredToken")
        || body.contains("InvalidToken")
        || body.contains("AuthFactorTokenRequired")
    {
        return PublishError::Unauthorized(format!("Bluesky returned {}: {}", status, body));
    }

    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RateLimitExceeded") {
        return PublishError::RateLimited(format!("Bluesky rate limit hit: {}", body));
    }

    if status == StatusCode::BAD_REQUEST
        || body.contains("InvalidRequest")
        || body.contains("InvalidRecord")
    {
        return PublishError::Malformed(format!("Bluesky rejected the request: {}", body));
    }

    PublishError::ServerError(format!("Bluesky returned {}: {}", status, body))
}

fn map_transport_error(err: reqwest::Error) -> PublishError {
    PublishError::ServerError(format!("Bluesky request failed: {}", err))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_jwt: String,
    did: String,
    handle: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetSessionResponse {
    did: String,
    handle: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    display_name: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

pub struct BlueskyAdapter {
    config: BlueskyConfig,
    client: reqwest::Client,
}

impl BlueskyAdapter {
    pub fn new(config: BlueskyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn xrpc_url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.config.service.trim_end_matches('/'), method)
    }

    async fn fetch_profile(
        &self,
        access_token: &str,
        did: &str,
    ) -> Result<ProfileResponse, PublishError> {
        let response = self
            .client
            .get(self.xrpc_url("app.bsky.actor.getProfile"))
            .query(&[("actor", did)])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_bluesky_error(status, &body));
        }

        response.json().await.map_err(map_transport_error)
    }

    async fn get_session(&self, access_token: &str) -> Result<GetSessionResponse, PublishError> {
        let response = self
            .client
            .get(self.xrpc_url("com.atproto.server.getSession"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_bluesky_error(status, &body));
        }

        response.json().await.map_err(map_transport_error)
    }
}

#[async_trait]
impl ChannelAdapter for BlueskyAdapter {
    fn platform(&self) -> Platform {
        Platform::Bluesky
    }

    fn character_limit(&self) -> usize {
        BLUESKY_CHARACTER_LIMIT
    }

    fn authorize_url(&self, _state: &str, _pkce_challenge: &str) -> Option<String> {
        None
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _pkce_verifier: &str,
    ) -> Result<TokenSet, PublishError> {
        Err(PublishError::Malformed(
            "Bluesky does not use the OAuth code exchange; connect with an app password".to_string(),
        ))
    }

    /// Create a session from an identifier and app password.
    ///
    /// This is the Bluesky counterpart to the OAuth code exchange; the
    /// returned identity comes straight from the session response.
    async fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<(TokenSet, ChannelIdentity), PublishError> {
        tracing::debug!("Creating Bluesky session for {}", identifier);

        let response = self
            .client
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&serde_json::json!({
                "identifier": identifier,
                "password": password,
            }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_bluesky_error(status, &body));
        }

        let session: SessionResponse = response.json().await.map_err(map_transport_error)?;

        let profile = self
            .fetch_profile(&session.access_jwt, &session.did)
            .await
            .unwrap_or(ProfileResponse {
                display_name: None,
                avatar: None,
            });

        let identity = ChannelIdentity {
            platform_account_id: session.did.clone(),
            handle: format!("@{}", session.handle),
            display_name: profile
                .display_name
                .unwrap_or_else(|| session.handle.clone()),
            avatar_url: profile.avatar,
        };

        let tokens = TokenSet {
            access_token: session.access_jwt,
            refresh_token: None,
            expires_at: None,
        };

        Ok((tokens, identity))
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenSet, PublishError> {
        Err(PublishError::Unauthorized(
            "Bluesky sessions cannot be refreshed; reconnect with an app password".to_string(),
        ))
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ChannelIdentity, PublishError> {
        let session = self.get_session(access_token).await?;
        let profile = self
            .fetch_profile(access_token, &session.did)
            .await
            .unwrap_or(ProfileResponse {
                display_name: None,
                avatar: None,
            });

        Ok(ChannelIdentity {
            platform_account_id: session.did,
            handle: format!("@{}", session.handle),
            display_name: profile
                .display_name
                .unwrap_or_else(|| session.handle.clone()),
            avatar_url: profile.avatar,
        })
    }

    async fn publish(&self, access_token: &str, content: &str) -> Result<String, PublishError> {
        tracing::debug!("Posting to Bluesky: {} characters", content.len());

        // createRecord needs the repo DID owning the session.
        let session = self.get_session(access_token).await?;

        let response = self
            .client
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "repo": session.did,
                "collection": "app.bsky.feed.post",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "text": content,
                    "createdAt": chrono::Utc::now().to_rfc3339(),
                },
            }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_bluesky_error(status, &body));
        }

        let record: CreateRecordResponse = response.json().await.map_err(map_transport_error)?;
        tracing::debug!("Posted to Bluesky: {}", record.uri);
        Ok(record.uri)
    }
}
