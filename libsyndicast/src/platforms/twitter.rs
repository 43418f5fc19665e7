//! Twitter (X) platform implementation
//!
//! OAuth2 with PKCE against api.x.com. Publishing uses the v2 tweet
//! endpoint; the duplicate-content rejection (legacy code 187, or the
//! "duplicate content" 403) is mapped to [`PublishError::Duplicate`] so the
//! dispatcher can absorb it instead of failing the post.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::OAuthAppConfig;
use crate::error::PublishError;
use crate::platforms::ChannelAdapter;
use crate::types::{ChannelIdentity, Platform, TokenSet};

const AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";
const ME_URL: &str = "https://api.x.com/2/users/me";
const TWEETS_URL: &str = "https://api.x.com/2/tweets";

const SCOPES: &str = "tweet.read tweet.write users.read offline.access";

pub const TWITTER_CHARACTER_LIMIT: usize = 280;

/// Map a Twitter API response to PublishError
///
/// # Arguments
///
/// * `status` - The HTTP status code of the response
/// * `body` - The raw response body, preserved as diagnostic payload
fn map_twitter_error(status: StatusCode, body: &str) -> PublishError {
    let lower = body.to_lowercase();

    if status == StatusCode::UNAUTHORIZED {
        return PublishError::Unauthorized(format!("Twitter returned 401: {}", body));
    }

    // Duplicate tweets come back as 403 with "duplicate content", or as the
    // legacy v1.1 error code 187 embedded in the body.
    if (status == StatusCode::FORBIDDEN && lower.contains("duplicate"))
        || body.contains("\"code\":187")
        || body.contains("\"code\": 187")
    {
        return PublishError::Duplicate(format!("Twitter rejected duplicate content: {}", body));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return PublishError::RateLimited(format!("Twitter rate limit hit: {}", body));
    }

    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        return PublishError::Malformed(format!("Twitter rejected the request: {}", body));
    }

    PublishError::ServerError(format!("Twitter returned {}: {}", status, body))
}

fn map_transport_error(err: reqwest::Error) -> PublishError {
    PublishError::ServerError(format!("Twitter request failed: {}", err))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token_set(self) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        }
    }
}

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
    username: String,
    name: String,
    profile_image_url: Option<String>,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

pub struct TwitterAdapter {
    config: OAuthAppConfig,
    client: reqwest::Client,
}

impl TwitterAdapter {
    pub fn new(config: OAuthAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenSet, PublishError> {
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_twitter_error(status, &body));
        }

        let token: TokenResponse = response.json().await.map_err(map_transport_error)?;
        Ok(token.into_token_set())
    }
}

#[async_trait]
impl ChannelAdapter for TwitterAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn character_limit(&self) -> usize {
        TWITTER_CHARACTER_LIMIT
    }

    fn authorize_url(&self, state: &str, pkce_challenge: &str) -> Option<String> {
        let mut url = url::Url::parse(AUTHORIZE_URL).ok()?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("code_challenge", pkce_challenge)
            .append_pair("code_challenge_method", "S256");
        Some(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenSet, PublishError> {
        tracing::debug!("Exchanging Twitter authorization code");

        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
            ("code_verifier", pkce_verifier),
        ])
        .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, PublishError> {
        tracing::debug!("Refreshing Twitter access token");

        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ChannelIdentity, PublishError> {
        let response = self
            .client
            .get(ME_URL)
            .query(&[("user.fields", "profile_image_url")])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_twitter_error(status, &body));
        }

        let user: UserResponse = response.json().await.map_err(map_transport_error)?;
        Ok(ChannelIdentity {
            platform_account_id: user.data.id,
            handle: format!("@{}", user.data.username),
            display_name: user.data.name,
            avatar_url: user.data.profile_image_url,
        })
    }

    async fn publish(&self, access_token: &str, content: &str) -> Result<String, PublishError> {
        tracing::debug!("Posting to Twitter: {} characters", content.len());

        let response = self
            .client
            .post(TWEETS_URL)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "text": content }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_twitter_error(status, &body));
        }

        let tweet: TweetResponse = response.json().await.map_err(map_transport_error)?;
        tracing::debug!("Posted to Twitter: {}", tweet.data.id);
        Ok(tweet.data.id)
    }
}
