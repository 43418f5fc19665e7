//! LinkedIn platform implementation
//!
//! OAuth2 with PKCE against linkedin.com. Publishing goes through the
//! ugcPosts endpoint, which needs the member URN; the adapter resolves it
//! from the OpenID userinfo endpoint using the same access token. A 422
//! "duplicate" rejection is mapped to [`PublishError::Duplicate`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::OAuthAppConfig;
use crate::error::PublishError;
use crate::platforms::ChannelAdapter;
use crate::types::{ChannelIdentity, Platform, TokenSet};

const AUTHORIZE_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";
const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
const USERINFO_URL: &str = "https://api.linkedin.com/v2/userinfo";
const UGC_POSTS_URL: &str = "https://api.linkedin.com/v2/ugcPosts";

const SCOPES: &str = "openid profile w_member_social";

pub const LINKEDIN_CHARACTER_LIMIT: usize = 3000;

/// Map a LinkedIn API response to PublishError
fn map_linkedin_error(status: StatusCode, body: &str) -> PublishError {
    let lower = body.to_lowercase();

    if status == StatusCode::UNAUTHORIZED {
        return PublishError::Unauthorized(format!("LinkedIn returned 401: {}", body));
    }

    // LinkedIn reports duplicate shares as 422 with a duplicate message.
    if status == StatusCode::UNPROCESSABLE_ENTITY && lower.contains("duplicate") {
        return PublishError::Duplicate(format!("LinkedIn rejected duplicate content: {}", body));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return PublishError::RateLimited(format!("LinkedIn rate limit hit: {}", body));
    }

    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        return PublishError::Malformed(format!("LinkedIn rejected the request: {}", body));
    }

    PublishError::ServerError(format!("LinkedIn returned {}: {}", status, body))
}

fn map_transport_error(err: reqwest::Error) -> PublishError {
    PublishError::ServerError(format!("LinkedIn request failed: {}", err))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    name: Option<String>,
    given_name: Option<String>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct UgcPostResponse {
    id: String,
}

pub struct LinkedinAdapter {
    config: OAuthAppConfig,
    client: reqwest::Client,
}

impl LinkedinAdapter {
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
            .form(params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_linkedin_error(status, &body));
        }

        let token: TokenResponse = response.json().await.map_err(map_transport_error)?;
        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        })
    }

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, PublishError> {
        let response = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_linkedin_error(status, &body));
        }

        response.json().await.map_err(map_transport_error)
    }
}

#[async_trait]
impl ChannelAdapter for LinkedinAdapter {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    fn character_limit(&self) -> usize {
        LINKEDIN_CHARACTER_LIMIT
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
        tracing::debug!("Exchanging LinkedIn authorization code");

        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("code_verifier", pkce_verifier),
        ])
        .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, PublishError> {
        tracing::debug!("Refreshing LinkedIn access token");

        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ])
        .await
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ChannelIdentity, PublishError> {
        let info = self.userinfo(access_token).await?;
        let display_name = info
            .name
            .or(info.given_name)
            .unwrap_or_else(|| info.sub.clone());

        Ok(ChannelIdentity {
            platform_account_id: info.sub.clone(),
            handle: display_name.clone(),
            display_name,
            avatar_url: info.picture,
        })
    }

    async fn publish(&self, access_token: &str, content: &str) -> Result<String, PublishError> {
        tracing::debug!("Posting to LinkedIn: {} characters", content.len());

        // ugcPosts needs the author URN, resolved from the same token.
        let info = self.userinfo(access_token).await?;
        let author = format!("urn:li:person:{}", info.sub);

        let body = serde_json::json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": content },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        });

        let response = self
            .client
            .post(UGC_POSTS_URL)
            .bearer_auth(access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_linkedin_error(status, &body));
        }

        let post: UgcPostResponse = response.json().await.map_err(map_transport_error)?;
        tracing::debug!("Posted to LinkedIn: {}", post.id);
        Ok(post.id)
    }
}
