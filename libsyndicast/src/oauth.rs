//! OAuth handshake broker and connect flows
//!
//! The broker hands out single-use state values for the redirect handshake
//! and stores the PKCE verifier alongside them. The connect service drives
//! the two flows that end in a saved credential: the redirect callback for
//! PKCE platforms, and the direct app-password login.
//!
//! The callback never fails outward: whatever happens, the user's browser
//! gets a redirect URL. Failures are encoded as an `error=<code>` query
//! parameter from a closed vocabulary, aimed at the return origin captured
//! at the start of the handshake when it can be recovered, or the
//! configured app origin when it cannot.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::db::Database;
use crate::error::{OAuthErrorCode, Result, SyndicastError};
use crate::platforms::AdapterRegistry;
use crate::types::{ChannelCredential, OAuthHandshake, Platform};

/// Handshakes older than this are abandoned flows and get swept.
const STALE_HANDSHAKE_SECS: i64 = 600;

/// Random URL-safe state value, 32 bytes of entropy.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE code verifier per RFC 7636 (43 base64url characters).
pub fn generate_pkce_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Query parameters a platform sends to the callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Issues and consumes single-use handshake states.
#[derive(Clone)]
pub struct StateBroker {
    db: Database,
}

impl StateBroker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a new handshake for a starting authorization flow.
    ///
    /// Stale handshakes are swept opportunistically here; abandoned flows
    /// otherwise accumulate forever.
    pub async fn create(
        &self,
        user_id: String,
        pkce_verifier: Option<String>,
        return_origin: String,
        user_email: String,
        user_timezone: String,
    ) -> Result<OAuthHandshake> {
        let now = chrono::Utc::now().timestamp();

        let swept = self
            .db
            .delete_stale_handshakes(now - STALE_HANDSHAKE_SECS)
            .await?;
        if swept > 0 {
            tracing::debug!(swept, "Swept stale OAuth handshakes");
        }

        let handshake = OAuthHandshake {
            state: generate_state(),
            user_id,
            pkce_verifier,
            return_origin,
            user_email,
            user_timezone,
            created_at: now,
        };
        self.db.insert_handshake(&handshake).await?;
        Ok(handshake)
    }

    /// Atomically fetch-and-delete; `None` means unknown or already used.
    pub async fn consume(&self, state: &str) -> Result<Option<OAuthHandshake>> {
        self.db.consume_handshake(state).await
    }
}

/// Request body for the direct app-password connect flow.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConnectRequest {
    pub user_id: String,
    pub identifier: String,
    pub app_password: String,
    pub email: String,
    pub timezone: String,
}

/// Drives authorization flows from start to saved credential.
#[derive(Clone)]
pub struct ConnectService {
    db: Database,
    broker: StateBroker,
    adapters: AdapterRegistry,
    app_origin: String,
}

impl ConnectService {
    pub fn new(db: Database, adapters: AdapterRegistry, config: &Config) -> Self {
        Self {
            broker: StateBroker::new(db.clone()),
            db,
            adapters,
            app_origin: config.server.app_origin.clone(),
        }
    }

    /// Start a redirect handshake: mint state + PKCE material, persist the
    /// handshake, and return the platform's consent URL.
    pub async fn begin_authorization(
        &self,
        platform: Platform,
        user_id: String,
        return_origin: String,
        user_email: String,
        user_timezone: String,
    ) -> Result<String> {
        if !platform.uses_oauth_redirect() {
            return Err(SyndicastError::InvalidInput(format!(
                "{} connects with an app password, not an OAuth redirect",
                platform
            )));
        }

        let adapter = self.adapters.get(platform).ok_or_else(|| {
            crate::error::ConfigError::PlatformNotConfigured(platform.to_string())
        })?;

        let verifier = generate_pkce_verifier();
        let challenge = pkce_challenge(&verifier);

        let handshake = self
            .broker
            .create(
                user_id,
                Some(verifier),
                return_origin,
                user_email,
                user_timezone,
            )
            .await?;

        adapter
            .authorize_url(&handshake.state, &challenge)
            .ok_or_else(|| {
                crate::error::ConfigError::PlatformNotConfigured(platform.to_string()).into()
            })
    }

    /// Handle the platform's redirect back to us.
    ///
    /// Always returns a URL for the browser. The handshake is consumed
    /// before anything else so the state is burned even when the flow goes
    /// on to fail.
    pub async fn complete_callback(&self, platform: Platform, params: CallbackParams) -> String {
        // Recover the handshake first: it carries the return origin every
        // later branch redirects to.
        let handshake = match &params.state {
            Some(state) => match self.broker.consume(state).await {
                Ok(handshake) => handshake,
                Err(e) => {
                    tracing::error!(%platform, error = %e, "Failed to consume OAuth handshake");
                    return error_redirect(&self.app_origin, OAuthErrorCode::InternalError);
                }
            },
            None => None,
        };

        let origin = match &handshake {
            Some(h) => h.return_origin.clone(),
            None => self.app_origin.clone(),
        };

        if let Some(platform_error) = &params.error {
            tracing::info!(%platform, %platform_error, "User declined on consent screen");
            return error_redirect(&origin, OAuthErrorCode::OauthDenied);
        }

        let Some(handshake) = handshake else {
            tracing::warn!(%platform, "OAuth callback with unknown or replayed state");
            return error_redirect(&origin, OAuthErrorCode::StateMismatch);
        };

        let Some(adapter) = self.adapters.get(platform) else {
            tracing::error!(%platform, "OAuth callback for unconfigured platform");
            return error_redirect(&origin, OAuthErrorCode::ConfigMissing);
        };

        let (Some(code), Some(verifier)) = (&params.code, &handshake.pkce_verifier) else {
            tracing::error!(%platform, "OAuth callback missing code or stored verifier");
            return error_redirect(&origin, OAuthErrorCode::InternalError);
        };

        let tokens = match adapter.exchange_code(code, verifier).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(%platform, error = %e, "Token exchange failed");
                return error_redirect(&origin, OAuthErrorCode::TokenExchangeFailed);
            }
        };

        let identity = match adapter.fetch_identity(&tokens.access_token).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(%platform, error = %e, "Profile fetch failed");
                return error_redirect(&origin, OAuthErrorCode::ProfileFetchFailed);
            }
        };

        let credential = ChannelCredential::new(
            handshake.user_id,
            platform,
            identity,
            tokens,
            handshake.user_timezone,
        );

        if let Err(e) = self.db.upsert_credential(&credential).await {
            tracing::error!(%platform, error = %e, "Failed to save credential");
            return error_redirect(&origin, OAuthErrorCode::DbSaveFailed);
        }

        tracing::info!(
            %platform,
            user_id = %credential.user_id,
            handle = %credential.handle,
            "Channel connected"
        );
        success_redirect(&origin, platform)
    }

    /// Direct app-password connect for platforms without a redirect flow.
    pub async fn connect_with_password(
        &self,
        platform: Platform,
        request: PasswordConnectRequest,
    ) -> Result<ChannelCredential> {
        let adapter = self.adapters.get(platform).ok_or_else(|| {
            crate::error::ConfigError::PlatformNotConfigured(platform.to_string())
        })?;

        let (tokens, identity) = adapter
            .login(&request.identifier, &request.app_password)
            .await?;

        let credential = ChannelCredential::new(
            request.user_id,
            platform,
            identity,
            tokens,
            request.timezone,
        );
        self.db.upsert_credential(&credential).await?;

        tracing::info!(
            %platform,
            user_id = %credential.user_id,
            handle = %credential.handle,
            "Channel connected via password login"
        );
        Ok(credential)
    }
}

fn success_redirect(origin: &str, platform: Platform) -> String {
    format!(
        "{}/accounts?{}_connected=true",
        origin.trim_end_matches('/'),
        platform.as_str()
    )
}

fn error_redirect(origin: &str, code: OAuthErrorCode) -> String {
    format!("{}/accounts?error={}", origin.trim_end_matches('/'), code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlueskyConfig, OAuthAppConfig};
    use crate::error::PublishError;
    use crate::platforms::mock::MockAdapter;
    use crate::types::{ChannelIdentity, TokenSet};
    use std::sync::Arc;

    fn test_config() -> Config {
        let mut config = Config::default_config();
        config.server.app_origin = "https://fallback.example.com".to_string();
        config.twitter = Some(OAuthAppConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "https://api.example.com/oauth/twitter/callback".to_string(),
        });
        config.bluesky = Some(BlueskyConfig::default());
        config
    }

    fn test_identity() -> ChannelIdentity {
        ChannelIdentity {
            platform_account_id: "12345".to_string(),
            handle: "@alice".to_string(),
            display_name: "Alice".to_string(),
            avatar_url: None,
        }
    }

    fn test_tokens() -> TokenSet {
        TokenSet {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: None,
        }
    }

    async fn service_with_mock(mock: Arc<MockAdapter>) -> (ConnectService, Database) {
        let db = Database::in_memory().await.unwrap();
        let mut adapters = AdapterRegistry::new();
        adapters.insert(mock);
        let service = ConnectService::new(db.clone(), adapters, &test_config());
        (service, db)
    }

    #[test]
    fn test_pkce_challenge_rfc7636_vector() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generated_material_shape() {
        let state = generate_state();
        let verifier = generate_pkce_verifier();

        // 32 bytes base64url without padding.
        assert_eq!(state.len(), 43);
        assert_eq!(verifier.len(), 43);
        assert_ne!(generate_state(), state);
    }

    #[tokio::test]
    async fn test_begin_authorization_stores_handshake() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        let (service, db) = service_with_mock(mock).await;

        let url = service
            .begin_authorization(
                Platform::Twitter,
                "user-1".to_string(),
                "https://app.example.com".to_string(),
                "alice@example.com".to_string(),
                "Europe/London".to_string(),
            )
            .await
            .unwrap();

        // The state in the URL must match a stored, consumable handshake.
        let state = url.split("state=").nth(1).unwrap().split('&').next().unwrap();
        let handshake = db.consume_handshake(state).await.unwrap().unwrap();
        assert_eq!(handshake.user_id, "user-1");
        assert!(handshake.pkce_verifier.is_some());
        assert_eq!(handshake.user_timezone, "Europe/London");
    }

    #[tokio::test]
    async fn test_begin_authorization_rejects_password_platform() {
        let mock = Arc::new(MockAdapter::new(Platform::Bluesky));
        let (service, _db) = service_with_mock(mock).await;

        let result = service
            .begin_authorization(
                Platform::Bluesky,
                "user-1".to_string(),
                "https://app.example.com".to_string(),
                "alice@example.com".to_string(),
                "UTC".to_string(),
            )
            .await;
        assert!(matches!(result, Err(SyndicastError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_callback_success_redirects_to_return_origin() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        mock.queue_exchange(Ok(test_tokens()));
        mock.queue_identity(Ok(test_identity()));
        let (service, db) = service_with_mock(mock).await;

        let url = service
            .begin_authorization(
                Platform::Twitter,
                "user-1".to_string(),
                "https://app.example.com".to_string(),
                "alice@example.com".to_string(),
                "Europe/London".to_string(),
            )
            .await
            .unwrap();
        let state = url.split("state=").nth(1).unwrap().split('&').next().unwrap();

        let redirect = service
            .complete_callback(
                Platform::Twitter,
                CallbackParams {
                    code: Some("auth-code".to_string()),
                    state: Some(state.to_string()),
                    error: None,
                },
            )
            .await;

        assert_eq!(
            redirect,
            "https://app.example.com/accounts?twitter_connected=true"
        );

        let cred = db
            .active_credential("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cred.platform_account_id, "12345");
        assert_eq!(cred.timezone, "Europe/London");
    }

    #[tokio::test]
    async fn test_callback_unknown_state_is_state_mismatch() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        let (service, _db) = service_with_mock(mock).await;

        let redirect = service
            .complete_callback(
                Platform::Twitter,
                CallbackParams {
                    code: Some("auth-code".to_string()),
                    state: Some("never-issued".to_string()),
                    error: None,
                },
            )
            .await;

        // Return origin is unrecoverable, so the fallback origin is used.
        assert_eq!(
            redirect,
            "https://fallback.example.com/accounts?error=state_mismatch"
        );
    }

    #[tokio::test]
    async fn test_callback_state_is_single_use() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        mock.queue_exchange(Ok(test_tokens()));
        mock.queue_identity(Ok(test_identity()));
        let (service, _db) = service_with_mock(mock).await;

        let url = service
            .begin_authorization(
                Platform::Twitter,
                "user-1".to_string(),
                "https://app.example.com".to_string(),
                "alice@example.com".to_string(),
                "UTC".to_string(),
            )
            .await
            .unwrap();
        let state = url.split("state=").nth(1).unwrap().split('&').next().unwrap();
        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some(state.to_string()),
            error: None,
        };

        let first = service.complete_callback(Platform::Twitter, params.clone()).await;
        assert!(first.contains("twitter_connected=true"));

        // Replay of the same state must hard-fail.
        let second = service.complete_callback(Platform::Twitter, params).await;
        assert!(second.ends_with("error=state_mismatch"));
    }

    #[tokio::test]
    async fn test_callback_user_denied() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        let (service, _db) = service_with_mock(mock).await;

        let url = service
            .begin_authorization(
                Platform::Twitter,
                "user-1".to_string(),
                "https://app.example.com".to_string(),
                "alice@example.com".to_string(),
                "UTC".to_string(),
            )
            .await
            .unwrap();
        let state = url.split("state=").nth(1).unwrap().split('&').next().unwrap();

        let redirect = service
            .complete_callback(
                Platform::Twitter,
                CallbackParams {
                    code: None,
                    state: Some(state.to_string()),
                    error: Some("access_denied".to_string()),
                },
            )
            .await;

        // Denial still recovers the caller's origin from the handshake.
        assert_eq!(
            redirect,
            "https://app.example.com/accounts?error=oauth_denied"
        );
    }

    #[tokio::test]
    async fn test_callback_exchange_failure() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        mock.queue_exchange(Err(PublishError::Unauthorized("bad code".to_string())));
        let (service, db) = service_with_mock(mock).await;

        let url = service
            .begin_authorization(
                Platform::Twitter,
                "user-1".to_string(),
                "https://app.example.com".to_string(),
                "alice@example.com".to_string(),
                "UTC".to_string(),
            )
            .await
            .unwrap();
        let state = url.split("state=").nth(1).unwrap().split('&').next().unwrap();

        let redirect = service
            .complete_callback(
                Platform::Twitter,
                CallbackParams {
                    code: Some("auth-code".to_string()),
                    state: Some(state.to_string()),
                    error: None,
                },
            )
            .await;

        assert_eq!(
            redirect,
            "https://app.example.com/accounts?error=token_exchange_failed"
        );
        assert!(db
            .active_credential("user-1", Platform::Twitter)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_callback_profile_fetch_failure() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        mock.queue_exchange(Ok(test_tokens()));
        mock.queue_identity(Err(PublishError::ServerError("profile 500".to_string())));
        let (service, _db) = service_with_mock(mock).await;

        let url = service
            .begin_authorization(
                Platform::Twitter,
                "user-1".to_string(),
                "https://app.example.com".to_string(),
                "alice@example.com".to_string(),
                "UTC".to_string(),
            )
            .await
            .unwrap();
        let state = url.split("state=").nth(1).unwrap().split('&').next().unwrap();

        let redirect = service
            .complete_callback(
                Platform::Twitter,
                CallbackParams {
                    code: Some("auth-code".to_string()),
                    state: Some(state.to_string()),
                    error: None,
                },
            )
            .await;

        assert_eq!(
            redirect,
            "https://app.example.com/accounts?error=profile_fetch_failed"
        );
    }

    #[tokio::test]
    async fn test_connect_with_password_saves_credential() {
        let mock = Arc::new(MockAdapter::new(Platform::Bluesky));
        mock.queue_login(Ok((
            TokenSet {
                access_token: "jwt".to_string(),
                refresh_token: None,
                expires_at: None,
            },
            ChannelIdentity {
                platform_account_id: "did:plc:abc".to_string(),
                handle: "@alice.bsky.social".to_string(),
                display_name: "Alice".to_string(),
                avatar_url: None,
            },
        )));
        let (service, db) = service_with_mock(mock).await;

        let credential = service
            .connect_with_password(
                Platform::Bluesky,
                PasswordConnectRequest {
                    user_id: "user-1".to_string(),
                    identifier: "alice.bsky.social".to_string(),
                    app_password: "app-pass".to_string(),
                    email: "alice@example.com".to_string(),
                    timezone: "America/New_York".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(credential.platform_account_id, "did:plc:abc");
        assert!(credential.refresh_token.is_none());

        let loaded = db
            .active_credential("user-1", Platform::Bluesky)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, credential.id);
        assert_eq!(loaded.timezone, "America/New_York");
    }

    #[tokio::test]
    async fn test_connect_with_password_bad_credentials() {
        let mock = Arc::new(MockAdapter::new(Platform::Bluesky));
        mock.queue_login(Err(PublishError::Unauthorized(
            "invalid identifier or password".to_string(),
        )));
        let (service, db) = service_with_mock(mock).await;

        let result = service
            .connect_with_password(
                Platform::Bluesky,
                PasswordConnectRequest {
                    user_id: "user-1".to_string(),
                    identifier: "alice.bsky.social".to_string(),
                    app_password: "wrong".to_string(),
                    email: "alice@example.com".to_string(),
                    timezone: "UTC".to_string(),
                },
            )
            .await;

        assert!(result.is_err());
        assert!(db
            .active_credential("user-1", Platform::Bluesky)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_stale_handshakes_swept_on_create() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        let (service, db) = service_with_mock(mock).await;

        let stale = OAuthHandshake {
            state: "stale-state".to_string(),
            user_id: "user-1".to_string(),
            pkce_verifier: None,
            return_origin: "https://app.example.com".to_string(),
            user_email: "alice@example.com".to_string(),
            user_timezone: "UTC".to_string(),
            created_at: chrono::Utc::now().timestamp() - STALE_HANDSHAKE_SECS - 5,
        };
        db.insert_handshake(&stale).await.unwrap();

        service
            .begin_authorization(
                Platform::Twitter,
                "user-2".to_string(),
                "https://app.example.com".to_string(),
                "bob@example.com".to_string(),
                "UTC".to_string(),
            )
            .await
            .unwrap();

        assert!(db.consume_handshake("stale-state").await.unwrap().is_none());
    }
}
