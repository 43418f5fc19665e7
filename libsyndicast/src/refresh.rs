//! Token refresh manager
//!
//! Centralizes the refresh-token grant so the dispatcher and the refresh
//! entrypoint share one behavior: a successful refresh overwrites the
//! credential's tokens and clears its error, a failed refresh deactivates
//! the credential so every later dispatch for it fails fast until the user
//! reconnects.

use std::sync::Arc;

use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::platforms::AdapterRegistry;
use crate::types::TokenSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New tokens saved on the credential.
    Refreshed(TokenSet),
    /// Refresh impossible or rejected; the credential is now deactivated.
    Failed(String),
}

#[derive(Clone)]
pub struct RefreshManager {
    db: Database,
    adapters: AdapterRegistry,
}

impl RefreshManager {
    pub fn new(db: Database, adapters: AdapterRegistry) -> Self {
        Self { db, adapters }
    }

    /// Run one refresh-token grant for a credential.
    ///
    /// `Failed` is a normal outcome here, not an `Err`: callers decide what
    /// it means for them (the dispatcher records `refresh_failed`, the HTTP
    /// entrypoint reports it). `Err` is reserved for storage faults and an
    /// unknown credential id.
    pub async fn refresh(&self, credential_id: &str) -> Result<RefreshOutcome> {
        let credential = self
            .db
            .get_credential(credential_id)
            .await?
            .ok_or_else(|| {
                crate::error::SyndicastError::InvalidInput(format!(
                    "unknown credential: {}",
                    credential_id
                ))
            })?;

        let adapter = self.adapters.get(credential.platform).ok_or_else(|| {
            ConfigError::PlatformNotConfigured(credential.platform.to_string())
        })?;

        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            let message = format!(
                "{} credential has no refresh token; reconnect required",
                credential.platform
            );
            tracing::warn!(
                credential_id,
                platform = %credential.platform,
                "Refresh impossible without a refresh token"
            );
            self.db.deactivate_credential(credential_id, &message).await?;
            return Ok(RefreshOutcome::Failed(message));
        };

        match adapter.refresh_access_token(refresh_token).await {
            Ok(tokens) => {
                self.db.update_credential_tokens(credential_id, &tokens).await?;
                tracing::info!(
                    credential_id,
                    platform = %credential.platform,
                    "Access token refreshed"
                );
                Ok(RefreshOutcome::Refreshed(tokens))
            }
            Err(e) => {
                let message = e.detail().to_string();
                tracing::warn!(
                    credential_id,
                    platform = %credential.platform,
                    error = %e,
                    "Refresh rejected; deactivating credential"
                );
                self.db.deactivate_credential(credential_id, &message).await?;
                Ok(RefreshOutcome::Failed(message))
            }
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::platforms::mock::MockAdapter;
    use crate::types::{ChannelCredential, ChannelIdentity, Platform};

    fn test_credential(refresh_token: Option<&str>) -> ChannelCredential {
        ChannelCredential::new(
            "user-1".to_string(),
            Platform::Twitter,
            ChannelIdentity {
                platform_account_id: "acct-1".to_string(),
                handle: "@alice".to_string(),
                display_name: "Alice".to_string(),
                avatar_url: None,
            },
            TokenSet {
                access_token: "old-at".to_string(),
                refresh_token: refresh_token.map(str::to_string),
                expires_at: None,
            },
            "UTC".to_string(),
        )
    }

    async fn manager_with_mock(mock: Arc<MockAdapter>) -> (RefreshManager, Database) {
        let db = Database::in_memory().await.unwrap();
        let mut adapters = AdapterRegistry::new();
        adapters.insert(mock);
        (RefreshManager::new(db.clone(), adapters), db)
    }

    #[tokio::test]
    async fn test_refresh_success_updates_tokens() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        mock.queue_refresh(Ok(TokenSet {
            access_token: "new-at".to_string(),
            refresh_token: Some("new-rt".to_string()),
            expires_at: Some(1_900_000_000),
        }));
        let (manager, db) = manager_with_mock(mock).await;

        let cred = test_credential(Some("old-rt"));
        db.upsert_credential(&cred).await.unwrap();

        let outcome = manager.refresh(&cred.id).await.unwrap();
        match outcome {
            RefreshOutcome::Refreshed(tokens) => assert_eq!(tokens.access_token, "new-at"),
            other => panic!("Expected Refreshed, got {:?}", other),
        }

        let loaded = db.get_credential(&cred.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "new-at");
        assert_eq!(loaded.refresh_token.as_deref(), Some("new-rt"));
        assert!(loaded.activated);
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_deactivates() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        mock.queue_refresh(Err(PublishError::Unauthorized("invalid_grant".to_string())));
        let (manager, db) = manager_with_mock(mock).await;

        let cred = test_credential(Some("old-rt"));
        db.upsert_credential(&cred).await.unwrap();

        let outcome = manager.refresh(&cred.id).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Failed(_)));

        let loaded = db.get_credential(&cred.id).await.unwrap().unwrap();
        assert!(!loaded.activated);
        assert_eq!(loaded.error_message.as_deref(), Some("invalid_grant"));
        // Tokens are untouched on failure.
        assert_eq!(loaded.access_token, "old-at");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails_and_deactivates() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        let (manager, db) = manager_with_mock(mock.clone()).await;

        let cred = test_credential(None);
        db.upsert_credential(&cred).await.unwrap();

        let outcome = manager.refresh(&cred.id).await.unwrap();
        match outcome {
            RefreshOutcome::Failed(message) => assert!(message.contains("no refresh token")),
            other => panic!("Expected Failed, got {:?}", other),
        }

        // No network attempt was made.
        assert_eq!(mock.refresh_calls(), 0);
        let loaded = db.get_credential(&cred.id).await.unwrap().unwrap();
        assert!(!loaded.activated);
    }

    #[tokio::test]
    async fn test_refresh_unknown_credential_is_error() {
        let mock = Arc::new(MockAdapter::new(Platform::Twitter));
        let (manager, _db) = manager_with_mock(mock).await;

        assert!(manager.refresh("no-such-id").await.is_err());
    }
}
