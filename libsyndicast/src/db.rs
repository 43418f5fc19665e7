//! Database operations for Syndicast
//!
//! Three tables back the dispatch subsystem: `oauth_handshakes`,
//! `channel_credentials`, and `scheduled_posts`. All terminal post
//! transitions go through conditional updates keyed on the current
//! `sent_post`/`schedule_status` values, so overlapping sweeps serialize at
//! the storage layer instead of holding locks across network calls.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::error::{DbError, Result};
use crate::types::{ChannelCredential, OAuthHandshake, Platform, ScheduledPost, StatusDetail, TokenSet};

/// Platform error detail is stored truncated for diagnosis.
const ERROR_DETAIL_MAX: usize = 500;

pub fn truncate_detail(detail: &str) -> String {
    if detail.len() <= ERROR_DETAIL_MAX {
        detail.to_string()
    } else {
        let mut end = ERROR_DETAIL_MAX;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        detail[..end].to_string()
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory database, used by tests.
    pub async fn in_memory() -> Result<Self> {
        // A pool of one: each sqlite in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ========================================================================
    // OAuth handshakes
    // ========================================================================

    pub async fn insert_handshake(&self, handshake: &OAuthHandshake) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_handshakes
                (state, user_id, pkce_verifier, return_origin, user_email, user_timezone, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&handshake.state)
        .bind(&handshake.user_id)
        .bind(&handshake.pkce_verifier)
        .bind(&handshake.return_origin)
        .bind(&handshake.user_email)
        .bind(&handshake.user_timezone)
        .bind(handshake.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Atomically read and delete a handshake.
    ///
    /// A second call for the same state returns `None`, which makes replay
    /// of a state value impossible.
    pub async fn consume_handshake(&self, state: &str) -> Result<Option<OAuthHandshake>> {
        let row = sqlx::query(
            r#"
            DELETE FROM oauth_handshakes WHERE state = ?
            RETURNING state, user_id, pkce_verifier, return_origin, user_email, user_timezone, created_at
            "#,
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| OAuthHandshake {
            state: r.get("state"),
            user_id: r.get("user_id"),
            pkce_verifier: r.get("pkce_verifier"),
            return_origin: r.get("return_origin"),
            user_email: r.get("user_email"),
            user_timezone: r.get("user_timezone"),
            created_at: r.get("created_at"),
        }))
    }

    /// Drop handshakes created before the cutoff. Returns how many were removed.
    pub async fn delete_stale_handshakes(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oauth_handshakes WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Channel credentials
    // ========================================================================

    /// Insert or update a credential after a successful authorization.
    ///
    /// Conflict key is (user_id, platform_account_id): reconnecting the same
    /// account overwrites tokens and identity in place. The saved row is
    /// activated and any sibling row for the same (user_id, platform) is
    /// deactivated, keeping at most one active credential per pair.
    pub async fn upsert_credential(&self, credential: &ChannelCredential) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO channel_credentials
                (id, user_id, platform, platform_account_id, handle, display_name, avatar_url,
                 access_token, refresh_token, access_token_expiry, timezone, activated,
                 error_message, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, NULL, ?)
            ON CONFLICT (user_id, platform_account_id) DO UPDATE SET
                handle = excluded.handle,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                access_token_expiry = excluded.access_token_expiry,
                timezone = excluded.timezone,
                activated = 1,
                error_message = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.user_id)
        .bind(credential.platform.as_str())
        .bind(&credential.platform_account_id)
        .bind(&credential.handle)
        .bind(&credential.display_name)
        .bind(&credential.avatar_url)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.access_token_expiry)
        .bind(&credential.timezone)
        .bind(credential.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            UPDATE channel_credentials SET activated = 0, updated_at = ?
            WHERE user_id = ? AND platform = ? AND platform_account_id != ?
            "#,
        )
        .bind(credential.updated_at)
        .bind(&credential.user_id)
        .bind(credential.platform.as_str())
        .bind(&credential.platform_account_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_credential(&self, id: &str) -> Result<Option<ChannelCredential>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, platform_account_id, handle, display_name, avatar_url,
                   access_token, refresh_token, access_token_expiry, timezone, activated,
                   error_message, updated_at
            FROM channel_credentials WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(credential_from_row).transpose()
    }

    /// The one activated credential for a (user, platform) pair, if any.
    pub async fn active_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<ChannelCredential>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, platform_account_id, handle, display_name, avatar_url,
                   access_token, refresh_token, access_token_expiry, timezone, activated,
                   error_message, updated_at
            FROM channel_credentials
            WHERE user_id = ? AND platform = ? AND activated = 1
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(credential_from_row).transpose()
    }

    /// Overwrite token material after a successful refresh and clear any
    /// prior error.
    pub async fn update_credential_tokens(&self, id: &str, tokens: &TokenSet) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE channel_credentials
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                access_token_expiry = ?,
                error_message = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(tokens.expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Terminal state for a credential whose refresh token no longer works:
    /// the user must re-authorize.
    pub async fn deactivate_credential(&self, id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE channel_credentials
            SET activated = 0, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(truncate_detail(error_message))
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ========================================================================
    // Scheduled posts
    // ========================================================================

    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (id, user_id, platform, handle, content, scheduled_date, scheduled_time,
                 schedule_status, sent_post, posted_at, remote_post_id, error_message,
                 status_detail, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(post.platform.as_str())
        .bind(&post.handle)
        .bind(&post.content)
        .bind(post.scheduled_date.format("%Y-%m-%d").to_string())
        .bind(post.scheduled_time.format("%H:%M:%S").to_string())
        .bind(post.schedule_status as i32)
        .bind(post.sent_post as i32)
        .bind(post.posted_at)
        .bind(&post.remote_post_id)
        .bind(&post.error_message)
        .bind(post.status_detail.map(|d| d.as_str()))
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, handle, content, scheduled_date, scheduled_time,
                   schedule_status, sent_post, posted_at, remote_post_id, error_message,
                   status_detail, updated_at
            FROM scheduled_posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(post_from_row).transpose()
    }

    /// Sweep candidates: still pending and scheduled on the given UTC
    /// calendar date, for one platform.
    pub async fn pending_posts_for_date(
        &self,
        platform: Platform,
        date: chrono::NaiveDate,
    ) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, platform, handle, content, scheduled_date, scheduled_time,
                   schedule_status, sent_post, posted_at, remote_post_id, error_message,
                   status_detail, updated_at
            FROM scheduled_posts
            WHERE platform = ? AND scheduled_date = ? AND schedule_status = 1 AND sent_post = 0
            ORDER BY scheduled_time ASC
            "#,
        )
        .bind(platform.as_str())
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(post_from_row).collect()
    }

    /// Terminal success transition. Conditional on the post not already
    /// being terminal; returns false when another dispatch got there first,
    /// in which case the caller must not overwrite anything.
    pub async fn mark_post_sent(
        &self,
        post_id: &str,
        remote_post_id: &str,
        detail: StatusDetail,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET sent_post = 1, schedule_status = 0, posted_at = ?, remote_post_id = ?,
                status_detail = ?, error_message = NULL, updated_at = ?
            WHERE id = ? AND sent_post = 0 AND schedule_status = 1
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(remote_post_id)
        .bind(detail.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal non-success transition (duplicate absorbed or failed):
    /// clears schedule_status, leaves sent_post untouched at 0. Conditional
    /// on sent_post still being 0 so a concurrent success is never
    /// downgraded.
    pub async fn finish_post_unsent(
        &self,
        post_id: &str,
        detail: StatusDetail,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET schedule_status = 0, status_detail = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND sent_post = 0 AND schedule_status = 1
            "#,
        )
        .bind(detail.as_str())
        .bind(error_message.map(truncate_detail))
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }
}

fn credential_from_row(r: sqlx::sqlite::SqliteRow) -> Result<ChannelCredential> {
    let platform_str: String = r.get("platform");
    let platform = Platform::from_str(&platform_str)
        .map_err(DbError::CorruptRow)?;

    Ok(ChannelCredential {
        id: r.get("id"),
        user_id: r.get("user_id"),
        platform,
        platform_account_id: r.get("platform_account_id"),
        handle: r.get("handle"),
        display_name: r.get("display_name"),
        avatar_url: r.get("avatar_url"),
        access_token: r.get("access_token"),
        refresh_token: r.get("refresh_token"),
        access_token_expiry: r.get("access_token_expiry"),
        timezone: r.get("timezone"),
        activated: r.get::<i32, _>("activated") != 0,
        error_message: r.get("error_message"),
        updated_at: r.get("updated_at"),
    })
}

fn post_from_row(r: sqlx::sqlite::SqliteRow) -> Result<ScheduledPost> {
    let platform_str: String = r.get("platform");
    let platform = Platform::from_str(&platform_str)
        .map_err(DbError::CorruptRow)?;

    let date_str: String = r.get("scheduled_date");
    let scheduled_date = chrono::NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| DbError::CorruptRow(format!("scheduled_date '{}': {}", date_str, e)))?;

    let time_str: String = r.get("scheduled_time");
    let scheduled_time = chrono::NaiveTime::parse_from_str(&time_str, "%H:%M:%S")
        .map_err(|e| DbError::CorruptRow(format!("scheduled_time '{}': {}", time_str, e)))?;

    let status_detail = r
        .get::<Option<String>, _>("status_detail")
        .map(|s| StatusDetail::from_str(&s).map_err(DbError::CorruptRow))
        .transpose()?;

    Ok(ScheduledPost {
        id: r.get("id"),
        user_id: r.get("user_id"),
        platform,
        handle: r.get("handle"),
        content: r.get("content"),
        scheduled_date,
        scheduled_time,
        schedule_status: r.get::<i32, _>("schedule_status") != 0,
        sent_post: r.get::<i32, _>("sent_post") != 0,
        posted_at: r.get("posted_at"),
        remote_post_id: r.get("remote_post_id"),
        error_message: r.get("error_message"),
        status_detail,
        updated_at: r.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelIdentity, TokenSet};
    use chrono::{NaiveDate, NaiveTime};

    fn test_handshake(state: &str) -> OAuthHandshake {
        OAuthHandshake {
            state: state.to_string(),
            user_id: "user-1".to_string(),
            pkce_verifier: Some("verifier".to_string()),
            return_origin: "https://app.example.com".to_string(),
            user_email: "alice@example.com".to_string(),
            user_timezone: "America/New_York".to_string(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    fn test_credential(user_id: &str, platform: Platform, account_id: &str) -> ChannelCredential {
        ChannelCredential::new(
            user_id.to_string(),
            platform,
            ChannelIdentity {
                platform_account_id: account_id.to_string(),
                handle: "@alice".to_string(),
                display_name: "Alice".to_string(),
                avatar_url: None,
            },
            TokenSet {
                access_token: "at".to_string(),
                refresh_token: Some("rt".to_string()),
                expires_at: None,
            },
            "America/New_York".to_string(),
        )
    }

    fn test_post(user_id: &str, platform: Platform) -> ScheduledPost {
        ScheduledPost::new(
            user_id.to_string(),
            platform,
            "@alice".to_string(),
            "Hello world".to_string(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_handshake_consumed_exactly_once() {
        let db = Database::in_memory().await.unwrap();
        db.insert_handshake(&test_handshake("state-abc")).await.unwrap();

        let first = db.consume_handshake("state-abc").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().user_id, "user-1");

        // Replay: second consume must miss.
        let second = db.consume_handshake("state-abc").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_consume_unknown_handshake() {
        let db = Database::in_memory().await.unwrap();
        let result = db.consume_handshake("never-created").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete_stale_handshakes() {
        let db = Database::in_memory().await.unwrap();
        let mut old = test_handshake("old-state");
        old.created_at = chrono::Utc::now().timestamp() - 3600;
        db.insert_handshake(&old).await.unwrap();
        db.insert_handshake(&test_handshake("fresh-state")).await.unwrap();

        let cutoff = chrono::Utc::now().timestamp() - 600;
        let removed = db.delete_stale_handshakes(cutoff).await.unwrap();
        assert_eq!(removed, 1);

        assert!(db.consume_handshake("old-state").await.unwrap().is_none());
        assert!(db.consume_handshake("fresh-state").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_credential_and_lookup() {
        let db = Database::in_memory().await.unwrap();
        let cred = test_credential("user-1", Platform::Twitter, "acct-1");
        db.upsert_credential(&cred).await.unwrap();

        let loaded = db.get_credential(&cred.id).await.unwrap().unwrap();
        assert_eq!(loaded.platform, Platform::Twitter);
        assert_eq!(loaded.platform_account_id, "acct-1");
        assert!(loaded.activated);

        let active = db
            .active_credential("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, cred.id);
    }

    #[tokio::test]
    async fn test_upsert_reconnect_overwrites_tokens() {
        let db = Database::in_memory().await.unwrap();
        let cred = test_credential("user-1", Platform::Twitter, "acct-1");
        db.upsert_credential(&cred).await.unwrap();
        db.deactivate_credential(&cred.id, "refresh token expired").await.unwrap();

        // Reconnect with the same platform account: same row revived.
        let mut reconnect = test_credential("user-1", Platform::Twitter, "acct-1");
        reconnect.access_token = "new-at".to_string();
        db.upsert_credential(&reconnect).await.unwrap();

        let loaded = db.get_credential(&cred.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "new-at");
        assert!(loaded.activated);
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_upsert_deactivates_sibling_accounts() {
        let db = Database::in_memory().await.unwrap();
        let first = test_credential("user-1", Platform::Twitter, "acct-1");
        db.upsert_credential(&first).await.unwrap();

        let second = test_credential("user-1", Platform::Twitter, "acct-2");
        db.upsert_credential(&second).await.unwrap();

        // Exactly one activated row per (user, platform).
        let active = db
            .active_credential("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.platform_account_id, "acct-2");

        let old = db.get_credential(&first.id).await.unwrap().unwrap();
        assert!(!old.activated);
    }

    #[tokio::test]
    async fn test_upsert_does_not_touch_other_platforms() {
        let db = Database::in_memory().await.unwrap();
        let twitter = test_credential("user-1", Platform::Twitter, "acct-tw");
        let linkedin = test_credential("user-1", Platform::Linkedin, "acct-li");
        db.upsert_credential(&twitter).await.unwrap();
        db.upsert_credential(&linkedin).await.unwrap();

        assert!(db
            .active_credential("user-1", Platform::Twitter)
            .await
            .unwrap()
            .is_some());
        assert!(db
            .active_credential("user-1", Platform::Linkedin)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_update_tokens_keeps_refresh_when_absent() {
        let db = Database::in_memory().await.unwrap();
        let cred = test_credential("user-1", Platform::Twitter, "acct-1");
        db.upsert_credential(&cred).await.unwrap();

        // Refresh responses may omit a rotated refresh token.
        let tokens = TokenSet {
            access_token: "at-2".to_string(),
            refresh_token: None,
            expires_at: Some(1_900_000_000),
        };
        db.update_credential_tokens(&cred.id, &tokens).await.unwrap();

        let loaded = db.get_credential(&cred.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at-2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt"));
        assert_eq!(loaded.access_token_expiry, Some(1_900_000_000));
    }

    #[tokio::test]
    async fn test_deactivate_credential_records_error() {
        let db = Database::in_memory().await.unwrap();
        let cred = test_credential("user-1", Platform::Linkedin, "acct-1");
        db.upsert_credential(&cred).await.unwrap();

        db.deactivate_credential(&cred.id, "invalid_grant").await.unwrap();

        let loaded = db.get_credential(&cred.id).await.unwrap().unwrap();
        assert!(!loaded.activated);
        assert_eq!(loaded.error_message.as_deref(), Some("invalid_grant"));
        assert!(db
            .active_credential("user-1", Platform::Linkedin)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_and_get_post() {
        let db = Database::in_memory().await.unwrap();
        let post = test_post("user-1", Platform::Twitter);
        db.create_post(&post).await.unwrap();

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "Hello world");
        assert_eq!(loaded.scheduled_time, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert!(loaded.schedule_status);
        assert!(!loaded.sent_post);
    }

    #[tokio::test]
    async fn test_pending_posts_filters_date_platform_and_state() {
        let db = Database::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let due = test_post("user-1", Platform::Twitter);
        db.create_post(&due).await.unwrap();

        let mut other_day = test_post("user-1", Platform::Twitter);
        other_day.scheduled_date = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        db.create_post(&other_day).await.unwrap();

        let other_platform = test_post("user-1", Platform::Bluesky);
        db.create_post(&other_platform).await.unwrap();

        let mut concluded = test_post("user-1", Platform::Twitter);
        concluded.schedule_status = false;
        db.create_post(&concluded).await.unwrap();

        let pending = db.pending_posts_for_date(Platform::Twitter, date).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, due.id);
    }

    #[tokio::test]
    async fn test_mark_post_sent_is_conditional() {
        let db = Database::in_memory().await.unwrap();
        let post = test_post("user-1", Platform::Twitter);
        db.create_post(&post).await.unwrap();

        let first = db
            .mark_post_sent(&post.id, "remote-1", StatusDetail::InitialSuccess)
            .await
            .unwrap();
        assert!(first);

        // A second winner must not overwrite the recorded result.
        let second = db
            .mark_post_sent(&post.id, "remote-2", StatusDetail::RetrySuccess)
            .await
            .unwrap();
        assert!(!second);

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert!(loaded.sent_post);
        assert!(!loaded.schedule_status);
        assert_eq!(loaded.remote_post_id.as_deref(), Some("remote-1"));
        assert_eq!(loaded.status_detail, Some(StatusDetail::InitialSuccess));
    }

    #[tokio::test]
    async fn test_finish_unsent_never_downgrades_sent_post() {
        let db = Database::in_memory().await.unwrap();
        let post = test_post("user-1", Platform::Twitter);
        db.create_post(&post).await.unwrap();

        db.mark_post_sent(&post.id, "remote-1", StatusDetail::InitialSuccess)
            .await
            .unwrap();

        let changed = db
            .finish_post_unsent(&post.id, StatusDetail::InitialFailure, Some("late failure"))
            .await
            .unwrap();
        assert!(!changed);

        // Terminal monotonicity: sent_post stays true.
        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert!(loaded.sent_post);
        assert_eq!(loaded.status_detail, Some(StatusDetail::InitialSuccess));
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_finish_unsent_records_duplicate() {
        let db = Database::in_memory().await.unwrap();
        let post = test_post("user-1", Platform::Twitter);
        db.create_post(&post).await.unwrap();

        let changed = db
            .finish_post_unsent(
                &post.id,
                StatusDetail::SkippedDuplicateTweet,
                Some("status is a duplicate"),
            )
            .await
            .unwrap();
        assert!(changed);

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert!(!loaded.sent_post);
        assert!(!loaded.schedule_status);
        assert_eq!(loaded.status_detail, Some(StatusDetail::SkippedDuplicateTweet));
    }

    #[test]
    fn test_truncate_detail_limits_length() {
        let long = "x".repeat(2000);
        let truncated = truncate_detail(&long);
        assert_eq!(truncated.len(), 500);

        let short = "short error";
        assert_eq!(truncate_detail(short), short);
    }
}
