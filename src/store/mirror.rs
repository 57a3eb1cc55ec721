//! Idempotent mirror store (spec §4.5).

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::MailmeshResult;

use super::fts::FtsIndex;
use super::models::{MailAccount, Message, NewMessage};

#[derive(Clone)]
pub struct MirrorStore {
    pool: PgPool,
    fts: Option<Arc<FtsIndex>>,
}

impl MirrorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, fts: None }
    }

    /// Same as [`Self::new`], but also keeps the tantivy secondary index
    /// (spec §4.5) up to date from the same write path as the Postgres
    /// mirror, so the two never diverge.
    pub fn with_fts_index(pool: PgPool, fts: Arc<FtsIndex>) -> Self {
        Self { pool, fts: Some(fts) }
    }

    /// Inserts a message, absorbing a duplicate `(accountId, uid,
    /// folder)` silently (spec §4.5: "inserts collide → silently
    /// skipped"). Returns the new row's id, or `None` if the triple
    /// already existed.
    #[tracing::instrument(skip(self, msg))]
    pub async fn insert_message(&self, msg: NewMessage) -> MailmeshResult<Option<Uuid>> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO message (
                id, account_id, uid, folder, message_id, from_addr, to_addrs,
                subject, body, html_body, is_read, received_at, fetched_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (account_id, uid, folder) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(msg.account_id)
        .bind(msg.uid)
        .bind(&msg.folder)
        .bind(&msg.message_id)
        .bind(&msg.from_addr)
        .bind(&msg.to_addrs)
        .bind(&msg.subject)
        .bind(&msg.body)
        .bind(&msg.html_body)
        .bind(msg.is_read)
        .bind(msg.received_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        if let Some(fts) = &self.fts {
            fts.upsert(
                id,
                &msg.subject,
                &msg.body,
                &msg.from_addr,
                msg.received_at.timestamp(),
            )
            .await?;
        }

        Ok(Some(id))
    }

    /// Checks all rows including soft-deleted ones, so re-sync does not
    /// resurrect a tombstone (spec §4.5).
    pub async fn exists_by_uid_folder_account(
        &self,
        account_id: Uuid,
        uid: i64,
        folder: &str,
    ) -> MailmeshResult<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM message WHERE account_id = $1 AND uid = $2 AND folder = $3)",
        )
        .bind(account_id)
        .bind(uid)
        .bind(folder)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// `MAX(uid)` over non-tombstoned rows for `(account, folder)`, or 0.
    pub async fn highest_uid(&self, account_id: Uuid, folder: &str) -> MailmeshResult<i64> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(uid) FROM message WHERE account_id = $1 AND folder = $2 AND deleted_at IS NULL",
        )
        .bind(account_id)
        .bind(folder)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0))
    }

    pub async fn soft_delete_message(&self, message_id: Uuid) -> MailmeshResult<()> {
        sqlx::query("UPDATE message SET deleted_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn hard_delete_message(&self, message_id: Uuid) -> MailmeshResult<()> {
        // Postgres FTS row cascades via FOREIGN KEY ... ON DELETE CASCADE.
        sqlx::query("DELETE FROM message WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        if let Some(fts) = &self.fts {
            fts.remove(message_id).await?;
        }

        Ok(())
    }

    pub async fn get_account(&self, account_id: Uuid) -> MailmeshResult<Option<MailAccount>> {
        let account = sqlx::query_as::<_, MailAccount>("SELECT * FROM mail_account WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    /// `(user, remote-email)` uniqueness check ahead of onboarding (spec
    /// §4.7.1 step 1).
    pub async fn find_account_by_user_and_email(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> MailmeshResult<Option<MailAccount>> {
        let account = sqlx::query_as::<_, MailAccount>(
            "SELECT * FROM mail_account WHERE user_id = $1 AND email = $2",
        )
        .bind(user_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    /// Persists a new IMAP-mode account with its app-password already
    /// encrypted by the caller (spec §4.7.1 step 2: "encrypt app-password,
    /// persist record").
    pub async fn insert_imap_account(
        &self,
        user_id: Uuid,
        email: &str,
        provider: &str,
        encrypted_password: &str,
    ) -> MailmeshResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO mail_account (id, user_id, email, provider, encrypted_password) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(user_id)
        .bind(email)
        .bind(provider)
        .bind(encrypted_password)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Persists a new OAuth-mode (Microsoft Graph) account (spec §4.7.1
    /// step 3).
    pub async fn insert_oauth_account(
        &self,
        user_id: Uuid,
        email: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> MailmeshResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO mail_account (id, user_id, email, provider, access_token, refresh_token) \
             VALUES ($1, $2, $3, 'outlook', $4, $5)",
        )
        .bind(id)
        .bind(user_id)
        .bind(email)
        .bind(access_token)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Accounts ordered oldest-`lastSyncedAt`-first, for the scheduler
    /// tick (spec §4.8).
    pub async fn active_accounts_oldest_first(&self) -> MailmeshResult<Vec<MailAccount>> {
        let accounts = sqlx::query_as::<_, MailAccount>(
            "SELECT * FROM mail_account ORDER BY last_synced_at ASC NULLS FIRST",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    /// Reads the generation counter previously observed for a canonical
    /// folder, if any (spec §9 open question (a)). Stored under
    /// `folder_ids->>'gen:<folder>'` alongside the Graph folder-id cache
    /// (open question (b)), since both are small per-(account, folder)
    /// side channels the mirror schema has no dedicated table for.
    pub async fn get_folder_generation(
        &self,
        account_id: Uuid,
        folder: &str,
    ) -> MailmeshResult<Option<i64>> {
        let key = format!("gen:{folder}");
        let row: (serde_json::Value,) = sqlx::query_as(
            "SELECT folder_ids FROM mail_account WHERE id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.get(key).and_then(|v| v.as_i64()))
    }

    pub async fn set_folder_generation(
        &self,
        account_id: Uuid,
        folder: &str,
        generation: i64,
    ) -> MailmeshResult<()> {
        let key = format!("gen:{folder}");
        sqlx::query(
            "UPDATE mail_account SET folder_ids = jsonb_set(folder_ids, $2, to_jsonb($3::bigint), true) WHERE id = $1",
        )
        .bind(account_id)
        .bind(vec![key])
        .bind(generation)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Caches a Graph folder id by canonical name (spec §9 open question
    /// (b)), same `folder_ids` side channel as [`Self::set_folder_generation`].
    pub async fn get_cached_graph_folder_id(
        &self,
        account_id: Uuid,
        canonical_folder: &str,
    ) -> MailmeshResult<Option<String>> {
        let key = format!("graph-id:{canonical_folder}");
        let row: (serde_json::Value,) = sqlx::query_as(
            "SELECT folder_ids FROM mail_account WHERE id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    pub async fn set_cached_graph_folder_id(
        &self,
        account_id: Uuid,
        canonical_folder: &str,
        graph_folder_id: &str,
    ) -> MailmeshResult<()> {
        let key = format!("graph-id:{canonical_folder}");
        sqlx::query(
            "UPDATE mail_account SET folder_ids = jsonb_set(folder_ids, $2, to_jsonb($3::text), true) WHERE id = $1",
        )
        .bind(account_id)
        .bind(vec![key])
        .bind(graph_folder_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_folder_synced(
        &self,
        account_id: Uuid,
        folder: &str,
        last_fetched_uid: i64,
    ) -> MailmeshResult<()> {
        sqlx::query(
            r#"
            UPDATE mail_account
            SET synced_folders = CASE
                    WHEN $2 = ANY(synced_folders) THEN synced_folders
                    ELSE array_append(synced_folders, $2)
                END,
                last_fetched_uid = GREATEST(last_fetched_uid, $3),
                last_synced_at = now()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(folder)
        .bind(last_fetched_uid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_graph_tokens(
        &self,
        account_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> MailmeshResult<()> {
        // New refresh token persisted before the access token is ever
        // used for a sync read (spec §4.1, §9 invariant 8): this update
        // commits both atomically in one statement, and callers must
        // await it before issuing any Graph request with `access_token`.
        sqlx::query(
            "UPDATE mail_account SET access_token = $2, refresh_token = COALESCE($3, refresh_token) WHERE id = $1",
        )
        .bind(account_id)
        .bind(access_token)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn messages_for_account_folder(
        &self,
        account_id: Uuid,
        folder: &str,
    ) -> MailmeshResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(
            "SELECT * FROM message WHERE account_id = $1 AND folder = $2 AND deleted_at IS NULL ORDER BY received_at DESC",
        )
        .bind(account_id)
        .bind(folder)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    // Idempotence and tombstone behavior (spec §8 invariants 3-4) need a
    // live Postgres connection to exercise the ON CONFLICT path and are
    // not covered here; this module has no query! macros so it compiles
    // without a database, but that also means it has no offline-testable
    // logic of its own beyond the key-formatting helpers above.
}
