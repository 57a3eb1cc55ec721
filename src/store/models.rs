//! Row types for the persisted schema (spec §3, SPEC_FULL.md §10.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MailAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub provider: String,
    pub encrypted_password: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub synced_folders: Vec<String>,
    pub last_fetched_uid: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub folder_ids: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MailAccount {
    /// `(user, remote-email)` is unique; an account with only a refresh
    /// token never touches the IMAP path (spec §3 invariants).
    pub fn is_oauth(&self) -> bool {
        self.refresh_token.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub account_id: Uuid,
    pub uid: i64,
    pub folder: String,
    pub message_id: Option<String>,
    pub from_addr: String,
    pub to_addrs: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub is_read: bool,
    pub received_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub storage_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub replaced_by: Option<Uuid>,
}

/// Fields required to insert a new [`Message`] row; `id`/`created_at`/
/// `fetched_at` are assigned by the store.
pub struct NewMessage {
    pub account_id: Uuid,
    pub uid: i64,
    pub folder: String,
    pub message_id: Option<String>,
    pub from_addr: String,
    pub to_addrs: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub is_read: bool,
    pub received_at: DateTime<Utc>,
}
