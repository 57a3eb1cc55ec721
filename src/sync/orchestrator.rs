//! Per-account sync orchestrator: onboarding, discovery, and delta sync
//! (spec §4.7).

use chrono::Utc;
use secrecy::Secret;
use uuid::Uuid;

use crate::error::{MailmeshError, MailmeshResult};
use crate::folder::{normalize_and_filter, sort_by_priority, RawFolder};
use crate::parser::ParsedAttachment;
use crate::providers::{ProviderAdapter, Watermark};
use crate::queue::{AttachmentUploadPayload, JobPayload, QueueBackend};
use crate::store::models::NewMessage;
use crate::store::MirrorStore;
use crate::vault::Vault;

const INITIAL_SYNC_CHUNK_SIZE: usize = 100;
const INCREMENTAL_SYNC_CHUNK_SIZE: usize = 50;

/// Outcome of one folder's delta sync.
#[derive(Debug, Default)]
pub struct FolderSyncOutcome {
    pub folder: String,
    pub emails_synced: usize,
}

pub struct Orchestrator {
    store: MirrorStore,
    vault: Vault,
    queue: QueueBackend,
}

impl Orchestrator {
    pub fn new(store: MirrorStore, vault: Vault, queue: QueueBackend) -> Self {
        Self { store, vault, queue }
    }

    /// Hands each parsed attachment of a newly-inserted message to the
    /// out-of-scope uploader, asynchronously (spec §4.4: "the sync
    /// engine does not block on attachment upload"). A folder's sync does
    /// not fail if enqueueing an attachment job fails; it is logged and
    /// skipped, matching the per-message isolation the same insert path
    /// already gets.
    async fn enqueue_attachments(&self, message_id: Uuid, attachments: Vec<ParsedAttachment>) {
        for attachment in attachments {
            let payload = JobPayload::AttachmentUpload(AttachmentUploadPayload {
                message_id,
                filename: attachment.filename,
                bytes: attachment.bytes,
                content_type: attachment.content_type,
            });
            if let Err(err) = self.queue.enqueue(payload).await {
                tracing::warn!(%message_id, error = %err, "failed to enqueue attachment upload");
            }
        }
    }

    /// Detects the provider from an email domain (spec §4.7.1). Unknown
    /// domains are rejected during onboarding.
    pub fn detect_provider(email: &str) -> Option<&'static str> {
        let domain = email.rsplit('@').next()?.to_lowercase();
        match domain.as_str() {
            "gmail.com" => Some("gmail"),
            "outlook.com" | "live.com" => Some("outlook"),
            "hotmail.com" => Some("hotmail"),
            "yahoo.com" => Some("yahoo"),
            "icloud.com" | "me.com" => Some("icloud"),
            "aol.com" => Some("aol"),
            _ => None,
        }
    }

    /// Well-known IMAP host/port for a detected provider. Providers that
    /// only speak Graph (`outlook`, `hotmail`) have no IMAP endpoint here.
    pub fn imap_endpoint(provider: &str) -> Option<(&'static str, u16)> {
        match provider {
            "gmail" => Some(("imap.gmail.com", 993)),
            "yahoo" => Some(("imap.mail.yahoo.com", 993)),
            "icloud" => Some(("imap.mail.me.com", 993)),
            "aol" => Some(("imap.aol.com", 993)),
            _ => None,
        }
    }

    /// Onboards an IMAP-mode account (spec §4.7.1 step 2): rejects an
    /// already-linked `(user, email)` pair, validates credentials with a
    /// live connect/logout, encrypts the app password, persists the
    /// record, and enqueues the account's first `initial-sync` job.
    /// `adapter` must already be wired with the caller-supplied
    /// credentials; this method never constructs one itself, since doing
    /// so is the binary's job (it owns `CERTS_DIR`/TLS config).
    pub async fn onboard_imap_account(
        &self,
        user_id: Uuid,
        email: &str,
        app_password: &Secret<String>,
        adapter: &dyn ProviderAdapter,
    ) -> MailmeshResult<Uuid> {
        if self
            .store
            .find_account_by_user_and_email(user_id, email)
            .await?
            .is_some()
        {
            return Err(MailmeshError::AlreadyLinked(email.to_string()));
        }

        let provider = Self::detect_provider(email).ok_or_else(|| {
            MailmeshError::Validation(format!("unrecognized mail provider for {email}"))
        })?;

        let probe = adapter.test_connection().await;
        if !probe.ok {
            return Err(MailmeshError::CredentialRejected {
                account_id: email.to_string(),
                message: probe.error.unwrap_or_else(|| "IMAP login failed".to_string()),
            });
        }

        let encrypted_password = self
            .vault
            .encrypt(app_password)
            .map_err(|e| MailmeshError::Config(e.to_string()))?;
        let account_id = self
            .store
            .insert_imap_account(user_id, email, provider, &encrypted_password)
            .await?;

        self.queue
            .enqueue(JobPayload::InitialSync(crate::queue::InitialSyncPayload {
                account_id,
                email: email.to_string(),
            }))
            .await?;

        Ok(account_id)
    }

    /// Onboards (or re-links) an OAuth-mode Graph account (spec §4.7.1
    /// step 3): if `(user, email)` already exists its tokens are rotated
    /// in place, otherwise a new record is created; either path enqueues
    /// a fresh `initial-sync`. Tokens are encrypted with the same vault
    /// used for IMAP app passwords before they ever reach the store —
    /// neither is a usable credential in plaintext at rest (spec §4.1).
    pub async fn onboard_oauth_account(
        &self,
        user_id: Uuid,
        email: &str,
        access_token: &Secret<String>,
        refresh_token: &Secret<String>,
    ) -> MailmeshResult<Uuid> {
        let encrypted_access = self
            .vault
            .encrypt(access_token)
            .map_err(|e| MailmeshError::Config(e.to_string()))?;
        let encrypted_refresh = self
            .vault
            .encrypt(refresh_token)
            .map_err(|e| MailmeshError::Config(e.to_string()))?;

        let existing = self
            .store
            .find_account_by_user_and_email(user_id, email)
            .await?;

        let account_id = match existing {
            Some(account) => {
                self.store
                    .update_graph_tokens(account.id, &encrypted_access, Some(encrypted_refresh.as_str()))
                    .await?;
                account.id
            }
            None => {
                self.store
                    .insert_oauth_account(user_id, email, &encrypted_access, &encrypted_refresh)
                    .await?
            }
        };

        self.queue
            .enqueue(JobPayload::InitialSync(crate::queue::InitialSyncPayload {
                account_id,
                email: email.to_string(),
            }))
            .await?;

        Ok(account_id)
    }

    /// Discovers folders, applies the exclusion filter, and sorts by
    /// priority (spec §4.7.2).
    pub fn discover_and_order(raw_folders: &[RawFolder]) -> Vec<String> {
        let mut canonical: Vec<String> = raw_folders
            .iter()
            .filter_map(normalize_and_filter)
            .collect();
        canonical.dedup();
        sort_by_priority(&mut canonical);
        canonical
    }

    /// Runs delta sync for one canonical folder against an IMAP
    /// adapter (spec §4.7.3). Per-folder isolation is the caller's
    /// responsibility: a `ProtocolError` here should not abort sibling
    /// folders.
    #[tracing::instrument(skip(self, adapter))]
    pub async fn delta_sync_folder(
        &self,
        adapter: &dyn ProviderAdapter,
        account_id: Uuid,
        canonical_folder: &str,
        raw_path: &str,
        initial: bool,
    ) -> MailmeshResult<FolderSyncOutcome> {
        let mut last_uid = self.store.highest_uid(account_id, canonical_folder).await?;

        // Detect a UIDVALIDITY decrease/reset (spec §9 open question (a)):
        // the server has renumbered the mailbox, so the watermark derived
        // from the mirror no longer means anything for this generation.
        let current_generation = adapter.folder_generation(raw_path).await?;
        if let Some(current) = current_generation {
            let stored = self.store.get_folder_generation(account_id, canonical_folder).await?;
            match stored {
                Some(stored) if current < stored => {
                    tracing::warn!(
                        folder = canonical_folder,
                        stored_generation = stored,
                        current_generation = current,
                        "UIDVALIDITY decreased, resetting per-folder watermark"
                    );
                    last_uid = 0;
                }
                _ => {}
            }
            self.store.set_folder_generation(account_id, canonical_folder, current).await?;
        }

        let high_watermark = adapter.highest_watermark(raw_path).await?;

        let Watermark::Uid(high_uid) = high_watermark else {
            return Err(MailmeshError::Protocol(
                "expected a UID watermark from an IMAP adapter".to_string(),
            ));
        };

        if (high_uid as i64) < last_uid + 1 {
            self.store
                .mark_folder_synced(account_id, canonical_folder, last_uid)
                .await?;
            return Ok(FolderSyncOutcome {
                folder: canonical_folder.to_string(),
                emails_synced: 0,
            });
        }

        let chunk_size = if initial {
            INITIAL_SYNC_CHUNK_SIZE
        } else {
            INCREMENTAL_SYNC_CHUNK_SIZE
        };

        let fetched = adapter
            .fetch_since(raw_path, Watermark::Uid(last_uid as u32), None, chunk_size)
            .await?;

        let mut total_synced = 0usize;
        let mut max_uid_seen = last_uid;

        // within-chunk order is reversed so the oldest-in-chunk message
        // persists first (spec §4.7.3 step 4).
        for fetched_message in fetched.into_iter().rev() {
            let uid = fetched_message.uid as i64;
            if self
                .store
                .exists_by_uid_folder_account(account_id, uid, canonical_folder)
                .await?
            {
                continue;
            }

            let mut message = fetched_message.message;
            let attachments = std::mem::take(&mut message.attachments);
            let new_message = NewMessage {
                account_id,
                uid,
                folder: canonical_folder.to_string(),
                message_id: message.message_id,
                from_addr: message.from,
                to_addrs: message.to,
                subject: message.subject,
                body: message.body,
                html_body: message.html_body,
                is_read: message.is_read,
                received_at: message.received_at,
            };

            if let Some(id) = self.store.insert_message(new_message).await? {
                total_synced += 1;
                self.enqueue_attachments(id, attachments).await;
            }
            max_uid_seen = max_uid_seen.max(uid);
        }

        self.store
            .mark_folder_synced(account_id, canonical_folder, max_uid_seen)
            .await?;

        Ok(FolderSyncOutcome {
            folder: canonical_folder.to_string(),
            emails_synced: total_synced,
        })
    }

    /// Runs delta sync for one canonical folder against a Graph
    /// adapter (spec §4.7.4), assigning synthetic UIDs so the mirror's
    /// `(accountId, uid, folder)` uniqueness contract is preserved.
    #[tracing::instrument(skip(self, adapter))]
    pub async fn delta_sync_folder_graph(
        &self,
        adapter: &dyn ProviderAdapter,
        account_id: Uuid,
        canonical_folder: &str,
        since: chrono::DateTime<Utc>,
    ) -> MailmeshResult<FolderSyncOutcome> {
        // Cache the Graph folder id by canonical name (spec §9 open
        // question (b)) instead of resolving it by display-name lookup
        // on every sync call.
        let cached_folder_id = self
            .store
            .get_cached_graph_folder_id(account_id, canonical_folder)
            .await?;
        let folder_id = match cached_folder_id {
            Some(id) => Some(id),
            None => {
                let resolved = adapter.resolve_folder_id(canonical_folder).await?;
                if let Some(id) = &resolved {
                    self.store
                        .set_cached_graph_folder_id(account_id, canonical_folder, id)
                        .await?;
                }
                resolved
            }
        };

        let fetched = adapter
            .fetch_since(
                canonical_folder,
                Watermark::Timestamp(since),
                folder_id.as_deref(),
                INCREMENTAL_SYNC_CHUNK_SIZE,
            )
            .await?;

        let mirror_max = self.store.highest_uid(account_id, canonical_folder).await?;
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| MailmeshError::NotFound(format!("account {account_id}")))?;
        let mut next_uid = account.last_fetched_uid.max(mirror_max) + 1;

        let mut total_synced = 0usize;
        for fetched_message in fetched {
            let uid = next_uid;
            next_uid += 1;

            let mut message = fetched_message.message;
            let attachments = std::mem::take(&mut message.attachments);
            let new_message = NewMessage {
                account_id,
                uid,
                folder: canonical_folder.to_string(),
                message_id: message.message_id,
                from_addr: message.from,
                to_addrs: message.to,
                subject: message.subject,
                body: message.body,
                html_body: message.html_body,
                is_read: message.is_read,
                received_at: message.received_at,
            };
            if let Some(id) = self.store.insert_message(new_message).await? {
                total_synced += 1;
                self.enqueue_attachments(id, attachments).await;
            }
        }

        self.store
            .mark_folder_synced(account_id, canonical_folder, next_uid - 1)
            .await?;

        Ok(FolderSyncOutcome {
            folder: canonical_folder.to_string(),
            emails_synced: total_synced,
        })
    }

    /// Rotates the Graph refresh token before the matching access token
    /// is used for any sync read (spec §4.1, §9 invariant 8).
    pub async fn persist_rotated_tokens(
        &self,
        account_id: Uuid,
        access_token: &Secret<String>,
        refresh_token: Option<&Secret<String>>,
    ) -> MailmeshResult<()> {
        let encrypted_access = self
            .vault
            .encrypt(access_token)
            .map_err(|e| MailmeshError::Config(e.to_string()))?;
        let encrypted_refresh = refresh_token
            .map(|t| self.vault.encrypt(t))
            .transpose()
            .map_err(|e| MailmeshError::Config(e.to_string()))?;
        self.store
            .update_graph_tokens(account_id, &encrypted_access, encrypted_refresh.as_deref())
            .await
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_providers() {
        assert_eq!(Orchestrator::detect_provider("user@gmail.com"), Some("gmail"));
        assert_eq!(Orchestrator::detect_provider("user@outlook.com"), Some("outlook"));
        assert_eq!(Orchestrator::detect_provider("user@live.com"), Some("outlook"));
        assert_eq!(Orchestrator::detect_provider("user@icloud.com"), Some("icloud"));
    }

    #[test]
    fn rejects_unknown_domain() {
        assert_eq!(Orchestrator::detect_provider("user@example.net"), None);
    }

    #[test]
    fn graph_only_providers_have_no_imap_endpoint() {
        assert_eq!(Orchestrator::imap_endpoint("outlook"), None);
        assert_eq!(Orchestrator::imap_endpoint("gmail"), Some(("imap.gmail.com", 993)));
    }

    #[test]
    fn discover_and_order_filters_then_sorts() {
        let folders = vec![
            RawFolder {
                path: "[Gmail]/All Mail".to_string(),
                provider: "gmail".to_string(),
                special_use: None,
                flags: vec![],
            },
            RawFolder {
                path: "INBOX".to_string(),
                provider: "gmail".to_string(),
                special_use: None,
                flags: vec![],
            },
            RawFolder {
                path: "[Gmail]/Sent Mail".to_string(),
                provider: "gmail".to_string(),
                special_use: None,
                flags: vec![],
            },
        ];
        let ordered = Orchestrator::discover_and_order(&folders);
        assert_eq!(ordered, vec!["INBOX".to_string(), "Sent".to_string()]);
    }
}
