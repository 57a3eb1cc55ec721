//! Narrow capability surface shared by both provider adapters (spec §9:
//! "adapter polymorphism"). IMAP and Graph expose overlapping but not
//! identical operations; this models only the intersection the
//! orchestrator actually needs, rather than the broader per-provider
//! APIs (send, labels, threads) that are explicit non-goals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MailmeshResult;
use crate::folder::RawFolder;
use crate::parser::CanonicalMessage;

/// Per-(account, folder) progress marker: an IMAP UID or a Graph instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    Uid(u32),
    Timestamp(DateTime<Utc>),
}

/// One message plus the raw flags/uid the orchestrator needs to persist
/// alongside the parsed record.
pub struct FetchedMessage {
    pub uid: u32,
    pub message: CanonicalMessage,
}

/// The capability set both adapters implement: list folders, fetch
/// everything at or past a watermark, and report the provider's current
/// high watermark for a folder.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn list_folders(&self) -> MailmeshResult<Vec<RawFolder>>;

    async fn highest_watermark(&self, folder: &str) -> MailmeshResult<Watermark>;

    /// Fetches all messages in `folder` at or past `since`, re-sorted
    /// newest-first and fetched in batches of `chunk_size` UIDs per
    /// round-trip (spec §4.7.3: 50 incremental, 100 initial). The Graph
    /// adapter has no UID range to batch and ignores `chunk_size`,
    /// paging instead via `@odata.nextLink`.
    /// `folder_id_hint` lets a caller that already cached a provider-side
    /// folder id (spec §9 open question (b)) skip re-resolving it; the
    /// IMAP adapter, which addresses folders by path, ignores it.
    async fn fetch_since(
        &self,
        folder: &str,
        since: Watermark,
        folder_id_hint: Option<&str>,
        chunk_size: usize,
    ) -> MailmeshResult<Vec<FetchedMessage>>;

    /// Resolves a canonical folder name to a provider-side folder id
    /// worth caching (spec §9 open question (b)). IMAP has no separate
    /// folder id and returns `Ok(None)`.
    async fn resolve_folder_id(&self, _folder: &str) -> MailmeshResult<Option<String>> {
        Ok(None)
    }

    /// Connects, immediately logs out, and reports success/failure
    /// without propagating an error — used by onboarding validation
    /// (spec §4.2 `testConnection`).
    async fn test_connection(&self) -> ConnectionProbe;

    /// The provider's per-folder generation counter, if it has one (spec
    /// §9 open question (a): IMAP `UIDVALIDITY`). A decrease or reset
    /// from a previously observed value means prior UIDs for this folder
    /// are no longer meaningful. Graph has no equivalent and returns
    /// `Ok(None)`.
    async fn folder_generation(&self, _folder: &str) -> MailmeshResult<Option<i64>> {
        Ok(None)
    }
}

pub struct ConnectionProbe {
    pub ok: bool,
    pub error: Option<String>,
}
