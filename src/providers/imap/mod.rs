//! IMAP provider adapter (spec §4.2).

pub mod connection;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::Mutex;

use crate::error::{MailmeshError, MailmeshResult};
use crate::folder::RawFolder;
use crate::parser::imap as imap_parser;
use crate::providers::traits::{ConnectionProbe, FetchedMessage, ProviderAdapter, Watermark};

use connection::{connect, test_connection, ImapConnectionConfig, ImapSession};

/// A live IMAP adapter. Holds one connection behind a mutex — per spec
/// §4.2/§5, a mailbox lock serializes access to a single IMAP session;
/// one account is not expected to run more than one concurrent sync.
pub struct ImapAdapter {
    config: ImapConnectionConfig,
    session: Arc<Mutex<Option<ImapSession>>>,
}

impl ImapAdapter {
    pub fn new(config: ImapConnectionConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_session<F, T>(&self, f: F) -> MailmeshResult<T>
    where
        F: for<'a> FnOnce(
            &'a mut ImapSession,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = MailmeshResult<T>> + Send + 'a>>,
    {
        // Acquire a fresh connection if none is cached. The mailbox lock
        // (the outer `Mutex`) is released on every exit path, including
        // failure, by virtue of the guard's drop.
        let mut session = {
            let mut guard = self.session.lock();
            guard.take()
        };
        if session.is_none() {
            session = Some(connect(&self.config).await?);
        }
        let mut session = session.unwrap();
        let result = f(&mut session).await;
        *self.session.lock() = Some(session);
        result
    }
}

#[async_trait]
impl ProviderAdapter for ImapAdapter {
    async fn list_folders(&self) -> MailmeshResult<Vec<RawFolder>> {
        self.with_session(|session| {
            Box::pin(async move {
                let names: Vec<async_imap::types::Name> = match session {
                    ImapSession::Tls(s) => {
                        let stream = s
                            .list(Some(""), Some("*"))
                            .await
                            .map_err(|e| MailmeshError::Protocol(e.to_string()))?;
                        stream.try_collect().await
                    }
                    ImapSession::Plain(s) => {
                        let stream = s
                            .list(Some(""), Some("*"))
                            .await
                            .map_err(|e| MailmeshError::Protocol(e.to_string()))?;
                        stream.try_collect().await
                    }
                }
                .map_err(|e| MailmeshError::Protocol(e.to_string()))?;

                Ok(names
                    .into_iter()
                    .map(|name| RawFolder {
                        path: name.name().to_string(),
                        provider: "imap".to_string(),
                        special_use: name
                            .attributes()
                            .iter()
                            .find_map(|a| special_use_attribute(a))
                            .map(|s| s.to_string()),
                        flags: name
                            .attributes()
                            .iter()
                            .filter_map(|a| special_use_attribute(a))
                            .map(|s| s.to_string())
                            .collect(),
                    })
                    .collect())
            })
        })
        .await
    }

    async fn highest_watermark(&self, folder: &str) -> MailmeshResult<Watermark> {
        let folder = folder.to_string();
        self.with_session(move |session| {
            Box::pin(async move {
                let status = match session {
                    ImapSession::Tls(s) => {
                        s.status(&folder, "(UIDNEXT)")
                            .await
                            .map_err(|e| MailmeshError::Protocol(e.to_string()))?
                    }
                    ImapSession::Plain(s) => {
                        s.status(&folder, "(UIDNEXT)")
                            .await
                            .map_err(|e| MailmeshError::Protocol(e.to_string()))?
                    }
                };
                let uid_next = status.uid_next.unwrap_or(1);
                Ok(Watermark::Uid(uid_next.saturating_sub(1)))
            })
        })
        .await
    }

    async fn fetch_since(
        &self,
        folder: &str,
        since: Watermark,
        _folder_id_hint: Option<&str>,
        chunk_size: usize,
    ) -> MailmeshResult<Vec<FetchedMessage>> {
        let start_uid = match since {
            Watermark::Uid(uid) => uid + 1,
            Watermark::Timestamp(_) => {
                return Err(MailmeshError::Protocol(
                    "IMAP adapter requires a UID watermark".to_string(),
                ))
            }
        };
        let folder = folder.to_string();
        self.with_session(move |session| {
            Box::pin(async move {
                match session {
                    ImapSession::Tls(s) => {
                        s.select(&folder)
                            .await
                            .map_err(|e| MailmeshError::Protocol(e.to_string()))?;
                    }
                    ImapSession::Plain(s) => {
                        s.select(&folder)
                            .await
                            .map_err(|e| MailmeshError::Protocol(e.to_string()))?;
                    }
                }

                let present_uids = uid_search_from_start(session, start_uid).await?;
                if present_uids.is_empty() {
                    return Ok(Vec::new());
                }

                let mut sorted: Vec<u32> = present_uids.into_iter().collect();
                sorted.sort_unstable_by(|a, b| b.cmp(a)); // newest first, spec §4.7.3

                let mut out = Vec::new();
                for chunk in sorted.chunks(chunk_size.max(1)) {
                    let lo = *chunk.iter().min().unwrap();
                    let hi = *chunk.iter().max().unwrap();
                    let fetches = uid_fetch_range(session, lo, hi).await?;
                    for fetch in fetches {
                        let uid = match fetch.uid {
                            Some(uid) => uid,
                            None => continue,
                        };
                        let body = match fetch.body() {
                            Some(b) => b,
                            None => continue,
                        };
                        let flags: Vec<String> = fetch.flags().map(|f| format!("{:?}", f)).collect();
                        match imap_parser::parse(body, &flags) {
                            Ok(message) => out.push(FetchedMessage { uid, message }),
                            Err(e) => {
                                tracing::warn!(uid, error = %e, "skipping unparsable message");
                            }
                        }
                    }
                }
                Ok(out)
            })
        })
        .await
    }

    async fn test_connection(&self) -> ConnectionProbe {
        let (ok, error) = test_connection(&self.config).await;
        ConnectionProbe { ok, error }
    }

    /// `STATUS (UIDVALIDITY)` (spec §9 open question (a)).
    async fn folder_generation(&self, folder: &str) -> MailmeshResult<Option<i64>> {
        let folder = folder.to_string();
        self.with_session(move |session| {
            Box::pin(async move {
                let status = match session {
                    ImapSession::Tls(s) => s
                        .status(&folder, "(UIDVALIDITY)")
                        .await
                        .map_err(|e| MailmeshError::Protocol(e.to_string()))?,
                    ImapSession::Plain(s) => s
                        .status(&folder, "(UIDVALIDITY)")
                        .await
                        .map_err(|e| MailmeshError::Protocol(e.to_string()))?,
                };
                Ok(status.uid_validity.map(|v| v as i64))
            })
        })
        .await
    }
}

fn special_use_attribute(attr: &async_imap::types::NameAttribute) -> Option<&'static str> {
    match format!("{:?}", attr).as_str() {
        s if s.contains("Sent") => Some("\\Sent"),
        s if s.contains("Drafts") => Some("\\Drafts"),
        s if s.contains("Trash") => Some("\\Trash"),
        s if s.contains("Junk") => Some("\\Junk"),
        s if s.contains("Archive") => Some("\\Archive"),
        _ => None,
    }
}

/// `searchUidsFromStart` (spec §4.2): the set of UIDs ≥ `start_uid`
/// actually present on the server, handling sparse UID spaces in
/// Trash/Spam where many UIDs have been expunged.
async fn uid_search_from_start(session: &mut ImapSession, start_uid: u32) -> MailmeshResult<HashSet<u32>> {
    let query = format!("UID {}:*", start_uid);
    match session {
        ImapSession::Tls(s) => s.uid_search(&query).await,
        ImapSession::Plain(s) => s.uid_search(&query).await,
    }
    .map_err(|e| MailmeshError::Protocol(e.to_string()))
}

async fn uid_fetch_range(
    session: &mut ImapSession,
    lo: u32,
    hi: u32,
) -> MailmeshResult<Vec<async_imap::types::Fetch>> {
    let sequence = format!("{}:{}", lo, hi);
    let query = "(UID FLAGS BODY.PEEK[])";
    let stream = match session {
        ImapSession::Tls(s) => s.uid_fetch(&sequence, query).await,
        ImapSession::Plain(s) => s.uid_fetch(&sequence, query).await,
    }
    .map_err(|e| MailmeshError::Protocol(e.to_string()))?;
    stream
        .try_collect()
        .await
        .map_err(|e| MailmeshError::Protocol(e.to_string()))
}
