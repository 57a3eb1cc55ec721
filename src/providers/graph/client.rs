//! Microsoft Graph provider adapter (spec §4.7.4).

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::error::{MailmeshError, MailmeshResult};
use crate::folder::RawFolder;
use crate::parser::graph as graph_parser;
use crate::providers::traits::{ConnectionProbe, FetchedMessage, ProviderAdapter, Watermark};

const BASE_URL: &str = "https://graph.microsoft.com/v1.0";
/// Safety bound on total messages retrieved in one sync run (spec §4.7.4).
const MAX_MESSAGES_PER_RUN: usize = 500;

#[derive(Debug, Deserialize)]
struct GraphFolderPage {
    value: Vec<GraphFolder>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphFolder {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct GraphMessagePage {
    value: Vec<serde_json::Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

pub struct GraphAdapter {
    http: reqwest::Client,
    access_token: Secret<String>,
}

impl GraphAdapter {
    pub fn new(access_token: Secret<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> MailmeshResult<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| MailmeshError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MailmeshError::CredentialRejected {
                account_id: "graph".to_string(),
                message: "access token rejected (401)".to_string(),
            });
        }
        if status.is_server_error() {
            return Err(MailmeshError::ProviderUnavailable(format!(
                "Graph returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(MailmeshError::Protocol(format!("Graph returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MailmeshError::Protocol(format!("malformed Graph response: {e}")))
    }

    /// Resolves a canonical folder name to its Graph folder id by
    /// listing folders and matching on display name. Open question (b):
    /// the orchestrator should cache this result per (account, folder)
    /// rather than call it every run; this method itself stays a direct
    /// O(n) lookup so the caching policy lives in one place.
    pub async fn resolve_folder_id(&self, display_name: &str) -> MailmeshResult<Option<String>> {
        let folders = self.list_mail_folders_raw().await?;
        Ok(folders
            .into_iter()
            .find(|f| f.display_name.eq_ignore_ascii_case(display_name))
            .map(|f| f.id))
    }

    async fn list_mail_folders_raw(&self) -> MailmeshResult<Vec<GraphFolder>> {
        let mut url = format!("{BASE_URL}/me/mailFolders?$top=100");
        let mut all = Vec::new();
        loop {
            let page: GraphFolderPage = self.get_json(&url).await?;
            all.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl ProviderAdapter for GraphAdapter {
    async fn list_folders(&self) -> MailmeshResult<Vec<RawFolder>> {
        let folders = self.list_mail_folders_raw().await?;
        Ok(folders
            .into_iter()
            .map(|f| RawFolder {
                path: f.display_name,
                provider: "outlook".to_string(),
                special_use: None,
                flags: vec![],
            })
            .collect())
    }

    async fn highest_watermark(&self, _folder: &str) -> MailmeshResult<Watermark> {
        // Graph has no native UID; the caller (sync orchestrator) tracks
        // the watermark as the account's `lastSyncedAt` timestamp and
        // assigns synthetic UIDs on insert (spec §4.7.4, §9).
        Ok(Watermark::Timestamp(Utc::now()))
    }

    async fn fetch_since(
        &self,
        folder: &str,
        since: Watermark,
        folder_id_hint: Option<&str>,
        _chunk_size: usize,
    ) -> MailmeshResult<Vec<FetchedMessage>> {
        let since_ts = match since {
            Watermark::Timestamp(ts) => ts,
            Watermark::Uid(_) => {
                return Err(MailmeshError::Protocol(
                    "Graph adapter requires a timestamp watermark".to_string(),
                ))
            }
        };

        let folder_id = match folder_id_hint {
            Some(id) => id.to_string(),
            None => self
                .resolve_folder_id(folder)
                .await?
                .ok_or_else(|| MailmeshError::NotFound(format!("Graph folder {folder} not found")))?,
        };

        let filter = format!("receivedDateTime ge {}", since_ts.to_rfc3339());
        let mut url = format!(
            "{BASE_URL}/me/mailFolders/{folder_id}/messages?$filter={}&$top=50",
            urlencoding_filter(&filter)
        );

        let mut out = Vec::new();
        // Synthetic UIDs: caller (orchestrator) owns the real starting
        // point (max of account.lastFetchedUid and mirror MAX(uid));
        // here we just number messages 0..n within this batch and let
        // the orchestrator offset them.
        let mut local_uid: u32 = 0;
        loop {
            let page: GraphMessagePage = self.get_json(&url).await?;
            for value in page.value {
                if out.len() >= MAX_MESSAGES_PER_RUN {
                    break;
                }
                match graph_parser::parse(&value, vec![]) {
                    Ok(message) => {
                        out.push(FetchedMessage {
                            uid: local_uid,
                            message,
                        });
                        local_uid += 1;
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping unparsable Graph message"),
                }
            }
            if out.len() >= MAX_MESSAGES_PER_RUN {
                break;
            }
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(out)
    }

    async fn test_connection(&self) -> ConnectionProbe {
        match self.get_json::<serde_json::Value>(&format!("{BASE_URL}/me")).await {
            Ok(_) => ConnectionProbe { ok: true, error: None },
            Err(e) => ConnectionProbe {
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }

    async fn resolve_folder_id(&self, folder: &str) -> MailmeshResult<Option<String>> {
        GraphAdapter::resolve_folder_id(self, folder).await
    }
}

fn urlencoding_filter(filter: &str) -> String {
    url::form_urlencoded::byte_serialize(filter.as_bytes()).collect()
}
