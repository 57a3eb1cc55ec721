//! Job envelope and payload schemas (spec §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueName {
    InitialSync,
    IncrementalSync,
    AttachmentUpload,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::InitialSync => "initial-sync",
            QueueName::IncrementalSync => "incremental-sync",
            QueueName::AttachmentUpload => "attachment-upload",
        }
    }

    /// Per-queue rate limit: max jobs started per 60s window (spec
    /// §4.6). `attachment-upload` has no stated limit; `None` leaves it
    /// gated only by per-worker concurrency.
    pub fn rate_limit_per_minute(&self) -> Option<u32> {
        match self {
            QueueName::InitialSync => Some(10),
            QueueName::IncrementalSync => Some(20),
            QueueName::AttachmentUpload => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialSyncPayload {
    pub account_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalSyncPayload {
    pub account_id: Uuid,
    pub email: String,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentUploadPayload {
    pub message_id: Uuid,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum JobPayload {
    InitialSync(InitialSyncPayload),
    IncrementalSync(IncrementalSyncPayload),
    AttachmentUpload(AttachmentUploadPayload),
}

impl JobPayload {
    pub fn queue(&self) -> QueueName {
        match self {
            JobPayload::InitialSync(_) => QueueName::InitialSync,
            JobPayload::IncrementalSync(_) => QueueName::IncrementalSync,
            JobPayload::AttachmentUpload(_) => QueueName::AttachmentUpload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempt_count: i32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const MAX_ATTEMPTS: i32 = 3;
pub const BASE_BACKOFF_SECONDS: i64 = 5;

/// Exponential backoff starting at 5s (spec §4.6: "up to 3 attempts,
/// exponential backoff starting at 5s").
pub fn backoff_duration(attempt_count: i32) -> chrono::Duration {
    let exponent = attempt_count.max(1) as u32 - 1;
    chrono::Duration::seconds(BASE_BACKOFF_SECONDS * 2i64.pow(exponent))
}
