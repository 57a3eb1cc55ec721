//! Durable job queue: at-least-once execution with retries and bounded
//! concurrency (spec §4.6).

pub mod backend;
pub mod job;
pub mod worker;

pub use backend::QueueBackend;
pub use job::{AttachmentUploadPayload, IncrementalSyncPayload, InitialSyncPayload, Job, JobPayload, JobState, QueueName};
pub use worker::QueueGate;
