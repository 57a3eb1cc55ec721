//! Normalized error taxonomy for the sync engine (spec §7).

/// Result alias used throughout the crate.
pub type MailmeshResult<T> = Result<T, MailmeshError>;

/// Error kinds the orchestrator and its collaborators can produce.
///
/// Variants map 1:1 onto the normalized kinds in the design document;
/// callers that need to decide whether to retry a job should match on
/// [`MailmeshError::is_retryable`] rather than the variant directly.
#[derive(Debug, thiserror::Error)]
pub enum MailmeshError {
    /// Missing or weak configuration; fatal at process startup.
    #[error("config error: {0}")]
    Config(String),

    /// IMAP AUTH failure or Graph 401/invalid_grant. The account needs
    /// user intervention; the job must not be retried.
    #[error("credential rejected for account {account_id}: {message}")]
    CredentialRejected { account_id: String, message: String },

    /// DNS, TLS, 5xx, or socket timeout talking to a provider. Retryable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Unexpected IMAP response or malformed Graph payload. The folder is
    /// skipped; siblings continue.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Malformed RFC 5322 bytes for a single message. The message is
    /// skipped and counted; sync continues.
    #[error("parse error: {0}")]
    Parse(String),

    /// Insert collided with the `(accountId, uid, folder)` uniqueness
    /// constraint. Absorbed silently by callers; kept as a variant so
    /// store code can distinguish it from other database errors.
    #[error("duplicate insert absorbed")]
    DuplicateInsert,

    /// Requested account or message not owned by the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Onboarding rejected a request for a reason other than a bad
    /// credential: an unrecognized provider domain, a malformed payload.
    /// Surfaced to callers as 400 (spec §6).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Onboarding attempted to link a `(user, email)` pair that already
    /// has an account. Surfaced to callers as 409 (spec §6).
    #[error("account already linked: {0}")]
    AlreadyLinked(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search index error: {0}")]
    Search(#[from] tantivy::TantivyError),
}

impl MailmeshError {
    /// Whether the queue should retry the job that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MailmeshError::ProviderUnavailable(_) | MailmeshError::Database(_)
        )
    }

    /// Whether a folder-scoped error should abort sibling folders in the
    /// same job (per-folder isolation, spec §7). Only account-level
    /// credential failures do.
    pub fn aborts_account(&self) -> bool {
        matches!(self, MailmeshError::CredentialRejected { .. })
    }
}
