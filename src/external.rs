//! Injection points for collaborators this crate consumes but does not
//! implement (spec §6): the HTTP auth boundary and the attachment blob
//! sink. Concrete implementations live in the binary that wires this
//! crate into an HTTP framework.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MailmeshResult;

/// Resolves the authenticated user id for an inbound request. The engine
/// never handles HTTP directly; every sync route upstream of this crate
/// is expected to have already run this check.
#[async_trait]
pub trait ExternalAuth: Send + Sync {
    async fn authenticated_user_id(&self, bearer_token: &str) -> MailmeshResult<Uuid>;
}

/// Stores attachment bytes out-of-band and returns a retrievable URL.
/// The sync engine hands each parsed attachment to this sink
/// asynchronously; it does not block folder sync on upload completion.
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn upload(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> MailmeshResult<String>;
}
