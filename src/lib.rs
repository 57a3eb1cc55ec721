//! Mail synchronization engine: provider adapters, folder normalization,
//! a durable sync queue, and an idempotent mirror store.

pub mod config;
pub mod error;
pub mod external;
pub mod folder;
pub mod parser;
pub mod providers;
pub mod queue;
pub mod store;
pub mod sync;
pub mod vault;

pub use error::{MailmeshError, MailmeshResult};

/// Library version, surfaced for diagnostics and the `/health` endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the process-wide JSON tracing subscriber. Idempotent: a
/// second call is a no-op (spec §10.1).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
