//! Raw provider payload → canonical [`canonical::CanonicalMessage`]
//! (spec §4.4).

pub mod canonical;
pub mod graph;
pub mod imap;

pub use canonical::{CanonicalMessage, ParsedAttachment};
