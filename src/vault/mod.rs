//! Credential vault: symmetric encryption of IMAP app passwords and
//! Microsoft Graph OAuth token rotation (spec §4.1).

pub mod cipher;
pub mod oauth;

pub use cipher::{Vault, VaultError};
pub use oauth::{GraphOAuth, RefreshedTokens};
