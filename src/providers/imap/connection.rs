//! IMAP connection establishment: TLS, custom CA bundles, timeouts, and
//! reconnection (spec §4.2).

use std::path::Path;
use std::time::Duration;

use async_imap::Client;
use async_native_tls::{Certificate, TlsConnector};
use once_cell::sync::OnceCell;
use secrecy::{ExposeSecret, Secret};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::{MailmeshError, MailmeshResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_ATTEMPTS: usize = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type TlsCompatStream = async_native_tls::TlsStream<Compat<TcpStream>>;

pub enum ImapSession {
    Tls(async_imap::Session<TlsCompatStream>),
    Plain(async_imap::Session<Compat<TcpStream>>),
}

impl ImapSession {
    pub async fn logout(self) -> Result<(), async_imap::error::Error> {
        match self {
            ImapSession::Tls(mut s) => s.logout().await,
            ImapSession::Plain(mut s) => s.logout().await,
        }
    }

    pub async fn select(
        &mut self,
        folder: &str,
    ) -> Result<async_imap::types::Mailbox, async_imap::error::Error> {
        match self {
            ImapSession::Tls(s) => s.select(folder).await,
            ImapSession::Plain(s) => s.select(folder).await,
        }
    }
}

/// CA bundle loaded from `CERTS_DIR`, cached process-wide after first
/// load (spec §4.2: "cached process-wide after first load").
static CA_BUNDLE: OnceCell<Vec<Certificate>> = OnceCell::new();

fn load_ca_bundle(certs_dir: &str) -> MailmeshResult<&'static Vec<Certificate>> {
    CA_BUNDLE.get_or_try_init(|| {
        let mut certs = Vec::new();
        for entry in std::fs::read_dir(Path::new(certs_dir))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("crt") {
                let pem = std::fs::read(&path)?;
                let cert = Certificate::from_pem(&pem)
                    .map_err(|e| MailmeshError::Config(format!("invalid CA cert {path:?}: {e}")))?;
                certs.push(cert);
            }
        }
        Ok(certs)
    })
}

pub struct ImapConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub tls_reject_unauthorized: bool,
    pub certs_dir: Option<String>,
}

/// Connects with up to [`RECONNECT_ATTEMPTS`] tries, [`RECONNECT_DELAY`]
/// apart, each bounded by [`CONNECT_TIMEOUT`] (spec §4.2).
pub async fn connect(config: &ImapConnectionConfig) -> MailmeshResult<ImapSession> {
    let mut last_err = None;
    for attempt in 1..=RECONNECT_ATTEMPTS {
        match connect_once(config).await {
            Ok(session) => return Ok(session),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "IMAP connect attempt failed");
                last_err = Some(e);
                if attempt < RECONNECT_ATTEMPTS {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
    Err(last_err.unwrap())
}

async fn connect_once(config: &ImapConnectionConfig) -> MailmeshResult<ImapSession> {
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| MailmeshError::ProviderUnavailable(format!("connect timeout to {addr}")))?
        .map_err(|e| MailmeshError::ProviderUnavailable(format!("tcp connect to {addr}: {e}")))?;

    let mut connector = TlsConnector::new().danger_accept_invalid_certs(!config.tls_reject_unauthorized);
    if let Some(certs_dir) = &config.certs_dir {
        for cert in load_ca_bundle(certs_dir)? {
            connector = connector.add_root_certificate(cert.clone());
        }
    }

    let tls_stream = tokio::time::timeout(
        CONNECT_TIMEOUT,
        connector.connect(&config.host, tcp.compat()),
    )
    .await
    .map_err(|_| MailmeshError::ProviderUnavailable("TLS handshake timeout".to_string()))?
    .map_err(|e| MailmeshError::ProviderUnavailable(format!("TLS handshake failed: {e}")))?;

    let client = Client::new(tls_stream);
    let session = client
        .login(&config.username, config.password.expose_secret())
        .await
        .map_err(|(e, _client)| MailmeshError::CredentialRejected {
            account_id: config.username.clone(),
            message: e.to_string(),
        })?;

    Ok(ImapSession::Tls(session))
}

/// Connects, immediately logs out, and reports whether credentials are
/// valid without propagating an error (spec §4.2 `testConnection`, used
/// by onboarding).
pub async fn test_connection(config: &ImapConnectionConfig) -> (bool, Option<String>) {
    match connect(config).await {
        Ok(session) => {
            let _ = session.logout().await;
            (true, None)
        }
        Err(e) => (false, Some(e.to_string())),
    }
}
