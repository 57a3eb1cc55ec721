//! Environment-driven configuration for the sync engine (spec §6, §10.3).

use serde::{Deserialize, Serialize};

use crate::error::{MailmeshError, MailmeshResult};

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub queue_url: String,
    pub queue_user: Option<String>,
    pub queue_pass: Option<String>,
    pub encryption_key: String,
    pub ms_client_id: String,
    pub ms_client_secret: String,
    pub jwt_secret: String,
    pub jwt_expiry: String,
    pub certs_dir: Option<String>,
    #[serde(default = "default_true")]
    pub tls_reject_unauthorized: bool,
    pub client_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory for the secondary tantivy search index (spec §4.5).
    /// Defaults to [`default_fts_index_dir`] when unset.
    #[serde(default = "default_fts_index_dir")]
    pub fts_index_dir: String,
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_fts_index_dir() -> String {
    "./data/fts-index".to_string()
}

impl Config {
    /// Loads configuration from the environment, validating the pieces
    /// whose absence or weakness would make the rest of the engine unsafe
    /// to run (spec §4.1, §7: `ConfigError` is fatal at startup).
    pub fn load() -> MailmeshResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| MailmeshError::Config(e.to_string()))?;

        let cfg: Config = settings
            .try_deserialize()
            .map_err(|e| MailmeshError::Config(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> MailmeshResult<()> {
        if self.encryption_key.len() < 32 {
            return Err(MailmeshError::Config(
                "ENCRYPTION_KEY must be at least 32 characters".to_string(),
            ));
        }
        if self.ms_client_id.is_empty() || self.ms_client_secret.is_empty() {
            return Err(MailmeshError::Config(
                "MS_CLIENT_ID and MS_CLIENT_SECRET must be set".to_string(),
            ));
        }
        humantime::parse_duration(&self.jwt_expiry)
            .map_err(|e| MailmeshError::Config(format!("JWT_EXPIRY {:?} is not a duration: {e}", self.jwt_expiry)))?;
        Ok(())
    }

    /// Parsed `JWT_EXPIRY`, for callers that need a [`std::time::Duration`]
    /// rather than the raw config string (e.g. setting a token's `exp`
    /// claim). Already validated at [`Config::load`] time.
    pub fn jwt_expiry_duration(&self) -> std::time::Duration {
        humantime::parse_duration(&self.jwt_expiry)
            .expect("validated at Config::load")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: "postgres://localhost/mailmesh".to_string(),
            queue_url: "postgres://localhost/mailmesh".to_string(),
            queue_user: None,
            queue_pass: None,
            encryption_key: "x".repeat(32),
            ms_client_id: "client".to_string(),
            ms_client_secret: "secret".to_string(),
            jwt_secret: "jwtsecret".to_string(),
            jwt_expiry: "1h".to_string(),
            certs_dir: None,
            tls_reject_unauthorized: true,
            client_url: "https://example.com".to_string(),
            port: 8080,
            fts_index_dir: default_fts_index_dir(),
        }
    }

    #[test]
    fn rejects_short_encryption_key() {
        let mut cfg = base_config();
        cfg.encryption_key = "too short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_unparseable_jwt_expiry() {
        let mut cfg = base_config();
        cfg.jwt_expiry = "soon".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn jwt_expiry_duration_matches_configured_value() {
        let cfg = base_config();
        assert_eq!(cfg.jwt_expiry_duration(), std::time::Duration::from_secs(3600));
    }

    #[test]
    fn rejects_missing_oauth_secrets() {
        let mut cfg = base_config();
        cfg.ms_client_secret = String::new();
        assert!(cfg.validate().is_err());
    }
}
