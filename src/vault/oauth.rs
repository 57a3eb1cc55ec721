//! Microsoft Graph refresh-token rotation (spec §4.1, §9 invariant 8).
//!
//! The new refresh token — when Microsoft rotates it — must be persisted
//! before the paired access token is used for any sync read, so a crash
//! mid-sync cannot strand the account on a refresh token the server has
//! already invalidated.

use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, RefreshToken as OAuthRefreshToken, TokenResponse, TokenUrl,
};
use secrecy::{ExposeSecret, Secret};

use crate::error::{MailmeshError, MailmeshResult};

const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Result of a successful token refresh.
pub struct RefreshedTokens {
    pub access_token: Secret<String>,
    /// Microsoft does not always rotate the refresh token; when it
    /// doesn't, callers keep using the one they already have.
    pub refresh_token: Option<Secret<String>>,
}

pub struct GraphOAuth {
    client: BasicClient,
}

impl GraphOAuth {
    pub fn new(client_id: String, client_secret: String) -> MailmeshResult<Self> {
        let client = BasicClient::new(
            ClientId::new(client_id),
            Some(ClientSecret::new(client_secret)),
            AuthUrl::new(AUTH_URL.to_string())
                .map_err(|e| MailmeshError::Config(e.to_string()))?,
            Some(
                TokenUrl::new(TOKEN_URL.to_string())
                    .map_err(|e| MailmeshError::Config(e.to_string()))?,
            ),
        );
        Ok(Self { client })
    }

    /// Exchanges a refresh token for a fresh access token. HTTP 4xx
    /// responses (invalid_grant, revoked consent) are surfaced as
    /// [`MailmeshError::CredentialRejected`] — fatal for the job, no
    /// retry. Network failures and 5xx are
    /// [`MailmeshError::ProviderUnavailable`] — retryable.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(
        &self,
        account_id: &str,
        refresh_token: &Secret<String>,
    ) -> MailmeshResult<RefreshedTokens> {
        let result = self
            .client
            .exchange_refresh_token(&OAuthRefreshToken::new(
                refresh_token.expose_secret().clone(),
            ))
            .request_async(async_http_client)
            .await;

        match result {
            Ok(token_response) => Ok(RefreshedTokens {
                access_token: Secret::new(token_response.access_token().secret().clone()),
                refresh_token: token_response
                    .refresh_token()
                    .map(|t| Secret::new(t.secret().clone())),
            }),
            Err(oauth2::RequestTokenError::ServerResponse(resp)) => {
                Err(MailmeshError::CredentialRejected {
                    account_id: account_id.to_string(),
                    message: format!("{:?}", resp.error()),
                })
            }
            Err(other) => Err(MailmeshError::ProviderUnavailable(other.to_string())),
        }
    }
}
