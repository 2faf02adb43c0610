//! OAuth 2.0 client-credentials token exchange.
//!
//! Installed packages authenticate server-to-server against the tenant's
//! `/v2/token` endpoint. The token is scoped to one business unit through
//! `account_id`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use mcsync_client::{ClientConfig, McClient};

use crate::credentials::McCredentials;
use crate::error::{Error, ErrorKind, Result};

/// Token client for one set of installed package credentials.
#[derive(Clone)]
pub struct TokenClient {
    credentials: McCredentials,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    /// Create a new token client.
    pub fn new(credentials: McCredentials) -> Self {
        Self {
            credentials,
            http_client: reqwest::Client::new(),
        }
    }

    /// Get the credentials.
    pub fn credentials(&self) -> &McCredentials {
        &self.credentials
    }

    /// Request an access token for a business unit.
    ///
    /// `mid` selects the business unit; `None` authenticates against the
    /// enterprise account from the credentials.
    #[instrument(skip(self), fields(client_id = %self.credentials.client_id()))]
    pub async fn authenticate(&self, mid: Option<&str>) -> Result<TokenResponse> {
        let account_id = mid.unwrap_or(self.credentials.account_id());
        let body = json!({
            "grant_type": "client_credentials",
            "client_id": self.credentials.client_id(),
            "client_secret": self.credentials.client_secret(),
            "account_id": account_id,
        });

        let response = self
            .http_client
            .post(format!("{}/v2/token", self.credentials.auth_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await?;
            let error = serde_json::from_str::<OAuthErrorResponse>(&text).unwrap_or(
                OAuthErrorResponse {
                    error: format!("http_{status}"),
                    error_description: String::new(),
                },
            );
            return Err(Error::new(ErrorKind::OAuth {
                error: error.error,
                description: error.error_description,
            }));
        }

        let token: TokenResponse = response.json().await?;
        debug!(account_id, expires_in = token.expires_in, "Token acquired");
        Ok(token)
    }
}

/// Upper bound on a token lifetime, one day.
const MAX_LIFETIME_SECS: i64 = 86_400;

/// Token response from the `/v2/token` endpoint.
///
/// The access token is redacted in Debug output.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Tenant REST base URL.
    pub rest_instance_url: String,
    /// Tenant SOAP base URL.
    pub soap_instance_url: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
    /// Token type (usually "Bearer").
    #[serde(default)]
    pub token_type: Option<String>,
    /// Scopes granted.
    #[serde(default)]
    pub scope: Option<String>,
    /// When the token was received; not part of the wire format.
    #[serde(skip, default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("rest_instance_url", &self.rest_instance_url)
            .field("soap_instance_url", &self.soap_instance_url)
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl TokenResponse {
    /// Margin subtracted from the lifetime so a token is renewed before
    /// the server rejects it.
    const EXPIRY_MARGIN_SECS: i64 = 60;

    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.expires_in).unwrap_or(i64::MAX);
        self.issued_at
            .checked_add_signed(Duration::seconds(secs.min(MAX_LIFETIME_SECS)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once the token is within a minute of expiring.
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(Self::EXPIRY_MARGIN_SECS) >= self.expires_at()
    }

    /// Build an API client bound to this token's endpoints.
    pub fn client(&self, config: ClientConfig) -> Result<McClient> {
        Ok(McClient::with_config(
            &self.rest_instance_url,
            &self.soap_instance_url,
            &self.access_token,
            config,
        )?)
    }
}

/// OAuth error response.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}
