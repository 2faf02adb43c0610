//! Installed-package credentials and business unit descriptors.
//!
//! Credential types implement custom Debug to redact the client secret.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Environment variable holding the installed package client id.
pub const ENV_CLIENT_ID: &str = "MCSYNC_CLIENT_ID";
/// Environment variable holding the installed package client secret.
pub const ENV_CLIENT_SECRET: &str = "MCSYNC_CLIENT_SECRET";
/// Environment variable holding the tenant auth base URL.
pub const ENV_AUTH_URL: &str = "MCSYNC_AUTH_URL";
/// Environment variable holding the enterprise (parent) MID.
pub const ENV_ACCOUNT_ID: &str = "MCSYNC_ACCOUNT_ID";

/// Server-to-server installed package credentials.
#[derive(Clone)]
pub struct McCredentials {
    client_id: String,
    client_secret: String,
    auth_url: String,
    account_id: String,
}

impl std::fmt::Debug for McCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_url", &self.auth_url)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl McCredentials {
    /// Create credentials, validating that every value is present and the
    /// auth URL parses.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_url: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Result<Self> {
        let creds = Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            account_id: account_id.into(),
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Load credentials from environment variables.
    ///
    /// Required environment variables:
    /// - `MCSYNC_CLIENT_ID`
    /// - `MCSYNC_CLIENT_SECRET`
    /// - `MCSYNC_AUTH_URL`
    /// - `MCSYNC_ACCOUNT_ID`
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load credentials through a variable lookup function.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::new(ErrorKind::EnvVar(name.to_string())))
        };
        Self::new(
            var(ENV_CLIENT_ID)?,
            var(ENV_CLIENT_SECRET)?,
            var(ENV_AUTH_URL)?,
            var(ENV_ACCOUNT_ID)?,
        )
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCredentials(
                "client id and secret are required".to_string(),
            )));
        }
        if self.account_id.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCredentials(
                "account id is required".to_string(),
            )));
        }
        url::Url::parse(&self.auth_url).map_err(|e| {
            Error::with_source(
                ErrorKind::InvalidCredentials(format!("invalid auth url: {e}")),
                e,
            )
        })?;
        Ok(())
    }

    /// The installed package client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// The tenant auth base URL, without trailing slash.
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    /// The enterprise MID.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

/// One business unit: the scope every cache and file-tree operation runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessUnit {
    /// Local name, used as the directory segment.
    pub name: String,
    /// Member id of the business unit.
    pub mid: String,
    /// Member id of the enterprise (parent) business unit.
    #[serde(default)]
    pub parent_mid: String,
    /// Name of the credential the business unit belongs to.
    #[serde(default)]
    pub credential: String,
}

impl BusinessUnit {
    /// Create a business unit descriptor.
    pub fn new(
        credential: impl Into<String>,
        name: impl Into<String>,
        mid: impl Into<String>,
        parent_mid: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mid: mid.into(),
            parent_mid: parent_mid.into(),
            credential: credential.into(),
        }
    }

    /// True when this is the enterprise business unit itself.
    pub fn is_parent(&self) -> bool {
        !self.mid.is_empty() && self.mid == self.parent_mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_credentials_from_vars() {
        let env = vars(&[
            (ENV_CLIENT_ID, "abc"),
            (ENV_CLIENT_SECRET, "secret"),
            (ENV_AUTH_URL, "https://mc1.auth.marketingcloudapis.com/"),
            (ENV_ACCOUNT_ID, "100"),
        ]);
        let creds = McCredentials::from_vars(|k| env.get(k).cloned()).unwrap();

        assert_eq!(creds.client_id(), "abc");
        assert_eq!(creds.auth_url(), "https://mc1.auth.marketingcloudapis.com");
        assert_eq!(creds.account_id(), "100");
    }

    #[test]
    fn test_missing_var_names_the_variable() {
        let env = vars(&[(ENV_CLIENT_ID, "abc")]);
        let err = McCredentials::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::EnvVar(ref v) if v == ENV_CLIENT_SECRET));
    }

    #[test]
    fn test_invalid_auth_url() {
        let err = McCredentials::new("abc", "secret", "not a url", "100").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidCredentials(_)));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = McCredentials::new(
            "abc",
            "super_secret_value_12345",
            "https://mc1.auth.marketingcloudapis.com",
            "100",
        )
        .unwrap();

        let debug_output = format!("{:?}", creds);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_value_12345"));
    }

    #[test]
    fn test_business_unit_parent() {
        let parent = BusinessUnit::new("cred", "_ParentBU_", "100", "100");
        let child = BusinessUnit::new("cred", "Child", "200", "100");
        assert!(parent.is_parent());
        assert!(!child.is_parent());

        let json = serde_json::to_value(&child).unwrap();
        assert_eq!(json["parentMid"], "100");
    }
}
