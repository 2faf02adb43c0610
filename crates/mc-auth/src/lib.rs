//! # mcsync-auth
//!
//! Marketing Cloud authentication for server-to-server installed packages.
//!
//! ## Security
//!
//! - Client secrets and access tokens are redacted in Debug output
//! - Tracing spans skip credential values
//! - Error messages sanitize any credential data
//!
//! ## Example
//!
//! ```rust,ignore
//! use mcsync_auth::{McCredentials, TokenClient};
//! use mcsync_client::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mcsync_auth::Error> {
//!     let creds = McCredentials::from_env()?;
//!     let token = TokenClient::new(creds).authenticate(Some("510001234")).await?;
//!     let client = token.client(ClientConfig::default())?;
//!     Ok(())
//! }
//! ```

mod credentials;
mod error;
mod oauth;

pub use credentials::{
    BusinessUnit, McCredentials, ENV_ACCOUNT_ID, ENV_AUTH_URL, ENV_CLIENT_ID, ENV_CLIENT_SECRET,
};
pub use error::{Error, ErrorKind, Result};
pub use oauth::{TokenClient, TokenResponse};
