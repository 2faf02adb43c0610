//! # mcsync
//!
//! Keep Marketing Cloud metadata in a local file tree: retrieve it,
//! template it per market and deploy it back.
//!
//! ## Security
//!
//! - Tokens and client secrets are redacted in Debug output
//! - Tracing skips credential parameters
//! - Error messages are sanitized before they are logged
//!
//! ## Crates
//!
//! - **mcsync-client** - HTTP transport: REST and SOAP calls, retry, rate limiting
//! - **mcsync-auth** - Client-credentials token flow and business unit descriptors
//! - **mcsync-metadata** - The sync engine: cache, templates, dependencies, retrieve/deploy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use mcsync::auth::{BusinessUnit, McCredentials, TokenClient};
//! use mcsync::metadata::{pipeline, SyncConfig, SyncContext, TypeRegistry};
//! use mcsync::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let token = TokenClient::new(McCredentials::from_env()?)
//!         .authenticate(Some("100200"))
//!         .await?;
//!     let client = token.client(ClientConfig::default())?;
//!
//!     let bu = BusinessUnit::new("default", "Marketing", "100200", "100000");
//!     let ctx = SyncContext::new(Arc::new(client), bu, SyncConfig::rooted("."))?;
//!
//!     let registry = TypeRegistry::standard();
//!     let report = pipeline::deploy(&ctx, &registry, &registry.names()).await?;
//!     println!("deployed with errors: {}", report.has_errors());
//!     Ok(())
//! }
//! ```

#[cfg(feature = "auth")]
pub use mcsync_auth as auth;
#[cfg(feature = "client")]
pub use mcsync_client as client;
#[cfg(feature = "metadata")]
pub use mcsync_metadata as metadata;

#[cfg(feature = "auth")]
pub use mcsync_auth::{BusinessUnit, McCredentials, TokenClient};
#[cfg(feature = "client")]
pub use mcsync_client::{ClientConfig, McClient, Transport};
#[cfg(feature = "metadata")]
pub use mcsync_metadata::{MetadataType, SyncConfig, SyncContext, TypeRegistry};
