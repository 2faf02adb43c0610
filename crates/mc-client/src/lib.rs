//! # mcsync-client
//!
//! REST and SOAP transport for the Marketing Cloud APIs.
//!
//! This crate provides:
//! - Automatic retry with exponential backoff and jitter
//! - Rate limit detection (429 + Retry-After)
//! - Normalization of REST error bodies and SOAP faults into one error type
//! - SOAP envelope building and `quick-xml` based response parsing
//! - The [`Transport`] trait the synchronization engine is written against
//! - An in-memory [`mock::MockTransport`] for tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 mcsync-metadata (engine)                    │
//! │        talks to `dyn Transport` only                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        McClient                             │
//! │  - REST base URL, SOAP endpoint, bearer token               │
//! │  - JSON in/out, SOAP retrieve continuation                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      McHttpClient                           │
//! │  - Raw HTTP with retry and rate limiting                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod client;
mod config;
mod error;
mod mc_client;
pub mod mock;
mod request;
mod response;
mod retry;
pub mod security;
mod soap;
mod transport;

pub use client::McHttpClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{Error, ErrorKind, Result};
pub use mc_client::McClient;
pub use request::{RequestBuilder, RequestMethod};
pub use response::Response;
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy};
pub use soap::{SimpleOperator, SoapAction, SoapFilter, SoapPayload, SoapResponse};
pub use transport::Transport;

/// User-Agent string for the client
pub const USER_AGENT: &str = concat!("mcsync/", env!("CARGO_PKG_VERSION"));
