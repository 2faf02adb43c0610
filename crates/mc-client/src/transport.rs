//! The transport contract consumed by the synchronization engine.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::soap::{SoapAction, SoapPayload, SoapResponse};

/// REST and SOAP access to one business unit.
///
/// REST methods take URIs relative to the REST base URL (for example
/// `/automation/v1/queries`) and return the decoded JSON body, `Null` for
/// an empty body. `soap` hides retrieve pagination: a Retrieve returns the
/// results of every page.
///
/// Errors are normalized, see [`crate::Error::messages`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a REST resource.
    async fn get(&self, uri: &str) -> Result<Value>;

    /// POST a JSON body.
    async fn post(&self, uri: &str, body: &Value) -> Result<Value>;

    /// PATCH a JSON body.
    async fn patch(&self, uri: &str, body: &Value) -> Result<Value>;

    /// PUT a JSON body.
    async fn put(&self, uri: &str, body: &Value) -> Result<Value>;

    /// DELETE a REST resource.
    async fn delete(&self, uri: &str) -> Result<Value>;

    /// Execute a SOAP call against `object_type`.
    async fn soap(
        &self,
        object_type: &str,
        action: SoapAction,
        payload: SoapPayload,
    ) -> Result<SoapResponse>;
}
