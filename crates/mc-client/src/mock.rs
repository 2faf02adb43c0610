//! In-memory transport for deterministic engine tests.
//!
//! REST responses are registered per method and URI. SOAP retrieves are
//! answered from per-object-type result sets, evaluating simple filters
//! against the stored objects. Every call is recorded for later assertions.
//!
//! # Example
//!
//! ```
//! use mcsync_client::mock::MockTransport;
//! use mcsync_client::{RequestMethod, Transport};
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let transport = MockTransport::new();
//! transport.respond(RequestMethod::Get, "/automation/v1/queries", json!({"items": []}));
//!
//! let body = transport.get("/automation/v1/queries").await.unwrap();
//! assert_eq!(body["items"], json!([]));
//! assert_eq!(transport.calls().len(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, ErrorKind, Result};
use crate::request::RequestMethod;
use crate::soap::{SimpleOperator, SoapAction, SoapFilter, SoapPayload, SoapResponse};
use crate::transport::Transport;

/// Recorded call for test verification.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Rest {
        method: RequestMethod,
        uri: String,
        body: Option<Value>,
    },
    Soap {
        object_type: String,
        action: SoapAction,
        payload: SoapPayload,
    },
}

impl MockCall {
    /// True for a REST call with the given method.
    pub fn is_rest(&self, expected: RequestMethod) -> bool {
        matches!(self, MockCall::Rest { method, .. } if *method == expected)
    }

    /// True for a SOAP call with the given action.
    pub fn is_soap(&self, expected: SoapAction) -> bool {
        matches!(self, MockCall::Soap { action, .. } if *action == expected)
    }
}

#[derive(Debug, Clone)]
struct MockFailure {
    status: u16,
    message: String,
}

#[derive(Debug, Default)]
struct MockInner {
    rest: HashMap<(RequestMethod, String), Value>,
    rest_failures: HashMap<(RequestMethod, String), MockFailure>,
    soap_objects: HashMap<String, Vec<Value>>,
    soap_failures: HashMap<(String, SoapAction), String>,
    next_id: u64,
    calls: Vec<MockCall>,
}

/// Mock transport.
///
/// Thread-safe via internal `Arc<Mutex<...>>`; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the response body for a REST call.
    ///
    /// Writes without a registered response echo the request body back;
    /// unregistered GETs fail with a 404.
    pub fn respond(&self, method: RequestMethod, uri: impl Into<String>, body: Value) {
        self.lock().rest.insert((method, uri.into()), body);
    }

    /// Make a REST call fail with an API error.
    pub fn fail(
        &self,
        method: RequestMethod,
        uri: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) {
        self.lock().rest_failures.insert(
            (method, uri.into()),
            MockFailure {
                status,
                message: message.into(),
            },
        );
    }

    /// Set the objects a SOAP retrieve of `object_type` answers from.
    pub fn soap_objects(&self, object_type: impl Into<String>, objects: Vec<Value>) {
        self.lock().soap_objects.insert(object_type.into(), objects);
    }

    /// Make a SOAP action on `object_type` fail with a status message.
    pub fn fail_soap(
        &self,
        object_type: impl Into<String>,
        action: SoapAction,
        message: impl Into<String>,
    ) {
        self.lock()
            .soap_failures
            .insert((object_type.into(), action), message.into());
    }

    /// All calls in the order they were made.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Number of calls matching a predicate.
    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    fn rest(&self, method: RequestMethod, uri: &str, body: Option<&Value>) -> Result<Value> {
        let mut inner = self.lock();
        inner.calls.push(MockCall::Rest {
            method,
            uri: uri.to_string(),
            body: body.cloned(),
        });

        let key = (method, uri.to_string());
        if let Some(failure) = inner.rest_failures.get(&key) {
            return Err(Error::new(ErrorKind::Api {
                status: failure.status,
                error_code: None,
                messages: vec![failure.message.clone()],
            }));
        }
        if let Some(value) = inner.rest.get(&key) {
            return Ok(value.clone());
        }
        match method {
            RequestMethod::Get => Err(Error::new(ErrorKind::NotFound(uri.to_string()))),
            RequestMethod::Delete => Ok(Value::Null),
            _ => Ok(body.cloned().unwrap_or(Value::Null)),
        }
    }
}

fn path_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    value
        .get(path)
        .or_else(|| path.split('.').try_fold(value, |v, seg| v.get(seg)))
}

fn filter_matches(filter: &SoapFilter, object: &Value) -> bool {
    match filter {
        SoapFilter::Simple {
            property,
            operator,
            values,
        } => {
            let actual = path_value(object, property).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            match operator {
                SimpleOperator::Equals | SimpleOperator::In => {
                    actual.is_some_and(|a| values.contains(&a))
                }
                SimpleOperator::NotEquals => actual.is_none_or(|a| !values.contains(&a)),
                SimpleOperator::Like => actual.is_some_and(|a| {
                    values
                        .iter()
                        .any(|v| a.contains(v.trim_matches('%')))
                }),
                SimpleOperator::IsNotNull => actual.is_some(),
            }
        }
        SoapFilter::And(left, right) => filter_matches(left, object) && filter_matches(right, object),
        SoapFilter::Or(left, right) => filter_matches(left, object) || filter_matches(right, object),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, uri: &str) -> Result<Value> {
        self.rest(RequestMethod::Get, uri, None)
    }

    async fn post(&self, uri: &str, body: &Value) -> Result<Value> {
        self.rest(RequestMethod::Post, uri, Some(body))
    }

    async fn patch(&self, uri: &str, body: &Value) -> Result<Value> {
        self.rest(RequestMethod::Patch, uri, Some(body))
    }

    async fn put(&self, uri: &str, body: &Value) -> Result<Value> {
        self.rest(RequestMethod::Put, uri, Some(body))
    }

    async fn delete(&self, uri: &str) -> Result<Value> {
        self.rest(RequestMethod::Delete, uri, None)
    }

    async fn soap(
        &self,
        object_type: &str,
        action: SoapAction,
        payload: SoapPayload,
    ) -> Result<SoapResponse> {
        let mut inner = self.lock();
        inner.calls.push(MockCall::Soap {
            object_type: object_type.to_string(),
            action,
            payload: payload.clone(),
        });

        if let Some(message) = inner.soap_failures.get(&(object_type.to_string(), action)) {
            return Err(Error::new(ErrorKind::SoapStatus {
                action: action.to_string(),
                status: "Error".to_string(),
                messages: vec![message.clone()],
            }));
        }

        let results = match payload {
            SoapPayload::Retrieve { filter, .. } => inner
                .soap_objects
                .get(object_type)
                .map(|objects| {
                    objects
                        .iter()
                        .filter(|o| filter.as_ref().is_none_or(|f| filter_matches(f, o)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            SoapPayload::Continue { .. } => Vec::new(),
            SoapPayload::Objects(objects) => objects
                .into_iter()
                .map(|object| {
                    inner.next_id += 1;
                    json!({
                        "StatusCode": "OK",
                        "NewID": inner.next_id.to_string(),
                        "Object": object,
                    })
                })
                .collect(),
        };

        Ok(SoapResponse {
            overall_status: "OK".to_string(),
            request_id: None,
            results,
        })
    }
}
