//! Core HTTP client with retry and rate-limit handling.

use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::request::{RequestBody, RequestBuilder, RequestMethod};
use crate::response::Response;
use crate::retry::RetryPolicy;

/// HTTP client with built-in retry and error handling.
///
/// Responses are returned as-is once the retry loop is done; turning a
/// non-success status into an error is left to the REST or SOAP layer,
/// since the two report failures differently.
#[derive(Debug, Clone)]
pub struct McHttpClient {
    inner: reqwest::Client,
    config: ClientConfig,
}

impl McHttpClient {
    /// Create a new HTTP client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.rest_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .gzip(config.accept_compressed)
            .deflate(config.accept_compressed)
            .build()
            .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))?;

        Ok(Self { inner, config })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a request builder.
    pub fn request(&self, method: RequestMethod, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    /// Execute a request with automatic retry handling.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let mut retry_policy = self
            .config
            .retry
            .as_ref()
            .map(|c| RetryPolicy::new(c.clone()));

        loop {
            let err = match self.execute_once(&request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            let Some(policy) = retry_policy.as_mut() else {
                return Err(err);
            };
            match policy.next_delay(err.retry_after()) {
                Some(delay) => {
                    warn!(
                        attempt = policy.attempt(),
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(Error::with_source(
                        ErrorKind::RetriesExhausted {
                            attempts: policy.attempt(),
                        },
                        err,
                    ))
                }
            }
        }
    }

    /// Execute a single request without retry logic.
    async fn execute_once(&self, request: &RequestBuilder) -> Result<Response> {
        let mut req = self.inner.request(request.method.to_reqwest(), &request.url);

        if let Some(ref token) = request.bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if !request.query_params.is_empty() {
            req = req.query(&request.query_params);
        }
        if let Some(ref body) = request.body {
            req = match body {
                RequestBody::Json(value) => req.json(value),
                RequestBody::Text(text) => req.body(text.clone()),
            };
        }

        if self.config.enable_tracing {
            debug!(method = ?request.method, url = %request.url, "Sending request");
        }

        let response = req.send().await?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.text().await?;

        if self.config.enable_tracing {
            if (200..300).contains(&status) {
                debug!(status, bytes = body.len(), "Response received");
            } else {
                info!(status, bytes = body.len(), "Non-success response");
            }
        }

        let response = Response::new(status, headers, body);

        if status == 429 {
            return Err(Error::new(ErrorKind::RateLimited {
                retry_after: response.retry_after(),
            }));
        }

        // SOAP faults come back as 500 and are not worth retrying.
        let is_fault = response.text().contains("Fault>");
        if matches!(status, 500 | 502 | 503 | 504) && !is_fault {
            return Err(Error::new(ErrorKind::Http {
                status,
                message: format!("Server error: {}", status),
            }));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> crate::RetryConfig {
        crate::RetryConfig::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(5))
    }

    fn no_retry_client() -> McHttpClient {
        McHttpClient::new(ClientConfig::builder().without_retry().build()).unwrap()
    }

    #[tokio::test]
    async fn test_successful_request_sends_bearer() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/automation/v1/queries"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": 0})))
            .mount(&mock_server)
            .await;

        let client = no_retry_client();
        let response = client
            .execute(
                client
                    .request(
                        RequestMethod::Get,
                        format!("{}/automation/v1/queries", mock_server.uri()),
                    )
                    .bearer_auth("test-token"),
            )
            .await
            .unwrap();

        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_rate_limited_reports_retry_after() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&mock_server)
            .await;

        let client = no_retry_client();
        let err = client
            .execute(client.request(RequestMethod::Get, format!("{}/limited", mock_server.uri())))
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_retry_on_503() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        Mock::given(method("GET"))
            .and(path("/retry"))
            .respond_with(move |_: &wiremock::Request| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true}))
                }
            })
            .mount(&mock_server)
            .await;

        let client =
            McHttpClient::new(ClientConfig::builder().with_retry(fast_retry()).build()).unwrap();
        let response = client
            .execute(client.request(RequestMethod::Get, format!("{}/retry", mock_server.uri())))
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_soap_fault_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Service.asmx"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                "<soap:Envelope><soap:Body><soap:Fault><faultcode>x</faultcode></soap:Fault></soap:Body></soap:Envelope>",
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client =
            McHttpClient::new(ClientConfig::builder().with_retry(fast_retry()).build()).unwrap();
        let response = client
            .execute(
                client
                    .request(RequestMethod::Post, format!("{}/Service.asmx", mock_server.uri()))
                    .soap("Retrieve", "<Envelope/>"),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
    }
}
