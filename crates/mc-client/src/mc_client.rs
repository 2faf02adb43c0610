//! High-level client bound to one business unit's REST and SOAP endpoints.
//!
//! ## Security
//!
//! - Access tokens are redacted in Debug output
//! - Request bodies are skipped in tracing spans

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::client::McHttpClient;
use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::request::{RequestBuilder, RequestMethod};
use crate::soap::{self, SoapAction, SoapPayload, SoapResponse};
use crate::transport::Transport;

/// Marketing Cloud API client.
///
/// # Example
///
/// ```rust,ignore
/// use mcsync_client::{McClient, Transport};
///
/// let client = McClient::new(
///     "https://mcxyz.rest.marketingcloudapis.com/",
///     "https://mcxyz.soap.marketingcloudapis.com/",
///     token,
/// )?;
/// let queries = client.get("/automation/v1/queries?$page=1").await?;
/// ```
#[derive(Clone)]
pub struct McClient {
    http: McHttpClient,
    rest_url: String,
    soap_url: String,
    access_token: String,
}

impl std::fmt::Debug for McClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McClient")
            .field("rest_url", &self.rest_url)
            .field("soap_url", &self.soap_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl McClient {
    /// Create a client with the default configuration.
    pub fn new(
        rest_instance_url: impl Into<String>,
        soap_instance_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self> {
        Self::with_config(
            rest_instance_url,
            soap_instance_url,
            access_token,
            ClientConfig::default(),
        )
    }

    /// Create a client with custom configuration.
    pub fn with_config(
        rest_instance_url: impl Into<String>,
        soap_instance_url: impl Into<String>,
        access_token: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        let rest_url = rest_instance_url.into().trim_end_matches('/').to_string();
        let soap_url = soap_instance_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&rest_url)?;
        url::Url::parse(&soap_url)?;

        Ok(Self {
            http: McHttpClient::new(config)?,
            rest_url,
            soap_url,
            access_token: access_token.into(),
        })
    }

    /// Get the REST base URL.
    pub fn rest_instance_url(&self) -> &str {
        &self.rest_url
    }

    /// Build the full URL for a REST path.
    ///
    /// Absolute URLs pass through unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.rest_url, path.trim_start_matches('/'))
        }
    }

    /// The SOAP service endpoint.
    pub fn soap_endpoint(&self) -> String {
        format!("{}/Service.asmx", self.soap_url)
    }

    fn rest_request(&self, method: RequestMethod, uri: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(uri))
            .bearer_auth(&self.access_token)
    }

    async fn send_rest(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.http.execute(request).await?.check_rest_error()?;
        response.json()
    }

    async fn soap_once(
        &self,
        object_type: &str,
        action: SoapAction,
        payload: &SoapPayload,
    ) -> Result<SoapResponse> {
        let envelope = soap::build_envelope(&self.access_token, object_type, action, payload);
        let request = self
            .http
            .request(RequestMethod::Post, self.soap_endpoint())
            .soap(action.as_str(), envelope)
            .timeout(self.http.config().soap_timeout);
        let response = self.http.execute(request).await?;
        let response = if response.text().contains("Fault>") {
            response
        } else {
            response.check_rest_error()?
        };
        let parsed = soap::parse_response(action, response.text())?;

        // Retrieve reports errors as "Error: <reason>" in OverallStatus.
        if parsed.overall_status.starts_with("Error") || !parsed.error_messages().is_empty() {
            let mut messages = parsed.error_messages();
            if messages.is_empty() {
                messages.push(parsed.overall_status.clone());
            }
            return Err(Error::new(ErrorKind::SoapStatus {
                action: action.to_string(),
                status: parsed.overall_status,
                messages,
            }));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Transport for McClient {
    #[instrument(skip(self), fields(uri = %uri))]
    async fn get(&self, uri: &str) -> Result<Value> {
        self.send_rest(self.rest_request(RequestMethod::Get, uri)).await
    }

    #[instrument(skip(self, body), fields(uri = %uri))]
    async fn post(&self, uri: &str, body: &Value) -> Result<Value> {
        self.send_rest(self.rest_request(RequestMethod::Post, uri).json_value(body.clone()))
            .await
    }

    #[instrument(skip(self, body), fields(uri = %uri))]
    async fn patch(&self, uri: &str, body: &Value) -> Result<Value> {
        self.send_rest(self.rest_request(RequestMethod::Patch, uri).json_value(body.clone()))
            .await
    }

    #[instrument(skip(self, body), fields(uri = %uri))]
    async fn put(&self, uri: &str, body: &Value) -> Result<Value> {
        self.send_rest(self.rest_request(RequestMethod::Put, uri).json_value(body.clone()))
            .await
    }

    #[instrument(skip(self), fields(uri = %uri))]
    async fn delete(&self, uri: &str) -> Result<Value> {
        self.send_rest(self.rest_request(RequestMethod::Delete, uri)).await
    }

    #[instrument(skip(self, payload), fields(object_type = %object_type, action = %action))]
    async fn soap(
        &self,
        object_type: &str,
        action: SoapAction,
        payload: SoapPayload,
    ) -> Result<SoapResponse> {
        let mut response = self.soap_once(object_type, action, &payload).await?;
        if action != SoapAction::Retrieve {
            return Ok(response);
        }

        let mut results = std::mem::take(&mut response.results);
        while response.has_more_data() {
            let Some(request_id) = response.request_id.clone() else {
                break;
            };
            debug!(request_id = %request_id, fetched = results.len(), "Continuing SOAP retrieve");
            response = self
                .soap_once(object_type, action, &SoapPayload::Continue { request_id })
                .await?;
            results.append(&mut response.results);
        }

        Ok(SoapResponse {
            overall_status: response.overall_status,
            request_id: response.request_id,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> McClient {
        McClient::with_config(
            server.uri(),
            server.uri(),
            "token",
            ClientConfig::builder().without_retry().build(),
        )
        .unwrap()
    }

    fn retrieve_page(status: &str, request_id: &str, ids: &[u32]) -> String {
        let results: String = ids
            .iter()
            .map(|id| format!("<Results><ID>{id}</ID></Results>"))
            .collect();
        format!(
            r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><RetrieveResponseMsg><OverallStatus>{status}</OverallStatus><RequestID>{request_id}</RequestID>{results}</RetrieveResponseMsg></soap:Body></soap:Envelope>"#
        )
    }

    #[test]
    fn test_url_building() {
        let client = McClient::new(
            "https://mc1.rest.marketingcloudapis.com/",
            "https://mc1.soap.marketingcloudapis.com/",
            "token",
        )
        .unwrap();

        assert_eq!(
            client.url("/automation/v1/queries"),
            "https://mc1.rest.marketingcloudapis.com/automation/v1/queries"
        );
        assert_eq!(client.url("https://other.com/x"), "https://other.com/x");
        assert_eq!(
            client.soap_endpoint(),
            "https://mc1.soap.marketingcloudapis.com/Service.asmx"
        );
        assert!(format!("{client:?}").contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_rest_error_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/automation/v1/queries"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "validationErrors": [{"message": "Target data extension not found"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .post("/automation/v1/queries", &json!({"key": "q1"}))
            .await
            .unwrap_err();
        assert_eq!(err.messages(), vec!["Target data extension not found".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_delete_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/automation/v1/queries/abc"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let value = client_for(&server)
            .delete("/automation/v1/queries/abc")
            .await
            .unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_soap_retrieve_follows_continuation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Service.asmx"))
            .and(header("SOAPAction", "Retrieve"))
            .and(body_string_contains("<ContinueRequest>req-9</ContinueRequest>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(retrieve_page("OK", "req-9", &[3])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Service.asmx"))
            .and(body_string_contains("<ObjectType>DataFolder</ObjectType>"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(retrieve_page("MoreDataAvailable", "req-9", &[1, 2])),
            )
            .mount(&server)
            .await;

        let response = client_for(&server)
            .soap(
                "DataFolder",
                SoapAction::Retrieve,
                SoapPayload::Retrieve {
                    properties: vec!["ID".into()],
                    filter: None,
                    query_all_accounts: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.results.len(), 3);
        assert_eq!(response.overall_status, "OK");
    }

    #[tokio::test]
    async fn test_soap_create_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Service.asmx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><CreateResponse><Results><StatusCode>Error</StatusCode><StatusMessage>Duplicate name</StatusMessage></Results><OverallStatus>Error</OverallStatus></CreateResponse></soap:Body></soap:Envelope>"#,
            ))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .soap(
                "DataFolder",
                SoapAction::Create,
                SoapPayload::Objects(vec![json!({"Name": "x"})]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.messages(), vec!["Duplicate name".to_string()]);
    }
}
