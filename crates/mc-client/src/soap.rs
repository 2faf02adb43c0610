//! SOAP envelope building and response parsing.
//!
//! Request objects and response results are exchanged as JSON values so the
//! engine can treat REST and SOAP items identically. Envelopes are built as
//! strings with every value escaped; responses are parsed with `quick-xml`
//! into a JSON tree where repeated child elements become arrays.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, Result};
use crate::security::xml;

const PARTNER_NS: &str = "http://exacttarget.com/wsdl/partnerAPI";

/// SOAP operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoapAction {
    Retrieve,
    Create,
    Update,
    Delete,
}

impl SoapAction {
    /// The SOAPAction header / request element stem.
    pub fn as_str(&self) -> &'static str {
        match self {
            SoapAction::Retrieve => "Retrieve",
            SoapAction::Create => "Create",
            SoapAction::Update => "Update",
            SoapAction::Delete => "Delete",
        }
    }
}

impl std::fmt::Display for SoapAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator of a simple filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SimpleOperator {
    Equals,
    NotEquals,
    In,
    Like,
    IsNotNull,
}

impl SimpleOperator {
    fn as_str(&self) -> &'static str {
        match self {
            SimpleOperator::Equals => "equals",
            SimpleOperator::NotEquals => "notEquals",
            SimpleOperator::In => "IN",
            SimpleOperator::Like => "like",
            SimpleOperator::IsNotNull => "isNotNull",
        }
    }
}

/// Retrieve filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SoapFilter {
    Simple {
        property: String,
        operator: SimpleOperator,
        values: Vec<String>,
    },
    And(Box<SoapFilter>, Box<SoapFilter>),
    Or(Box<SoapFilter>, Box<SoapFilter>),
}

impl SoapFilter {
    /// `property equals value`.
    pub fn equals(property: impl Into<String>, value: impl Into<String>) -> Self {
        SoapFilter::Simple {
            property: property.into(),
            operator: SimpleOperator::Equals,
            values: vec![value.into()],
        }
    }

    /// `property IN (values)`.
    pub fn one_of(property: impl Into<String>, values: Vec<String>) -> Self {
        SoapFilter::Simple {
            property: property.into(),
            operator: SimpleOperator::In,
            values,
        }
    }

    /// Combine with another filter using AND.
    pub fn and(self, other: SoapFilter) -> Self {
        SoapFilter::And(Box::new(self), Box::new(other))
    }

    /// Combine with another filter using OR.
    pub fn or(self, other: SoapFilter) -> Self {
        SoapFilter::Or(Box::new(self), Box::new(other))
    }

    fn to_xml(&self, element: &str) -> String {
        match self {
            SoapFilter::Simple {
                property,
                operator,
                values,
            } => {
                let values: String = values
                    .iter()
                    .map(|v| format!("<Value>{}</Value>", xml::escape(v)))
                    .collect();
                format!(
                    r#"<{element} xsi:type="SimpleFilterPart"><Property>{}</Property><SimpleOperator>{}</SimpleOperator>{values}</{element}>"#,
                    xml::escape(property),
                    operator.as_str(),
                )
            }
            SoapFilter::And(left, right) | SoapFilter::Or(left, right) => {
                let logical = if matches!(self, SoapFilter::And(..)) {
                    "AND"
                } else {
                    "OR"
                };
                format!(
                    r#"<{element} xsi:type="ComplexFilterPart">{}<LogicalOperator>{logical}</LogicalOperator>{}</{element}>"#,
                    left.to_xml("LeftOperand"),
                    right.to_xml("RightOperand"),
                )
            }
        }
    }
}

/// Body of a SOAP call.
#[derive(Debug, Clone, PartialEq)]
pub enum SoapPayload {
    /// Retrieve request: requested properties plus optional filter.
    Retrieve {
        properties: Vec<String>,
        filter: Option<SoapFilter>,
        /// Include items shared from other business units.
        query_all_accounts: bool,
    },
    /// Continuation of a paged retrieve.
    Continue { request_id: String },
    /// Objects to create, update or delete.
    Objects(Vec<Value>),
}

/// Parsed SOAP response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoapResponse {
    /// `OK`, `MoreDataAvailable`, `Error`, ...
    pub overall_status: String,
    /// Request id, needed to continue a paged retrieve.
    pub request_id: Option<String>,
    /// One JSON object per `Results` element.
    pub results: Vec<Value>,
}

impl SoapResponse {
    /// Returns true when a retrieve has further pages.
    pub fn has_more_data(&self) -> bool {
        self.overall_status == "MoreDataAvailable"
    }

    /// Collect `StatusMessage`s of error results.
    pub fn error_messages(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.get("StatusCode").and_then(Value::as_str) == Some("Error"))
            .filter_map(|r| r.get("StatusMessage").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

/// Build a complete envelope for the given action.
pub(crate) fn build_envelope(
    token: &str,
    object_type: &str,
    action: SoapAction,
    payload: &SoapPayload,
) -> String {
    let body = match payload {
        SoapPayload::Retrieve {
            properties,
            filter,
            query_all_accounts,
        } => {
            let props: String = properties
                .iter()
                .map(|p| format!("<Properties>{}</Properties>", xml::escape(p)))
                .collect();
            let filter = filter
                .as_ref()
                .map(|f| f.to_xml("Filter"))
                .unwrap_or_default();
            let all_accounts = if *query_all_accounts {
                "<QueryAllAccounts>true</QueryAllAccounts>"
            } else {
                ""
            };
            format!(
                r#"<RetrieveRequestMsg xmlns="{PARTNER_NS}"><RetrieveRequest><ObjectType>{}</ObjectType>{props}{filter}{all_accounts}</RetrieveRequest></RetrieveRequestMsg>"#,
                xml::escape(object_type)
            )
        }
        SoapPayload::Continue { request_id } => format!(
            r#"<RetrieveRequestMsg xmlns="{PARTNER_NS}"><RetrieveRequest><ContinueRequest>{}</ContinueRequest></RetrieveRequest></RetrieveRequestMsg>"#,
            xml::escape(request_id)
        ),
        SoapPayload::Objects(objects) => {
            let objects: String = objects
                .iter()
                .map(|obj| {
                    format!(
                        r#"<Objects xsi:type="{}">{}</Objects>"#,
                        xml::escape(object_type),
                        value_to_xml(obj)
                    )
                })
                .collect();
            let options = if action == SoapAction::Retrieve {
                ""
            } else {
                "<Options/>"
            };
            format!(
                r#"<{action}Request xmlns="{PARTNER_NS}">{options}{objects}</{action}Request>"#
            )
        }
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">
  <s:Header><fueloauth xmlns="http://exacttarget.com">{}</fueloauth></s:Header>
  <s:Body>{body}</s:Body>
</s:Envelope>"#,
        xml::escape(token)
    )
}

/// Serialize the fields of a JSON object as child elements.
fn value_to_xml(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, child)| match child {
                Value::Array(items) => items
                    .iter()
                    .map(|item| format!("<{key}>{}</{key}>", value_to_xml(item)))
                    .collect(),
                Value::Null => String::new(),
                other => format!("<{key}>{}</{key}>", value_to_xml(other)),
            })
            .collect(),
        Value::String(s) => xml::escape(s),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse an XML document into a JSON tree keyed by local element names.
pub(crate) fn parse_xml(text: &str) -> Result<Value> {
    struct Node {
        name: String,
        text: String,
        children: Vec<(String, Value)>,
    }

    fn finish(node: Node) -> (String, Value) {
        if node.children.is_empty() {
            return (node.name, Value::String(node.text));
        }
        let mut map = Map::new();
        for (name, value) in node.children {
            match map.get_mut(&name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(name, value);
                }
            }
        }
        (node.name, Value::Object(map))
    }

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = vec![Node {
        name: String::new(),
        text: String::new(),
        children: Vec::new(),
    }];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Node {
                name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                text: String::new(),
                children: Vec::new(),
            }),
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push((name, Value::String(String::new())));
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    Error::new(ErrorKind::Xml("unbalanced closing tag".to_string()))
                })?;
                let (name, value) = finish(node);
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => {
                        return Err(Error::new(ErrorKind::Xml(
                            "unbalanced closing tag".to_string(),
                        )))
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match stack.pop() {
        Some(root) if stack.is_empty() => Ok(finish(root).1),
        _ => Err(Error::new(ErrorKind::Xml("unexpected end of document".to_string()))),
    }
}

/// Extract a fault from a parsed envelope, supporting SOAP 1.1 and 1.2.
fn find_fault(body: &Value) -> Option<(String, String)> {
    let fault = body.get("Fault")?;
    let code = fault
        .get("faultcode")
        .and_then(Value::as_str)
        .or_else(|| fault.pointer("/Code/Value").and_then(Value::as_str))
        .unwrap_or("Unknown")
        .to_string();
    let reason = fault
        .get("faultstring")
        .and_then(Value::as_str)
        .or_else(|| fault.pointer("/Reason/Text").and_then(Value::as_str))
        .unwrap_or("Unknown error")
        .to_string();
    Some((code, reason))
}

/// Parse a response envelope into a [`SoapResponse`].
pub(crate) fn parse_response(action: SoapAction, text: &str) -> Result<SoapResponse> {
    let doc = parse_xml(text)?;
    let body = doc
        .pointer("/Envelope/Body")
        .ok_or_else(|| Error::new(ErrorKind::Xml("missing SOAP body".to_string())))?;

    if let Some((fault_code, fault_string)) = find_fault(body) {
        return Err(Error::new(ErrorKind::SoapFault {
            fault_code,
            fault_string,
        }));
    }

    let msg_name = match action {
        SoapAction::Retrieve => "RetrieveResponseMsg".to_string(),
        other => format!("{}Response", other.as_str()),
    };
    let msg = body.get(&msg_name).ok_or_else(|| {
        Error::new(ErrorKind::Xml(format!("missing {msg_name} element")))
    })?;

    let results = match msg.get("Results") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(s)) if s.is_empty() => Vec::new(),
        Some(item) => vec![item.clone()],
        None => Vec::new(),
    };

    Ok(SoapResponse {
        overall_status: msg
            .get("OverallStatus")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        request_id: msg
            .get("RequestID")
            .and_then(Value::as_str)
            .map(str::to_string),
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RETRIEVE_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body>
    <RetrieveResponseMsg xmlns="http://exacttarget.com/wsdl/partnerAPI">
      <OverallStatus>MoreDataAvailable</OverallStatus>
      <RequestID>req-1</RequestID>
      <Results xsi:type="DataFolder">
        <ID>11</ID><Name>Queries</Name>
        <ParentFolder><ID>0</ID></ParentFolder>
      </Results>
      <Results xsi:type="DataFolder">
        <ID>12</ID><Name>A &amp; B</Name>
        <ParentFolder><ID>11</ID></ParentFolder>
      </Results>
    </RetrieveResponseMsg>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_retrieve_response() {
        let response = parse_response(SoapAction::Retrieve, RETRIEVE_RESPONSE).unwrap();
        assert!(response.has_more_data());
        assert_eq!(response.request_id.as_deref(), Some("req-1"));
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[1]["Name"], json!("A & B"));
        assert_eq!(response.results[1]["ParentFolder"]["ID"], json!("11"));
    }

    #[test]
    fn test_parse_fault() {
        let text = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault><faultcode>soap:Client</faultcode><faultstring>Unable to find object</faultstring></soap:Fault></soap:Body></soap:Envelope>"#;
        let err = parse_response(SoapAction::Retrieve, text).unwrap_err();
        match err.kind {
            ErrorKind::SoapFault { fault_string, .. } => {
                assert_eq!(fault_string, "Unable to find object")
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_create_response_error_messages() {
        let text = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><CreateResponse xmlns="http://exacttarget.com/wsdl/partnerAPI"><Results><StatusCode>Error</StatusCode><StatusMessage>Name already in use</StatusMessage></Results><OverallStatus>Error</OverallStatus></CreateResponse></soap:Body></soap:Envelope>"#;
        let response = parse_response(SoapAction::Create, text).unwrap();
        assert_eq!(response.overall_status, "Error");
        assert_eq!(response.error_messages(), vec!["Name already in use".to_string()]);
    }

    #[test]
    fn test_envelope_escapes_values() {
        let envelope = build_envelope(
            "tok",
            "DataExtension",
            SoapAction::Retrieve,
            &SoapPayload::Retrieve {
                properties: vec!["CustomerKey".into()],
                filter: Some(SoapFilter::equals("CustomerKey", "a<b")),
                query_all_accounts: false,
            },
        );
        assert!(envelope.contains("<ObjectType>DataExtension</ObjectType>"));
        assert!(envelope.contains("<Value>a&lt;b</Value>"));
        assert!(envelope.contains("<fueloauth xmlns=\"http://exacttarget.com\">tok</fueloauth>"));
    }

    #[test]
    fn test_envelope_objects_and_complex_filter() {
        let filter = SoapFilter::equals("ContentType", "dataextension")
            .and(SoapFilter::equals("Name", "Data Extensions"));
        assert!(filter.to_xml("Filter").contains("<LogicalOperator>AND</LogicalOperator>"));

        let envelope = build_envelope(
            "tok",
            "DataFolder",
            SoapAction::Create,
            &SoapPayload::Objects(vec![json!({
                "Name": "New",
                "ParentFolder": {"ID": 11},
                "Tags": ["a", "b"],
            })]),
        );
        assert!(envelope.contains(r#"<Objects xsi:type="DataFolder"><Name>New</Name><ParentFolder><ID>11</ID></ParentFolder><Tags>a</Tags><Tags>b</Tags></Objects>"#));
        assert!(envelope.contains("<CreateRequest"));
    }
}
