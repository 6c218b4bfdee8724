//! # Request Model
//!
//! Structured description of an authored request: the HTTP method, url,
//! header/query entries (with the `~`-prefix disabled convention), the body
//! payload, and the optional pre/post script hooks extracted from source.

mod deserialize;
mod serialize;

pub use deserialize::deserialize_http_fn;
pub use serialize::serialize_http_fn;

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::script::ScriptHook;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    /// Canonical priority order: when a source file defines several request
    /// functions, the first name in this order wins, regardless of
    /// declaration order.
    pub const ALL: [HttpMethod; 9] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Connect,
        HttpMethod::Trace,
    ];

    /// Uppercase name as it appears in authored source (`const GET = ...`).
    pub fn name(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Lowercase name used everywhere outside the source text.
    pub fn lower_name(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Delete => "delete",
            HttpMethod::Patch => "patch",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
            HttpMethod::Connect => "connect",
            HttpMethod::Trace => "trace",
        }
    }

    pub fn from_name(name: &str) -> Option<HttpMethod> {
        HttpMethod::ALL
            .iter()
            .copied()
            .find(|method| method.name() == name)
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Connect => reqwest::Method::CONNECT,
            HttpMethod::Trace => reqwest::Method::TRACE,
        }
    }
}

/// Which body field of a request or response is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Json,
    Xml,
    Text,
}

impl BodyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::Json => "json",
            BodyKind::Xml => "xml",
            BodyKind::Text => "text",
        }
    }

    pub fn from_tag(tag: &str) -> Option<BodyKind> {
        match tag {
            "json" => Some(BodyKind::Json),
            "xml" => Some(BodyKind::Xml),
            "text" => Some(BodyKind::Text),
            _ => None,
        }
    }

    /// Default `Content-Type` inferred for a request carrying this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            BodyKind::Json => "application/json",
            BodyKind::Xml => "text/xml",
            BodyKind::Text => "text/plain",
        }
    }
}

/// A single header or query entry. Entries whose source key carried a `~`
/// prefix are kept for display/editing but excluded from the outgoing
/// request (`enabled: false`, prefix stripped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestField {
    pub key: String,
    pub value: String,
    pub enabled: bool,
}

impl RequestField {
    pub fn enabled(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
        }
    }

    pub fn disabled(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: false,
        }
    }
}

/// Output of the source-to-model conversion.
///
/// `body` declares which of `json`/`xml`/`text` is authoritative; when it is
/// `None` no body is sent. The hooks hold the captured source and re-enter
/// the sandbox when invoked.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeserializedRequest {
    pub url: String,
    pub method: HttpMethod,
    pub name: Option<String>,
    pub headers: Vec<RequestField>,
    pub query: Vec<RequestField>,
    pub body: Option<BodyKind>,
    pub json: Option<serde_json::Value>,
    pub xml: Option<String>,
    pub text: Option<String>,
    pub pre_request: Option<ScriptHook>,
    pub post_response: Option<ScriptHook>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_starts_with_get() {
        assert_eq!(HttpMethod::ALL[0], HttpMethod::Get);
        assert_eq!(HttpMethod::ALL[1], HttpMethod::Post);
        assert_eq!(HttpMethod::ALL[8], HttpMethod::Trace);
    }

    #[test]
    fn names_round_trip() {
        for method in HttpMethod::ALL {
            assert_eq!(HttpMethod::from_name(method.name()), Some(method));
            assert_eq!(method.lower_name(), method.name().to_lowercase());
        }
    }

    #[test]
    fn body_kind_tags() {
        assert_eq!(BodyKind::from_tag("json"), Some(BodyKind::Json));
        assert_eq!(BodyKind::from_tag("form"), None);
        assert_eq!(BodyKind::Xml.content_type(), "text/xml");
    }

    #[test]
    fn default_request_is_empty_get() {
        let request = DeserializedRequest::default();
        assert_eq!(request.method, HttpMethod::Get);
        assert!(request.url.is_empty());
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
        assert!(request.pre_request.is_none());
    }
}
