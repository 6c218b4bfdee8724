use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

use crate::request::HttpMethod;

/// A resolved request ready to go on the wire. Produced by
/// [`RequestScript::to_transport_call`](crate::script::request_script::RequestScript::to_transport_call)
/// after the pre-request script has run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportCall {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderPair {
    pub key: String,
    pub value: String,
}

/// The uniform response shape handed to the post-response script and the
/// caller. Failures and cancellations are encoded as a zero-valued
/// envelope with a JSON error payload rather than a separate error path,
/// so the script stage always has something to inspect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: Vec<HeaderPair>,
    pub text_response: String,
    pub elapsed_time: f64,
    pub content_size: u64,
}

impl ResponseEnvelope {
    pub fn cancelled() -> Self {
        Self::failure("Request was cancelled")
    }

    pub fn network_error(message: &str) -> Self {
        Self::failure(message)
    }

    fn failure(message: &str) -> Self {
        ResponseEnvelope {
            status: 0,
            headers: Vec::new(),
            text_response: json!({ "error": message }).to_string(),
            elapsed_time: 0.0,
            content_size: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum TransportError {
    #[error("Request was cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Send the call, racing every await against the cancellation channel.
/// Never returns an error: transport failures are folded into the envelope.
pub async fn send_request(
    call: TransportCall,
    cancel_rx: &mut broadcast::Receiver<()>,
) -> ResponseEnvelope {
    match perform(call, cancel_rx).await {
        Ok(envelope) => envelope,
        Err(TransportError::Cancelled) => {
            log::info!("request cancelled before completion");
            ResponseEnvelope::cancelled()
        }
        Err(TransportError::Failed(message)) => {
            log::warn!("request failed: {message}");
            ResponseEnvelope::network_error(&message)
        }
    }
}

async fn perform(
    call: TransportCall,
    cancel_rx: &mut broadcast::Receiver<()>,
) -> Result<ResponseEnvelope, TransportError> {
    let mut url = reqwest::Url::parse(&call.url)
        .map_err(|e| TransportError::Failed(format!("Invalid URL: {e}")))?;

    if !call.query.is_empty() {
        let mut query_pairs = url.query_pairs_mut();
        for (key, value) in &call.query {
            query_pairs.append_pair(key, value);
        }
    }

    let headers = build_headers(&call.headers).map_err(TransportError::Failed)?;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| TransportError::Failed(format!("Failed to build client: {e}")))?;

    let method: reqwest::Method = call.method.into();
    let mut req_builder = client.request(method, url).headers(headers);

    // Bodies on GET/HEAD/OPTIONS are rejected by many servers and some
    // intermediaries; drop them rather than forwarding surprises.
    let body_allowed = !matches!(
        call.method,
        HttpMethod::Get | HttpMethod::Head | HttpMethod::Options
    );
    if body_allowed {
        if let Some(body) = call.body {
            req_builder = req_builder.body(body);
        }
    }

    let started = Instant::now();

    let response = tokio::select! {
        result = req_builder.send() => {
            result.map_err(|e| TransportError::Failed(format!("Request failed: {e}")))?
        }
        _ = cancel_rx.recv() => {
            return Err(TransportError::Cancelled);
        }
    };

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| HeaderPair {
            key: name.to_string(),
            value: value.to_str().unwrap_or("<binary>").to_string(),
        })
        .collect();

    let bytes = tokio::select! {
        result = response.bytes() => {
            result.map_err(|e| TransportError::Failed(format!("Failed to read response: {e}")))?
        }
        _ = cancel_rx.recv() => {
            return Err(TransportError::Cancelled);
        }
    };

    let elapsed_time = started.elapsed().as_secs_f64();
    let content_size = bytes.len() as u64;
    let text_response = String::from_utf8_lossy(&bytes).into_owned();

    Ok(ResponseEnvelope {
        status,
        headers,
        text_response,
        elapsed_time,
        content_size,
    })
}

fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    for (key, value) in pairs {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| format!("Invalid header key `{key}`: {e}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| format!("Invalid header value `{value}`: {e}"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
