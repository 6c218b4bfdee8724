//! `RequestScript`: the façade handed to pre-request scripts as `req`.
//!
//! Disabled header/query entries are dropped at construction and never
//! re-surface. Mutations made by the script are visible to the transport
//! call that follows.

use std::collections::HashMap;

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsString, JsValue, NativeFunction, js_string};
use indexmap::IndexMap;

use crate::http::client::TransportCall;
use crate::request::{BodyKind, DeserializedRequest, HttpMethod};

use super::runtime::with_request;
use super::value::{arg_string, js_to_json, json_to_js};

#[derive(Debug, Clone, Default)]
pub struct RequestScript {
    url: String,
    method: HttpMethod,
    headers: IndexMap<String, String>,
    query: IndexMap<String, String>,
    vars: HashMap<String, String>,
    body: Option<BodyKind>,
    json: Option<serde_json::Value>,
    xml: Option<String>,
    text: Option<String>,
}

impl RequestScript {
    pub fn new(request: &DeserializedRequest, vars: HashMap<String, String>) -> Self {
        let headers = request
            .headers
            .iter()
            .filter(|field| field.enabled)
            .map(|field| (field.key.clone(), field.value.clone()))
            .collect();
        let query = request
            .query
            .iter()
            .filter(|field| field.enabled)
            .map(|field| (field.key.clone(), field.value.clone()))
            .collect();
        Self {
            url: request.url.clone(),
            method: request.method,
            headers,
            query,
            vars,
            body: request.body,
            json: request.json.clone(),
            xml: request.xml.clone(),
            text: request.text.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Stored headers merged with an inferred `Content-Type` default for the
    /// resolved body type. Stored headers always win over the default.
    pub fn headers(&self) -> IndexMap<String, String> {
        let mut merged = self.headers.clone();
        if let Some(kind) = self.body_kind() {
            let has_content_type = merged
                .keys()
                .any(|key| key.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                merged.insert("Content-Type".into(), kind.content_type().into());
            }
        }
        merged
    }

    pub fn header(&self, key: &str) -> Option<String> {
        self.headers()
            .iter()
            .find(|(stored, _)| stored.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.clone())
    }

    pub fn query(&self) -> &IndexMap<String, String> {
        &self.query
    }

    /// Resolved body type: the explicit tag first, then presence of json,
    /// xml, text data, in that order.
    pub fn body_kind(&self) -> Option<BodyKind> {
        match self.body {
            Some(BodyKind::Json) if self.json.is_some() => Some(BodyKind::Json),
            Some(BodyKind::Xml) if self.xml.is_some() => Some(BodyKind::Xml),
            Some(BodyKind::Text) if self.text.is_some() => Some(BodyKind::Text),
            _ => {
                if self.json.is_some() {
                    Some(BodyKind::Json)
                } else if self.xml.is_some() {
                    Some(BodyKind::Xml)
                } else if self.text.is_some() {
                    Some(BodyKind::Text)
                } else {
                    None
                }
            }
        }
    }

    /// Payload matching [`body_kind`](Self::body_kind), or `None` when no
    /// body field is set.
    pub fn body_data(&self) -> Option<serde_json::Value> {
        match self.body_kind()? {
            BodyKind::Json => self.json.clone(),
            BodyKind::Xml => self.xml.clone().map(serde_json::Value::String),
            BodyKind::Text => self.text.clone().map(serde_json::Value::String),
        }
    }

    /// Body rendered as the wire payload string.
    pub fn body_text(&self) -> Option<String> {
        match self.body_kind()? {
            BodyKind::Json => self.json.as_ref().map(|value| value.to_string()),
            BodyKind::Xml => self.xml.clone(),
            BodyKind::Text => self.text.clone(),
        }
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn set_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.insert(key.into(), value.into());
    }

    pub fn set_json(&mut self, value: serde_json::Value) {
        self.json = Some(value);
        self.xml = None;
        self.text = None;
        self.body = Some(BodyKind::Json);
    }

    pub fn set_xml(&mut self, value: impl Into<String>) {
        self.xml = Some(value.into());
        self.json = None;
        self.text = None;
        self.body = Some(BodyKind::Xml);
    }

    pub fn set_text(&mut self, value: impl Into<String>) {
        self.text = Some(value.into());
        self.json = None;
        self.xml = None;
        self.body = Some(BodyKind::Text);
    }

    pub fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn into_vars(self) -> HashMap<String, String> {
        self.vars
    }

    /// Snapshot the façade state into the transport-call description.
    pub fn to_transport_call(&self) -> TransportCall {
        TransportCall {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers().into_iter().collect(),
            query: self
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: self.body_text(),
        }
    }
}

fn headers_to_json(headers: IndexMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        headers
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect(),
    )
}

/// Register the `req` global for a pre-request invocation. Every method
/// reads or mutates the active façade through the runtime's session slot.
pub(crate) fn register_request_bindings(context: &mut Context) -> JsResult<()> {
    let get_url = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let url = with_request(|req| req.url().to_string())?;
        Ok(JsValue::from(JsString::from(url)))
    });

    let get_method = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let method = with_request(|req| req.method())?;
        Ok(JsValue::from(js_string!(method.lower_name())))
    });

    let get_headers = NativeFunction::from_copy_closure(|_this, _args, ctx| {
        let headers = with_request(|req| req.headers())?;
        json_to_js(&headers_to_json(headers), ctx)
    });

    let get_header = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = with_request(|req| req.header(&key))?;
        Ok(match value {
            Some(value) => JsValue::from(JsString::from(value)),
            None => JsValue::null(),
        })
    });

    let set_header = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = arg_string(args, 1, ctx)?;
        with_request(|req| req.set_header(key, value))?;
        Ok(JsValue::undefined())
    });

    let set_headers = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let value = args.first().cloned().unwrap_or(JsValue::undefined());
        let parsed = js_to_json(&value, ctx)?;
        let Some(serde_json::Value::Object(entries)) = parsed else {
            return Err(boa_engine::JsNativeError::typ()
                .with_message("setHeaders expects an object of header values")
                .into());
        };
        with_request(|req| {
            for (key, value) in &entries {
                req.set_header(key.clone(), json_value_string(value));
            }
        })?;
        Ok(JsValue::undefined())
    });

    let get_query = NativeFunction::from_copy_closure(|_this, _args, ctx| {
        let query = with_request(|req| req.query().clone())?;
        json_to_js(&headers_to_json(query), ctx)
    });

    let set_query = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = arg_string(args, 1, ctx)?;
        with_request(|req| req.set_query(key, value))?;
        Ok(JsValue::undefined())
    });

    let get_body = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let kind = with_request(|req| req.body_kind())?;
        Ok(match kind {
            Some(kind) => JsValue::from(js_string!(kind.as_str())),
            None => JsValue::null(),
        })
    });

    let get_body_data = NativeFunction::from_copy_closure(|_this, _args, ctx| {
        let data = with_request(|req| req.body_data())?;
        match data {
            Some(value) => json_to_js(&value, ctx),
            None => Ok(JsValue::null()),
        }
    });

    let set_json = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let value = args.first().cloned().unwrap_or(JsValue::undefined());
        let Some(parsed) = js_to_json(&value, ctx)? else {
            return Err(boa_engine::JsNativeError::typ()
                .with_message("setJson expects a JSON-serializable value")
                .into());
        };
        with_request(|req| req.set_json(parsed))?;
        Ok(JsValue::undefined())
    });

    let set_xml = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let value = arg_string(args, 0, ctx)?;
        with_request(|req| req.set_xml(value))?;
        Ok(JsValue::undefined())
    });

    let set_text = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let value = arg_string(args, 0, ctx)?;
        with_request(|req| req.set_text(value))?;
        Ok(JsValue::undefined())
    });

    let get_var = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = with_request(|req| req.var(&key))?;
        Ok(match value {
            Some(value) => JsValue::from(JsString::from(value)),
            None => JsValue::null(),
        })
    });

    let set_var = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = arg_string(args, 1, ctx)?;
        with_request(|req| req.set_var(key, value))?;
        Ok(JsValue::undefined())
    });

    let req = ObjectInitializer::new(context)
        .function(get_url, js_string!("getUrl"), 0)
        .function(get_method, js_string!("getMethod"), 0)
        .function(get_headers, js_string!("getHeaders"), 0)
        .function(get_header, js_string!("getHeader"), 1)
        .function(set_header, js_string!("setHeader"), 2)
        .function(set_headers, js_string!("setHeaders"), 1)
        .function(get_query, js_string!("getQuery"), 0)
        .function(set_query, js_string!("setQuery"), 2)
        .function(get_body, js_string!("getBody"), 0)
        .function(get_body_data, js_string!("getBodyData"), 0)
        .function(set_json, js_string!("setJson"), 1)
        .function(set_xml, js_string!("setXml"), 1)
        .function(set_text, js_string!("setText"), 1)
        .function(get_var, js_string!("getVar"), 1)
        .function(set_var, js_string!("setVar"), 2)
        .build();

    context.register_global_property(js_string!("req"), req, Attribute::all())
}

fn json_value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
