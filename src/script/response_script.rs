//! `ResponseScript`: the façade handed to post-response scripts as `res`.
//!
//! Header keys are lower-cased, the content type is classified once at
//! construction, and `getJson()` never throws: parse failures and non-JSON
//! responses degrade to an empty object.

use std::collections::HashMap;

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsString, JsValue, NativeFunction, js_string};
use indexmap::IndexMap;

use crate::http::client::ResponseEnvelope;
use crate::request::BodyKind;

use super::runtime::with_response;
use super::value::{arg_string, json_to_js};

#[derive(Debug, Clone)]
pub struct ResponseScript {
    headers: IndexMap<String, String>,
    text: String,
    status: u16,
    elapsed_time: f64,
    content_size: u64,
    content_type: BodyKind,
    json_cache: serde_json::Value,
    vars: HashMap<String, String>,
}

impl Default for ResponseScript {
    fn default() -> Self {
        Self {
            headers: IndexMap::new(),
            text: String::new(),
            status: 0,
            elapsed_time: 0.0,
            content_size: 0,
            content_type: BodyKind::Text,
            json_cache: serde_json::Value::Object(serde_json::Map::new()),
            vars: HashMap::new(),
        }
    }
}

impl ResponseScript {
    pub fn new(envelope: &ResponseEnvelope, vars: HashMap<String, String>) -> Self {
        let headers: IndexMap<String, String> = envelope
            .headers
            .iter()
            .map(|pair| (pair.key.to_lowercase(), pair.value.clone()))
            .collect();
        let content_type = classify_content_type(headers.get("content-type").map(String::as_str));
        let json_cache = if content_type == BodyKind::Json {
            serde_json::from_str(&envelope.text_response)
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
        } else {
            serde_json::Value::Object(serde_json::Map::new())
        };
        Self {
            headers,
            text: envelope.text_response.clone(),
            status: envelope.status,
            elapsed_time: envelope.elapsed_time,
            content_size: envelope.content_size,
            content_type,
            json_cache,
            vars,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<String> {
        self.headers.get(&key.to_lowercase()).cloned()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed JSON body; `{}` when the response isn't JSON or doesn't parse.
    pub fn json(&self) -> &serde_json::Value {
        &self.json_cache
    }

    pub fn content_type(&self) -> BodyKind {
        self.content_type
    }

    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    pub fn content_size(&self) -> u64 {
        self.content_size
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
}

/// Case-insensitive substring classification of the `content-type` header.
fn classify_content_type(value: Option<&str>) -> BodyKind {
    let Some(value) = value else {
        return BodyKind::Text;
    };
    let value = value.to_lowercase();
    if value.contains("application/json") {
        BodyKind::Json
    } else if value.contains("xml") {
        BodyKind::Xml
    } else {
        BodyKind::Text
    }
}

/// Register the `res` global for a post-response invocation.
pub(crate) fn register_response_bindings(context: &mut Context) -> JsResult<()> {
    let get_status = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let status = with_response(|res| res.status())?;
        Ok(JsValue::from(status as i32))
    });

    let get_headers = NativeFunction::from_copy_closure(|_this, _args, ctx| {
        let headers = with_response(|res| res.headers().clone())?;
        let value = serde_json::Value::Object(
            headers
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
        );
        json_to_js(&value, ctx)
    });

    let get_header = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = with_response(|res| res.header(&key))?;
        Ok(match value {
            Some(value) => JsValue::from(JsString::from(value)),
            None => JsValue::null(),
        })
    });

    let get_text = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let text = with_response(|res| res.text().to_string())?;
        Ok(JsValue::from(JsString::from(text)))
    });

    let get_json = NativeFunction::from_copy_closure(|_this, _args, ctx| {
        let cached = with_response(|res| res.json().clone())?;
        json_to_js(&cached, ctx)
    });

    let get_content_type = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let kind = with_response(|res| res.content_type())?;
        Ok(JsValue::from(js_string!(kind.as_str())))
    });

    let get_elapsed_time = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let elapsed = with_response(|res| res.elapsed_time())?;
        Ok(JsValue::from(elapsed))
    });

    let get_size = NativeFunction::from_copy_closure(|_this, _args, _ctx| {
        let size = with_response(|res| res.content_size())?;
        Ok(JsValue::from(size as f64))
    });

    let get_var = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = with_response(|res| res.var(&key))?;
        Ok(match value {
            Some(value) => JsValue::from(JsString::from(value)),
            None => JsValue::null(),
        })
    });

    let set_var = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let key = arg_string(args, 0, ctx)?;
        let value = arg_string(args, 1, ctx)?;
        with_response(|res| res.set_var(key, value))?;
        Ok(JsValue::undefined())
    });

    let res = ObjectInitializer::new(context)
        .function(get_status, js_string!("getStatus"), 0)
        .function(get_headers, js_string!("getHeaders"), 0)
        .function(get_header, js_string!("getHeader"), 1)
        .function(get_text, js_string!("getText"), 0)
        .function(get_json, js_string!("getJson"), 0)
        .function(get_content_type, js_string!("getContentType"), 0)
        .function(get_elapsed_time, js_string!("getElapsedTime"), 0)
        .function(get_size, js_string!("getSize"), 0)
        .function(get_var, js_string!("getVar"), 1)
        .function(set_var, js_string!("setVar"), 2)
        .build();

    context.register_global_property(js_string!("res"), res, Attribute::all())
}
