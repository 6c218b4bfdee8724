//! Source-to-model conversion.
//!
//! The authored source is evaluated once together with a probe that picks
//! the first recognized method function (canonical order, not declaration
//! order), calls it, and serializes the returned config to JSON. Function
//! properties are dropped by `JSON.stringify`, so hook presence travels as
//! separate booleans and the hooks themselves keep the raw source text.

use boa_engine::{Context, Source};
use serde::Deserialize;

use crate::script::{HookKind, ScriptHook};

use super::{BodyKind, DeserializedRequest, HttpMethod, RequestField};

#[derive(Debug, Deserialize)]
struct Probe {
    method: String,
    config: RawConfig,
    pre_request: bool,
    post_response: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    url: Option<String>,
    name: Option<String>,
    headers: Option<serde_json::Map<String, serde_json::Value>>,
    query: Option<serde_json::Map<String, serde_json::Value>>,
    body: Option<String>,
    json: Option<serde_json::Value>,
    xml: Option<serde_json::Value>,
    text: Option<serde_json::Value>,
}

/// Convert authored source text into a [`DeserializedRequest`].
///
/// Never fails: malformed source, an evaluation throw, or a source without
/// any recognized method function all degrade to a default empty GET
/// request, with the cause logged. Callers check for an effectively empty
/// result instead of catching errors.
pub fn deserialize_http_fn(source: &str) -> DeserializedRequest {
    match probe_source(source) {
        Ok(Some(probe)) => build_request(source, probe),
        Ok(None) => {
            log::warn!("no recognized HTTP method function in source");
            DeserializedRequest::default()
        }
        Err(message) => {
            log::warn!("failed to evaluate request source: {message}");
            DeserializedRequest::default()
        }
    }
}

fn probe_source(source: &str) -> Result<Option<Probe>, String> {
    let mut context = Context::default();

    let mut picks = String::new();
    for method in HttpMethod::ALL {
        let name = method.name();
        picks.push_str(&format!(
            "  if (typeof {name} === \"function\") {{ return [\"{name}\", {name}()]; }}\n"
        ));
    }
    let probe = format!(
        "(() => {{\n\
         const __sm_pick = () => {{\n{picks}  return null;\n}};\n\
         const __sm_picked = __sm_pick();\n\
         if (__sm_picked === null) {{ return \"null\"; }}\n\
         const __sm_cfg = __sm_picked[1];\n\
         return JSON.stringify({{\n\
           method: __sm_picked[0],\n\
           config: __sm_cfg,\n\
           pre_request: typeof __sm_cfg.pre_request === \"function\",\n\
           post_response: typeof __sm_cfg.post_response === \"function\",\n\
         }});\n\
         }})()"
    );
    let script = format!("{source}\n;{probe}");

    let value = context
        .eval(Source::from_bytes(script.as_bytes()))
        .map_err(|e| e.to_string())?;
    let text = value
        .to_string(&mut context)
        .map_err(|e| e.to_string())?
        .to_std_string_escaped();

    if text == "null" {
        return Ok(None);
    }
    let probe: Probe =
        serde_json::from_str(&text).map_err(|e| format!("unexpected config shape: {e}"))?;
    Ok(Some(probe))
}

fn build_request(source: &str, probe: Probe) -> DeserializedRequest {
    let Some(method) = HttpMethod::from_name(&probe.method) else {
        log::warn!("probe returned unknown method `{}`", probe.method);
        return DeserializedRequest::default();
    };
    let config = probe.config;

    let xml = config.xml.as_ref().map(value_to_string);
    let text = config.text.as_ref().map(value_to_string);
    let body = resolve_body_tag(config.body.as_deref(), &config.json, &xml, &text);

    DeserializedRequest {
        url: config.url.unwrap_or_default(),
        method,
        name: config.name,
        headers: collect_fields(config.headers),
        query: collect_fields(config.query),
        body,
        json: config.json,
        xml,
        text,
        pre_request: probe
            .pre_request
            .then(|| ScriptHook::new(source, method, HookKind::PreRequest)),
        post_response: probe
            .post_response
            .then(|| ScriptHook::new(source, method, HookKind::PostResponse)),
    }
}

/// An explicit `body` tag wins when its matching field is present;
/// otherwise infer json > xml > text.
pub(super) fn resolve_body_tag(
    tag: Option<&str>,
    json: &Option<serde_json::Value>,
    xml: &Option<String>,
    text: &Option<String>,
) -> Option<BodyKind> {
    if let Some(kind) = tag.and_then(BodyKind::from_tag) {
        let matching = match kind {
            BodyKind::Json => json.is_some(),
            BodyKind::Xml => xml.is_some(),
            BodyKind::Text => text.is_some(),
        };
        if matching {
            return Some(kind);
        }
    }
    if json.is_some() {
        Some(BodyKind::Json)
    } else if xml.is_some() {
        Some(BodyKind::Xml)
    } else if text.is_some() {
        Some(BodyKind::Text)
    } else {
        None
    }
}

fn collect_fields(entries: Option<serde_json::Map<String, serde_json::Value>>) -> Vec<RequestField> {
    let Some(entries) = entries else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|(key, value)| match key.strip_prefix('~') {
            Some(stripped) => RequestField::disabled(stripped, value_to_string(value)),
            None => RequestField::enabled(key, value_to_string(value)),
        })
        .collect()
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
