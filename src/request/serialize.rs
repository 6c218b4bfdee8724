//! Model-to-source conversion, the inverse of [`deserialize_http_fn`].
//!
//! The emitted text is normalized, not a reproduction of the original
//! source: `deserialize_http_fn(serialize_http_fn(x))` reproduces `x`'s
//! semantic fields (url, method, header/query sets, body payload) while
//! the exact formatting differs.
//!
//! [`deserialize_http_fn`]: super::deserialize_http_fn

use crate::script::value::json_quote;

use super::deserialize::resolve_body_tag;
use super::{BodyKind, DeserializedRequest, RequestField};

/// Render a [`DeserializedRequest`] as authored source text:
/// `const <METHOD> = () => { return {...}; };`.
///
/// Disabled header/query entries re-add the `~` prefix. Object-shaped JSON
/// bodies emit a bare `json:` key (the tag is re-inferred on parse); scalar
/// bodies emit the explicit `body:` tag alongside the matching field.
pub fn serialize_http_fn(request: &DeserializedRequest) -> String {
    let mut lines = Vec::new();
    lines.push(format!("const {} = () => {{", request.method.name()));
    lines.push("  return {".to_string());
    lines.push(format!("    url: {},", json_quote(&request.url)));
    if let Some(name) = &request.name {
        lines.push(format!("    name: {},", json_quote(name)));
    }
    push_fields(&mut lines, "headers", &request.headers);
    push_fields(&mut lines, "query", &request.query);
    push_body(&mut lines, request);
    lines.push("  };".to_string());
    lines.push("};".to_string());
    lines.join("\n")
}

fn push_fields(lines: &mut Vec<String>, label: &str, fields: &[RequestField]) {
    if fields.is_empty() {
        return;
    }
    lines.push(format!("    {label}: {{"));
    for field in fields {
        let key = if field.enabled {
            field.key.clone()
        } else {
            format!("~{}", field.key)
        };
        lines.push(format!(
            "      {}: {},",
            json_quote(&key),
            json_quote(&field.value)
        ));
    }
    lines.push("    },".to_string());
}

fn push_body(lines: &mut Vec<String>, request: &DeserializedRequest) {
    let tag = resolve_body_tag(
        request.body.map(|kind| kind.as_str()),
        &request.json,
        &request.xml,
        &request.text,
    );
    match tag {
        Some(BodyKind::Json) => {
            let Some(json) = &request.json else { return };
            if json.is_object() || json.is_array() {
                lines.push(format!("    json: {json},"));
            } else {
                lines.push("    body: \"json\",".to_string());
                lines.push(format!("    json: {json},"));
            }
        }
        Some(BodyKind::Xml) => {
            let Some(xml) = &request.xml else { return };
            lines.push("    body: \"xml\",".to_string());
            lines.push(format!("    xml: {},", json_quote(xml)));
        }
        Some(BodyKind::Text) => {
            let Some(text) = &request.text else { return };
            lines.push("    body: \"text\",".to_string());
            lines.push(format!("    text: {},", json_quote(text)));
        }
        None => {}
    }
}
