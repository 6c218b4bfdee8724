//! JS ⇄ JSON value bridging for the sandbox.
//!
//! Boa's copy-closure natives make it awkward to walk arbitrary `JsValue`
//! graphs by hand, so conversions lean on the engine's own `JSON` builtin:
//! Rust → JS goes through `JSON.parse(...)`, JS → Rust registers the value
//! under a generated global name and evaluates `JSON.stringify(...)`.

use std::sync::atomic::{AtomicU32, Ordering};

use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsString, JsValue, Source};

/// Counter for unique value-slot global names.
static NEXT_SLOT_ID: AtomicU32 = AtomicU32::new(1);

/// Escape a string for use as a JS string literal.
pub(crate) fn json_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < ' ' => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Convert a JSON value into a live JS value via the engine's `JSON.parse`.
pub(crate) fn json_to_js(value: &serde_json::Value, context: &mut Context) -> JsResult<JsValue> {
    let text = value.to_string();
    let code = format!("JSON.parse({})", json_quote(&text));
    context.eval(Source::from_bytes(code.as_bytes()))
}

/// Convert a JS value into JSON. Returns `None` when the value has no JSON
/// representation (functions, `undefined`).
pub(crate) fn js_to_json(
    value: &JsValue,
    context: &mut Context,
) -> JsResult<Option<serde_json::Value>> {
    if value.is_undefined() {
        return Ok(None);
    }
    if value.is_null() {
        return Ok(Some(serde_json::Value::Null));
    }
    let id = NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed);
    let name = format!("__sm_val_{id}");
    context.register_global_property(JsString::from(name.as_str()), value.clone(), Attribute::all())?;
    let raw = context.eval(Source::from_bytes(
        format!("JSON.stringify({name})").as_bytes(),
    ))?;
    if raw.is_undefined() {
        return Ok(None);
    }
    let text = raw.to_string(context)?.to_std_string_escaped();
    Ok(serde_json::from_str(&text).ok())
}

/// Read an argument coerced to a Rust string; missing arguments become "".
pub(crate) fn arg_string(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    Ok(args
        .get(index)
        .map(|v| v.to_string(context))
        .transpose()?
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default())
}
