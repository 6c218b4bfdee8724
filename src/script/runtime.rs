//! Sandboxed script execution.
//!
//! Each hook invocation gets a fresh engine context with a constrained
//! global surface: the relevant façade (`req` or `res`), `describe`, `it`,
//! `expect`, `console`, `structuredClone`, and `crypto.randomUUID`. The
//! describe/it nesting state machine lives in a per-invocation session.
//!
//! `NativeFunction::from_copy_closure` requires `Copy` closures, which rules
//! out capturing shared state directly, so the session travels through a
//! thread-local slot. Script execution is synchronous and single-threaded,
//! which the nesting guards rely on.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};

use boa_engine::property::Attribute;
use boa_engine::{
    Context, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source, js_string,
};

use crate::request::HttpMethod;

use super::request_script::{RequestScript, register_request_bindings};
use super::response_script::{ResponseScript, register_response_bindings};
use super::value::arg_string;
use super::{DescribeResult, HookKind, ItResult, TestResult};

/// Assertion and utility prelude evaluated ahead of every script body.
/// `expect` is a chai-flavoured subset; assertion failures throw `Error`
/// and are picked up by the enclosing `describe`/`it` guard.
const PRELUDE: &str = r#"
const expect = (actual) => {
    const show = (value) => {
        try {
            const text = JSON.stringify(value);
            return text === undefined ? String(value) : text;
        } catch (err) {
            return String(value);
        }
    };
    const deepEq = (a, b) => show(a) === show(b);
    const chain = (negate) => {
        const word = negate ? " not" : "";
        const check = (ok, message) => {
            if (ok === negate) {
                throw new Error(message);
            }
        };
        const out = {
            equal: (expected) =>
                check(actual === expected, `expected ${show(actual)}${word} to equal ${show(expected)}`),
            eql: (expected) =>
                check(deepEq(actual, expected), `expected ${show(actual)}${word} to deeply equal ${show(expected)}`),
            include: (needle) => {
                const ok = typeof actual === "string" || Array.isArray(actual)
                    ? actual.indexOf(needle) !== -1
                    : false;
                check(ok, `expected ${show(actual)}${word} to include ${show(needle)}`);
            },
            match: (pattern) =>
                check(pattern.test(String(actual)), `expected ${show(actual)}${word} to match ${String(pattern)}`),
        };
        out.contain = out.include;
        out.deep = { equal: out.eql };
        out.be = {
            above: (bound) => check(actual > bound, `expected ${show(actual)}${word} to be above ${show(bound)}`),
            below: (bound) => check(actual < bound, `expected ${show(actual)}${word} to be below ${show(bound)}`),
            a: (kind) => check(typeof actual === kind, `expected ${show(actual)}${word} to be a ${kind}`),
            get ok() {
                check(!!actual, `expected ${show(actual)}${word} to be truthy`);
                return true;
            },
            get true() {
                check(actual === true, `expected ${show(actual)}${word} to be true`);
                return true;
            },
            get false() {
                check(actual === false, `expected ${show(actual)}${word} to be false`);
                return true;
            },
            get null() {
                check(actual === null, `expected ${show(actual)}${word} to be null`);
                return true;
            },
            get undefined() {
                check(actual === undefined, `expected ${show(actual)}${word} to be undefined`);
                return true;
            },
        };
        out.be.an = out.be.a;
        out.have = {
            property: (name) =>
                check(actual !== null && actual !== undefined && name in Object(actual),
                    `expected ${show(actual)}${word} to have property ${name}`),
            lengthOf: (expected) =>
                check(actual !== null && actual !== undefined && actual.length === expected,
                    `expected ${show(actual)}${word} to have length ${expected}`),
        };
        return out;
    };
    const to = chain(false);
    to.not = chain(true);
    return { to };
};

if (typeof structuredClone === "undefined") {
    globalThis.structuredClone = (value) =>
        value === undefined ? undefined : JSON.parse(JSON.stringify(value));
}

if (typeof crypto === "undefined") {
    globalThis.crypto = {
        randomUUID: () =>
            "xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx".replace(/[xy]/g, (c) => {
                const r = Math.floor(Math.random() * 16);
                const v = c === "x" ? r : (r & 0x3) | 0x8;
                return v.toString(16);
            }),
    };
}
"#;

/// Per-invocation execution state: the active façade plus the describe/it
/// state machine and the collected results.
#[derive(Default)]
struct Session {
    request: Option<RequestScript>,
    response: Option<ResponseScript>,
    results: Vec<TestResult>,
    current: Option<DescribeResult>,
    in_describe: bool,
    in_it: bool,
}

thread_local! {
    static SESSION: RefCell<Option<Session>> = const { RefCell::new(None) };
}

/// Counter for unique callback variable names. Boa cannot hand a function's
/// source text back, so callbacks are stored under generated global names
/// and invoked by evaluating the call expression.
static NEXT_CALLBACK_ID: AtomicU32 = AtomicU32::new(1);

fn with_session<R>(f: impl FnOnce(&mut Session) -> R) -> JsResult<R> {
    SESSION.with(|slot| {
        let mut guard = slot.borrow_mut();
        match guard.as_mut() {
            Some(session) => Ok(f(session)),
            None => Err(JsNativeError::error()
                .with_message("no active script session")
                .into()),
        }
    })
}

pub(crate) fn with_request<R>(f: impl FnOnce(&mut RequestScript) -> R) -> JsResult<R> {
    SESSION.with(|slot| {
        let mut guard = slot.borrow_mut();
        match guard.as_mut().and_then(|session| session.request.as_mut()) {
            Some(request) => Ok(f(request)),
            None => Err(JsNativeError::error()
                .with_message("req is not available in this script")
                .into()),
        }
    })
}

pub(crate) fn with_response<R>(f: impl FnOnce(&mut ResponseScript) -> R) -> JsResult<R> {
    SESSION.with(|slot| {
        let mut guard = slot.borrow_mut();
        match guard.as_mut().and_then(|session| session.response.as_mut()) {
            Some(response) => Ok(f(response)),
            None => Err(JsNativeError::error()
                .with_message("res is not available in this script")
                .into()),
        }
    })
}

/// Run a `pre_request` script body against the request façade.
pub(crate) fn run_pre_request(
    source: &str,
    method: HttpMethod,
    script: RequestScript,
) -> (RequestScript, Vec<TestResult>) {
    let session = Session {
        request: Some(script),
        ..Session::default()
    };
    let session = exec(source, method, HookKind::PreRequest, session);
    (session.request.unwrap_or_default(), session.results)
}

/// Run a `post_response` script body against the response façade.
pub(crate) fn run_post_response(
    source: &str,
    method: HttpMethod,
    script: ResponseScript,
) -> (ResponseScript, Vec<TestResult>) {
    let session = Session {
        response: Some(script),
        ..Session::default()
    };
    let session = exec(source, method, HookKind::PostResponse, session);
    (session.response.unwrap_or_default(), session.results)
}

fn exec(source: &str, method: HttpMethod, kind: HookKind, session: Session) -> Session {
    SESSION.with(|slot| *slot.borrow_mut() = Some(session));

    let mut context = Context::default();
    let installed = install_globals(&mut context, kind);

    let outcome = match installed {
        Ok(()) => {
            let invoke = format!(
                "(() => {{ const __sm_cfg = ({method})(); if (typeof __sm_cfg.{hook} === \"function\") {{ __sm_cfg.{hook}(); }} }})();",
                method = method.name(),
                hook = kind.property(),
            );
            let script = format!("{PRELUDE}\n{source}\n;{invoke}");
            context
                .eval(Source::from_bytes(script.as_bytes()))
                .map(|_| ())
        }
        Err(err) => Err(err),
    };

    let mut session = SESSION
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_default();

    if let Err(error) = outcome {
        let message = error_message(&error, &mut context);
        log::warn!(target: "script", "script execution failed: {message}");
        session.results.push(TestResult::script_error(message));
    }

    session
}

fn install_globals(context: &mut Context, kind: HookKind) -> JsResult<()> {
    register_console(context)?;
    register_test_functions(context)?;
    match kind {
        HookKind::PreRequest => register_request_bindings(context),
        HookKind::PostResponse => register_response_bindings(context),
    }
}

/// Prefer the native message over the opaque `JsError` display, which can
/// degrade to `[object Object]` for thrown `Error` values.
fn error_message(error: &JsError, context: &mut Context) -> String {
    match error.try_native(context) {
        Ok(native) => native.to_string(),
        Err(_) => error.to_string(),
    }
}

/// Store a callback under a generated global name and return the call
/// expression that invokes it.
fn stash_callback(value: &JsValue, context: &mut Context) -> JsResult<String> {
    let id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
    let name = format!("__sm_cb_{id}");
    context.register_global_property(JsString::from(name.as_str()), value.clone(), Attribute::all())?;
    Ok(format!("{name}()"))
}

fn register_test_functions(context: &mut Context) -> JsResult<()> {
    let describe_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let name = arg_string(args, 0, ctx)?;
        if with_session(|session| session.in_describe)? {
            return Err(JsNativeError::error()
                .with_message("describe blocks cannot be nested")
                .into());
        }
        let call_expr = args
            .get(1)
            .filter(|value| value.is_object())
            .map(|value| stash_callback(value, ctx))
            .transpose()?;

        with_session(|session| {
            session.in_describe = true;
            session.current = Some(DescribeResult {
                name,
                passed: None,
                error: None,
                tests: Vec::new(),
            });
        })?;

        let outcome = match call_expr {
            Some(expr) => ctx.eval(Source::from_bytes(expr.as_bytes())).map(|_| ()),
            None => Ok(()),
        };
        let error = match outcome {
            Ok(()) => None,
            Err(err) => Some(error_message(&err, ctx)),
        };

        with_session(|session| {
            session.in_describe = false;
            if let Some(mut node) = session.current.take() {
                match error {
                    None => {
                        node.passed =
                            Some(node.tests.iter().all(|test| test.passed == Some(true)));
                    }
                    Some(message) => {
                        node.passed = Some(false);
                        node.error = Some(message);
                    }
                }
                session.results.push(TestResult::Describe(node));
            }
        })?;
        Ok(JsValue::undefined())
    });

    let it_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let name = arg_string(args, 0, ctx)?;
        if with_session(|session| session.in_it)? {
            return Err(JsNativeError::error()
                .with_message("it blocks cannot be nested")
                .into());
        }
        let call_expr = args
            .get(1)
            .filter(|value| value.is_object())
            .map(|value| stash_callback(value, ctx))
            .transpose()?;

        with_session(|session| session.in_it = true)?;

        let outcome = match call_expr {
            Some(expr) => ctx.eval(Source::from_bytes(expr.as_bytes())).map(|_| ()),
            None => Ok(()),
        };
        let error = match outcome {
            Ok(()) => None,
            Err(err) => Some(error_message(&err, ctx)),
        };

        with_session(|session| {
            session.in_it = false;
            let result = ItResult {
                name,
                passed: Some(error.is_none()),
                error,
            };
            match session.current.as_mut() {
                Some(node) => node.tests.push(result),
                None => session.results.push(TestResult::It(result)),
            }
        })?;
        Ok(JsValue::undefined())
    });

    context.register_global_property(
        js_string!("describe"),
        describe_fn.to_js_function(context.realm()),
        Attribute::all(),
    )?;
    context.register_global_property(
        js_string!("it"),
        it_fn.to_js_function(context.realm()),
        Attribute::all(),
    )
}

fn register_console(context: &mut Context) -> JsResult<()> {
    let log_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        log::info!(target: "script", "{}", join_args(args, ctx)?);
        Ok(JsValue::undefined())
    });
    let warn_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        log::warn!(target: "script", "{}", join_args(args, ctx)?);
        Ok(JsValue::undefined())
    });
    let error_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        log::error!(target: "script", "{}", join_args(args, ctx)?);
        Ok(JsValue::undefined())
    });

    let console = boa_engine::object::ObjectInitializer::new(context)
        .function(log_fn, js_string!("log"), 1)
        .function(warn_fn, js_string!("warn"), 1)
        .function(error_fn, js_string!("error"), 1)
        .build();

    context.register_global_property(js_string!("console"), console, Attribute::all())
}

fn join_args(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args {
        parts.push(value.to_string(context)?.to_std_string_escaped());
    }
    Ok(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::{HeaderPair, ResponseEnvelope};
    use crate::request::DeserializedRequest;
    use serde_json::json;
    use std::collections::HashMap;

    fn run_pre(body: &str) -> (RequestScript, Vec<TestResult>) {
        let source = format!(
            "const GET = () => ({{\n  url: \"https://x/y\",\n  pre_request: () => {{\n{body}\n  }},\n}});"
        );
        let script = RequestScript::new(&DeserializedRequest::default(), HashMap::new());
        run_pre_request(&source, HttpMethod::Get, script)
    }

    fn run_post(body: &str, envelope: &ResponseEnvelope) -> (ResponseScript, Vec<TestResult>) {
        let source = format!(
            "const GET = () => ({{\n  url: \"https://x/y\",\n  post_response: () => {{\n{body}\n  }},\n}});"
        );
        let script = ResponseScript::new(envelope, HashMap::new());
        run_post_response(&source, HttpMethod::Get, script)
    }

    fn json_envelope(status: u16, body: &str) -> ResponseEnvelope {
        ResponseEnvelope {
            status,
            headers: vec![HeaderPair {
                key: "Content-Type".into(),
                value: "application/json".into(),
            }],
            text_response: body.into(),
            elapsed_time: 0.1,
            content_size: body.len() as u64,
        }
    }

    fn describe_node(result: &TestResult) -> &DescribeResult {
        match result {
            TestResult::Describe(node) => node,
            TestResult::It(_) => panic!("expected a describe node, got {result:?}"),
        }
    }

    #[test]
    fn describe_aggregates_children() {
        let (_, results) = run_pre(
            r#"
            describe("group", () => {
                it("first", () => expect(1).to.equal(1));
                it("second", () => expect(2).to.equal(3));
                it("third", () => expect("a").to.equal("a"));
            });
            "#,
        );
        assert_eq!(results.len(), 1);
        let node = describe_node(&results[0]);
        assert_eq!(node.name, "group");
        assert_eq!(node.passed, Some(false));
        assert_eq!(node.tests.len(), 3);
        assert_eq!(node.tests[0].passed, Some(true));
        assert_eq!(node.tests[1].passed, Some(false));
        assert!(node.tests[1].error.as_deref().is_some_and(|e| e.contains("to equal")));
        // Run-to-completion: the failure does not suppress the third test.
        assert_eq!(node.tests[2].passed, Some(true));
    }

    #[test]
    fn empty_describe_trivially_passes() {
        let (_, results) = run_pre(r#"describe("empty", () => {});"#);
        let node = describe_node(&results[0]);
        assert_eq!(node.passed, Some(true));
        assert!(node.tests.is_empty());
    }

    #[test]
    fn nested_describe_fails_outer_block() {
        let (_, results) = run_pre(
            r#"
            describe("outer", () => {
                it("before", () => expect(true).to.be.true);
                describe("inner", () => {});
            });
            describe("sibling", () => {
                it("still runs", () => expect(1).to.equal(1));
            });
            "#,
        );
        assert_eq!(results.len(), 2);
        let outer = describe_node(&results[0]);
        assert_eq!(outer.passed, Some(false));
        assert!(
            outer
                .error
                .as_deref()
                .is_some_and(|e| e.contains("describe blocks cannot be nested")),
            "unexpected error: {:?}",
            outer.error
        );
        // The it recorded before the violation is retained.
        assert_eq!(outer.tests.len(), 1);
        // Sibling describes execute independently.
        let sibling = describe_node(&results[1]);
        assert_eq!(sibling.passed, Some(true));
    }

    #[test]
    fn nested_it_fails_outer_it() {
        let (_, results) = run_pre(
            r#"
            describe("group", () => {
                it("outer", () => {
                    it("inner", () => {});
                });
            });
            "#,
        );
        let node = describe_node(&results[0]);
        assert_eq!(node.passed, Some(false));
        assert_eq!(node.tests.len(), 1);
        assert!(
            node.tests[0]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("it blocks cannot be nested")),
            "unexpected error: {:?}",
            node.tests[0].error
        );
    }

    #[test]
    fn standalone_it_appends_top_level() {
        let (_, results) = run_pre(
            r#"
            it("alone", () => expect(1).to.equal(1));
            describe("after", () => {
                it("grouped", () => expect(2).to.equal(2));
            });
            "#,
        );
        assert_eq!(results.len(), 2);
        match &results[0] {
            TestResult::It(node) => {
                assert_eq!(node.name, "alone");
                assert_eq!(node.passed, Some(true));
            }
            other => panic!("expected a top-level it, got {other:?}"),
        }
    }

    #[test]
    fn syntax_error_yields_synthetic_result() {
        let script = RequestScript::new(&DeserializedRequest::default(), HashMap::new());
        let (_, results) =
            run_pre_request("const GET = () => {{{", HttpMethod::Get, script);
        assert_eq!(results.len(), 1);
        let node = describe_node(&results[0]);
        assert_eq!(node.name, "Script Execution Error");
        assert_eq!(node.passed, Some(false));
        assert!(node.error.is_some());
    }

    #[test]
    fn throw_outside_guards_appends_synthetic_result() {
        let (_, results) = run_pre(
            r#"
            describe("done first", () => {
                it("ok", () => expect(1).to.equal(1));
            });
            throw new Error("top-level failure");
            "#,
        );
        assert_eq!(results.len(), 2);
        assert_eq!(describe_node(&results[0]).passed, Some(true));
        let synthetic = describe_node(&results[1]);
        assert_eq!(synthetic.name, "Script Execution Error");
        assert!(
            synthetic
                .error
                .as_deref()
                .is_some_and(|e| e.contains("top-level failure")),
            "unexpected error: {:?}",
            synthetic.error
        );
    }

    #[test]
    fn pre_request_mutations_survive() {
        let (script, results) = run_pre(
            r#"
            req.setHeader("X-Sign", "sig-1");
            req.setQuery("page", "2");
            req.setJson({ id: 7 });
            req.setVar("token", "abc");
            "#,
        );
        assert!(results.is_empty());
        assert_eq!(script.header("X-Sign").as_deref(), Some("sig-1"));
        assert_eq!(script.query().get("page").map(String::as_str), Some("2"));
        assert_eq!(script.body_data(), Some(json!({"id": 7})));
        assert_eq!(script.var("token").as_deref(), Some("abc"));
    }

    #[test]
    fn req_getters_visible_to_script() {
        let (_, results) = run_pre(
            r#"
            it("url and method", () => {
                expect(req.getUrl()).to.equal("");
                expect(req.getMethod()).to.equal("get");
                expect(req.getBody()).to.be.null;
                expect(req.getBodyData()).to.be.null;
            });
            it("headers reflect mutations", () => {
                req.setHeaders({ "A": "1", "B": 2 });
                expect(req.getHeader("A")).to.equal("1");
                expect(req.getHeaders().B).to.equal("2");
            });
            "#,
        );
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.passed(), Some(true), "failed: {result:?}");
        }
    }

    #[test]
    fn post_response_status_assertion() {
        let envelope = json_envelope(201, "{\"id\":\"abc\"}");
        let (_, results) = run_post(
            r#"it("should return 201", () => expect(res.getStatus()).to.equal(201));"#,
            &envelope,
        );
        assert_eq!(results.len(), 1);
        match &results[0] {
            TestResult::It(node) => {
                assert_eq!(node.name, "should return 201");
                assert_eq!(node.passed, Some(true));
                assert_eq!(node.error, None);
            }
            other => panic!("expected an it node, got {other:?}"),
        }
    }

    #[test]
    fn post_response_reads_body_and_vars() {
        let envelope = json_envelope(200, "{\"id\":\"abc\",\"count\":3}");
        let (script, results) = run_post(
            r#"
            describe("body", () => {
                it("parses json", () => expect(res.getJson().id).to.equal("abc"));
                it("deep equality", () => expect(res.getJson()).to.deep.equal({ id: "abc", count: 3 }));
                it("raw text", () => expect(res.getText()).to.include("abc"));
                it("content type", () => expect(res.getContentType()).to.equal("json"));
            });
            res.setVar("created_id", res.getJson().id);
            "#,
            &envelope,
        );
        let node = describe_node(&results[0]);
        assert_eq!(node.passed, Some(true), "results: {results:?}");
        assert_eq!(script.var("created_id").as_deref(), Some("abc"));
    }

    #[test]
    fn get_json_on_malformed_body_is_empty_object() {
        let envelope = json_envelope(200, "{broken");
        let (_, results) = run_post(
            r#"it("degrades to {}", () => expect(Object.keys(res.getJson())).to.have.lengthOf(0));"#,
            &envelope,
        );
        assert_eq!(results[0].passed(), Some(true), "results: {results:?}");
    }

    #[test]
    fn expect_subset_behaves() {
        let (_, results) = run_pre(
            r#"
            describe("expect", () => {
                it("not equal", () => expect(1).to.not.equal(2));
                it("include", () => expect("hello world").to.include("world"));
                it("array include", () => expect([1, 2, 3]).to.contain(2));
                it("above and below", () => {
                    expect(10).to.be.above(5);
                    expect(3).to.be.below(5);
                });
                it("truthiness", () => {
                    expect("x").to.be.ok;
                    expect(false).to.be.false;
                });
                it("types", () => expect("s").to.be.a("string"));
                it("match", () => expect("v1.2.3").to.match(/^v\d+\.\d+\.\d+$/));
                it("property", () => expect({ a: 1 }).to.have.property("a"));
            });
            "#,
        );
        let node = describe_node(&results[0]);
        assert_eq!(node.passed, Some(true), "results: {results:?}");
    }

    #[test]
    fn sandbox_utility_globals_present() {
        let (_, results) = run_pre(
            r#"
            describe("globals", () => {
                it("structuredClone", () => {
                    const copy = structuredClone({ a: [1, 2] });
                    expect(copy.a).to.deep.equal([1, 2]);
                });
                it("randomUUID", () => {
                    expect(crypto.randomUUID()).to.have.lengthOf(36);
                });
                it("console is callable", () => {
                    console.log("from", "script");
                    console.warn("warned");
                });
            });
            "#,
        );
        let node = describe_node(&results[0]);
        assert_eq!(node.passed, Some(true), "results: {results:?}");
    }

    #[test]
    fn results_follow_declaration_order() {
        let (_, results) = run_pre(
            r#"
            describe("a", () => {});
            it("b", () => {});
            describe("c", () => {});
            "#,
        );
        assert_eq!(results.len(), 3);
        assert!(matches!(&results[0], TestResult::Describe(n) if n.name == "a"));
        assert!(matches!(&results[1], TestResult::It(n) if n.name == "b"));
        assert!(matches!(&results[2], TestResult::Describe(n) if n.name == "c"));
    }
}
