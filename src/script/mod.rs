//! # Script Runtime
//!
//! Sandboxed execution of user-authored pre-request / post-response scripts
//! and the `describe`/`it` test-result model they produce.

pub mod request_script;
pub mod response_script;
pub mod runtime;
pub(crate) mod value;

pub use request_script::RequestScript;
pub use response_script::ResponseScript;

use serde::Serialize;

use crate::request::HttpMethod;

/// Which script hook a [`ScriptHook`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    PreRequest,
    PostResponse,
}

impl HookKind {
    /// Property name on the authored config object.
    pub fn property(&self) -> &'static str {
        match self {
            HookKind::PreRequest => "pre_request",
            HookKind::PostResponse => "post_response",
        }
    }
}

/// A callable reference to a script hook found during deserialization.
///
/// The sandbox cannot hand function objects across invocations, so the hook
/// captures the full authored source plus the selected method name and
/// re-evaluates on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptHook {
    source: String,
    method: HttpMethod,
    kind: HookKind,
}

impl ScriptHook {
    pub fn new(source: impl Into<String>, method: HttpMethod, kind: HookKind) -> Self {
        Self {
            source: source.into(),
            method,
            kind,
        }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Run a `pre_request` hook against the request façade. Test results are
    /// collected fresh for this invocation; façade mutations survive.
    pub fn run_pre_request(&self, script: RequestScript) -> (RequestScript, Vec<TestResult>) {
        runtime::run_pre_request(&self.source, self.method, script)
    }

    /// Run a `post_response` hook against the response façade.
    pub fn run_post_response(&self, script: ResponseScript) -> (ResponseScript, Vec<TestResult>) {
        runtime::run_post_response(&self.source, self.method, script)
    }
}

/// Result of a single `it` block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItResult {
    pub name: String,
    pub passed: Option<bool>,
    pub error: Option<String>,
}

/// Result of a `describe` block: aggregate verdict plus child `it` results
/// in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescribeResult {
    pub name: String,
    pub passed: Option<bool>,
    pub error: Option<String>,
    pub tests: Vec<ItResult>,
}

/// One node of the per-invocation test report, in execution order.
/// `describe` blocks cannot nest, so the tree is at most two levels deep.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestResult {
    Describe(DescribeResult),
    It(ItResult),
}

impl TestResult {
    /// Synthetic node reported when a script body cannot be evaluated at
    /// all, or throws outside any `describe`/`it` guard.
    pub fn script_error(message: impl Into<String>) -> TestResult {
        TestResult::Describe(DescribeResult {
            name: "Script Execution Error".into(),
            passed: Some(false),
            error: Some(message.into()),
            tests: Vec::new(),
        })
    }

    pub fn passed(&self) -> Option<bool> {
        match self {
            TestResult::Describe(node) => node.passed,
            TestResult::It(node) => node.passed,
        }
    }
}
