//! # Request Lifecycle
//!
//! Sequences a single request invocation: deserialize the authored source,
//! run the pre-request script against the request façade, send the
//! transport call, wrap the raw response, run the post-response script, and
//! bundle the response with the aggregated test results.
//!
//! The stages are strictly ordered and synchronous apart from the transport
//! call, which is the only suspension point and the only stage that honors
//! the cancellation signal.

pub mod cancel;

pub use cancel::CancelRegistry;

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::http::client::{ResponseEnvelope, send_request};
use crate::request::deserialize_http_fn;
use crate::script::{RequestScript, ResponseScript, TestResult};

/// Everything a caller gets back from one request invocation: the response
/// envelope (possibly a zero-valued failure envelope) and the test results
/// from both script hooks, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub response: ResponseEnvelope,
    pub tests: Vec<TestResult>,
}

/// Run the full lifecycle for one authored source.
///
/// `vars` is the caller-owned environment map; script mutations via
/// `setVar` are written back before returning, including when the
/// transport call fails or is cancelled.
pub async fn execute_request(
    source: &str,
    vars: &mut HashMap<String, String>,
    cancel_rx: &mut broadcast::Receiver<()>,
) -> RunOutcome {
    let request = deserialize_http_fn(source);
    log::debug!("executing {} {}", request.method, request.url);

    let mut tests = Vec::new();

    let mut script = RequestScript::new(&request, std::mem::take(vars));
    if let Some(hook) = &request.pre_request {
        let (mutated, mut results) = hook.run_pre_request(script);
        script = mutated;
        tests.append(&mut results);
    }

    let call = script.to_transport_call();
    let response = send_request(call, cancel_rx).await;

    let mut response_script = ResponseScript::new(&response, script.into_vars());
    if let Some(hook) = &request.post_response {
        let (mutated, mut results) = hook.run_post_response(response_script);
        response_script = mutated;
        tests.append(&mut results);
    }
    *vars = response_script.into_vars();

    RunOutcome { response, tests }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one connection: read until the end of the request
    /// headers, reply with `response`, close. Returns the base url and a
    /// handle resolving to the raw request text.
    async fn one_shot_server(
        response: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut seen = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            String::from_utf8_lossy(&seen).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn full_lifecycle_runs_both_hooks() {
        let (base, server) = one_shot_server(
            "HTTP/1.1 201 Created\r\n\
             content-type: application/json\r\n\
             content-length: 12\r\n\
             connection: close\r\n\
             \r\n\
             {\"id\":\"abc\"}",
        )
        .await;

        let source = format!(
            r#"const GET = () => ({{
                url: "{base}/items",
                headers: {{ "Accept": "application/json" }},
                pre_request: () => {{
                    req.setHeader("X-Sign", "sig-1");
                    req.setQuery("page", "2");
                    req.setVar("token", "t-1");
                }},
                post_response: () => {{
                    describe("create item", () => {{
                        it("returns 201", () => expect(res.getStatus()).to.equal(201));
                        it("parses the body", () => expect(res.getJson().id).to.equal("abc"));
                        it("classifies json", () => expect(res.getContentType()).to.equal("json"));
                        it("measures the exchange", () => {{
                            expect(res.getElapsedTime()).to.be.above(0);
                            expect(res.getSize()).to.equal(12);
                        }});
                    }});
                    res.setVar("created_id", res.getJson().id);
                }},
            }});"#
        );

        let (_tx, mut rx) = broadcast::channel(1);
        let mut vars = HashMap::new();
        let outcome = execute_request(&source, &mut vars, &mut rx).await;

        assert_eq!(outcome.response.status, 201);
        assert_eq!(outcome.response.text_response, "{\"id\":\"abc\"}");
        assert_eq!(outcome.response.content_size, 12);

        assert_eq!(outcome.tests.len(), 1);
        assert_eq!(outcome.tests[0].passed(), Some(true), "{:?}", outcome.tests);

        // Script mutations reached both the wire and the environment map.
        let raw_request = server.await.expect("fixture request");
        assert!(raw_request.starts_with("GET /items?page=2"), "{raw_request}");
        assert!(raw_request.contains("x-sign: sig-1"), "{raw_request}");
        assert!(raw_request.contains("accept: application/json"), "{raw_request}");
        assert_eq!(vars.get("token").map(String::as_str), Some("t-1"));
        assert_eq!(vars.get("created_id").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn cancellation_produces_zero_envelope_and_still_runs_post_hook() {
        // Accepts the connection but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4096];
            loop {
                if stream.read(&mut buf).await.unwrap_or(0) == 0 {
                    break;
                }
            }
        });

        let source = format!(
            r#"const GET = () => ({{
                url: "http://{addr}/slow",
                post_response: () => {{
                    it("sees the synthetic response", () => expect(res.getStatus()).to.equal(0));
                }},
            }});"#
        );

        let (tx, mut rx) = broadcast::channel(1);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(());
        });

        let mut vars = HashMap::new();
        let outcome = execute_request(&source, &mut vars, &mut rx).await;

        assert_eq!(outcome.response.status, 0);
        assert_eq!(outcome.response.elapsed_time, 0.0);
        assert!(outcome.response.text_response.contains("cancelled"));
        assert_eq!(outcome.tests.len(), 1);
        assert_eq!(outcome.tests[0].passed(), Some(true), "{:?}", outcome.tests);
    }

    #[tokio::test]
    async fn get_request_drops_authored_body() {
        let (base, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        let source = format!(
            r#"const GET = () => ({{ url: "{base}/", json: {{ ignored: true }} }});"#
        );
        let (_tx, mut rx) = broadcast::channel(1);
        let mut vars = HashMap::new();
        let outcome = execute_request(&source, &mut vars, &mut rx).await;

        assert_eq!(outcome.response.status, 200);
        let raw_request = server.await.expect("fixture request");
        assert!(!raw_request.contains("ignored"), "{raw_request}");
        // The inferred json body still drives the default Content-Type.
        assert!(raw_request.contains("content-type: application/json"), "{raw_request}");
    }

    #[tokio::test]
    async fn malformed_source_yields_failure_envelope_and_keeps_vars() {
        let (_tx, mut rx) = broadcast::channel(1);
        let mut vars = HashMap::from([("token".to_string(), "abc".to_string())]);

        let outcome = execute_request("not a request at all !!!", &mut vars, &mut rx).await;

        assert_eq!(outcome.response.status, 0);
        assert!(outcome.response.text_response.contains("Invalid URL"));
        assert!(outcome.tests.is_empty());
        assert_eq!(vars.get("token").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn pre_request_vars_survive_transport_failure() {
        let (_tx, mut rx) = broadcast::channel(1);
        let mut vars = HashMap::new();

        let source = r#"const GET = () => ({
            url: "http://127.0.0.1:9",
            pre_request: () => { req.setVar("attempted", "yes"); },
        });"#;
        let outcome = execute_request(source, &mut vars, &mut rx).await;

        assert_eq!(outcome.response.status, 0);
        assert_eq!(vars.get("attempted").map(String::as_str), Some("yes"));
    }
}
