//! Scriptman: a request scripting and execution engine.
//!
//! Authored requests are plain JS modules defining one HTTP-method-named
//! function (`const GET = () => ({ url: ... })`). The engine converts that
//! source into a structured request, runs the optional `pre_request` and
//! `post_response` scripts in a sandbox exposing `req`/`res` façades and a
//! `describe`/`it`/`expect` test surface, sends the request with
//! cancellation support, and returns the response together with the
//! aggregated test results.

pub mod http;
pub mod request;
pub mod runner;
pub mod script;

pub use http::client::{ResponseEnvelope, TransportCall};
pub use request::{DeserializedRequest, HttpMethod, deserialize_http_fn, serialize_http_fn};
pub use runner::{CancelRegistry, RunOutcome, execute_request};
pub use script::TestResult;
