//! # HTTP Transport
//!
//! Dispatches a fully resolved transport call over the wire and folds the
//! outcome (success, network failure, cancellation) into a uniform
//! response envelope for the post-response script stage.

pub mod client;

pub use client::{ResponseEnvelope, TransportCall, send_request};
