//! Controller API surface
//!
//! The orchestrator only sees the [`Controller`] trait. [`AviClient`] is the
//! production implementation; tests substitute scripted controllers.

mod client;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ControllerError;
use crate::tools::Method;

pub use client::{AviClient, AviSession};

/// One controller round trip, relative to the API root
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Bound on the network round trip, excluding time queued for a slot
    pub timeout: Option<Duration>,
}

impl ControllerRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query.extend(query);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Executes requests against the controller
///
/// Implementations perform exactly one network round trip per call and never
/// retry; retry policy belongs to the caller. When `request.timeout` is set the
/// round trip fails with `TransientNetworkFailure` once it elapses. Waiting for
/// a concurrency slot before the request is sent does not count against it.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn execute(&self, request: &ControllerRequest) -> Result<Value, ControllerError>;
}
