//! Scripted model and controller for orchestrator tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::controller::{Controller, ControllerRequest};
use crate::error::{ControllerError, ModelProtocolError};
use crate::llm::{Message, ModelClient, ModelResponse, ToolCall};
use crate::tools::ToolDefinition;

type Handler =
    dyn Fn(&ControllerRequest, u32) -> (Duration, Result<Value, ControllerError>) + Send + Sync;

/// Controller answering from a closure of (request, attempt for this path)
pub struct ScriptedController {
    handler: Box<Handler>,
    calls: Mutex<Vec<ControllerRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedController {
    pub fn new(
        handler: impl Fn(&ControllerRequest, u32) -> (Duration, Result<Value, ControllerError>)
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<ControllerRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Controller for ScriptedController {
    async fn execute(&self, request: &ControllerRequest) -> Result<Value, ControllerError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.iter().filter(|c| c.path == request.path).count() as u32
        };
        let (delay, result) = (self.handler)(request, attempt);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let finished = match request.timeout {
            Some(timeout) => tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .is_ok(),
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if finished {
            result
        } else {
            Err(ControllerError::TransientNetworkFailure(format!(
                "no response within {:?}",
                request.timeout.unwrap_or_default()
            )))
        }
    }
}

/// Model replaying a fixed list of replies, one per call
pub struct ScriptedModel {
    replies: Mutex<VecDeque<(Duration, Result<ModelResponse, ModelProtocolError>)>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn answer(self, text: &str) -> Self {
        self.reply(Ok(ModelResponse::FinalAnswer(text.to_string())))
    }

    pub fn calls(self, calls: Vec<ToolCall>) -> Self {
        self.reply(Ok(ModelResponse::ToolCallRequest(calls)))
    }

    pub fn fail(self, error: ModelProtocolError) -> Self {
        self.reply(Err(error))
    }

    pub fn reply(self, reply: Result<ModelResponse, ModelProtocolError>) -> Self {
        self.delayed(Duration::ZERO, reply)
    }

    pub fn delayed(self, delay: Duration, reply: Result<ModelResponse, ModelProtocolError>) -> Self {
        self.replies.lock().unwrap().push_back((delay, reply));
        self
    }

    pub fn invocations(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Transcript passed on each invocation
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn converse(
        &self,
        transcript: &[Message],
        _tools: &[&ToolDefinition],
    ) -> Result<ModelResponse, ModelProtocolError> {
        self.seen.lock().unwrap().push(transcript.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some((delay, reply)) => {
                tokio::time::sleep(delay).await;
                reply
            }
            None => Err(ModelProtocolError::Malformed("script exhausted".into())),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ModelProtocolError> {
        Ok(vec!["scripted".into()])
    }
}
