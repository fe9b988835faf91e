//! Conversation orchestrator
//!
//! Drives one session's loop: query the model, run requested tools as a
//! batch, feed the results back, until the model answers or a bound is hit.
//!
//! ```text
//! AWAITING_USER -> QUERYING_MODEL -> EXECUTING_TOOLS -> QUERYING_MODEL -> ... -> DONE
//!                        \_________________________\_____________________________> FAILED
//! ```

mod executor;
mod manager;
mod retry;
mod session;

#[cfg(test)]
mod fakes;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::controller::Controller;
use crate::error::{ModelProtocolError, SessionError, SessionErrorKind, ToolErrorKind};
use crate::llm::{Message, ModelClient, ModelResponse, ToolResult};
use crate::tools::ToolRegistry;

pub use executor::ToolExecutor;
pub use manager::SessionManager;
pub use retry::RetryPolicy;
pub use session::{Session, SessionState};

/// Progress of a turn, for front ends
///
/// Published on the channel given to [`Orchestrator::with_events`]. Events of
/// one turn arrive in the order they happen; tool events of one batch
/// interleave.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// The model is being asked for its next step (1-based within the turn)
    QueryingModel { iteration: u32 },
    /// A model call failed and will be retried after backoff
    ModelRetry { attempt: u32, error: String },
    /// A tool call was handed to the executor
    ToolStarted { call_id: String, name: String },
    /// A controller attempt failed and the call will be retried after `delay`
    ToolRetry {
        call_id: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// A tool call resolved, successfully or not
    ToolFinished {
        call_id: String,
        name: String,
        result: ToolResult,
    },
    /// The turn ended with a final answer
    Finished { answer: String },
    /// The turn ended in the FAILED state
    Failed { reason: String },
}

/// Why a model query ended without a usable response
enum Interrupted {
    Cancelled,
    TimedOut,
    Unavailable(ModelProtocolError),
}

/// Owns one session and runs its turns
///
/// Turns are serialized by `&mut self`; the transcript persists across them.
pub struct Orchestrator {
    session: Session,
    executor: ToolExecutor,
    model: Arc<dyn ModelClient>,
    config: RuntimeConfig,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl Orchestrator {
    pub fn new(
        session_id: impl Into<String>,
        registry: Arc<ToolRegistry>,
        controller: Arc<dyn Controller>,
        model: Arc<dyn ModelClient>,
        config: RuntimeConfig,
    ) -> Self {
        let executor = ToolExecutor::new(
            registry,
            controller,
            config.retry.clone(),
            config.tool_timeout,
        );
        Self {
            session: Session::new(session_id),
            executor,
            model,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.executor = self.executor.with_events(events.clone());
        self.events = Some(events);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run one user turn to a final answer or a terminal failure
    pub async fn submit(
        &mut self,
        text: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<String, SessionError> {
        let deadline = Instant::now() + self.config.turn_timeout;
        self.recover_abandoned_turn();
        self.session.append(Message::user(text));

        let mut iterations = 0;
        let mut unknown_calls = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(self.fail(SessionErrorKind::Cancelled, "turn cancelled"));
            }
            if iterations >= self.config.max_iterations {
                let reason = format!(
                    "stopped after {} model iterations without a final answer",
                    iterations
                );
                return Err(self.fail(SessionErrorKind::IterationLimit, reason));
            }
            iterations += 1;
            self.session.transition(SessionState::QueryingModel);
            self.emit(TurnEvent::QueryingModel {
                iteration: iterations,
            });

            let response = match self.query_model(cancel, deadline).await {
                Ok(response) => response,
                Err(Interrupted::Cancelled) => {
                    return Err(self.fail(SessionErrorKind::Cancelled, "turn cancelled"))
                }
                Err(Interrupted::TimedOut) => return Err(self.timed_out()),
                Err(Interrupted::Unavailable(e)) => {
                    let reason = format!(
                        "model unavailable after {} attempt(s): {}",
                        self.config.model_retries + 1,
                        e
                    );
                    return Err(self.fail(SessionErrorKind::ModelUnavailable, reason));
                }
            };

            let calls = match response {
                ModelResponse::FinalAnswer(answer) => {
                    self.session.append(Message::assistant(answer.clone()));
                    self.session.transition(SessionState::Done);
                    info!(
                        "Session {}: turn finished after {} iteration(s)",
                        self.session.id(),
                        iterations
                    );
                    self.emit(TurnEvent::Finished {
                        answer: answer.clone(),
                    });
                    return Ok(answer);
                }
                ModelResponse::ToolCallRequest(calls) => calls,
            };

            self.session.append(Message::tool_request(calls.clone()));
            self.session.transition(SessionState::ExecutingTools);
            let results = self
                .executor
                .execute_batch(&calls, self.config.tool_concurrency, cancel, deadline)
                .await;
            for result in results {
                if result.error_kind() == Some(ToolErrorKind::UnknownTool) {
                    unknown_calls += 1;
                }
                self.session.append(Message::tool_result(result));
            }

            if cancel.is_cancelled() {
                return Err(self.fail(SessionErrorKind::Cancelled, "turn cancelled"));
            }
            if Instant::now() >= deadline {
                return Err(self.timed_out());
            }
            if unknown_calls > self.config.max_unknown_tool_calls {
                let reason = format!(
                    "model requested {} undeclared tool(s) in one turn",
                    unknown_calls
                );
                return Err(self.fail(SessionErrorKind::UnknownToolLimit, reason));
            }
        }
    }

    /// Close out a previous turn whose future was dropped mid-flight
    ///
    /// Calls left without a result get a cancelled one so every call in the
    /// transcript stays resolved before the model sees it again.
    fn recover_abandoned_turn(&mut self) {
        let dangling: Vec<String> = self
            .session
            .unresolved_calls()
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        if !dangling.is_empty() {
            warn!(
                "Session {}: recording {} unfinished call(s) from an abandoned turn as cancelled",
                self.session.id(),
                dangling.len()
            );
        }
        for call_id in dangling {
            self.session.append(Message::tool_result(ToolResult::cancelled(call_id)));
        }
        if matches!(
            self.session.state(),
            SessionState::QueryingModel | SessionState::ExecutingTools
        ) {
            self.session.transition(SessionState::AwaitingUser);
        }
    }

    /// Ask the model for its next step, retrying protocol failures
    async fn query_model(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<ModelResponse, Interrupted> {
        let tools = self.executor.registry().list();
        let mut failures = 0;
        loop {
            let call = tokio::time::timeout(
                self.config.model_timeout,
                self.model.converse(self.session.transcript(), &tools),
            );
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(Interrupted::TimedOut),
                outcome = call => outcome
                    .unwrap_or(Err(ModelProtocolError::Timeout(self.config.model_timeout))),
            };

            let error = match outcome.and_then(|response| self.check_response(response)) {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            failures += 1;
            if failures > self.config.model_retries {
                return Err(Interrupted::Unavailable(error));
            }
            let delay = self.config.retry.backoff(failures, None);
            warn!(
                "Session {}: model {} failed ({}), retrying in {:?}",
                self.session.id(),
                self.model.model(),
                error,
                delay
            );
            self.emit(TurnEvent::ModelRetry {
                attempt: failures,
                error: error.to_string(),
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(Interrupted::TimedOut),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Reject responses that cannot be acted on before anything is appended
    fn check_response(&self, response: ModelResponse) -> Result<ModelResponse, ModelProtocolError> {
        if let ModelResponse::ToolCallRequest(calls) = &response {
            if calls.is_empty() {
                return Err(ModelProtocolError::Empty);
            }
            let mut seen = HashSet::new();
            let issued: HashSet<&str> = self
                .session
                .transcript()
                .iter()
                .flat_map(|m| m.tool_calls.iter())
                .map(|c| c.id.as_str())
                .collect();
            for call in calls {
                if call.id.is_empty() {
                    return Err(ModelProtocolError::Malformed(format!(
                        "tool call `{}` has no id",
                        call.name
                    )));
                }
                if !seen.insert(call.id.as_str())
                    || issued.contains(call.id.as_str())
                    || self.session.is_resolved(&call.id)
                {
                    return Err(ModelProtocolError::DuplicateCallId(call.id.clone()));
                }
            }
        }
        Ok(response)
    }

    fn timed_out(&mut self) -> SessionError {
        let reason = format!("turn did not finish within {:?}", self.config.turn_timeout);
        self.fail(SessionErrorKind::TimedOut, reason)
    }

    fn fail(&mut self, kind: SessionErrorKind, reason: impl Into<String>) -> SessionError {
        let reason = reason.into();
        self.session.transition(SessionState::Failed);
        error!("Session {}: turn failed: {}", self.session.id(), reason);
        self.emit(TurnEvent::Failed {
            reason: reason.clone(),
        });
        SessionError::new(kind, reason, self.session.transcript().to_vec())
    }
}
