//! Tool execution engine
//!
//! Decodes each call against the registry, runs it on the controller with
//! bounded retry, and fans a batch out under a concurrency limit. Results are
//! written into per-call slots so the batch resolves in call-issue order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::error::ToolErrorKind;
use crate::llm::{ToolCall, ToolResult};
use crate::tools::ToolRegistry;

use super::{RetryPolicy, TurnEvent};

/// Runs tool calls against the controller
///
/// Shared by every turn of one session. Publishes `ToolStarted`, `ToolRetry`
/// and `ToolFinished` events when a channel is attached.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    controller: Arc<dyn Controller>,
    retry: RetryPolicy,
    tool_timeout: Duration,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        controller: Arc<dyn Controller>,
        retry: RetryPolicy,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            retry,
            tool_timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run one call to completion
    ///
    /// Never fails: invalid arguments, unknown tools and controller errors all
    /// become an error `ToolResult`. Rate-limited and transient failures are
    /// retried per the retry policy; each attempt is bounded by the tool
    /// timeout, counted from when the request is sent.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.emit(TurnEvent::ToolStarted {
            call_id: call.id.clone(),
            name: call.name.clone(),
        });

        let result = self.run(call).await;
        match result.error_kind() {
            None => debug!("Tool {} ({}) succeeded", call.name, call.id),
            Some(kind) => warn!(
                "Tool {} ({}) failed with {} after {} attempt(s)",
                call.name, call.id, kind, result.attempts
            ),
        }

        self.emit(TurnEvent::ToolFinished {
            call_id: call.id.clone(),
            name: call.name.clone(),
            result: result.clone(),
        });
        result
    }

    async fn run(&self, call: &ToolCall) -> ToolResult {
        let operation = match self.registry.decode(&call.name, &call.arguments) {
            Ok(operation) => operation,
            Err(e) => return ToolResult::error(&call.id, e.kind(), e.to_string()),
        };
        let request = match operation.request() {
            Ok(request) => request.with_timeout(self.tool_timeout),
            Err(e) => return ToolResult::error(&call.id, e.kind(), e.to_string()),
        };
        if operation.is_mutation() {
            info!(
                "Tool {} ({}): {} {}",
                call.name,
                call.id,
                request.method.as_str(),
                request.path
            );
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.controller.execute(&request).await {
                Ok(data) => return ToolResult::success(&call.id, data).with_attempts(attempt),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.backoff(attempt, e.retry_after());
                    debug!(
                        "Tool {} ({}) attempt {} failed: {}; retrying in {:?}",
                        call.name, call.id, attempt, e, delay
                    );
                    self.emit(TurnEvent::ToolRetry {
                        call_id: call.id.clone(),
                        attempt,
                        delay,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return ToolResult::error(&call.id, e.kind(), e.to_string()).with_attempts(attempt)
                }
            }
        }
    }

    /// Run a batch with at most `concurrency` calls in flight
    ///
    /// Returns one result per call, in the order the calls were issued. Calls
    /// still pending when `cancel` fires or `deadline` passes are recorded as
    /// cancelled.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        concurrency: usize,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Vec<ToolResult> {
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];

        let interrupted = {
            let tasks: Vec<BoxFuture<'_, (usize, ToolResult)>> = calls
                .iter()
                .enumerate()
                .map(|(index, call)| async move { (index, self.execute(call).await) }.boxed())
                .collect();
            let mut pending = stream::iter(tasks).buffer_unordered(concurrency.max(1));
            let drain = async {
                while let Some((index, result)) = pending.next().await {
                    slots[index] = Some(result);
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Some("cancelled before completion"),
                _ = tokio::time::sleep_until(deadline) => Some("turn timed out before completion"),
                _ = drain => None,
            }
        };

        if let Some(reason) = interrupted {
            warn!(
                "Tool batch interrupted with {} of {} call(s) unfinished",
                slots.iter().filter(|s| s.is_none()).count(),
                calls.len()
            );
            debug!("Interrupt reason: {}", reason);
        }

        calls
            .iter()
            .zip(slots)
            .map(|(call, slot)| {
                slot.unwrap_or_else(|| {
                    ToolResult::error(
                        &call.id,
                        ToolErrorKind::Cancelled,
                        interrupted.unwrap_or("cancelled before completion"),
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::orchestrator::fakes::ScriptedController;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn executor(controller: Arc<ScriptedController>) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(ToolRegistry::new()),
            controller,
            RetryPolicy::default(),
            Duration::from_secs(30),
        )
    }

    fn get_pool(id: &str, uuid: &str) -> ToolCall {
        ToolCall::new(id, "get_pool", json!({ "uuid": uuid }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_single_attempt() {
        let controller = Arc::new(ScriptedController::new(|req, _| {
            (Duration::ZERO, Ok(json!({ "path": req.path })))
        }));
        let result = executor(controller.clone()).execute(&get_pool("c1", "pool-1")).await;

        assert_eq!(result, ToolResult::success("c1", json!({ "path": "/pool/pool-1" })));
        assert_eq!(controller.call_count(), 1);
        assert_eq!(controller.calls()[0].timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_attempted_max_times() {
        let controller = Arc::new(ScriptedController::new(|_, _| {
            (
                Duration::ZERO,
                Err(ControllerError::TransientNetworkFailure("connection reset".into())),
            )
        }));
        let result = executor(controller.clone()).execute(&get_pool("c1", "pool-1")).await;

        assert_eq!(controller.call_count(), 3);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.error_kind(), Some(ToolErrorKind::TransientNetworkFailure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let controller = Arc::new(ScriptedController::new(|_, _| {
            (Duration::ZERO, Err(ControllerError::NotFound("pool-9".into())))
        }));
        let result = executor(controller.clone()).execute(&get_pool("c1", "pool-9")).await;

        assert_eq!(controller.call_count(), 1);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error_kind(), Some(ToolErrorKind::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success_honors_retry_after() {
        let controller = Arc::new(ScriptedController::new(|_, attempt| match attempt {
            1 => (
                Duration::ZERO,
                Err(ControllerError::RateLimited {
                    message: "slow down".into(),
                    retry_after: Some(Duration::from_secs(2)),
                }),
            ),
            _ => (Duration::ZERO, Ok(json!({ "uuid": "pool-1" }))),
        }));
        let started = Instant::now();
        let result = executor(controller.clone()).execute(&get_pool("c1", "pool-1")).await;

        assert!(!result.is_error());
        assert_eq!(result.attempts, 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let controller = Arc::new(ScriptedController::new(|_, _| {
            (Duration::from_secs(60), Ok(json!({})))
        }));
        let result = executor(controller.clone()).execute(&get_pool("c1", "pool-1")).await;

        assert_eq!(result.error_kind(), Some(ToolErrorKind::TransientNetworkFailure));
        assert_eq!(controller.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_arguments_never_reach_controller() {
        let controller = Arc::new(ScriptedController::new(|_, _| (Duration::ZERO, Ok(json!({})))));
        let call = ToolCall::new("c1", "get_pool", json!({ "id": "pool-1" }));
        let result = executor(controller.clone()).execute(&call).await;

        assert_eq!(result.error_kind(), Some(ToolErrorKind::InvalidArguments));
        assert_eq!(result.attempts, 0);
        assert_eq!(controller.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool() {
        let controller = Arc::new(ScriptedController::new(|_, _| (Duration::ZERO, Ok(json!({})))));
        let call = ToolCall::new("c1", "deletePool2", json!({ "uuid": "pool-1" }));
        let result = executor(controller.clone()).execute(&call).await;

        assert_eq!(result.error_kind(), Some(ToolErrorKind::UnknownTool));
        assert_eq!(controller.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_keeps_issue_order_under_staggered_latency() {
        let controller = Arc::new(ScriptedController::new(|req, _| {
            let delay = match req.path.as_str() {
                "/pool/a" => 300,
                "/pool/b" => 10,
                _ => 100,
            };
            (Duration::from_millis(delay), Ok(json!({ "path": req.path })))
        }));
        let calls = vec![get_pool("c1", "a"), get_pool("c2", "b"), get_pool("c3", "c")];
        let results = executor(controller)
            .execute_batch(
                &calls,
                4,
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(60),
            )
            .await;

        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(results.iter().all(|r| !r.is_error()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_respects_concurrency_limit() {
        let controller = Arc::new(ScriptedController::new(|_, _| {
            (Duration::from_millis(50), Ok(json!({})))
        }));
        let calls: Vec<_> = (0..6)
            .map(|i| get_pool(&format!("c{}", i), &format!("p{}", i)))
            .collect();
        executor(controller.clone())
            .execute_batch(
                &calls,
                2,
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(60),
            )
            .await;

        assert_eq!(controller.call_count(), 6);
        assert!(controller.max_in_flight() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_abort_siblings() {
        let controller = Arc::new(ScriptedController::new(|req, _| {
            if req.path == "/pool/missing" {
                (Duration::ZERO, Err(ControllerError::NotFound("missing".into())))
            } else {
                (Duration::from_millis(20), Ok(json!({})))
            }
        }));
        let calls = vec![get_pool("c1", "missing"), get_pool("c2", "ok")];
        let results = executor(controller)
            .execute_batch(
                &calls,
                4,
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(60),
            )
            .await;

        assert_eq!(results[0].error_kind(), Some(ToolErrorKind::NotFound));
        assert!(!results[1].is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_records_unfinished_calls() {
        let controller = Arc::new(ScriptedController::new(|req, _| {
            let delay = if req.path == "/pool/fast" { 10 } else { 10_000 };
            (Duration::from_millis(delay), Ok(json!({})))
        }));
        let calls = vec![get_pool("c1", "fast"), get_pool("c2", "slow")];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let results = executor(controller)
            .execute_batch(&calls, 4, &cancel, Instant::now() + Duration::from_secs(600))
            .await;

        assert!(!results[0].is_error());
        assert_eq!(results[1], ToolResult::cancelled("c2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_records_unfinished_calls() {
        let controller = Arc::new(ScriptedController::new(|_, _| {
            (Duration::from_secs(20), Ok(json!({})))
        }));
        let calls = vec![get_pool("c1", "slow")];
        let results = executor(controller)
            .execute_batch(
                &calls,
                4,
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(5),
            )
            .await;

        assert_eq!(results[0].error_kind(), Some(ToolErrorKind::Cancelled));
        assert_eq!(results[0].call_id, "c1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_published() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = Arc::new(ScriptedController::new(|_, _| (Duration::ZERO, Ok(json!({})))));
        executor(controller)
            .with_events(tx)
            .execute(&get_pool("c1", "p"))
            .await;

        assert!(matches!(rx.try_recv(), Ok(TurnEvent::ToolStarted { .. })));
        assert!(matches!(rx.try_recv(), Ok(TurnEvent::ToolFinished { .. })));
    }
}
