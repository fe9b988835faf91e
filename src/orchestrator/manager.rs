//! Session manager
//!
//! Owns every live session. Turns within a session are serialized by the
//! session's mutex; different sessions run concurrently and share the
//! registry, controller and model handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::controller::Controller;
use crate::error::SessionError;
use crate::llm::{Message, ModelClient};
use crate::tools::ToolRegistry;

use super::{Orchestrator, TurnEvent};

struct SessionSlot {
    orchestrator: Arc<Mutex<Orchestrator>>,
    cancel: CancellationToken,
    last_activity: Instant,
}

/// Entry point for front ends: `submit(session_id, text)`
///
/// Holds the shared registry, controller and model handles and one
/// [`Orchestrator`] per session id.
pub struct SessionManager {
    registry: Arc<ToolRegistry>,
    controller: Arc<dyn Controller>,
    model: Arc<dyn ModelClient>,
    config: RuntimeConfig,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
    sessions: RwLock<HashMap<String, SessionSlot>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ToolRegistry>,
        controller: Arc<dyn Controller>,
        model: Arc<dyn ModelClient>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            controller,
            model,
            config,
            events: None,
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish turn events of every session on `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run one turn in `session_id`, creating the session on first use
    ///
    /// Turns of the same session queue behind each other; different sessions
    /// run concurrently. The returned future is `Send`, so it can be spawned.
    pub async fn submit(
        &self,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<String, SessionError> {
        let (orchestrator, cancel) = self.checkout(session_id).await;
        let result = {
            let mut orchestrator = orchestrator.lock().await;
            orchestrator.submit(text, &cancel).await
        };
        self.touch(session_id).await;
        result
    }

    async fn checkout(&self, session_id: &str) -> (Arc<Mutex<Orchestrator>>, CancellationToken) {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.entry(session_id.to_string()).or_insert_with(|| {
            info!("Session {}: created", session_id);
            let mut orchestrator = Orchestrator::new(
                session_id,
                self.registry.clone(),
                self.controller.clone(),
                self.model.clone(),
                self.config.clone(),
            );
            if let Some(events) = &self.events {
                orchestrator = orchestrator.with_events(events.clone());
            }
            SessionSlot {
                orchestrator: Arc::new(Mutex::new(orchestrator)),
                cancel: self.shutdown.child_token(),
                last_activity: Instant::now(),
            }
        });
        slot.last_activity = Instant::now();
        (slot.orchestrator.clone(), slot.cancel.clone())
    }

    async fn touch(&self, session_id: &str) {
        if let Some(slot) = self.sessions.write().await.get_mut(session_id) {
            slot.last_activity = Instant::now();
        }
    }

    /// Cancel the turn running in `session_id`; the session stays open
    ///
    /// Calls still in flight are recorded as cancelled and the turn returns
    /// `SessionErrorKind::Cancelled`. A fresh token is installed so later
    /// turns run normally. Returns `false` for an unknown session.
    pub async fn abort(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(slot) => {
                let cancel = std::mem::replace(&mut slot.cancel, self.shutdown.child_token());
                cancel.cancel();
                debug!("Session {}: turn aborted", session_id);
                true
            }
            None => false,
        }
    }

    /// Cancel and forget a session
    ///
    /// A running turn is cancelled; its transcript is dropped once that turn
    /// returns. The next `submit` with the same id starts a new session.
    /// Returns `false` for an unknown session.
    pub async fn close(&self, session_id: &str) -> bool {
        match self.sessions.write().await.remove(session_id) {
            Some(slot) => {
                slot.cancel.cancel();
                info!("Session {}: closed", session_id);
                true
            }
            None => false,
        }
    }

    /// Snapshot of a session's transcript
    ///
    /// Waits for a turn in progress to finish.
    pub async fn transcript(&self, session_id: &str) -> Option<Vec<Message>> {
        let orchestrator = self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|slot| slot.orchestrator.clone())?;
        let orchestrator = orchestrator.lock().await;
        Some(orchestrator.session().transcript().to_vec())
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove sessions idle past the configured timeout; busy sessions are kept
    pub async fn reap_idle(&self) -> Vec<String> {
        let idle = self.config.session_idle_timeout;
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, slot)| {
                slot.last_activity.elapsed() >= idle && slot.orchestrator.try_lock().is_ok()
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(slot) = sessions.remove(id) {
                slot.cancel.cancel();
            }
        }
        if !expired.is_empty() {
            info!("Reaped {} idle session(s)", expired.len());
        }
        expired
    }

    /// Reap idle sessions every `period` until shutdown
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.reap_idle().await;
                    }
                }
            }
        })
    }

    /// Cancel every session and drop them
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut sessions = self.sessions.write().await;
        info!("Shutting down {} session(s)", sessions.len());
        sessions.clear();
    }
}
