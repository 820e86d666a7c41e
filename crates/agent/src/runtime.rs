//! Turn entry point: per-session serialization, versioned persistence and the no-error
//! boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;

use landcost_core::domain::session::{QuoteDraft, SessionId};
use landcost_core::errors::ApplicationError;
use landcost_core::flows::FlowState;
use landcost_db::{RepositoryError, SessionRepository};

use crate::dialogue::DialogueEngine;
use crate::turn::{TurnReply, TurnRequest};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const PENDING_VALIDATION_REPLY: &str = "Tuve un problema para completar el cálculo, así que la estimación queda pendiente de validación. Un especialista la va a revisar; también podés intentar de nuevo en unos minutos.";

pub struct AgentRuntime {
    sessions: Arc<dyn SessionRepository>,
    dialogue: DialogueEngine,
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
    max_attempts: u32,
}

impl AgentRuntime {
    pub fn new(sessions: Arc<dyn SessionRepository>, dialogue: DialogueEngine) -> Self {
        Self { sessions, dialogue, locks: Mutex::new(HashMap::new()), max_attempts: DEFAULT_MAX_ATTEMPTS }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Processes one turn. Never fails: internal errors become a "pending validation" reply.
    pub async fn handle_turn(&self, mut request: TurnRequest) -> TurnReply {
        let correlation_id = request
            .correlation_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let session_id = request.session_id.clone();
        let started = Instant::now();

        let lock = self.session_lock(&session_id).await;
        let guard = lock.lock().await;
        let outcome = self.process_with_retry(&request).await;
        drop(guard);
        self.release_lock(&session_id, lock).await;

        match outcome {
            Ok(reply) => {
                tracing::info!(
                    event_name = "landcost.turn.completed",
                    session_id = %session_id,
                    correlation_id = %correlation_id,
                    stage = reply.stage.as_str(),
                    handoff = reply.handoff,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn completed"
                );
                reply
            }
            Err(error) => {
                tracing::error!(
                    event_name = "landcost.turn.failed",
                    session_id = %session_id,
                    correlation_id = %correlation_id,
                    error = %error,
                    "turn failed; replying with pending validation"
                );
                let stage = match self.sessions.load(&session_id).await {
                    Ok(Some(draft)) => draft.stage,
                    _ => FlowState::AwaitingProduct,
                };
                TurnReply::text(stage, PENDING_VALIDATION_REPLY)
            }
        }
    }

    async fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Drops the map entry once no other turn for the session holds or awaits it.
    async fn release_lock(&self, session_id: &SessionId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
    }

    async fn process_with_retry(&self, request: &TurnRequest) -> Result<TurnReply, ApplicationError> {
        let mut last_conflict = None;
        for attempt in 1..=self.max_attempts {
            let mut draft = match self.load_or_create(&request.session_id).await {
                Ok(draft) => draft,
                Err(RepositoryError::VersionConflict { session_id, expected_version }) => {
                    last_conflict = Some(ApplicationError::VersionConflict { session_id, expected_version });
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            let processed = self.dialogue.process(&mut draft, request).await?;
            match self.sessions.save_if_version(draft).await {
                Ok(saved) => return self.dialogue.complete(&saved, processed).await,
                Err(RepositoryError::VersionConflict { session_id, expected_version }) => {
                    tracing::warn!(
                        event_name = "landcost.turn.version_conflict",
                        session_id = %session_id,
                        expected_version,
                        attempt,
                        "session changed concurrently; reprocessing turn"
                    );
                    last_conflict = Some(ApplicationError::VersionConflict { session_id, expected_version });
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(last_conflict.unwrap_or_else(|| {
            ApplicationError::Persistence(format!("no attempt left for session {}", request.session_id))
        }))
    }

    async fn load_or_create(&self, session_id: &SessionId) -> Result<QuoteDraft, RepositoryError> {
        match self.sessions.load(session_id).await? {
            Some(draft) => Ok(draft),
            None => self.sessions.insert(QuoteDraft::new(session_id.clone(), Utc::now())).await,
        }
    }
}
