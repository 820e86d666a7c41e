use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use landcost_agent::dialogue::DialogueEngine;
use landcost_agent::runtime::AgentRuntime;
use landcost_agent::tools::{LeadCapture, LeadReceipt, LoggingLeadCapture, PlainTextResolver};
use landcost_agent::turn::TurnRequest;
use landcost_core::classify::{ClassificationService, ClassificationSettings, RuleTable};
use landcost_core::domain::session::{QuoteDraft, SessionId};
use landcost_core::errors::ApplicationError;
use landcost_core::flows::FlowState;
use landcost_core::fx::ExchangeRateCache;
use landcost_core::landed::{LandedCostEngine, LandedCostSettings};
use landcost_core::tariff::UnavailableTariffSource;
use landcost_db::{InMemorySessionRepository, InMemoryTariffIndex, RepositoryError, SessionRepository, TariffSeedDataset};

/// Lets another writer bump the stored version right before the first save.
#[derive(Default)]
struct RacingRepository {
    inner: InMemorySessionRepository,
    raced: AtomicBool,
    always_conflict: bool,
    saves: AtomicUsize,
}

#[async_trait]
impl SessionRepository for RacingRepository {
    async fn load(&self, session_id: &SessionId) -> Result<Option<QuoteDraft>, RepositoryError> {
        self.inner.load(session_id).await
    }

    async fn insert(&self, draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError> {
        self.inner.insert(draft).await
    }

    async fn save_if_version(&self, draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.always_conflict {
            return Err(RepositoryError::VersionConflict {
                session_id: draft.session_id.0.clone(),
                expected_version: draft.version,
            });
        }
        if !self.raced.swap(true, Ordering::SeqCst) {
            if let Some(stored) = self.inner.load(&draft.session_id).await? {
                self.inner.save_if_version(stored).await?;
            }
        }
        self.inner.save_if_version(draft).await
    }
}

/// Counts hand-offs so a reprocessed turn can be checked for duplicates.
#[derive(Default)]
struct CountingLeadCapture {
    captures: AtomicUsize,
}

#[async_trait]
impl LeadCapture for CountingLeadCapture {
    async fn capture(&self, _draft: &QuoteDraft) -> Result<LeadReceipt, ApplicationError> {
        let count = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LeadReceipt { reference: format!("lead-{count}"), captured_at: Utc::now() })
    }
}

async fn runtime(sessions: Arc<dyn SessionRepository>) -> AgentRuntime {
    runtime_with_leads(sessions, Arc::new(LoggingLeadCapture)).await
}

async fn runtime_with_leads(sessions: Arc<dyn SessionRepository>, leads: Arc<dyn LeadCapture>) -> AgentRuntime {
    let index = Arc::new(InMemoryTariffIndex::new());
    TariffSeedDataset::load(index.as_ref()).await.expect("seed");
    let source = Arc::new(UnavailableTariffSource);
    let classifier = Arc::new(ClassificationService::new(
        index,
        source.clone(),
        None,
        RuleTable::embedded().expect("rules"),
        ClassificationSettings::default(),
    ));
    let landed = Arc::new(LandedCostEngine::new(
        LandedCostSettings::default(),
        Arc::new(ExchangeRateCache::fixed(Decimal::new(1_000, 0))),
    ));
    let dialogue = DialogueEngine::new(classifier, landed, source, Arc::new(PlainTextResolver), leads);
    AgentRuntime::new(sessions, dialogue)
}

#[tokio::test]
async fn version_conflict_reloads_and_reprocesses_the_turn() {
    let sessions = Arc::new(RacingRepository::default());
    let runtime = runtime(sessions.clone()).await;

    let reply = runtime.handle_turn(TurnRequest::new("race", "quiero importar un ascensor")).await;
    assert_eq!(reply.stage, FlowState::AwaitingPrice);
    assert_eq!(sessions.saves.load(Ordering::SeqCst), 2);

    let stored = sessions.load(&SessionId("race".to_string())).await.expect("load").expect("draft");
    assert_eq!(stored.version, 3);
    assert_eq!(stored.turn_count, 1);
    assert!(stored.product.is_some());
}

#[tokio::test]
async fn exhausted_retries_reply_with_pending_validation() {
    let sessions = Arc::new(RacingRepository { always_conflict: true, ..RacingRepository::default() });
    let runtime = runtime(sessions.clone()).await.with_max_attempts(2);

    let reply = runtime.handle_turn(TurnRequest::new("stuck", "quiero importar un ascensor")).await;
    assert!(reply.assistant_text.contains("pendiente de validación"));
    assert_eq!(reply.stage, FlowState::AwaitingProduct);
    assert!(reply.breakdown.is_none());
    assert_eq!(sessions.saves.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_turns_for_one_session_are_serialized() {
    let sessions = Arc::new(InMemorySessionRepository::new());
    let runtime = Arc::new(runtime(sessions.clone()).await);

    let first = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.handle_turn(TurnRequest::new("shared", "quiero importar un ascensor")).await })
    };
    let second = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.handle_turn(TurnRequest::new("shared", "USD 500")).await })
    };
    let (first, second) = (first.await.expect("join"), second.await.expect("join"));
    assert!(!first.assistant_text.contains("pendiente de validación"));
    assert!(!second.assistant_text.contains("pendiente de validación"));

    let stored = sessions.load(&SessionId("shared".to_string())).await.expect("load").expect("draft");
    assert_eq!(stored.turn_count, 2);
    assert_eq!(stored.version, 3);
    assert!(stored.product.is_some());
}

#[tokio::test]
async fn accepted_offer_is_handed_off_once_when_the_save_is_retried() {
    let sessions = Arc::new(RacingRepository { raced: AtomicBool::new(true), ..RacingRepository::default() });
    let leads = Arc::new(CountingLeadCapture::default());
    let runtime = runtime_with_leads(sessions.clone(), leads.clone()).await;

    runtime.handle_turn(TurnRequest::new("lead", "quiero importar un ascensor")).await;
    runtime.handle_turn(TurnRequest::new("lead", "USD 500")).await;
    let quoted = runtime.handle_turn(TurnRequest::new("lead", "10 unidades")).await;
    assert_eq!(quoted.stage, FlowState::Quoted);

    sessions.raced.store(false, Ordering::SeqCst);
    let saves_before = sessions.saves.load(Ordering::SeqCst);
    let accepted = runtime.handle_turn(TurnRequest::new("lead", "Sí, dale")).await;

    assert_eq!(sessions.saves.load(Ordering::SeqCst), saves_before + 2);
    assert_eq!(accepted.stage, FlowState::LeadCaptured);
    assert!(accepted.handoff);
    assert_eq!(accepted.lead_reference.as_deref(), Some("lead-1"));
    assert!(accepted.assistant_text.contains("lead-1"));
    assert_eq!(leads.captures.load(Ordering::SeqCst), 1);

    let stored = sessions.load(&SessionId("lead".to_string())).await.expect("load").expect("draft");
    assert_eq!(stored.stage, FlowState::LeadCaptured);
}
