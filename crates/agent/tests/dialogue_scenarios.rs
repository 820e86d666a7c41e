use std::sync::Arc;

use rust_decimal::Decimal;

use landcost_agent::dialogue::DialogueEngine;
use landcost_agent::runtime::AgentRuntime;
use landcost_agent::tools::{LoggingLeadCapture, PlainTextResolver};
use landcost_agent::turn::{PriorTurn, QuestionTopic, Role, TurnReply, TurnRequest};
use landcost_core::audit::InMemoryAuditSink;
use landcost_core::classify::{ClassificationService, ClassificationSettings, RuleTable};
use landcost_core::domain::session::{Money, QuoteDraft, SessionId};
use landcost_core::domain::tariff::TariffCode;
use landcost_core::flows::FlowState;
use landcost_core::fx::ExchangeRateCache;
use landcost_core::landed::{LandedCostEngine, LandedCostSettings};
use landcost_core::tariff::{TariffIndex, TariffIndexEntry, UnavailableTariffSource};
use landcost_db::{InMemorySessionRepository, InMemoryTariffIndex, SessionRepository, TariffSeedDataset};

struct Harness {
    runtime: AgentRuntime,
    sessions: Arc<InMemorySessionRepository>,
    audit: Arc<InMemoryAuditSink>,
}

impl Harness {
    async fn with_entries(entries: &[(&str, &str)]) -> Self {
        let index = Arc::new(InMemoryTariffIndex::new());
        let entries: Vec<TariffIndexEntry> = entries
            .iter()
            .map(|(code, label)| TariffIndexEntry::new(TariffCode::parse(code).expect("code"), *label, Vec::new()))
            .collect();
        index.upsert(&entries).await.expect("upsert");
        Self::over(index)
    }

    async fn seeded() -> Self {
        let index = Arc::new(InMemoryTariffIndex::new());
        TariffSeedDataset::load(index.as_ref()).await.expect("seed");
        Self::over(index)
    }

    fn over(index: Arc<InMemoryTariffIndex>) -> Self {
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
        let audit = Arc::new(InMemoryAuditSink::default());
        let dialogue = DialogueEngine::new(
            classifier,
            landed,
            source,
            Arc::new(PlainTextResolver),
            Arc::new(LoggingLeadCapture),
        )
        .with_audit_sink(audit.clone());
        let sessions = Arc::new(InMemorySessionRepository::new());
        Self { runtime: AgentRuntime::new(sessions.clone(), dialogue), sessions, audit }
    }

    async fn say(&self, session: &str, text: &str) -> TurnReply {
        self.runtime.handle_turn(TurnRequest::new(session, text)).await
    }

    async fn draft(&self, session: &str) -> QuoteDraft {
        self.sessions.load(&SessionId(session.to_string())).await.expect("load").expect("draft exists")
    }
}

fn forklifts() -> [(&'static str, &'static str); 2] {
    [
        ("8427.10.11", "Carretillas apiladoras autopropulsadas con motor eléctrico"),
        ("8427.20.10", "Carretillas apiladoras autopropulsadas con motor de combustión"),
    ]
}

fn trucks() -> [(&'static str, &'static str); 2] {
    [
        ("8704.21.10", "Camión volcador de peso total con carga máxima inferior o igual a 5 t"),
        ("8704.22.10", "Camión volcador de peso total con carga máxima superior a 5 t pero inferior o igual a 20 t"),
    ]
}

#[tokio::test]
async fn one_turn_with_every_slot_returns_a_breakdown() {
    let harness = Harness::with_entries(&forklifts()).await;
    let reply = harness.say("a", "autoelevador eléctrico 3T, USD 4180, x1").await;

    assert_eq!(reply.stage, FlowState::Quoted);
    let breakdown = reply.breakdown.expect("breakdown");
    assert_eq!(breakdown.quantity, 1);
    assert_eq!(breakdown.fob_total.min, Decimal::new(4_180, 0));
    assert!(breakdown.grand_total.max >= breakdown.grand_total.min);
    assert!(reply.quality_score.is_some());

    let draft = harness.draft("a").await;
    assert_eq!(draft.unit_price, Some(Money::usd(Decimal::new(4_180, 0))));
    assert_eq!(draft.quantity, Some(1));
    assert_eq!(draft.tariff_code.as_ref().map(|code| code.as_str()), Some("8427.10.11"));
    assert!(draft.last_estimate.is_some());
    assert!(reply.known_fields.contains(&"tariff_code".to_string()));
}

#[tokio::test]
async fn slots_are_collected_across_turns() {
    let harness = Harness::seeded().await;

    let first = harness.say("b", "quiero importar un ascensor").await;
    assert_eq!(first.stage, FlowState::AwaitingPrice);
    assert_eq!(first.question.as_ref().map(|question| question.topic), Some(QuestionTopic::UnitPrice));
    assert!(first.assistant_text.contains("8428.10.00"));

    let second = harness.say("b", "500").await;
    assert_eq!(second.stage, FlowState::AwaitingQuantity);
    assert!(second.assumptions.iter().any(|assumption| assumption.contains("USD")));
    assert_eq!(harness.draft("b").await.unit_price, Some(Money::usd(Decimal::new(500, 0))));

    let third = harness.say("b", "10 unidades").await;
    assert_eq!(third.stage, FlowState::Quoted);
    assert_eq!(third.breakdown.as_ref().map(|breakdown| breakdown.quantity), Some(10));
    assert_eq!(harness.draft("b").await.quantity, Some(10));
}

#[tokio::test]
async fn prior_assistant_question_decides_bare_numbers() {
    let harness = Harness::seeded().await;
    harness.say("h", "quiero importar un ascensor").await;

    let request = TurnRequest::new("h", "12").with_history(vec![
        PriorTurn { role: Role::User, text: "quiero importar un ascensor".to_string() },
        PriorTurn { role: Role::Assistant, text: "¿Cuántas unidades vas a importar?".to_string() },
    ]);
    let reply = harness.runtime.handle_turn(request).await;

    let draft = harness.draft("h").await;
    assert_eq!(draft.quantity, Some(12));
    assert!(draft.unit_price.is_none());
    assert_eq!(reply.stage, FlowState::AwaitingPrice);
}

#[tokio::test]
async fn weight_question_settles_close_truck_candidates() {
    let harness = Harness::with_entries(&trucks()).await;

    let first = harness.say("c", "quiero importar un camión volcador").await;
    assert_eq!(first.stage, FlowState::AwaitingProduct);
    let question = first.question.expect("question");
    assert_eq!(question.topic, QuestionTopic::Classification);
    assert_eq!(question.prompt, "¿Peso total ≤5t o >5t?");
    assert!(harness.draft("c").await.tariff_code.is_none());

    let second = harness.say("c", "<=5t").await;
    assert_eq!(second.stage, FlowState::AwaitingPrice);
    let draft = harness.draft("c").await;
    assert_eq!(draft.tariff_code.as_ref().map(|code| code.as_str()), Some("8704.21.10"));
    assert!(draft.unit_price.is_none());
}

#[tokio::test]
async fn price_and_quantity_survive_unrelated_turns() {
    let harness = Harness::seeded().await;
    harness.say("m", "quiero importar un ascensor").await;
    harness.say("m", "USD 800").await;

    let reply = harness.say("m", "hmm, no sé").await;
    assert_eq!(reply.stage, FlowState::AwaitingQuantity);
    assert!(reply.assistant_text.contains("10 unidades"));
    assert_eq!(harness.draft("m").await.unit_price, Some(Money::usd(Decimal::new(800, 0))));

    harness.say("m", "3 unidades").await;
    let refined = harness.say("m", "y si fueran 20 unidades?").await;
    assert_eq!(refined.stage, FlowState::Refined);
    let draft = harness.draft("m").await;
    assert_eq!(draft.quantity, Some(20));
    assert_eq!(draft.unit_price, Some(Money::usd(Decimal::new(800, 0))));
}

#[tokio::test]
async fn product_correction_clears_dependent_slots() {
    let harness = Harness::seeded().await;
    harness.say("p", "quiero importar un ascensor").await;
    harness.say("p", "USD 800").await;

    let reply = harness.say("p", "ah no, mejor una hormigonera").await;
    assert_eq!(reply.stage, FlowState::AwaitingPrice);
    let draft = harness.draft("p").await;
    assert!(draft.unit_price.is_none());
    assert_eq!(draft.tariff_code.as_ref().map(|code| code.as_str()), Some("8474.31.00"));
    assert_eq!(draft.product.as_ref().map(|product| product.title.as_str()), Some("hormigonera"));
}

#[tokio::test]
async fn disputed_code_returns_to_product_stage_keeping_slots() {
    let harness = Harness::seeded().await;
    harness.say("d", "quiero importar un ascensor").await;
    harness.say("d", "USD 500").await;
    harness.say("d", "10 unidades").await;

    let reply = harness.say("d", "ese código no corresponde").await;
    assert_eq!(reply.stage, FlowState::AwaitingProduct);
    let draft = harness.draft("d").await;
    assert!(draft.tariff_code.is_none());
    assert!(draft
        .classification
        .as_ref()
        .is_some_and(|result| result.candidates.iter().all(|candidate| candidate.candidate.code.as_str() != "8428.10.00")));
    assert_eq!(draft.quantity, Some(10));
    assert!(harness.audit.events().iter().any(|event| event.event_type == "flow.transition_applied"));
}

#[tokio::test]
async fn decision_then_acceptance_hands_off_the_lead() {
    let harness = Harness::seeded().await;
    harness.say("l", "quiero importar un ascensor").await;
    harness.say("l", "USD 500").await;
    harness.say("l", "10 unidades").await;

    let decision = harness.say("l", "¿Cómo sigo?").await;
    assert_eq!(decision.stage, FlowState::DecisionRequested);
    assert_eq!(decision.question.map(|question| question.topic), Some(QuestionTopic::Confirmation));

    let accepted = harness.say("l", "Sí, dale").await;
    assert_eq!(accepted.stage, FlowState::LeadCaptured);
    assert!(accepted.handoff);
    assert!(accepted.lead_reference.is_some());

    let after = harness.say("l", "USD 900").await;
    assert_eq!(after.stage, FlowState::LeadCaptured);
    assert!(!after.handoff);
    assert_eq!(harness.draft("l").await.unit_price, Some(Money::usd(Decimal::new(500, 0))));
}

#[tokio::test]
async fn budget_turn_sizes_fob_and_still_asks_for_price() {
    let harness = Harness::seeded().await;
    harness.say("g", "quiero importar un ascensor").await;

    let reply = harness.say("g", "tengo un presupuesto de USD 46.000").await;
    assert_eq!(reply.stage, FlowState::AwaitingPrice);
    let budget = reply.budget.expect("budget sizing");
    assert_eq!(budget.target, Decimal::new(46_000, 0));
    assert_eq!(budget.fob_budget.min, Decimal::new(20_000, 0));
    assert_eq!(reply.question.map(|question| question.topic), Some(QuestionTopic::UnitPrice));
    assert!(reply.breakdown.is_none());
}

#[tokio::test]
async fn unknown_product_is_quoted_with_reference_rates() {
    let harness = Harness::seeded().await;
    let reply = harness.say("u", "necesito cotizar un telescopio refractor, USD 1.200, 2 unidades").await;

    assert_eq!(reply.stage, FlowState::Quoted);
    assert!(reply.breakdown.is_some());
    assert!(reply.assumptions.iter().any(|assumption| assumption.contains("tasas de referencia")));
    assert!(harness.draft("u").await.tariff_code.is_none());
}

#[tokio::test]
async fn unrealistic_amounts_are_asked_again_instead_of_quoted() {
    let harness = Harness::seeded().await;
    harness.say("x", "quiero importar un ascensor").await;

    let reply = harness.say("x", "USD 900.000.000, 999999 unidades").await;
    assert_eq!(reply.stage, FlowState::AwaitingPrice);
    assert!(reply.breakdown.is_none());
    assert!(reply.assistant_text.contains("estimación realista"));
    assert_eq!(reply.question.map(|question| question.topic), Some(QuestionTopic::UnitPrice));
    let draft = harness.draft("x").await;
    assert!(draft.unit_price.is_none());
    assert!(draft.quantity.is_none());
    assert!(draft.last_estimate.is_none());

    let recovered = harness.say("x", "USD 500, 10 unidades").await;
    assert_eq!(recovered.stage, FlowState::Quoted);
    assert!(recovered.breakdown.is_some());
}
