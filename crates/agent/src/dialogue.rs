//! Turn handling on top of the stage machine.
//!
//! The engine reads the draft and the turn's signals, updates slots, product and
//! classification, and then asks [`FlowEngine`] for the transition. Flow actions are executed
//! here; the stage machine itself stays pure.

use std::sync::Arc;

use rust_decimal::Decimal;

use landcost_core::audit::{AuditContext, AuditSink, TracingAuditSink};
use landcost_core::classify::{AnswerResolution, ClassificationResult, ClassificationService};
use landcost_core::domain::quote::{round_cents, CostEstimate, EstimateMode, UsdRange};
use landcost_core::domain::session::{ProductSnapshot, QuoteDraft};
use landcost_core::errors::{ApplicationError, DomainError, LandedCostError};
use landcost_core::flows::{
    FlowAction, FlowEngine, FlowEvent, FlowState, QuoteDialogueFlow, Slot, TransitionOutcome,
};
use landcost_core::landed::LandedCostEngine;
use landcost_core::tariff::{DetailOptions, TariffDataSource};

use crate::extraction::{self, ExpectedField, Extraction};
use crate::signals::TurnSignals;
use crate::tools::{LeadCapture, ProductResolver};
use crate::turn::{QuestionTopic, ReplyOption, StructuredQuestion, TurnReply, TurnRequest};

const ACTOR: &str = "landcost-agent";

const PRODUCT_PROMPT: &str = "¿Qué producto querés importar? Podés describirlo o pegar el link de la publicación.";
const PRICE_PROMPT: &str = "¿Cuál es el precio unitario (FOB) y en qué moneda? Por ejemplo: USD 4.500.";
const QUANTITY_PROMPT: &str = "¿Cuántas unidades vas a importar? Por ejemplo: 10 unidades.";
const DETAIL_PROMPT: &str =
    "¿Podés contarme más sobre el producto? Uso, material, potencia o capacidad me ayudan a ubicar la posición.";
const CONFIRMATION_PROMPT: &str =
    "Para avanzar, un especialista revisa la clasificación y te prepara una cotización formal. ¿Querés que te contacte?";
const OUT_OF_RANGE_NOTE: &str =
    "Con esos valores no puedo armar una estimación realista. Revisá el precio unitario y la cantidad.";
const REFINE_HINT: &str =
    "Podés ajustar precio, cantidad, origen o tipo de envío, o escribir «¿cómo sigo?» para avanzar.";

/// Side effect of a turn that runs only after its draft has been saved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredEffect {
    CaptureLead,
}

/// Reply of a processed turn plus the effects still owed once the draft is persisted.
#[derive(Clone, Debug)]
pub struct ProcessedTurn {
    pub reply: TurnReply,
    pub deferred: Vec<DeferredEffect>,
}

/// Per-turn scratch state that ends up in the reply.
struct TurnNotes {
    audit: AuditContext,
    lines: Vec<String>,
    assumptions: Vec<String>,
    budget_requested: bool,
    deferred: Vec<DeferredEffect>,
}

impl TurnNotes {
    fn note(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

pub struct DialogueEngine {
    flow: FlowEngine<QuoteDialogueFlow>,
    classifier: Arc<ClassificationService>,
    landed: Arc<LandedCostEngine>,
    tariff_source: Arc<dyn TariffDataSource>,
    resolver: Arc<dyn ProductResolver>,
    leads: Arc<dyn LeadCapture>,
    audit: Arc<dyn AuditSink>,
}

impl DialogueEngine {
    pub fn new(
        classifier: Arc<ClassificationService>,
        landed: Arc<LandedCostEngine>,
        tariff_source: Arc<dyn TariffDataSource>,
        resolver: Arc<dyn ProductResolver>,
        leads: Arc<dyn LeadCapture>,
    ) -> Self {
        Self {
            flow: FlowEngine::default(),
            classifier,
            landed,
            tariff_source,
            resolver,
            leads,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Applies one user turn to `draft` and builds the reply. The caller persists the draft
    /// and then hands the result to [`DialogueEngine::complete`]; external side effects wait
    /// until then, so a reprocessed turn never repeats them.
    pub async fn process(&self, draft: &mut QuoteDraft, request: &TurnRequest) -> Result<ProcessedTurn, ApplicationError> {
        let correlation_id =
            request.correlation_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut notes = TurnNotes {
            audit: AuditContext::new(Some(draft.session_id.clone()), request.channel.clone(), correlation_id, ACTOR),
            lines: Vec::new(),
            assumptions: Vec::new(),
            budget_requested: false,
            deferred: Vec::new(),
        };
        let reply = self.process_turn(draft, request, &mut notes).await?;
        Ok(ProcessedTurn { reply, deferred: std::mem::take(&mut notes.deferred) })
    }

    /// Runs the effects deferred by [`DialogueEngine::process`] against the saved draft.
    pub async fn complete(&self, draft: &QuoteDraft, turn: ProcessedTurn) -> Result<TurnReply, ApplicationError> {
        let ProcessedTurn { mut reply, deferred } = turn;
        for effect in deferred {
            match effect {
                DeferredEffect::CaptureLead => {
                    let receipt = self.leads.capture(draft).await?;
                    reply.assistant_text = format!(
                        "¡Listo! Registré tu solicitud (referencia {}). Un especialista te va a contactar para validar la clasificación y los costos.",
                        receipt.reference
                    );
                    reply.lead_reference = Some(receipt.reference);
                }
            }
        }
        Ok(reply)
    }

    async fn process_turn(
        &self,
        draft: &mut QuoteDraft,
        request: &TurnRequest,
        notes: &mut TurnNotes,
    ) -> Result<TurnReply, ApplicationError> {
        let text = request.text.trim();
        let signals = TurnSignals::detect(text);
        draft.turn_count += 1;

        if draft.stage == FlowState::LeadCaptured {
            let outcome = self.transition(draft, FlowEvent::SlotsUpdated, &notes.audit)?;
            return self.execute(draft, outcome, notes).await;
        }

        let carries_values = signals.currency || signals.quantity_hint || signals.budget;
        if draft.stage.has_quote() && signals.decision_request {
            let outcome = self.transition(draft, FlowEvent::DecisionRequested, &notes.audit)?;
            return self.execute(draft, outcome, notes).await;
        }
        if draft.stage.has_quote() && signals.affirmative && !carries_values && !signals.product_text {
            let outcome = self.transition(draft, FlowEvent::OfferAccepted, &notes.audit)?;
            return self.execute(draft, outcome, notes).await;
        }
        if draft.stage == FlowState::DecisionRequested && signals.negative && !carries_values {
            let reply = TurnReply::text(draft.stage, format!("Sin problema. {REFINE_HINT}"));
            return Ok(self.finish(draft, reply, notes));
        }

        if signals.dispute && signals.link.is_none() {
            if let Some(disputed) = draft.tariff_code.clone() {
                let product_text = draft.product.as_ref().map(ProductSnapshot::classification_text).unwrap_or_default();
                let reopened = self.classifier.dispute(draft.classification.as_ref(), &disputed, &product_text).await;
                tracing::info!(
                    event_name = "dialogue.classification.disputed",
                    session_id = %draft.session_id,
                    disputed = disputed.as_str(),
                    remaining = reopened.candidates.len(),
                    "classification disputed"
                );
                draft.tariff_code = None;
                draft.tariff_label = None;
                draft.classification = Some(reopened);
                notes.note(format!("Entendido, descarto la posición {disputed}."));
                let outcome = self.transition(draft, FlowEvent::ClassificationDisputed, &notes.audit)?;
                return self.execute(draft, outcome, notes).await;
            }
        }

        let mut changed = false;
        let mut answered_classification = false;

        if draft.classification_pending() && signals.link.is_none() && !signals.currency && !signals.quantity_hint {
            let previous = draft.classification.clone().unwrap_or_else(ClassificationResult::empty);
            let original = draft.product.as_ref().map(ProductSnapshot::classification_text).unwrap_or_default();
            match self.classifier.resolve_answer(&previous, text, &original).await {
                AnswerResolution::Resolved(result) => {
                    apply_classification(draft, result, notes);
                    answered_classification = true;
                    changed = true;
                }
                AnswerResolution::Narrowed(result) => {
                    draft.classification = Some(result);
                    answered_classification = true;
                    changed = true;
                }
                AnswerResolution::NoMatch => {
                    notes.note("Ninguna de las opciones coincide con esa respuesta.");
                    answered_classification = true;
                }
                AnswerResolution::Unrelated => {}
            }
        }

        let expected = if answered_classification {
            None
        } else {
            extraction::expected_field(&request.history, draft.stage)
        };
        let extracted = extraction::extract(text, expected);

        let mut corrected = false;
        if !answered_classification {
            if draft.product.is_none() {
                changed |= self.introduce_product(draft, text, &signals, notes).await;
            } else if draft.stage == FlowState::AwaitingProduct {
                if signals.link.is_none() && signals.product_text {
                    changed |= self.enrich_product(draft, text, notes).await;
                }
            } else if signals.explicit_code.is_some() && !signals.product_text {
                let result = self.classifier.classify(text).await;
                apply_classification(draft, result, notes);
                changed = true;
            } else if is_correction(draft.stage, &signals, &extracted) {
                corrected = self.correct_product(draft, text, notes).await;
                changed |= corrected;
            }
        }

        changed |= apply_slots(draft, &extracted, notes);

        if !changed {
            return Ok(self.unchanged_reply(draft, notes));
        }

        let event = if corrected { FlowEvent::ProductCorrected } else { FlowEvent::SlotsUpdated };
        let outcome = self.transition(draft, event, &notes.audit)?;
        self.execute(draft, outcome, notes).await
    }

    fn transition(
        &self,
        draft: &QuoteDraft,
        event: FlowEvent,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let context = draft.flow_context();
        self.flow
            .apply_with_audit(&draft.stage, &event, &context, self.audit.as_ref(), audit)
            .map_err(|error| ApplicationError::Domain(DomainError::FlowTransition(error)))
    }

    async fn introduce_product(
        &self,
        draft: &mut QuoteDraft,
        text: &str,
        signals: &TurnSignals,
        notes: &mut TurnNotes,
    ) -> bool {
        if signals.link.is_none() && !signals.product_text {
            if let Some(code) = &signals.explicit_code {
                draft.product = Some(ProductSnapshot { title: format!("Posición {code}"), ..ProductSnapshot::default() });
                let result = self.classifier.classify(text).await;
                apply_classification(draft, result, notes);
                return true;
            }
            return false;
        }
        let Some(snapshot) = self.resolve(text).await else {
            return false;
        };
        self.adopt_product(draft, snapshot, notes).await;
        true
    }

    /// Extra description for a product whose classification is still open.
    async fn enrich_product(&self, draft: &mut QuoteDraft, text: &str, notes: &mut TurnNotes) -> bool {
        let addition = extraction::product_phrase(text);
        let Some(product) = draft.product.as_mut() else {
            return false;
        };
        if addition.is_empty() {
            return false;
        }
        product.description = if product.description.is_empty() {
            addition
        } else {
            format!("{} {addition}", product.description)
        };
        let classification_text = product.classification_text();
        let result = self.classifier.classify(&classification_text).await;
        apply_classification(draft, result, notes);
        true
    }

    async fn correct_product(&self, draft: &mut QuoteDraft, text: &str, notes: &mut TurnNotes) -> bool {
        let Some(snapshot) = self.resolve(text).await else {
            return false;
        };
        tracing::info!(
            event_name = "dialogue.product.corrected",
            session_id = %draft.session_id,
            from_stage = draft.stage.as_str(),
            from_link = snapshot.source_link.is_some(),
            "product replaced"
        );
        // A link with its own price replaces the declared price through the snapshot.
        draft.clear_product_dependents(false);
        notes.note("Perfecto, cambio el producto y recalculo desde cero.");
        self.adopt_product(draft, snapshot, notes).await;
        true
    }

    async fn adopt_product(&self, draft: &mut QuoteDraft, snapshot: ProductSnapshot, notes: &mut TurnNotes) {
        if draft.origin_country.is_none() {
            draft.origin_country = snapshot.origin.clone();
        }
        let classification_text = snapshot.classification_text();
        draft.product = Some(snapshot);
        let result = self.classifier.classify(&classification_text).await;
        apply_classification(draft, result, notes);
    }

    async fn resolve(&self, text: &str) -> Option<ProductSnapshot> {
        match self.resolver.resolve(text).await {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                tracing::debug!(event_name = "dialogue.product.unresolved", error = %error, "no product in turn");
                None
            }
        }
    }

    async fn execute(
        &self,
        draft: &mut QuoteDraft,
        outcome: TransitionOutcome,
        notes: &mut TurnNotes,
    ) -> Result<TurnReply, ApplicationError> {
        draft.stage = outcome.to;
        let mut reply = TurnReply::text(outcome.to, String::new());

        for action in &outcome.actions {
            match action {
                FlowAction::PromptForSlot(slot) => {
                    let question = slot_question(draft, *slot);
                    reply.assistant_text = question.prompt.clone();
                    reply.question = Some(question);
                }
                FlowAction::AskDisambiguation => {
                    let question = classification_question(draft);
                    reply.assistant_text = question_text(&question);
                    reply.question = Some(question);
                }
                // Applied to the draft before the transition so the context already reflects it.
                FlowAction::ClearDependentSlots | FlowAction::DiscardClassification => {}
                FlowAction::CalculateLandedCost => match self.quote(draft).await {
                    Ok(estimate) => {
                        reply.assistant_text = quote_text(draft, &estimate);
                        reply.breakdown = estimate.breakdown.clone();
                        reply.quality_score = Some(estimate.quality_score);
                        notes.assumptions.extend(estimate.assumptions.iter().cloned());
                    }
                    Err(error) => {
                        reprompt_amounts(draft, &error);
                        let question = slot_question(draft, Slot::UnitPrice);
                        reply.assistant_text = format!("{OUT_OF_RANGE_NOTE} {}", question.prompt);
                        reply.question = Some(question);
                    }
                },
                FlowAction::RequestConfirmation => {
                    reply.assistant_text = CONFIRMATION_PROMPT.to_string();
                    reply.question = Some(StructuredQuestion {
                        prompt: CONFIRMATION_PROMPT.to_string(),
                        topic: QuestionTopic::Confirmation,
                        options: vec![
                            ReplyOption { key: "si".to_string(), label: "Sí, quiero avanzar".to_string() },
                            ReplyOption { key: "no".to_string(), label: "Todavía no".to_string() },
                        ],
                        product: draft.product.clone(),
                    });
                }
                FlowAction::CaptureLead => {
                    notes.deferred.push(DeferredEffect::CaptureLead);
                    reply.assistant_text =
                        "¡Listo! Un especialista te va a contactar para validar la clasificación y los costos.".to_string();
                    reply.handoff = true;
                }
                FlowAction::Acknowledge => {
                    reply.assistant_text =
                        "Tu solicitud ya está en manos de un especialista; te va a contactar a la brevedad.".to_string();
                }
            }
        }

        if notes.budget_requested {
            self.attach_budget(draft, &mut reply, notes).await;
        }
        Ok(self.finish(draft, reply, notes))
    }

    async fn quote(&self, draft: &mut QuoteDraft) -> Result<CostEstimate, LandedCostError> {
        let detail = match &draft.tariff_code {
            Some(code) => self.tariff_source.get_detail(code, DetailOptions::default()).await,
            None => None,
        };
        let estimate = self.landed.calculate(draft, EstimateMode::Quote, detail.as_ref()).await?;
        draft.last_estimate = Some(estimate.clone());
        Ok(estimate)
    }

    /// Budget sizing next to the unit-price question when only a target spend is known.
    async fn attach_budget(&self, draft: &mut QuoteDraft, reply: &mut TurnReply, notes: &mut TurnNotes) {
        if draft.product.is_none() || draft.unit_price.is_some() || draft.product_has_price() {
            return;
        }
        let estimate = match self.landed.calculate(draft, EstimateMode::Budget, None).await {
            Ok(estimate) => estimate,
            Err(_) => {
                draft.target_budget = None;
                notes.note("Ese presupuesto está fuera del rango que puedo estimar.");
                return;
            }
        };
        let Some(budget) = estimate.budget else {
            return;
        };
        let mut text = format!(
            "Con un presupuesto de USD {}, el valor FOB de la mercadería debería rondar {}.",
            format_amount(budget.target),
            format_range(budget.fob_budget)
        );
        if let Some((min_units, max_units)) = budget.affordable_units {
            text.push_str(&format!(" Alcanza para {min_units} a {max_units} unidades."));
        }
        reply.assistant_text = format!("{text} {}", reply.assistant_text).trim().to_string();
        reply.quality_score = Some(estimate.quality_score);
        reply.budget = Some(budget);
    }

    fn unchanged_reply(&self, draft: &QuoteDraft, notes: &mut TurnNotes) -> TurnReply {
        let reply = match draft.stage {
            FlowState::AwaitingPrice => {
                let question = slot_question(draft, Slot::UnitPrice);
                TurnReply::text(
                    draft.stage,
                    format!("No pude identificar el precio. Indicalo con la moneda, por ejemplo: USD 4.500. {}", question.prompt),
                )
                .with_question(question)
            }
            FlowState::AwaitingQuantity => {
                let question = slot_question(draft, Slot::Quantity);
                TurnReply::text(
                    draft.stage,
                    format!("No pude identificar la cantidad. Indicala en unidades, por ejemplo: 10 unidades. {}", question.prompt),
                )
                .with_question(question)
            }
            FlowState::AwaitingProduct if draft.classification_pending() => {
                let question = classification_question(draft);
                TurnReply::text(draft.stage, question_text(&question)).with_question(question)
            }
            FlowState::AwaitingProduct if draft.product.is_some() => {
                let question = StructuredQuestion {
                    prompt: DETAIL_PROMPT.to_string(),
                    topic: QuestionTopic::Product,
                    options: Vec::new(),
                    product: draft.product.clone(),
                };
                TurnReply::text(draft.stage, DETAIL_PROMPT).with_question(question)
            }
            FlowState::AwaitingProduct => {
                let question = slot_question(draft, Slot::Product);
                TurnReply::text(draft.stage, PRODUCT_PROMPT).with_question(question)
            }
            _ => TurnReply::text(draft.stage, REFINE_HINT),
        };
        self.finish(draft, reply, notes)
    }

    fn finish(&self, draft: &QuoteDraft, mut reply: TurnReply, notes: &mut TurnNotes) -> TurnReply {
        if !notes.lines.is_empty() {
            reply.assistant_text = format!("{} {}", notes.lines.join(" "), reply.assistant_text).trim().to_string();
            notes.lines.clear();
        }
        reply.stage = draft.stage;
        reply.known_fields = draft.known_fields();
        for assumption in std::mem::take(&mut notes.assumptions) {
            if !reply.assumptions.contains(&assumption) {
                reply.assumptions.push(assumption);
            }
        }
        reply
    }
}

/// Drops the amounts a rejected estimate was built from and returns the draft to the price
/// question. A rejected unit price keeps the quantity; any other rejection clears both.
fn reprompt_amounts(draft: &mut QuoteDraft, error: &LandedCostError) {
    tracing::warn!(
        event_name = "dialogue.quote.out_of_range",
        session_id = %draft.session_id,
        error = %error,
        "estimate rejected; asking for amounts again"
    );
    if !matches!(error, LandedCostError::AmountOutOfRange { stage: "unit_price" }) {
        draft.quantity = None;
    }
    draft.unit_price = None;
    if let Some(product) = draft.product.as_mut() {
        product.price = None;
    }
    draft.stage = FlowState::AwaitingPrice;
}

fn apply_classification(draft: &mut QuoteDraft, result: ClassificationResult, notes: &mut TurnNotes) {
    match (&result.best_code, result.is_unclassified()) {
        (Some(code), _) => notes.note(match &result.best_label {
            Some(label) => format!("Lo ubico en la posición {code} ({label})."),
            None => format!("Lo ubico en la posición {code}."),
        }),
        (None, true) => {
            notes.note("No encontré una posición arancelaria clara; voy a estimar con tasas de referencia.");
            notes.assumptions.push("Posición arancelaria sin confirmar: tasas de referencia".to_string());
        }
        (None, false) => {}
    }
    draft.tariff_code = result.best_code.clone();
    draft.tariff_label = result.best_label.clone();
    draft.classification = Some(result);
}

/// A new product replaces the current one when the turn carries a link, or product-shaped
/// text that does not answer the slot being asked for.
fn is_correction(stage: FlowState, signals: &TurnSignals, extracted: &Extraction) -> bool {
    if signals.link.is_some() {
        return true;
    }
    let answers_pending = match stage {
        FlowState::AwaitingPrice => extracted.price.is_some() || extracted.budget.is_some(),
        FlowState::AwaitingQuantity => extracted.quantity.is_some(),
        _ => false,
    };
    signals.product_text && !answers_pending
}

/// Sets every slot the turn supplies. Absent values never clear existing ones.
fn apply_slots(draft: &mut QuoteDraft, extracted: &Extraction, notes: &mut TurnNotes) -> bool {
    let mut changed = false;
    if let Some(price) = extracted.price {
        if extracted.price_currency_assumed {
            notes.assumptions.push("Moneda del precio asumida en USD".to_string());
        }
        draft.unit_price = Some(price);
        changed = true;
    }
    if let Some(quantity) = extracted.quantity {
        draft.quantity = Some(quantity);
        changed = true;
    }
    if let Some(budget) = extracted.budget {
        draft.target_budget = Some(budget);
        notes.budget_requested = true;
        changed = true;
    }
    if let Some(origin) = &extracted.origin {
        if draft.origin_country.as_deref() != Some(origin.as_str()) {
            draft.origin_country = Some(origin.clone());
            changed = true;
        }
    }
    if let Some(profile) = extracted.shipping_profile {
        if draft.shipping_profile != Some(profile) {
            draft.shipping_profile = Some(profile);
            changed = true;
        }
    }
    changed
}

fn slot_question(draft: &QuoteDraft, slot: Slot) -> StructuredQuestion {
    let (prompt, topic) = match slot {
        Slot::Product => (PRODUCT_PROMPT, QuestionTopic::Product),
        Slot::UnitPrice => (PRICE_PROMPT, QuestionTopic::UnitPrice),
        Slot::Quantity => (QUANTITY_PROMPT, QuestionTopic::Quantity),
    };
    StructuredQuestion { prompt: prompt.to_string(), topic, options: Vec::new(), product: draft.product.clone() }
}

fn classification_question(draft: &QuoteDraft) -> StructuredQuestion {
    match draft.classification.as_ref().and_then(|result| result.questions.first()) {
        Some(pending) => StructuredQuestion {
            prompt: pending.prompt.clone(),
            topic: QuestionTopic::Classification,
            options: pending
                .options
                .iter()
                .map(|option| ReplyOption { key: option.key.clone(), label: option.label.clone() })
                .collect(),
            product: draft.product.clone(),
        },
        None => StructuredQuestion {
            prompt: DETAIL_PROMPT.to_string(),
            topic: QuestionTopic::Product,
            options: Vec::new(),
            product: draft.product.clone(),
        },
    }
}

fn question_text(question: &StructuredQuestion) -> String {
    if question.topic != QuestionTopic::Classification || question.options.is_empty() {
        return question.prompt.clone();
    }
    let options: Vec<&str> = question.options.iter().map(|option| option.label.as_str()).collect();
    format!("Para clasificarlo necesito un dato más. {} ({})", question.prompt, options.join(" / "))
}

fn quote_text(draft: &QuoteDraft, estimate: &CostEstimate) -> String {
    let Some(breakdown) = &estimate.breakdown else {
        return format!("No pude completar el cálculo; la estimación queda pendiente de validación. {REFINE_HINT}");
    };
    let title = draft.product.as_ref().map(|product| product.title.as_str()).unwrap_or("el producto");
    let mut lines = vec![format!("Estimación puesta en destino para {} x {title}:", breakdown.quantity)];
    if let Some(code) = &draft.tariff_code {
        lines.push(format!("• Posición arancelaria: {code}"));
    }
    lines.push(format!("• FOB total: {}", format_range(breakdown.fob_total)));
    lines.push(format!("• Flete internacional: {}", format_range(breakdown.freight)));
    lines.push(format!("• Seguro: {}", format_range(breakdown.insurance)));
    lines.push(format!("• Tributos de importación: {}", format_range(breakdown.tax_subtotal)));
    lines.push(format!("• Gastos locales (despachante, depósito, transporte): {}", format_range(breakdown.handling.subtotal)));
    lines.push(format!("• Total estimado: {}", format_range(breakdown.grand_total)));
    lines.push(format!("Calidad del dato: {}/100.", estimate.quality_score));
    if !estimate.assumptions.is_empty() {
        lines.push(format!("Supuestos: {}.", estimate.assumptions.join("; ")));
    }
    lines.push(REFINE_HINT.to_string());
    lines.join("\n")
}

/// `4180.5` -> `4.180,50`.
pub fn format_amount(value: Decimal) -> String {
    let rounded = format!("{:.2}", round_cents(value));
    let (integer, fraction) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));
    let (sign, digits) = match integer.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", integer),
    };
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    format!("{sign}{grouped},{fraction}")
}

pub fn format_range(range: UsdRange) -> String {
    if round_cents(range.min) == round_cents(range.max) {
        format!("USD {}", format_amount(range.min))
    } else {
        format!("USD {} a {}", format_amount(range.min), format_amount(range.max))
    }
}
