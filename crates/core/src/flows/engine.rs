use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, Slot, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Slot-filling dialogue: product, price, quantity, then quote, refine and hand-off.
#[derive(Clone, Debug, Default)]
pub struct QuoteDialogueFlow;

impl FlowDefinition for QuoteDialogueFlow {
    fn initial_state(&self) -> FlowState {
        FlowState::AwaitingProduct
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_quote_dialogue(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<QuoteDialogueFlow> {
    fn default() -> Self {
        Self::new(QuoteDialogueFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required slots in {state:?}: {missing_slots:?}")]
    MissingRequiredSlots { state: FlowState, missing_slots: Vec<Slot> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_quote_dialogue(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        Acknowledge, CaptureLead, ClearDependentSlots, DiscardClassification, RequestConfirmation,
    };
    use FlowState::{
        AwaitingPrice, AwaitingProduct, AwaitingQuantity, DecisionRequested, LeadCaptured, Quoted,
        Refined,
    };

    let (to, actions) = match (current, event) {
        (LeadCaptured, _) => (LeadCaptured, vec![Acknowledge]),
        (AwaitingProduct | AwaitingPrice | AwaitingQuantity, FlowEvent::SlotsUpdated) => {
            settle(context)
        }
        (Quoted | Refined | DecisionRequested, FlowEvent::SlotsUpdated) => {
            // Slots only disappear through a correction or dispute once a quote exists.
            if !context.missing_slots.is_empty() || context.classification_pending {
                return Err(FlowTransitionError::MissingRequiredSlots {
                    state: *current,
                    missing_slots: context.missing_slots.clone(),
                });
            }
            (Refined, vec![FlowAction::CalculateLandedCost])
        }
        (AwaitingProduct, FlowEvent::ProductCorrected) => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
        (_, FlowEvent::ProductCorrected) => {
            let (to, mut actions) = settle(context);
            actions.insert(0, ClearDependentSlots);
            (to, actions)
        }
        (_, FlowEvent::ClassificationDisputed) => {
            (AwaitingProduct, vec![DiscardClassification, FlowAction::AskDisambiguation])
        }
        (Quoted | Refined | DecisionRequested, FlowEvent::DecisionRequested) => {
            (DecisionRequested, vec![RequestConfirmation])
        }
        (Quoted | Refined | DecisionRequested, FlowEvent::OfferAccepted) => {
            (LeadCaptured, vec![CaptureLead])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

/// Target stage for the current slot picture: ambiguity first, then the first missing slot,
/// otherwise a (re)calculation.
fn settle(context: &FlowContext) -> (FlowState, Vec<FlowAction>) {
    if context.classification_pending {
        return (FlowState::AwaitingProduct, vec![FlowAction::AskDisambiguation]);
    }
    if let Some(slot) = context.missing_slots.first() {
        return (slot.awaiting_state(), vec![FlowAction::PromptForSlot(*slot)]);
    }
    let to = if context.previously_quoted { FlowState::Refined } else { FlowState::Quoted };
    (to, vec![FlowAction::CalculateLandedCost])
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::SessionId;
    use crate::flows::engine::{FlowEngine, FlowTransitionError};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, Slot};

    fn missing(slots: &[Slot]) -> FlowContext {
        FlowContext { missing_slots: slots.to_vec(), ..FlowContext::default() }
    }

    #[test]
    fn slot_filling_happy_path_reaches_quoted() {
        let engine = FlowEngine::default();
        let mut state = engine.initial_state();
        assert_eq!(state, FlowState::AwaitingProduct);

        let outcome = engine
            .apply(&state, &FlowEvent::SlotsUpdated, &missing(&[Slot::UnitPrice, Slot::Quantity]))
            .expect("product -> price");
        assert_eq!(outcome.to, FlowState::AwaitingPrice);
        assert_eq!(outcome.actions, vec![FlowAction::PromptForSlot(Slot::UnitPrice)]);
        state = outcome.to;

        state = engine
            .apply(&state, &FlowEvent::SlotsUpdated, &missing(&[Slot::Quantity]))
            .expect("price -> quantity")
            .to;
        assert_eq!(state, FlowState::AwaitingQuantity);

        let quoted = engine
            .apply(&state, &FlowEvent::SlotsUpdated, &FlowContext::default())
            .expect("quantity -> quoted");
        assert_eq!(quoted.to, FlowState::Quoted);
        assert_eq!(quoted.actions, vec![FlowAction::CalculateLandedCost]);
    }

    #[test]
    fn pending_classification_keeps_awaiting_product() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                &FlowState::AwaitingQuantity,
                &FlowEvent::SlotsUpdated,
                &FlowContext { classification_pending: true, ..FlowContext::default() },
            )
            .expect("ambiguity routes to product stage");
        assert_eq!(outcome.to, FlowState::AwaitingProduct);
        assert_eq!(outcome.actions, vec![FlowAction::AskDisambiguation]);
    }

    #[test]
    fn quoted_refines_and_then_requests_decision() {
        let engine = FlowEngine::default();
        let context = FlowContext { previously_quoted: true, ..FlowContext::default() };
        let refined =
            engine.apply(&FlowState::Quoted, &FlowEvent::SlotsUpdated, &context).expect("refine");
        assert_eq!(refined.to, FlowState::Refined);

        let decision = engine
            .apply(&refined.to, &FlowEvent::DecisionRequested, &context)
            .expect("decision");
        assert_eq!(decision.to, FlowState::DecisionRequested);
        assert_eq!(decision.actions, vec![FlowAction::RequestConfirmation]);

        let accepted =
            engine.apply(&decision.to, &FlowEvent::OfferAccepted, &context).expect("accept");
        assert_eq!(accepted.to, FlowState::LeadCaptured);
        assert_eq!(accepted.actions, vec![FlowAction::CaptureLead]);
    }

    #[test]
    fn lead_captured_is_absorbing() {
        let engine = FlowEngine::default();
        for event in [
            FlowEvent::SlotsUpdated,
            FlowEvent::ClassificationDisputed,
            FlowEvent::ProductCorrected,
            FlowEvent::DecisionRequested,
            FlowEvent::OfferAccepted,
        ] {
            let outcome = engine
                .apply(&FlowState::LeadCaptured, &event, &missing(&[Slot::UnitPrice]))
                .expect("absorbing stage accepts any event");
            assert_eq!(outcome.to, FlowState::LeadCaptured);
            assert_eq!(outcome.actions, vec![FlowAction::Acknowledge]);
        }
    }

    #[test]
    fn dispute_and_correction_route_back_from_refined() {
        let engine = FlowEngine::default();
        let disputed = engine
            .apply(&FlowState::Refined, &FlowEvent::ClassificationDisputed, &FlowContext::default())
            .expect("dispute");
        assert_eq!(disputed.to, FlowState::AwaitingProduct);
        assert!(disputed.actions.contains(&FlowAction::DiscardClassification));

        let corrected = engine
            .apply(
                &FlowState::DecisionRequested,
                &FlowEvent::ProductCorrected,
                &missing(&[Slot::UnitPrice, Slot::Quantity]),
            )
            .expect("correction");
        assert_eq!(corrected.to, FlowState::AwaitingPrice);
        assert_eq!(corrected.actions[0], FlowAction::ClearDependentSlots);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::AwaitingPrice, &FlowEvent::OfferAccepted, &FlowContext::default())
            .expect_err("cannot accept before a quote");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                state: FlowState::AwaitingPrice,
                event: FlowEvent::OfferAccepted
            }
        ));

        let error = engine
            .apply(&FlowState::Refined, &FlowEvent::SlotsUpdated, &missing(&[Slot::Quantity]))
            .expect_err("refined never loses slots silently");
        assert!(matches!(error, FlowTransitionError::MissingRequiredSlots { .. }));
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::default();
        let steps = [
            (FlowEvent::SlotsUpdated, missing(&[Slot::UnitPrice])),
            (FlowEvent::SlotsUpdated, FlowContext::default()),
            (FlowEvent::DecisionRequested, FlowContext::default()),
            (FlowEvent::OfferAccepted, FlowContext::default()),
        ];

        let run = || {
            let mut state = engine.initial_state();
            let mut actions = Vec::new();
            for (event, context) in &steps {
                let outcome = engine.apply(&state, event, context).expect("deterministic run");
                actions.push(outcome.actions);
                state = outcome.to;
            }
            (state, actions)
        };

        assert_eq!(run(), run());
        assert_eq!(run().0, FlowState::LeadCaptured);
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &FlowState::AwaitingProduct,
                &FlowEvent::SlotsUpdated,
                &missing(&[Slot::UnitPrice]),
                &sink,
                &AuditContext::new(
                    Some(SessionId("s-9".to_owned())),
                    Some("cli".to_owned()),
                    "req-42",
                    "dialogue",
                ),
            )
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(
            &FlowState::AwaitingProduct,
            &FlowEvent::OfferAccepted,
            &FlowContext::default(),
            &sink,
            &AuditContext::new(None, None, "req-43", "dialogue"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("awaiting_price"));
        assert_eq!(events[1].event_type, "flow.transition_rejected");
        assert_eq!(events[1].correlation_id, "req-43");
    }
}
