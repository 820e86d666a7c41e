pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, QuoteDialogueFlow};
pub use states::{FlowAction, FlowContext, FlowEvent, FlowState, Slot, TransitionOutcome};
