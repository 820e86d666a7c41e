use serde::{Deserialize, Serialize};

/// Lifecycle stage of one conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    AwaitingProduct,
    AwaitingPrice,
    AwaitingQuantity,
    Quoted,
    Refined,
    DecisionRequested,
    LeadCaptured,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingProduct => "awaiting_product",
            Self::AwaitingPrice => "awaiting_price",
            Self::AwaitingQuantity => "awaiting_quantity",
            Self::Quoted => "quoted",
            Self::Refined => "refined",
            Self::DecisionRequested => "decision_requested",
            Self::LeadCaptured => "lead_captured",
        }
    }

    /// True once an estimate has been shown in this conversation.
    pub fn has_quote(&self) -> bool {
        matches!(self, Self::Quoted | Self::Refined | Self::DecisionRequested)
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self, Self::AwaitingProduct | Self::AwaitingPrice | Self::AwaitingQuantity)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Product,
    UnitPrice,
    Quantity,
}

impl Slot {
    pub fn awaiting_state(&self) -> FlowState {
        match self {
            Self::Product => FlowState::AwaitingProduct,
            Self::UnitPrice => FlowState::AwaitingPrice,
            Self::Quantity => FlowState::AwaitingQuantity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    SlotsUpdated,
    ClassificationDisputed,
    ProductCorrected,
    DecisionRequested,
    OfferAccepted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    /// Unfilled slots in prompting order.
    pub missing_slots: Vec<Slot>,
    pub classification_pending: bool,
    pub previously_quoted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    PromptForSlot(Slot),
    AskDisambiguation,
    ClearDependentSlots,
    DiscardClassification,
    CalculateLandedCost,
    RequestConfirmation,
    CaptureLead,
    Acknowledge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
