//! Turn boundary types: what a channel hands the runtime and what it gets back.

use serde::{Deserialize, Serialize};

use landcost_core::domain::quote::{BudgetSizing, CostBreakdown};
use landcost_core::domain::session::{ProductSnapshot, SessionId};
use landcost_core::flows::FlowState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorTurn {
    pub role: Role,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: SessionId,
    /// Ordered prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<PriorTurn>,
    pub text: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: SessionId(session_id.into()),
            history: Vec::new(),
            text: text.into(),
            channel: None,
            correlation_id: None,
        }
    }

    pub fn with_history(mut self, history: Vec<PriorTurn>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionTopic {
    Product,
    UnitPrice,
    Quantity,
    Classification,
    Confirmation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOption {
    pub key: String,
    pub label: String,
}

/// Follow-up question with the options a channel can render as buttons.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredQuestion {
    pub prompt: String,
    pub topic: QuestionTopic,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ReplyOption>,
    /// What is known about the product so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    pub assistant_text: String,
    pub stage: FlowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<StructuredQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<CostBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetSizing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,
    #[serde(default)]
    pub known_fields: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub handoff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_reference: Option<String>,
}

impl TurnReply {
    pub fn text(stage: FlowState, assistant_text: impl Into<String>) -> Self {
        Self {
            assistant_text: assistant_text.into(),
            stage,
            question: None,
            breakdown: None,
            budget: None,
            quality_score: None,
            known_fields: Vec::new(),
            assumptions: Vec::new(),
            handoff: false,
            lead_reference: None,
        }
    }

    pub fn with_question(mut self, question: StructuredQuestion) -> Self {
        self.question = Some(question);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, TurnReply, TurnRequest};
    use landcost_core::flows::FlowState;

    #[test]
    fn request_history_defaults_to_empty() {
        let request: TurnRequest =
            serde_json::from_str(r#"{"session_id":"s-1","text":"hola"}"#).expect("request");
        assert!(request.history.is_empty());
        assert!(request.correlation_id.is_none());

        let with_history: TurnRequest = serde_json::from_str(
            r#"{"session_id":"s-1","text":"500","history":[{"role":"assistant","text":"¿Precio?"}]}"#,
        )
        .expect("request");
        assert_eq!(with_history.history[0].role, Role::Assistant);
    }

    #[test]
    fn reply_omits_empty_optionals() {
        let json = serde_json::to_value(TurnReply::text(FlowState::AwaitingProduct, "¿Qué producto?")).expect("json");
        assert_eq!(json["stage"], "awaiting_product");
        assert!(json.get("breakdown").is_none());
        assert_eq!(json["handoff"], false);
    }
}
