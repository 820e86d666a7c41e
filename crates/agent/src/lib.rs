//! Conversational layer of landcost.
//!
//! A turn flows through [`runtime::AgentRuntime`] (per-session lock, versioned load and save)
//! into [`dialogue::DialogueEngine`], which reads the turn with the predicates in [`signals`]
//! and the slot parsers in [`extraction`], consults classification and the landed-cost
//! engine, and drives the stage machine from `landcost-core`.
//!
//! The language model only suggests candidate codes and search terms ([`llm`]); prices,
//! taxes and stage changes are always computed deterministically.

pub mod dialogue;
pub mod extraction;
pub mod llm;
pub mod runtime;
pub mod signals;
pub mod tools;
pub mod turn;

pub use dialogue::DialogueEngine;
pub use llm::{LlmClient, LlmError, LlmSemanticClassifier, OllamaClient};
pub use runtime::AgentRuntime;
pub use tools::{
    DefaultProductResolver, HttpProductResolver, LeadCapture, LeadReceipt, LoggingLeadCapture,
    PlainTextResolver, ProductResolver, ResolveError,
};
pub use turn::{PriorTurn, QuestionTopic, Role, StructuredQuestion, TurnReply, TurnRequest};
