use rust_decimal::Decimal;
use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid tariff code `{0}`: expected dddd.dd.dd with optional .ddd suffix")]
    InvalidTariffCode(String),
    #[error("invalid internal tax schedule: {0}")]
    InvalidTierSchedule(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("session {session_id} was modified concurrently (expected version {expected_version})")]
    VersionConflict { session_id: String, expected_version: i64 },
}

/// Inputs the landed-cost arithmetic refuses to price.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LandedCostError {
    #[error("{stage} is outside the supported amount range")]
    AmountOutOfRange { stage: &'static str },
    #[error("no internal tax tier covers local value {0}")]
    UncoveredInternalTax(Decimal),
}

/// Failure shape handed to a channel; `message` is operator detail, `user_message` is what
/// the importer reads.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("invalid turn: {message}")]
    InvalidTurn { message: String, correlation_id: String },
    #[error("dependency unavailable: {message}")]
    Unavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn invalid_turn(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::InvalidTurn { message: message.into(), correlation_id: correlation_id.into() }
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTurn { .. } => "invalid_turn",
            Self::Unavailable { .. } => "unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidTurn { message, .. }
            | Self::Unavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidTurn { .. } => "No pude leer tu mensaje. ¿Podés reenviarlo?",
            Self::Unavailable { .. } => "Estamos con una demora momentánea. Probá de nuevo en unos minutos.",
            Self::Internal { .. } => "Tuvimos un problema interno. Un especialista va a revisar tu consulta.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::InvalidTurn { correlation_id, .. }
            | Self::Unavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Domain(error) => InterfaceError::InvalidTurn { message: error.to_string(), correlation_id },
            Self::Persistence(message) | Self::Integration(message) => {
                InterfaceError::Unavailable { message, correlation_id }
            }
            Self::VersionConflict { session_id, .. } => {
                InterfaceError::Unavailable { message: format!("session {session_id} is busy"), correlation_id }
            }
            Self::Configuration(message) => InterfaceError::Internal { message, correlation_id },
        }
    }
}
