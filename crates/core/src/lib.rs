pub mod audit;
pub mod classify;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod fx;
pub mod landed;
pub mod tariff;
pub mod text;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use classify::{
    AnswerResolution, ClassificationResult, ClassificationService, ClassificationSettings,
    ClassificationThresholds, DisambiguationQuestion, QuestionKind, QuestionOption, RuleTable,
    ScoredCandidate, SemanticClassifier, SemanticSuggestion,
};
pub use domain::quote::{CostBreakdown, CostEstimate, EstimateMode, RatesSource, UsdRange};
pub use domain::session::{
    Currency, Money, PriceHint, PriceKind, ProductSnapshot, QuoteDraft, SessionId, ShippingProfile,
};
pub use domain::tariff::{
    CandidateSource, InternalTaxSchedule, InternalTaxTier, TariffCandidate, TariffCode,
    TariffDetail, TaxRates,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, LandedCostError};
pub use flows::{FlowEngine, FlowEvent, FlowState, QuoteDialogueFlow};
pub use fx::{ExchangeRate, ExchangeRateCache, ExchangeRateSource, FixedRateSource};
pub use landed::{LandedCostEngine, LandedCostSettings};
pub use tariff::{TariffDataSource, TariffIndex, TariffIndexEntry};
