//! LLM-backed semantic classification.
//!
//! The model only proposes codes and search terms. Its output passes through
//! [`SemanticSuggestion::from_model_output`] and is re-scored by the classification service;
//! nothing the model says is trusted as a final answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use landcost_core::classify::{SemanticClassifier, SemanticSuggestion};
use landcost_core::config::{LlmConfig, LlmProvider};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm provider is disabled")]
    Disabled,
    #[error("llm request timed out")]
    Timeout,
    #[error("llm transport failure: {0}")]
    Transport(String),
    #[error("model `{0}` is not available")]
    ModelNotAvailable(String),
    #[error("llm returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for a local Ollama server (`POST /api/generate`, JSON mode, no streaming).
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), model: model.into() })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.provider == LlmProvider::Disabled {
            return Err(LlmError::Disabled);
        }
        let base_url = config.base_url.clone().ok_or(LlmError::Disabled)?;
        Self::new(base_url, config.model.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest { model: &self.model, prompt, stream: false, format: "json" };
        let response = self.http.post(&url).json(&body).send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotAvailable(self.model.clone()));
        }
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!("HTTP {}", response.status())));
        }
        let payload: GenerateResponse =
            response.json().await.map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        Ok(payload.response)
    }
}

const CLASSIFY_PROMPT: &str = r#"Sos un despachante de aduana que clasifica mercadería en la Nomenclatura Común del Mercosur.
Respondé solamente con un objeto JSON con estos campos:
{"code": "dddd.dd.dd o null", "confidence": 0.0-1.0, "rationale": "texto breve",
 "candidates": ["dddd.dd.dd"], "heading_hint": "dddd", "kind_hint": "tipo de producto",
 "search_terms": ["términos del nomenclador"], "missing_info_questions": ["pregunta técnica"]}
Usá términos del nomenclador en search_terms (por ejemplo "carretillas apiladoras" y no "autoelevador").
Producto: "#;

pub fn classification_prompt(product_text: &str) -> String {
    let cleaned: String = product_text.chars().filter(|character| !character.is_control()).take(1_000).collect();
    format!("{CLASSIFY_PROMPT}{cleaned}")
}

/// Semantic classifier over any [`LlmClient`]. Failures mean "unavailable" and return `None`.
pub struct LlmSemanticClassifier<C> {
    client: C,
}

impl<C> LlmSemanticClassifier<C>
where
    C: LlmClient,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> SemanticClassifier for LlmSemanticClassifier<C>
where
    C: LlmClient,
{
    async fn classify(&self, text: &str) -> Option<SemanticSuggestion> {
        match self.client.complete(&classification_prompt(text)).await {
            Ok(output) => {
                let suggestion = SemanticSuggestion::from_model_output(&output);
                if suggestion.is_none() {
                    tracing::warn!(event_name = "llm.classify.unparseable", "model output had no JSON object");
                }
                suggestion
            }
            Err(error) => {
                tracing::warn!(event_name = "llm.classify.unavailable", error = %error, "semantic classifier unavailable");
                None
            }
        }
    }
}

/// Builds the configured semantic classifier, or `None` when the provider is disabled or
/// cannot be constructed.
pub fn semantic_classifier_from_config(config: &LlmConfig) -> Option<Arc<dyn SemanticClassifier>> {
    match OllamaClient::from_config(config) {
        Ok(client) => Some(Arc::new(LlmSemanticClassifier::new(client))),
        Err(LlmError::Disabled) => None,
        Err(error) => {
            tracing::warn!(event_name = "llm.client.unavailable", error = %error, "semantic classifier disabled");
            None
        }
    }
}
