use thiserror::Error;

#[derive(Debug, Error)]
pub enum TariffClientError {
    #[error("tariff service is not configured")]
    Disabled,
    #[error("tariff service credentials are missing")]
    MissingCredentials,
    #[error("login rejected by tariff service: {0}")]
    LoginFailed(String),
    #[error("tariff service still reports an unauthenticated session after re-login")]
    Unauthenticated,
    #[error("tariff service returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("tariff service request timed out after {0}s")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("internal tax document unavailable: {0}")]
    Document(String),
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TariffClientError {
    /// Whether a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
