#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("provider unavailable")]
    Unavailable,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: &'static str },

    #[error("API request to {provider} failed (status {status})")]
    Api {
        provider: &'static str,
        status: u16,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;
