use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinpointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Screen capture error: {0}")]
    Capture(String),

    #[error("Grounding backend error: {0}")]
    Backend(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Coordinate parse error: {0}")]
    Parse(String),

    #[error("Grounding failed after {attempts} attempts: {reason}")]
    Grounding { reason: String, attempts: u32 },

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Content provider error: {0}")]
    Content(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Batch cancelled")]
    Cancelled,
}

impl PinpointError {
    /// Whether a failure may be cured by re-capturing and asking the backend
    /// again. Capture failures are fatal for the current item; everything the
    /// backend or parser produces is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PinpointError::Backend(_)
                | PinpointError::MalformedResponse(_)
                | PinpointError::Parse(_)
                | PinpointError::Http(_)
        )
    }
}

pub type PinpointResult<T> = Result<T, PinpointError>;
