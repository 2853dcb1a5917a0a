use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// The endpoint refused the request because of the tool catalog
    #[error("Model endpoint rejected tools: {0}")]
    ToolsUnsupported(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl ModelError {
    pub fn is_tool_rejection(&self) -> bool {
        matches!(self, ModelError::ToolsUnsupported(_))
    }
}
