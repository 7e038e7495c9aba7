use thiserror::Error;

/// Why a tool-enabled round was judged unsupported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolsNotSupportedKind {
    /// Vendor rejected the request because of the tool definitions
    Rejected,
    /// Vendor answered with a tool call that is missing required fields
    MalformedToolCall,
}

/// Typed signal that a model cannot be used for tool calling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Tools not supported: {message}")]
pub struct ToolsNotSupportedError {
    pub kind: ToolsNotSupportedKind,
    pub message: String,
}

impl ToolsNotSupportedError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: ToolsNotSupportedKind::Rejected,
            message: message.into(),
        }
    }

    pub fn malformed_tool_call(message: impl Into<String>) -> Self {
        Self {
            kind: ToolsNotSupportedKind::MalformedToolCall,
            message: message.into(),
        }
    }
}

/// Provider-specific errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Provider API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error(transparent)]
    ToolsNotSupported(#[from] ToolsNotSupportedError),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        match self {
            ProviderError::ApiError { status, .. } => *status >= 400 && *status < 500,
            _ => false,
        }
    }

    pub fn is_tools_not_supported(&self) -> bool {
        matches!(self, ProviderError::ToolsNotSupported(_))
    }
}
