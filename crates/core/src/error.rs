//! Error types for the PagePilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! (language model, tools) has its own error enum; the workflow layer only
//! lets [`Error`] escape for configuration, cancellation and unexpected
//! transport failures. Everything else is absorbed into fallback values.

use thiserror::Error;

/// The top-level error type for all PagePilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Language model errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Cancellation ---
    #[error("Workflow cancelled during {phase}")]
    Cancelled { phase: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error came from the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The model finished without producing any text or tool call.
    #[error("No output generated: {0}")]
    NoOutput(String),

    /// The model produced output that could not be parsed as the requested
    /// structure.
    #[error("Invalid structured output: {0}")]
    InvalidOutput(String),
}

impl ProviderError {
    /// True for the "model produced nothing" class of failure, which the
    /// execution loop degrades into a fallback result instead of raising.
    pub fn is_no_output(&self) -> bool {
        match self {
            ProviderError::NoOutput(_) => true,
            ProviderError::StreamInterrupted(msg) | ProviderError::ApiError { message: msg, .. } => {
                msg.to_lowercase().contains("no output generated")
            }
            _ => false,
        }
    }
}

/// Error message fragments that identify a dropped connection between the
/// agent and the page (content script gone, tab navigated away, socket reset).
const TRANSIENT_MARKERS: &[&str] = &[
    "receiving end does not exist",
    "could not establish connection",
    "connection reset",
    "connection closed",
    "timed out",
    "target closed",
];

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Transient failure in {tool_name}: {reason}")]
    Transient { tool_name: String, reason: String },
}

impl ToolError {
    /// Whether a bounded automatic retry may fix this failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ToolError::Timeout { .. } | ToolError::Transient { .. } => true,
            ToolError::ExecutionFailed { reason, .. } => {
                let lower = reason.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }
}
