//! Error types for the procura domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external boundary has its own error enum.

use thiserror::Error;

/// The top-level error type for procura operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Graph errors ---
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
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

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a second attempt of the same call can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::StreamInterrupted(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("Graph connection failed: {0}")]
    Connection(String),

    /// The database rejected the statement (syntax, unknown label, etc.).
    #[error("Query failed [{code}]: {message}")]
    Query { code: String, message: String },

    /// The statement was refused before reaching the database.
    #[error("Query rejected: {0}")]
    Rejected(String),

    #[error("Graph call timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to decode graph response: {0}")]
    Decode(String),
}

impl GraphError {
    /// Errors caused by the statement itself; these are fed back to the planner.
    pub fn is_statement_error(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn graph_query_error_displays_code() {
        let err = Error::Graph(GraphError::Query {
            code: "Neo.ClientError.Statement.SyntaxError".into(),
            message: "Invalid input 'RETRUN'".into(),
        });
        assert!(err.to_string().contains("SyntaxError"));
        assert!(err.to_string().contains("RETRUN"));
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Timeout("x".into()).is_transient());
        assert!(ProviderError::ApiError { status_code: 503, message: String::new() }.is_transient());
        assert!(!ProviderError::ApiError { status_code: 400, message: String::new() }.is_transient());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
    }

    #[test]
    fn statement_errors_are_distinguished() {
        assert!(GraphError::Rejected("write".into()).is_statement_error());
        assert!(!GraphError::Timeout(30).is_statement_error());
        assert!(!GraphError::Connection("refused".into()).is_statement_error());
    }
}
