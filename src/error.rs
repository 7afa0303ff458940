//! Error types for rro-core.
//!
//! The taxonomy here is the one surfaced at the tool boundary: every variant
//! carries enough structured data to populate a JSON-RPC error object
//! (`{code, message, data:{kind, correlationId, retryAfterMs?}}`) without any
//! string matching downstream.

use thiserror::Error;

/// Result type alias using rro-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during orchestration.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A schema or range constraint was violated.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A file path failed the path-safety check (contains `..` or disallowed characters).
    #[error("unsafe path: {path}")]
    PathUnsafe { path: String },

    /// A referenced session id does not exist (or was already finalized/reaped).
    #[error("not found: {what}")]
    NotFound { what: String },

    /// An operation was attempted against a session in a state that forbids it.
    #[error("session {session_id} is in state {state}, which does not permit this operation")]
    SessionInvalidState { session_id: String, state: String },

    /// No provider suitable for the selected strategy is currently available.
    #[error("no provider available: {reason}")]
    ProviderUnavailable { reason: String },

    /// Upstream rate limit or network failure; may be retried once internally.
    #[error("transient provider error from {provider}: {message}")]
    ProviderTransient {
        provider: String,
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// Authentication, schema, or contract failure from the provider; never retried.
    #[error("permanent provider error from {provider}: {message}")]
    ProviderPermanent { provider: String, message: String },

    /// The effective deadline for a request was reached.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Cooperative cancellation was requested by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// The error "kind" string used in the JSON-RPC `data.kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput { .. } => "InvalidInput",
            Error::PathUnsafe { .. } => "PathUnsafe",
            Error::NotFound { .. } => "NotFound",
            Error::SessionInvalidState { .. } => "SessionInvalidState",
            Error::ProviderUnavailable { .. } => "ProviderUnavailable",
            Error::ProviderTransient { .. } => "ProviderTransient",
            Error::ProviderPermanent { .. } => "ProviderPermanent",
            Error::Timeout { .. } => "Timeout",
            Error::Cancelled => "Cancelled",
            Error::Internal { .. } => "Internal",
        }
    }

    /// The JSON-RPC error code conventionally associated with this kind.
    /// Caller errors use the `-3200x` application-error range; `Internal`
    /// reuses JSON-RPC's own `-32603`.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Error::InvalidInput { .. } => -32001,
            Error::PathUnsafe { .. } => -32002,
            Error::NotFound { .. } => -32003,
            Error::SessionInvalidState { .. } => -32004,
            Error::ProviderUnavailable { .. } => -32005,
            Error::ProviderTransient { .. } => -32006,
            Error::ProviderPermanent { .. } => -32007,
            Error::Timeout { .. } => -32008,
            Error::Cancelled => -32009,
            Error::Internal { .. } => -32603,
        }
    }

    /// Whether the Router/Scheduler/Tournament may retry this error once,
    /// per the propagation policy in the error-handling design.
    pub fn is_locally_retryable(&self) -> bool {
        matches!(self, Error::ProviderTransient { .. })
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::ProviderTransient { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    pub fn path_unsafe(path: impl Into<String>) -> Self {
        Error::PathUnsafe { path: path.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    pub fn session_invalid_state(session_id: impl Into<String>, state: impl Into<String>) -> Self {
        Error::SessionInvalidState {
            session_id: session_id.into(),
            state: state.into(),
        }
    }

    pub fn provider_unavailable(reason: impl Into<String>) -> Self {
        Error::ProviderUnavailable {
            reason: reason.into(),
        }
    }

    pub fn provider_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ProviderTransient {
            provider: provider.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn provider_transient_with_retry(
        provider: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: u64,
    ) -> Self {
        Error::ProviderTransient {
            provider: provider.into(),
            message: message.into(),
            retry_after_ms: Some(retry_after_ms),
        }
    }

    pub fn provider_permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ProviderPermanent {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    pub fn to_error_data(&self, correlation_id: impl Into<String>) -> ErrorData {
        ErrorData {
            kind: self.kind(),
            correlation_id: correlation_id.into(),
            retry_after_ms: self.retry_after_ms(),
        }
    }
}

/// Structured shape of a JSON-RPC error response's `data` field, produced at
/// the tool boundary from any [`Error`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorData {
    pub kind: &'static str,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    #[serde(rename = "retryAfterMs", skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::invalid_input("x").kind(), "InvalidInput");
        assert_eq!(Error::path_unsafe("../x").kind(), "PathUnsafe");
        assert_eq!(Error::not_found("session").kind(), "NotFound");
        assert_eq!(Error::timeout(5000).kind(), "Timeout");
        assert_eq!(Error::Cancelled.kind(), "Cancelled");
    }

    #[test]
    fn only_provider_transient_is_locally_retryable() {
        assert!(Error::provider_transient("acme", "rate limited").is_locally_retryable());
        assert!(!Error::provider_permanent("acme", "bad key").is_locally_retryable());
        assert!(!Error::invalid_input("bad field").is_locally_retryable());
    }

    #[test]
    fn retry_after_propagates_into_error_data() {
        let err = Error::provider_transient_with_retry("acme", "rate limited", 2000);
        let data = err.to_error_data("corr-1");
        assert_eq!(data.retry_after_ms, Some(2000));
        assert_eq!(data.kind, "ProviderTransient");
        assert_eq!(data.correlation_id, "corr-1");
    }
}
