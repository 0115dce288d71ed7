//! Crate-wide error taxonomy.
//!
//! `AgentError` is the kind-based taxonomy every subsystem converges on: storage
//! errors, tool errors, policy rejections, and scheduling failures all map onto
//! one of these variants rather than leaking their own error types across module
//! boundaries. Narrower `thiserror` enums (`StoreError`, `ToolSourceError`, ...)
//! convert into it with `From` at the point they cross into shared code.

use thiserror::Error;

/// Kind taxonomy for everything the agent core can fail with.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("agent timeout: {0}")]
    AgentTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Error kind as a stable lowercase token, for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Unauthorized(_) => "unauthorized",
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::NotFound(_) => "not_found",
            AgentError::AlreadyExists(_) => "already_exists",
            AgentError::FailedPrecondition(_) => "failed_precondition",
            AgentError::ResourceExhausted(_) => "resource_exhausted",
            AgentError::Unavailable(_) => "unavailable",
            AgentError::AgentTimeout(_) => "agent_timeout",
            AgentError::Internal(_) => "internal",
        }
    }

    /// Whether a retry at the call site could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Unavailable(_))
    }

    /// Short apology shown to the end user on terminal failure. Never leaks
    /// internal detail (§7: "on terminal agent failure the outbound is a
    /// short apology with no internal detail").
    pub fn user_message(&self) -> &'static str {
        match self {
            AgentError::Unauthorized(_) => "Sorry, I can't do that right now.",
            AgentError::ResourceExhausted(_) => {
                "Sorry, I'm a bit overloaded right now — please try again shortly."
            }
            AgentError::AgentTimeout(_) => "Sorry, that took too long. Please try again.",
            _ => "Sorry, something went wrong on my end.",
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Internal(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::InvalidRequest(format!("json: {e}"))
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Internal(format!("sqlite: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_returns_stable_tokens() {
        assert_eq!(AgentError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            AgentError::FailedPrecondition("x".into()).kind(),
            "failed_precondition"
        );
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(AgentError::Unavailable("x".into()).is_retryable());
        assert!(!AgentError::Internal("x".into()).is_retryable());
        assert!(!AgentError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn user_message_never_echoes_internal_detail() {
        let err = AgentError::Internal("sqlite connection refused at 10.0.0.5:5432".into());
        assert!(!err.user_message().contains("10.0.0.5"));
        assert!(!err.user_message().contains("sqlite"));
    }
}
