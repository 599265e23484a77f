use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// Failure of a single agent invocation.
/// Every variant is a hard failure and makes the router fall back.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AgentError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider error {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("agent reported failure: {0}")]
    NonSuccess(String),
    #[error("agent not configured: {0}")]
    NotConfigured(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl AgentError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Provider { .. } => "provider_error",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidResponse(_) => "invalid_response",
            Self::NonSuccess(_) => "non_success",
            Self::NotConfigured(_) => "not_configured",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            _ => Self::Provider { status, body },
        }
    }
}

/// Request-level error taxonomy surfaced to callers of the orchestrator.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CoaiError {
    #[error("{message}")]
    Validation { field: Option<String>, message: String },

    #[error("Too many requests. Limit: {limit} per {} seconds", .window.as_secs())]
    RateLimitExceeded {
        limit: usize,
        window: Duration,
        retry_after: Duration,
    },

    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    /// Primary and fallback both failed.
    #[error("AI agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("accounting error: {0}")]
    Accounting(String),

    #[error("request cancelled")]
    Cancelled,
}

impl CoaiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::AgentNotFound(_) => "AGENT_NOT_FOUND",
            Self::Agent(_) => "AI_AGENT_ERROR",
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::Accounting(_) => "ACCOUNTING_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::RateLimitExceeded { .. } => 429,
            Self::AgentNotFound(_) => 404,
            Self::Agent(_) | Self::Cancelled => 503,
            Self::Configuration(_) | Self::Accounting(_) => 500,
        }
    }

    pub fn fallback_available(&self) -> bool {
        matches!(self, Self::Agent(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        if let Self::RateLimitExceeded { retry_after, .. } = self {
            Some(*retry_after)
        } else {
            None
        }
    }

    pub fn to_response(&self, request_id: Option<&RequestId>) -> ErrorResponse {
        ErrorResponse {
            status: "error".into(),
            error: true,
            error_code: self.code().into(),
            message: self.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            fallback_available: self.fallback_available(),
            request_id: request_id.cloned(),
            retry_after: self.retry_after().map(|d| d.as_secs()),
        }
    }
}

/// Wire shape of every error returned over the HTTP boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: bool,
    pub error_code: String,
    pub message: String,
    pub timestamp: String,
    pub fallback_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}
