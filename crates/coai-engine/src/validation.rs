use std::sync::Arc;

use tracing::warn;

use coai_core::{CoaiError, RequestContext};
use coai_telemetry::{AuditSink, SecurityEvent};

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 10_000;

/// Audited, never rejected.
const SUSPICIOUS_PATTERNS: &[&str] = &["../", "..\\", "rm -rf", "del /f", "<script", "javascript:"];

/// Borrowed view of a request that passed validation.
#[derive(Debug, PartialEq, Eq)]
pub struct Validated<'a> {
    pub message: &'a str,
    pub project: &'a str,
    pub file: &'a str,
}

pub struct MessageValidator {
    max_message_length: usize,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl MessageValidator {
    pub fn new(max_message_length: usize) -> Self {
        Self {
            max_message_length,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Length is counted in characters.
    pub fn validate<'a>(
        &self,
        message: &'a str,
        context: &'a RequestContext,
    ) -> Result<Validated<'a>, CoaiError> {
        if message.trim().is_empty() {
            return Err(CoaiError::invalid_field("message", "Message cannot be empty"));
        }
        if message.chars().count() > self.max_message_length {
            return Err(CoaiError::invalid_field(
                "message",
                format!("Message too long (max {} characters)", self.max_message_length),
            ));
        }
        let project = required(context.project.as_deref(), "project")?;
        let file = required(context.file.as_deref(), "file")?;

        if let Some(pattern) = find_suspicious(message) {
            warn!(pattern, project, "suspicious pattern in message");
            if let Some(audit) = &self.audit {
                audit.record(&SecurityEvent::suspicious_input(project, pattern));
            }
        }

        Ok(Validated {
            message,
            project,
            file,
        })
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str, CoaiError> {
    value.ok_or_else(|| CoaiError::invalid_field(key, format!("Missing required context: {key}")))
}

pub fn find_suspicious(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    SUSPICIOUS_PATTERNS.iter().copied().find(|p| lower.contains(p))
}
