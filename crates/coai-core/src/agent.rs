use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{Language, PromptEnvelope};
use crate::errors::AgentError;
use crate::ids::RequestId;

/// Token accounting reported by an agent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, model: impl Into<String>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            model: Some(model.into()),
        }
    }
}

/// What an agent receives. Built once from the prompt envelope.
#[derive(Clone, Debug)]
pub struct AgentRequest {
    pub request_id: RequestId,
    /// The enhanced prompt.
    pub prompt: String,
    /// The caller's raw message.
    pub message: String,
    pub project: String,
    pub file: String,
    pub language: Language,
    /// Rule directives addressed to this agent, global first.
    pub rules: Vec<String>,
}

impl AgentRequest {
    pub fn from_envelope(request_id: RequestId, envelope: &PromptEnvelope) -> Self {
        let meta = &envelope.metadata;
        Self {
            request_id,
            prompt: envelope.prompt.clone(),
            message: meta.original_message.clone(),
            project: meta.project.clone(),
            file: meta.file.clone(),
            language: meta.language,
            rules: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<String>) -> Self {
        self.rules = rules;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Failure(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub status: AgentStatus,
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Whether the text came from a real model rather than a local simulation.
    pub real_ai: bool,
}

impl AgentResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Success,
            text: text.into(),
            usage: None,
            real_ai: false,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failure(reason.into()),
            text: String::new(),
            usage: None,
            real_ai: false,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn real(mut self) -> Self {
        self.real_ai = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// Trait implemented by every AI-processing agent (OpenAI, local copilot, test doubles).
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    fn provider(&self) -> &str;
    fn capabilities(&self) -> &[&'static str];

    async fn process(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed,
    CompletedDegraded,
}

/// Final result of routing one request, primary or fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub outcome: DispatchOutcome,
    pub text: String,
    /// Agent that produced `text`. Equals the fallback marker when degraded.
    pub agent_type: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub real_ai: bool,
    /// Why the primary failed, when degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_error: Option<String>,
}

impl AgentResult {
    pub fn is_degraded(&self) -> bool {
        self.outcome == DispatchOutcome::CompletedDegraded
    }
}
