use async_trait::async_trait;

use coai_core::{Agent, AgentError, AgentRequest, AgentResponse, TokenUsage};

const CAPABILITIES: &[&str] = &[
    "code_generation",
    "code_explanation",
    "debugging_assistance",
    "syntax_help",
    "best_practices",
    "refactoring_suggestions",
];

/// Local rule-based assistant. Never calls out; responses are `real_ai = false`.
#[derive(Default)]
pub struct CopilotAgent;

impl CopilotAgent {
    pub fn new() -> Self {
        Self
    }
}

fn reply(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("code") {
        format!(
            "I can help you with code! For '{message}', here's a suggestion:\n\n\
             ```python\n# Your code here\nprint('Hello from COAI Copilot!')\n```"
        )
    } else if lower.contains("debug") {
        format!(
            "To debug '{message}', I recommend:\n1. Check your imports\n\
             2. Verify variable types\n3. Add logging statements\n4. Test with smaller inputs"
        )
    } else if lower.contains("explain") {
        format!(
            "Let me explain '{message}':\n\nThis involves understanding the core concepts \
             and breaking them down step by step. Would you like me to elaborate on any \
             specific part?"
        )
    } else {
        format!(
            "Thanks for your message: '{message}'. I'm here to help with coding, debugging, \
             and technical explanations. How can I assist you further?"
        )
    }
}

fn word_count(s: &str) -> u32 {
    s.split_whitespace().count() as u32
}

#[async_trait]
impl Agent for CopilotAgent {
    fn name(&self) -> &str {
        "copilot"
    }

    fn provider(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> &[&'static str] {
        CAPABILITIES
    }

    async fn process(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let text = reply(&request.message);
        let usage = TokenUsage::new(word_count(&request.message), word_count(&text), "mock");
        Ok(AgentResponse::success(text).with_usage(usage))
    }
}
