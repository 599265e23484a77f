use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied context accompanying a chat message.
///
/// `project` and `file` are optional on the wire so the orchestrator can
/// report which one is missing; unknown keys are preserved in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Preferred agent name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new(project: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            file: Some(file.into()),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

const LITHUANIAN_CHARS: &str = "ąčęėįšųūž";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    English,
    Lithuanian,
}

impl Language {
    /// Character-set heuristic: any Lithuanian diacritic marks the message as Lithuanian.
    pub fn detect(message: &str) -> Self {
        let hit = message
            .chars()
            .flat_map(char::to_lowercase)
            .any(|c| LITHUANIAN_CHARS.contains(c));
        if hit {
            Self::Lithuanian
        } else {
            Self::English
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Lithuanian => "Lithuanian",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptMetadata {
    pub original_message: String,
    pub project: String,
    pub file: String,
    pub language: Language,
    /// Length of the built prompt in characters.
    pub prompt_length: usize,
    pub built_at: DateTime<Utc>,
}

/// Agent-ready prompt. Built once per request and consumed by dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptEnvelope {
    pub prompt: String,
    pub metadata: PromptMetadata,
}

impl PromptEnvelope {
    /// First `chars` characters of the prompt followed by an ellipsis.
    pub fn preview(&self, chars: usize) -> String {
        let mut out: String = self.prompt.chars().take(chars).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_lithuanian_diacritics() {
        assert_eq!(Language::detect("Kaip sukurti funkciją?"), Language::Lithuanian);
        assert_eq!(Language::detect("ŽODIS"), Language::Lithuanian);
        assert_eq!(Language::detect("How do I write a function?"), Language::English);
        assert_eq!(Language::detect(""), Language::English);
    }

    #[test]
    fn context_keeps_unknown_keys() {
        let ctx: RequestContext = serde_json::from_value(serde_json::json!({
            "project": "demo",
            "file": "main.py",
            "branch": "dev"
        }))
        .unwrap();
        assert_eq!(ctx.project.as_deref(), Some("demo"));
        assert_eq!(ctx.extra["branch"], "dev");
        assert!(ctx.agent.is_none());
    }

    #[test]
    fn missing_keys_deserialize_as_none() {
        let ctx: RequestContext = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(ctx.project.is_none());
        assert!(ctx.file.is_none());
    }

    #[test]
    fn preview_counts_characters() {
        let env = PromptEnvelope {
            prompt: "ąčę".repeat(50),
            metadata: PromptMetadata {
                original_message: String::new(),
                project: "p".into(),
                file: "f".into(),
                language: Language::Lithuanian,
                prompt_length: 150,
                built_at: Utc::now(),
            },
        };
        let preview = env.preview(100);
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));
    }
}
