//! Deterministic prompt assembly.

use chrono::{DateTime, Utc};

use coai_core::{Language, PromptEnvelope, PromptMetadata};

const SYSTEM_ROLE: &str =
    "You are COAI, an AI assistant that helps with coding and project management.";

/// Phrases that ask about the project's files.
const FILE_LISTING_PHRASES: &[&str] = &[
    "files in this project",
    "project files",
    "what files",
    "project structure",
    "file structure",
    "list files",
    "show files",
    "project contents",
    "code files",
];

pub fn mentions_project_files(message: &str) -> bool {
    let lower = message.to_lowercase();
    FILE_LISTING_PHRASES.iter().any(|p| lower.contains(p))
}

pub struct PromptInput<'a> {
    pub message: &'a str,
    pub project: &'a str,
    pub file: &'a str,
    pub timestamp: DateTime<Utc>,
    /// Directives for the target agent, global first.
    pub rules: &'a [String],
    /// Extra context included only when the trigger matches the message.
    pub aux: Option<&'a str>,
}

pub struct PromptBuilder {
    trigger: fn(&str) -> bool,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            trigger: mentions_project_files,
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(trigger: fn(&str) -> bool) -> Self {
        Self { trigger }
    }

    /// Same input, same timestamp, same bytes out.
    pub fn build(&self, input: &PromptInput<'_>) -> PromptEnvelope {
        let language = Language::detect(input.message);
        let mut lines: Vec<String> = vec![
            "=== COAI System Context ===".into(),
            format!("Project: {}", input.project),
            format!("Current File: {}", input.file),
            format!("Timestamp: {}", input.timestamp.format("%Y-%m-%d %H:%M:%S")),
            String::new(),
            "=== System Instructions ===".into(),
            SYSTEM_ROLE.into(),
            format!(
                "Please respond in {} with clear, actionable advice.",
                language.as_str()
            ),
            "If this involves code, provide specific examples.".into(),
            String::new(),
        ];

        if !input.rules.is_empty() {
            lines.push("=== Project Rules ===".into());
            lines.extend(input.rules.iter().map(|r| format!("- {r}")));
            lines.push(String::new());
        }

        if let Some(aux) = input.aux.filter(|_| (self.trigger)(input.message)) {
            lines.push("=== Project Files ===".into());
            lines.push(aux.trim_end().to_string());
            lines.push(String::new());
        }

        lines.extend([
            "=== User Query ===".to_string(),
            input.message.to_string(),
            String::new(),
            "=== Response Guidelines ===".into(),
            "- Be concise but thorough".into(),
            "- Include code examples when relevant".into(),
            "- Consider the project context".into(),
            "- Provide actionable next steps".into(),
        ]);

        let prompt = lines.join("\n");
        PromptEnvelope {
            metadata: PromptMetadata {
                original_message: input.message.to_string(),
                project: input.project.to_string(),
                file: input.file.to_string(),
                language,
                prompt_length: prompt.chars().count(),
                built_at: input.timestamp,
            },
            prompt,
        }
    }
}

/// Agent-specific framing applied after the prompt is built.
pub fn optimize_for_agent(envelope: PromptEnvelope, agent: &str) -> PromptEnvelope {
    match agent {
        "copilot" => {
            let prompt = format!("# GitHub Copilot Request\n\n{}", envelope.prompt);
            PromptEnvelope {
                metadata: PromptMetadata {
                    prompt_length: prompt.chars().count(),
                    ..envelope.metadata
                },
                prompt,
            }
        }
        _ => envelope,
    }
}
