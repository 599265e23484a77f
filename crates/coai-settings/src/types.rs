//! Settings sections. Every section deserializes with `#[serde(default)]`
//! so a partial user file only overrides the keys it names.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};
use crate::loader::coai_home;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoaiSettings {
    pub server: ServerSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub rules: RulesSettings,
    pub agents: AgentSettings,
    pub orchestrator: OrchestratorSettings,
    pub usage: UsageSettings,
    pub telemetry: TelemetrySettings,
}

impl CoaiSettings {
    /// Reject combinations that would make a component misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.requests == 0 {
            return Err(SettingsError::InvalidValue("rate_limit.requests must be > 0".into()));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(SettingsError::InvalidValue("rate_limit.window_secs must be > 0".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(SettingsError::InvalidValue("cache.max_entries must be > 0".into()));
        }
        if self.cache.evict_batch == 0 {
            return Err(SettingsError::InvalidValue("cache.evict_batch must be > 0".into()));
        }
        if self.orchestrator.max_message_length == 0 {
            return Err(SettingsError::InvalidValue(
                "orchestrator.max_message_length must be > 0".into(),
            ));
        }
        if self.agents.default_agent.trim().is_empty() {
            return Err(SettingsError::InvalidValue("agents.default_agent is empty".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound for a whole HTTP request, including agent dispatch.
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests: usize,
    pub window_secs: u64,
    /// How long a client stays blocked after exceeding the limit.
    pub block_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 3600,
            block_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Entries dropped (oldest first) when the cache is full.
    pub evict_batch: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 1000,
            evict_batch: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesSettings {
    pub system_path: PathBuf,
    /// Directory holding `<project>/rules.txt` overrides.
    pub projects_root: Option<PathBuf>,
}

impl Default for RulesSettings {
    fn default() -> Self {
        Self {
            system_path: coai_home().join("rules.txt"),
            projects_root: None,
        }
    }
}

/// OpenAI API key, redacted in Debug output.
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            api_key: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub default_agent: String,
    /// Register the OpenAI agent (needs `OPENAI_API_KEY`).
    pub enable_real_ai: bool,
    pub dispatch_timeout_secs: u64,
    pub openai: OpenAiSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            default_agent: "openai".to_string(),
            enable_real_ai: false,
            dispatch_timeout_secs: 60,
            openai: OpenAiSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_message_length: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_message_length: 10_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    pub data_dir: PathBuf,
    pub backend: UsageBackend,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            data_dir: coai_home().join("usage"),
            backend: UsageBackend::Json,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
    pub audit_dir: PathBuf,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        let home = coai_home();
        Self {
            log_level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: home.join("logs").join("coai-logs.db"),
            audit_dir: home.join("logs").join("security"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_limits() {
        let s = CoaiSettings::default();
        assert_eq!(s.rate_limit.requests, 100);
        assert_eq!(s.rate_limit.window_secs, 3600);
        assert_eq!(s.rate_limit.block_secs, 3600);
        assert_eq!(s.cache.ttl_secs, 300);
        assert_eq!(s.cache.max_entries, 1000);
        assert_eq!(s.cache.evict_batch, 100);
        assert_eq!(s.orchestrator.max_message_length, 10_000);
        assert_eq!(s.agents.default_agent, "openai");
        assert!(!s.agents.enable_real_ai);
        assert_eq!(s.agents.openai.model, "gpt-3.5-turbo");
        assert_eq!(s.usage.backend, UsageBackend::Json);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let s: CoaiSettings =
            serde_json::from_value(serde_json::json!({"cache": {"ttl_secs": 10}})).unwrap();
        assert_eq!(s.cache.ttl_secs, 10);
        assert_eq!(s.cache.max_entries, 1000);
    }

    #[test]
    fn api_key_never_serialized() {
        let mut s = CoaiSettings::default();
        s.agents.openai.api_key = Some(ApiKey(SecretString::from("sk-test")));
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("sk-test"));
        assert_eq!(format!("{:?}", s.agents.openai.api_key), "Some(ApiKey([REDACTED]))");
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut s = CoaiSettings::default();
        s.cache.evict_batch = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));

        let mut s = CoaiSettings::default();
        s.rate_limit.requests = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn backend_parses_lowercase() {
        let b: UsageBackend = serde_json::from_str("\"sqlite\"").unwrap();
        assert_eq!(b, UsageBackend::Sqlite);
    }
}
