use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use coai_core::{Agent, AgentError, AgentRequest, AgentResponse, TokenUsage};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const CAPABILITIES: &[&str] = &[
    "code_review",
    "debugging_assistance",
    "code_generation",
    "documentation_generation",
    "testing_guidance",
    "architecture_advice",
    "performance_optimization",
    "real_ai_integration",
];

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub api_key: SecretString,
}

/// Chat-completions agent for any OpenAI-compatible endpoint.
pub struct OpenAiAgent {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiAgent {
    pub fn new(config: OpenAiConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, request: &AgentRequest) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_prompt(request) },
                { "role": "user", "content": request.prompt },
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        })
    }
}

/// Base instructions plus project context and any rule directives.
pub fn system_prompt(request: &AgentRequest) -> String {
    let mut prompt = format!(
        "You are COAI (Code-Oriented AI), an expert programming assistant focused on helping \
         developers with code analysis, debugging, optimization, and development tasks.\n\n\
         Context:\n\
         - Project: {}\n\
         - Current file: {}\n\
         - You have access to project context and can help with multi-file scenarios\n\
         - Always provide practical, actionable advice\n\
         - Include code examples when relevant\n\
         - Be concise but thorough\n\n\
         Your capabilities include:\n\
         - Code review and suggestions\n\
         - Bug finding and debugging help\n\
         - Code optimization recommendations\n\
         - Documentation generation\n\
         - Testing strategy advice\n\
         - Architecture guidance",
        request.project, request.file
    );
    if !request.rules.is_empty() {
        prompt.push_str("\n\nAdditional rules to follow:");
        for rule in &request.rules {
            prompt.push_str("\n- ");
            prompt.push_str(rule);
        }
    }
    prompt
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl Agent for OpenAiAgent {
    fn name(&self) -> &str {
        "openai"
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> &[&'static str] {
        CAPABILITIES
    }

    #[instrument(skip_all, fields(model = %self.config.model, request_id = %request.request_id))]
    async fn process(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_status(status, body));
        }

        let completion: ChatCompletion = resp
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::InvalidResponse("no choices in completion".into()))?;

        let model = completion.model.unwrap_or_else(|| self.config.model.clone());
        let usage = match completion.usage {
            Some(u) => {
                let mut usage = TokenUsage::new(u.prompt_tokens, u.completion_tokens, model);
                if u.total_tokens > 0 {
                    usage.total_tokens = u.total_tokens;
                }
                usage
            }
            None => TokenUsage {
                model: Some(model),
                ..TokenUsage::default()
            },
        };
        debug!(total_tokens = usage.total_tokens, "completion received");

        Ok(AgentResponse::success(text).with_usage(usage).real())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use coai_core::{Language, RequestId};

    fn request(rules: Vec<String>) -> AgentRequest {
        AgentRequest {
            request_id: RequestId::new(),
            prompt: "=== User Query ===\nfix it".into(),
            message: "fix it".into(),
            project: "demo".into(),
            file: "app.py".into(),
            language: Language::English,
            rules,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn agent(base: String) -> OpenAiAgent {
        OpenAiAgent::new(OpenAiConfig {
            api_base_url: base,
            model: "gpt-3.5-turbo".into(),
            max_tokens: 2000,
            temperature: 0.7,
            api_key: SecretString::from("sk-test".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn system_prompt_carries_context_and_rules() {
        let prompt = system_prompt(&request(vec!["Use type hints".into(), "Be brief".into()]));
        assert!(prompt.starts_with("You are COAI (Code-Oriented AI)"));
        assert!(prompt.contains("- Project: demo"));
        assert!(prompt.contains("- Current file: app.py"));
        assert!(prompt.ends_with("Additional rules to follow:\n- Use type hints\n- Be brief"));

        let bare = system_prompt(&request(vec![]));
        assert!(!bare.contains("Additional rules"));
    }

    #[tokio::test]
    async fn successful_completion() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "gpt-3.5-turbo");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "=== User Query ===\nfix it");
                Json(json!({
                    "model": "gpt-3.5-turbo-0125",
                    "choices": [{ "message": { "role": "assistant", "content": "done" } }],
                    "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
                }))
            }),
        );
        let agent = agent(serve(router).await);

        let resp = agent.process(&request(vec![])).await.unwrap();
        assert!(resp.is_success());
        assert!(resp.real_ai);
        assert_eq!(resp.text, "done");
        let usage = resp.usage.unwrap();
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(usage.model.as_deref(), Some("gpt-3.5-turbo-0125"));
    }

    #[tokio::test]
    async fn auth_failure_is_classified() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let err = agent(serve(router).await)
            .process(&request(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AuthenticationFailed(ref b) if b == "bad key"));
    }

    #[tokio::test]
    async fn server_error_is_provider_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let err = agent(serve(router).await)
            .process(&request(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "provider_error");
    }

    #[tokio::test]
    async fn empty_choices_is_invalid() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({ "choices": [] })) }),
        );
        let err = agent(serve(router).await)
            .process(&request(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let err = agent("http://127.0.0.1:1/v1".into())
            .process(&request(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Network(_)));
    }
}
