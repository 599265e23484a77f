use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use coai_core::{Agent, AgentError, AgentRequest, AgentResponse, TokenUsage};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this response from `process`.
    Reply(AgentResponse),
    /// Return an error from `process`.
    Error(AgentError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Reply(AgentResponse::success(text))
    }

    /// A real-model style reply with token accounting.
    pub fn real_text(text: &str, prompt_tokens: u32, completion_tokens: u32, model: &str) -> Self {
        Self::Reply(
            AgentResponse::success(text)
                .with_usage(TokenUsage::new(prompt_tokens, completion_tokens, model))
                .real(),
        )
    }

    /// A reply whose status is not success.
    pub fn failure(reason: &str) -> Self {
        Self::Reply(AgentResponse::failure(reason))
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Agent that returns pre-programmed responses in sequence.
///
/// Once the script is exhausted the last response repeats when `repeat_last`
/// is set, otherwise every further call fails.
pub struct MockAgent {
    name: String,
    provider: String,
    responses: Vec<MockResponse>,
    repeat_last: bool,
    call_count: AtomicUsize,
    requests: Mutex<Vec<AgentRequest>>,
}

impl MockAgent {
    pub fn new(name: &str, responses: Vec<MockResponse>) -> Self {
        Self {
            name: name.to_string(),
            provider: "mock".to_string(),
            responses,
            repeat_last: false,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `response`.
    pub fn always(name: &str, response: MockResponse) -> Self {
        let mut agent = Self::new(name, vec![response]);
        agent.repeat_last = true;
        agent
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().clone()
    }

    fn script_entry(&self, idx: usize) -> Option<&MockResponse> {
        match self.responses.get(idx) {
            Some(r) => Some(r),
            None if self.repeat_last => self.responses.last(),
            None => None,
        }
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn capabilities(&self) -> &[&'static str] {
        &["mock_responses"]
    }

    async fn process(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut current) = self.script_entry(idx) else {
            return Err(AgentError::NotConfigured(format!(
                "MockAgent: no response configured for call {idx}"
            )));
        };
        // Nested delays are unrolled iteratively to avoid recursive async.
        loop {
            match current {
                MockResponse::Reply(resp) => return Ok(resp.clone()),
                MockResponse::Error(e) => return Err(e.clone()),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coai_core::{Language, RequestId};

    fn request(message: &str) -> AgentRequest {
        AgentRequest {
            request_id: RequestId::new(),
            prompt: message.into(),
            message: message.into(),
            project: "demo".into(),
            file: "main.rs".into(),
            language: Language::English,
            rules: vec![],
        }
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockAgent::new(
            "scripted",
            vec![MockResponse::text("first"), MockResponse::text("second")],
        );
        assert_eq!(mock.process(&request("a")).await.unwrap().text, "first");
        assert_eq!(mock.process(&request("b")).await.unwrap().text, "second");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.requests()[1].message, "b");
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockAgent::new("scripted", vec![MockResponse::text("only one")]);
        let _ = mock.process(&request("a")).await;
        assert!(mock.process(&request("b")).await.is_err());
    }

    #[tokio::test]
    async fn always_repeats() {
        let mock = MockAgent::always("steady", MockResponse::text("same"));
        for _ in 0..3 {
            assert_eq!(mock.process(&request("x")).await.unwrap().text, "same");
        }
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn error_and_failure_responses() {
        let mock = MockAgent::new(
            "scripted",
            vec![
                MockResponse::Error(AgentError::Network("reset".into())),
                MockResponse::failure("quota"),
            ],
        );
        assert!(matches!(
            mock.process(&request("a")).await,
            Err(AgentError::Network(_))
        ));
        let resp = mock.process(&request("b")).await.unwrap();
        assert!(!resp.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response() {
        let mock = MockAgent::new(
            "slow",
            vec![MockResponse::delayed(
                Duration::from_secs(5),
                MockResponse::real_text("late", 10, 2, "gpt-4o-mini"),
            )],
        );
        let start = tokio::time::Instant::now();
        let resp = mock.process(&request("a")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(resp.real_ai);
        assert_eq!(resp.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn identity() {
        let mock = MockAgent::new("scripted", vec![]).with_provider("local");
        assert_eq!(mock.name(), "scripted");
        assert_eq!(mock.provider(), "local");
    }
}
