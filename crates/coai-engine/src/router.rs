//! Agent registry, dispatch and the single local fallback.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use coai_core::{
    Agent, AgentError, AgentRequest, AgentResponse, AgentResult, AgentStatus, CoaiError,
    DispatchOutcome, Language,
};
use coai_telemetry::MetricsRecorder;

use crate::error::EngineError;

/// Agent identifier recorded when the fallback produced the reply.
pub const FALLBACK_AGENT: &str = "simulated_fallback";

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Local substitute for a failed primary. Must not call out.
pub trait FallbackStrategy: Send + Sync {
    fn synthesize(
        &self,
        request: &AgentRequest,
        cause: &AgentError,
    ) -> Result<AgentResponse, AgentError>;
}

/// Canned, file-type aware reply.
pub struct SimulatedFallback;

impl FallbackStrategy for SimulatedFallback {
    fn synthesize(
        &self,
        request: &AgentRequest,
        _cause: &AgentError,
    ) -> Result<AgentResponse, AgentError> {
        let file = request.file.as_str();
        let project = request.project.as_str();
        let lower = file.to_lowercase();

        let mut text = if lower.contains("python") || file.ends_with(".py") {
            format!(
                "I see you're working on a Python file ({file}) in the {project} project. \n\n\
                 Here are some helpful suggestions:\n\
                 - Make sure your code follows PEP 8 style guidelines\n\
                 - Consider adding docstrings to your functions\n\
                 - Use type hints for better code documentation\n\
                 - Test your code with pytest\n\n\
                 Would you like me to help you with any specific Python coding tasks?"
            )
        } else if lower.contains("javascript")
            || [".js", ".ts", ".jsx", ".tsx"].iter().any(|ext| file.ends_with(ext))
        {
            format!(
                "I see you're working on a JavaScript/TypeScript file ({file}) in the {project} project.\n\n\
                 Here are some helpful suggestions:\n\
                 - Use ESLint for code quality\n\
                 - Consider using TypeScript for better type safety\n\
                 - Follow modern ES6+ practices\n\
                 - Use proper error handling with try/catch\n\n\
                 How can I assist you with your JavaScript/TypeScript development?"
            )
        } else {
            format!(
                "I'm here to help with your {project} project, specifically with the {file} file.\n\n\
                 I can assist you with:\n\
                 - Code review and optimization\n\
                 - Bug fixing and debugging\n\
                 - Best practices and patterns\n\
                 - Documentation and comments\n\
                 - Testing strategies\n\n\
                 What specific help do you need with your project?"
            )
        };

        if request.language == Language::Lithuanian {
            text.push_str("\n\n(Pastaba: Galiu atsakyti ir lietuviškai, jei pageidaujate)");
        }
        Ok(AgentResponse::success(text))
    }
}

fn failure_reason(resp: AgentResponse) -> String {
    match resp.status {
        AgentStatus::Failure(reason) => reason,
        AgentStatus::Success => String::new(),
    }
}

/// Listing entry for `/api/agents` and status reports.
#[derive(Clone, Debug, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub is_default: bool,
    pub status: &'static str,
}

struct Registered {
    agent: Arc<dyn Agent>,
    created_at: DateTime<Utc>,
}

pub struct AgentRouter {
    agents: BTreeMap<String, Registered>,
    default_agent: String,
    timeout: Duration,
    fallback: Box<dyn FallbackStrategy>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl AgentRouter {
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self {
            agents: BTreeMap::new(),
            default_agent: default_agent.into(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            fallback: Box::new(SimulatedFallback),
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: Box<dyn FallbackStrategy>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), EngineError> {
        let name = agent.name().to_string();
        if self.agents.contains_key(&name) {
            return Err(EngineError::DuplicateAgent(name));
        }
        info!(agent = %name, provider = agent.provider(), "agent registered");
        self.agents.insert(
            name,
            Registered {
                agent,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_agent = name.into();
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn agents(&self) -> Vec<AgentInfo> {
        self.agents
            .iter()
            .map(|(name, r)| AgentInfo {
                name: name.clone(),
                provider: r.agent.provider().to_string(),
                capabilities: r.agent.capabilities().iter().map(|c| c.to_string()).collect(),
                created_at: r.created_at,
                is_default: *name == self.default_agent,
                status: "active",
            })
            .collect()
    }

    /// Preferred agent if registered, else the default, else `AgentNotFound`.
    pub fn resolve(&self, preferred: Option<&str>) -> Result<Arc<dyn Agent>, CoaiError> {
        if let Some(r) = preferred.and_then(|name| self.agents.get(name)) {
            return Ok(Arc::clone(&r.agent));
        }
        self.agents
            .get(&self.default_agent)
            .map(|r| Arc::clone(&r.agent))
            .ok_or_else(|| {
                CoaiError::AgentNotFound(preferred.unwrap_or(&self.default_agent).to_string())
            })
    }

    /// Run `agent` once under the dispatch timeout. Any hard failure gets
    /// exactly one local fallback; a fallback failure is terminal.
    #[instrument(skip_all, fields(request_id = %request.request_id, agent = agent.name()))]
    pub async fn dispatch(
        &self,
        agent: &Arc<dyn Agent>,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult, CoaiError> {
        let started = Instant::now();
        let primary = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoaiError::Cancelled),
            r = tokio::time::timeout(self.timeout, agent.process(request)) => r,
        };
        let primary = match primary {
            Ok(Ok(resp)) if resp.is_success() => Ok(resp),
            Ok(Ok(resp)) => Err(AgentError::NonSuccess(failure_reason(resp))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AgentError::Timeout(self.timeout)),
        };
        self.observe(agent.name(), started);

        match primary {
            Ok(resp) => {
                self.count(DispatchOutcome::Completed);
                Ok(AgentResult {
                    outcome: DispatchOutcome::Completed,
                    text: resp.text,
                    agent_type: agent.name().to_string(),
                    provider: agent.provider().to_string(),
                    usage: resp.usage.unwrap_or_default(),
                    real_ai: resp.real_ai,
                    primary_error: None,
                })
            }
            Err(cause) => {
                warn!(error = %cause, kind = cause.error_kind(), "primary agent failed, using fallback");
                let degraded = match self.fallback.synthesize(request, &cause) {
                    Ok(resp) if resp.is_success() => {
                        self.count(DispatchOutcome::CompletedDegraded);
                        Ok(AgentResult {
                            outcome: DispatchOutcome::CompletedDegraded,
                            text: resp.text,
                            agent_type: FALLBACK_AGENT.to_string(),
                            provider: "local".to_string(),
                            usage: Default::default(),
                            real_ai: false,
                            primary_error: Some(cause.to_string()),
                        })
                    }
                    Ok(resp) => Err(CoaiError::Agent(AgentError::NonSuccess(failure_reason(
                        resp,
                    )))),
                    Err(e) => Err(CoaiError::Agent(e)),
                };
                if let Err(e) = &degraded {
                    if let Some(m) = &self.metrics {
                        m.counter_inc("dispatch.total", &[("outcome", "failed")], 1);
                    }
                    warn!(error = %e, "fallback failed");
                }
                degraded
            }
        }
    }

    fn count(&self, outcome: DispatchOutcome) {
        if let Some(m) = &self.metrics {
            let label = match outcome {
                DispatchOutcome::Completed => "completed",
                DispatchOutcome::CompletedDegraded => "completed_degraded",
            };
            m.counter_inc("dispatch.total", &[("outcome", label)], 1);
        }
    }

    fn observe(&self, agent: &str, started: Instant) {
        if let Some(m) = &self.metrics {
            m.histogram_observe(
                "dispatch.duration_ms",
                &[("agent", agent)],
                started.elapsed().as_secs_f64() * 1000.0,
            );
        }
    }
}
