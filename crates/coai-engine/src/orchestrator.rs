//! Request pipeline: validate, snapshot rules, build prompt, dispatch, account.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use coai_core::{
    AgentRequest, AgentResult, CoaiError, DispatchOutcome, Language, RequestContext, RequestId,
    UsageEntry, UsageStatus,
};
use coai_telemetry::{AuditSink, MetricsRecorder};

use crate::prompt::{optimize_for_agent, PromptBuilder, PromptInput};
use crate::router::{AgentInfo, AgentRouter};
use crate::rules::RuleStore;
use crate::usage::UsageTracker;
use crate::validation::{MessageValidator, DEFAULT_MAX_MESSAGE_LENGTH};

pub const ORCHESTRATOR_VERSION: &str = "1.0.0";

const PREVIEW_CHARS: usize = 100;

/// Context key whose string value is offered to the prompt as project file listing.
pub const FILE_CONTEXT_KEY: &str = "file_context";

const CAPABILITIES: &[&str] = &[
    "chat_request_processing",
    "prompt_preprocessing",
    "rule_injection",
    "request_logging",
    "usage_accounting",
    "ai_agent_integration",
    "openai_support",
    "copilot_simulation",
    "local_fallback",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    RuleSnapshotted,
    PromptBuilt,
    PrimaryDispatch,
    FallbackDispatch,
    Completed,
    CompletedDegraded,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_message_length: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EchoedContext {
    pub project: String,
    pub file: String,
    pub language: Language,
    pub processed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResponseMetadata {
    pub agent_type: String,
    pub provider: String,
    pub outcome: DispatchOutcome,
    pub real_ai: bool,
    pub prompt_length: usize,
    pub processing_time_ms: u64,
    pub orchestrator_version: &'static str,
    pub rules_version: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DebugTrace {
    pub enhanced_prompt_preview: String,
    pub stages: Vec<Stage>,
    pub components_used: Vec<String>,
}

/// What `/api/chat` returns on success, degraded or not.
#[derive(Clone, Debug, Serialize)]
pub struct OrchestratedResponse {
    pub request_id: RequestId,
    pub reply: String,
    pub original_message: String,
    pub context: EchoedContext,
    pub metadata: ResponseMetadata,
    pub status: &'static str,
    pub error: bool,
    pub debug: DebugTrace,
}

/// A failed request keeps the id it was given at entry.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{error}")]
pub struct HandleError {
    pub request_id: RequestId,
    pub error: CoaiError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Ready,
    NotInitialized,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrchestratorStatus {
    pub orchestrator_status: &'static str,
    pub version: &'static str,
    pub components: BTreeMap<&'static str, ComponentStatus>,
    pub agents: Vec<AgentInfo>,
    pub default_agent: String,
    pub rules_version: String,
    pub capabilities: Vec<&'static str>,
}

pub struct Orchestrator {
    validator: MessageValidator,
    rules: Arc<RuleStore>,
    builder: PromptBuilder,
    router: Arc<AgentRouter>,
    usage: Arc<UsageTracker>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        rules: Arc<RuleStore>,
        router: Arc<AgentRouter>,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            validator: MessageValidator::new(config.max_message_length),
            rules,
            builder: PromptBuilder::new(),
            router,
            usage,
            metrics: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.validator = self.validator.with_audit(audit);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_prompt_builder(mut self, builder: PromptBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn router(&self) -> &Arc<AgentRouter> {
        &self.router
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Runs one chat request end to end. A primary agent failure is absorbed
    /// by the fallback; only validation, resolution, cancellation and a failed
    /// fallback surface as errors.
    pub async fn handle(
        &self,
        message: &str,
        context: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<OrchestratedResponse, HandleError> {
        let request_id = RequestId::new();
        self.handle_with_id(request_id, message, context, cancel).await
    }

    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn handle_with_id(
        &self,
        request_id: RequestId,
        message: &str,
        context: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<OrchestratedResponse, HandleError> {
        let started = Instant::now();
        let fail = |error: CoaiError| HandleError {
            request_id: request_id.clone(),
            error,
        };
        let mut stages = vec![Stage::Received];

        let valid = self.validator.validate(message, context).map_err(|e| {
            self.count("rejected");
            fail(e)
        })?;
        stages.push(Stage::Validated);

        let agent = self
            .router
            .resolve(context.agent.as_deref())
            .map_err(|e| {
                self.count("rejected");
                fail(e)
            })?;

        let rule_set = self.rules.snapshot_for(valid.project);
        let rules = rule_set.for_agent(agent.name());
        stages.push(Stage::RuleSnapshotted);

        let aux = context
            .extra
            .get(FILE_CONTEXT_KEY)
            .and_then(|v| v.as_str());
        let envelope = self.builder.build(&PromptInput {
            message: valid.message,
            project: valid.project,
            file: valid.file,
            timestamp: context.timestamp.unwrap_or_else(Utc::now),
            rules: &rules,
            aux,
        });
        let envelope = optimize_for_agent(envelope, agent.name());
        stages.push(Stage::PromptBuilt);
        debug!(
            agent = agent.name(),
            prompt_length = envelope.metadata.prompt_length,
            rules = rules.len(),
            rules_version = %rule_set.version,
            "prompt built"
        );

        let request = AgentRequest::from_envelope(request_id.clone(), &envelope).with_rules(rules);
        stages.push(Stage::PrimaryDispatch);
        let dispatched = self.router.dispatch(&agent, &request, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match dispatched {
            Ok(result) => result,
            Err(error) => {
                let (status, stage, outcome) = match error {
                    CoaiError::Cancelled => (UsageStatus::Cancelled, Stage::Cancelled, "cancelled"),
                    _ => (UsageStatus::Failed, Stage::Failed, "failed"),
                };
                stages.push(stage);
                warn!(error = %error, stages = ?stages, "request did not complete");
                self.usage.record(UsageEntry {
                    timestamp: Utc::now(),
                    request_id: request_id.clone(),
                    agent_type: agent.name().to_string(),
                    provider: agent.provider().to_string(),
                    project: valid.project.to_string(),
                    file: valid.file.to_string(),
                    message_length: valid.message.chars().count(),
                    response_length: 0,
                    tokens_used: 0,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    model: None,
                    cost_estimate: 0.0,
                    response_time_ms: elapsed_ms,
                    status,
                    real_ai: false,
                    error: Some(error.to_string()),
                });
                self.count(outcome);
                return Err(fail(error));
            }
        };

        if result.is_degraded() {
            stages.push(Stage::FallbackDispatch);
            stages.push(Stage::CompletedDegraded);
        } else {
            stages.push(Stage::Completed);
        }
        self.usage.record(usage_entry(
            &request_id,
            &result,
            valid.project,
            valid.file,
            valid.message.chars().count(),
            elapsed_ms,
        ));

        let processing_time_ms = started.elapsed().as_millis() as u64;
        self.count(outcome_label(result.outcome));
        if let Some(m) = &self.metrics {
            m.histogram_observe("orchestrator.duration_ms", &[], processing_time_ms as f64);
        }
        info!(
            agent = %result.agent_type,
            outcome = outcome_label(result.outcome),
            processing_time_ms,
            "request completed"
        );

        let components_used = vec![
            "orchestrator".to_string(),
            "validator".to_string(),
            "rule_store".to_string(),
            "prompt_builder".to_string(),
            "router".to_string(),
            format!("ai_agent_{}", result.agent_type),
            "usage_tracker".to_string(),
        ];

        Ok(OrchestratedResponse {
            request_id,
            original_message: valid.message.to_string(),
            context: EchoedContext {
                project: valid.project.to_string(),
                file: valid.file.to_string(),
                language: envelope.metadata.language,
                processed_at: Utc::now(),
            },
            metadata: ResponseMetadata {
                agent_type: result.agent_type,
                provider: result.provider,
                outcome: result.outcome,
                real_ai: result.real_ai,
                prompt_length: envelope.metadata.prompt_length,
                processing_time_ms,
                orchestrator_version: ORCHESTRATOR_VERSION,
                rules_version: rule_set.version.clone(),
            },
            reply: result.text,
            status: "completed",
            error: false,
            debug: DebugTrace {
                enhanced_prompt_preview: envelope.preview(PREVIEW_CHARS),
                stages,
                components_used,
            },
        })
    }

    pub fn status(&self) -> OrchestratorStatus {
        let agents = self.router.agents();
        let router_status = if self.router.contains(self.router.default_agent()) {
            ComponentStatus::Ready
        } else {
            ComponentStatus::NotInitialized
        };
        let components = BTreeMap::from([
            ("validator", ComponentStatus::Ready),
            ("rule_store", ComponentStatus::Ready),
            ("prompt_builder", ComponentStatus::Ready),
            ("router", router_status),
            ("usage_tracker", ComponentStatus::Ready),
        ]);
        OrchestratorStatus {
            orchestrator_status: if router_status == ComponentStatus::Ready {
                "ready"
            } else {
                "degraded"
            },
            version: ORCHESTRATOR_VERSION,
            components,
            agents,
            default_agent: self.router.default_agent().to_string(),
            rules_version: self.rules.version(),
            capabilities: CAPABILITIES.to_vec(),
        }
    }

    fn count(&self, outcome: &str) {
        if let Some(m) = &self.metrics {
            m.counter_inc("orchestrator.requests", &[("outcome", outcome)], 1);
        }
    }
}

fn outcome_label(outcome: DispatchOutcome) -> &'static str {
    match outcome {
        DispatchOutcome::Completed => "completed",
        DispatchOutcome::CompletedDegraded => "completed_degraded",
    }
}

fn usage_entry(
    request_id: &RequestId,
    result: &AgentResult,
    project: &str,
    file: &str,
    message_length: usize,
    response_time_ms: u64,
) -> UsageEntry {
    let usage = &result.usage;
    UsageEntry {
        timestamp: Utc::now(),
        request_id: request_id.clone(),
        agent_type: result.agent_type.clone(),
        provider: result.provider.clone(),
        project: project.to_string(),
        file: file.to_string(),
        message_length,
        response_length: result.text.chars().count(),
        tokens_used: usage.total_tokens,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        model: usage.model.clone(),
        cost_estimate: coai_llm::estimate_cost(
            &result.provider,
            usage.model.as_deref(),
            usage.prompt_tokens,
            usage.completion_tokens,
            result.real_ai,
        ),
        response_time_ms,
        status: if result.is_degraded() {
            UsageStatus::Degraded
        } else {
            UsageStatus::Success
        },
        real_ai: result.real_ai,
        error: result.primary_error.clone(),
    }
}
