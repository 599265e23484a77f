pub mod cache;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod rate_limit;
pub mod router;
pub mod rules;
pub mod usage;
pub mod validation;

pub use cache::{CacheConfig, CacheKey, CacheStats, ResponseCache};
pub use error::{EngineError, RuleError};
pub use orchestrator::{
    ComponentStatus, HandleError, OrchestratedResponse, Orchestrator, OrchestratorConfig,
    OrchestratorStatus, Stage, FILE_CONTEXT_KEY, ORCHESTRATOR_VERSION,
};
pub use prompt::{optimize_for_agent, PromptBuilder, PromptInput};
pub use rate_limit::{Admission, RateLimitConfig, RateLimiter};
pub use router::{AgentInfo, AgentRouter, FallbackStrategy, SimulatedFallback, FALLBACK_AGENT};
pub use rules::{
    FileRuleSource, LoadedRules, MemoryRuleSource, RuleLayer, RuleSet, RuleSource, RuleStore,
};
pub use usage::{ExportFormat, UsageStats, UsageTracker};
pub use validation::{MessageValidator, Validated};
