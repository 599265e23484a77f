pub mod agent;
pub mod context;
pub mod errors;
pub mod ids;
pub mod usage;

pub use agent::{Agent, AgentRequest, AgentResponse, AgentResult, AgentStatus, DispatchOutcome, TokenUsage};
pub use context::{Language, PromptEnvelope, PromptMetadata, RequestContext};
pub use errors::{AgentError, CoaiError, ErrorResponse};
pub use ids::RequestId;
pub use usage::{summarize, DailySnapshot, DailySummary, UsageEntry, UsageStatus};
