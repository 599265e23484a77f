pub mod copilot;
pub mod models;
pub mod openai;

pub mod mock;

pub use copilot::CopilotAgent;
pub use mock::{MockAgent, MockResponse};
pub use models::estimate_cost;
pub use openai::{OpenAiAgent, OpenAiConfig};
