pub mod handlers;
pub mod middleware;
pub mod server;

pub use handlers::ApiError;
pub use middleware::{client_id, CachedResponse};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle, Services};
