pub mod handlers;
pub mod server;

pub use handlers::{parse_time, ApiError, AppState};
pub use server::{build_router, run_server, ServerConfig};
