pub mod handlers;

pub use handlers::{create_api_router, ApiState, ApiResponse, SESSION_HEADER};
