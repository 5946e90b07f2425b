//! HTTP API module.
//!
//! The hub's synchronous surface: banner, liveness, status snapshot, the
//! cached camera frame, and the chat command endpoint. The WebSocket
//! ingress routes live in [`crate::ws`] but are mounted by this router.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
