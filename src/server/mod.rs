//! HTTP surface: axum router, bearer authentication and SSE progress
//! streaming over the orchestration pipelines.

mod auth;
mod http;

pub use auth::AuthedUser;
pub use http::router;

use std::sync::Arc;

use crate::pipeline::AppContext;

/// Shared application state handle.
pub type SharedState = Arc<AppContext>;
