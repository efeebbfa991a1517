//! REST API implementation
//!
//! JSON endpoints, one per trader command, plus read endpoints.

mod dto;
mod error;
mod handlers;
mod router;

pub use dto::*;
pub use error::ApiError;
pub use router::{AppState, create_router};
