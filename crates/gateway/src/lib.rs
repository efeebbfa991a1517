//! Kestrel Gateway
//!
//! Stateless JSON-over-HTTP front for the trader entity runtime:
//! - One POST endpoint per command, replies are the entity's typed replies
//! - Read endpoints for a single trader and the trader directory view
//! - Server wiring: config, event log adapter, runtime, projection task

pub mod config;
pub mod rest;
pub mod server;
pub mod views;

pub use config::{ConfigError, GatewayConfig, ServerConfig};
pub use rest::{ApiError, AppState, create_router};
pub use server::Gateway;
pub use views::{TraderDirectory, TraderSummary};
