use axum::{
    Router,
    routing::{get, post},
};
use kestrel_core::TraderState;
use kestrel_ports::{Clock, EventLog};
use kestrel_runtime::EntityRuntime;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::views::TraderDirectory;

/// Application state shared across handlers
pub struct AppState<C: Clock, L: EventLog> {
    pub clock: Arc<C>,
    pub runtime: EntityRuntime<TraderState, L>,
    pub directory: Arc<TraderDirectory>,
    pub request_timeout: Duration,
}

impl<C: Clock, L: EventLog> AppState<C, L> {
    pub fn new(
        clock: Arc<C>,
        runtime: EntityRuntime<TraderState, L>,
        directory: Arc<TraderDirectory>,
        request_timeout: Duration,
    ) -> Self {
        AppState {
            clock,
            runtime,
            directory,
            request_timeout,
        }
    }
}

/// Create the REST API router
pub fn create_router<C: Clock + 'static, L: EventLog>(state: Arc<AppState<C, L>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Commands
        .route(
            "/v1/traders/{id}/register",
            post(handlers::register::<C, L>),
        )
        .route("/v1/traders/{id}/orders", post(handlers::place_order::<C, L>))
        .route(
            "/v1/traders/{id}/orders/{order_id}/cancel",
            post(handlers::cancel_order::<C, L>),
        )
        .route(
            "/v1/traders/{id}/orders/{order_id}/fills",
            post(handlers::fill_order::<C, L>),
        )
        .route("/v1/traders/{id}/candles", post(handlers::add_candle::<C, L>))
        // Reads
        .route("/v1/traders/{id}", get(handlers::get_trader::<C, L>))
        .route("/v1/views/traders", get(handlers::list_traders::<C, L>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
