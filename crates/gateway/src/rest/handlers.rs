use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use kestrel_core::{EntityId, OrderId, TraderCommand, TraderReply};
use kestrel_ports::{Clock, EventLog};
use std::sync::Arc;
use tracing::{debug, warn};

use super::AppState;
use super::dto::*;
use super::error::ApiError;
use crate::views::TraderSummary;

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_entity_id(raw: &str) -> Result<EntityId, ApiError> {
    EntityId::new(raw).map_err(|e| ApiError::invalid_entity_id(raw, e))
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::malformed(rejection.body_text()))
}

/// Send a command to its entity within the request deadline
async fn dispatch<C: Clock, L: EventLog>(
    state: &AppState<C, L>,
    entity_id: EntityId,
    command: TraderCommand,
) -> ApiResult<TraderReply> {
    let name = command.name();
    let outcome = tokio::time::timeout(
        state.request_timeout,
        state.runtime.dispatch(&entity_id, command),
    )
    .await;

    match outcome {
        Ok(Ok(reply)) => {
            debug!(entity_id = %entity_id, command = name, "Command accepted");
            Ok(Json(reply))
        }
        Ok(Err(e)) => {
            warn!(entity_id = %entity_id, command = name, error = %e, "Command failed");
            Err(e.into())
        }
        Err(_) => {
            warn!(entity_id = %entity_id, command = name, "Command timed out");
            Err(ApiError::timeout())
        }
    }
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// POST /v1/traders/{id}/register
pub async fn register<C: Clock, L: EventLog>(
    Path(id): Path<String>,
    State(state): State<Arc<AppState<C, L>>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<TraderReply> {
    let entity_id = parse_entity_id(&id)?;
    let request = parse_body(body)?;
    let command = TraderCommand::Register {
        profile: request.into(),
    };
    dispatch(&state, entity_id, command).await
}

/// POST /v1/traders/{id}/orders
pub async fn place_order<C: Clock, L: EventLog>(
    Path(id): Path<String>,
    State(state): State<Arc<AppState<C, L>>>,
    body: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> ApiResult<TraderReply> {
    let entity_id = parse_entity_id(&id)?;
    let request = parse_body(body)?;
    let command = TraderCommand::PlaceOrder {
        side: request.side,
        quantity: request.quantity,
        price: request.price,
        client_order_id: request.client_order_id,
        placed_at: request.placed_at.unwrap_or_else(|| state.clock.now()),
    };
    dispatch(&state, entity_id, command).await
}

/// POST /v1/traders/{id}/orders/{order_id}/cancel
///
/// The body is optional; an empty one cancels at the current time.
pub async fn cancel_order<C: Clock, L: EventLog>(
    Path((id, order_id)): Path<(String, String)>,
    State(state): State<Arc<AppState<C, L>>>,
    body: Bytes,
) -> ApiResult<TraderReply> {
    let entity_id = parse_entity_id(&id)?;
    let request: CancelOrderRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelOrderRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::malformed(e.to_string()))?
    };
    let command = TraderCommand::CancelOrder {
        order_id: OrderId::new(order_id),
        cancelled_at: request.cancelled_at.unwrap_or_else(|| state.clock.now()),
    };
    dispatch(&state, entity_id, command).await
}

/// POST /v1/traders/{id}/orders/{order_id}/fills
pub async fn fill_order<C: Clock, L: EventLog>(
    Path((id, order_id)): Path<(String, String)>,
    State(state): State<Arc<AppState<C, L>>>,
    body: Result<Json<FillOrderRequest>, JsonRejection>,
) -> ApiResult<TraderReply> {
    let entity_id = parse_entity_id(&id)?;
    let request = parse_body(body)?;
    let command = TraderCommand::FillOrder {
        order_id: OrderId::new(order_id),
        quantity: request.quantity,
        price: request.price,
        filled_at: request.filled_at.unwrap_or_else(|| state.clock.now()),
    };
    dispatch(&state, entity_id, command).await
}

/// POST /v1/traders/{id}/candles
pub async fn add_candle<C: Clock, L: EventLog>(
    Path(id): Path<String>,
    State(state): State<Arc<AppState<C, L>>>,
    body: Result<Json<CandleRequest>, JsonRejection>,
) -> ApiResult<TraderReply> {
    let entity_id = parse_entity_id(&id)?;
    let request = parse_body(body)?;
    let command = TraderCommand::AddCandle {
        candle: request.into(),
    };
    dispatch(&state, entity_id, command).await
}

/// GET /v1/traders/{id}
pub async fn get_trader<C: Clock, L: EventLog>(
    Path(id): Path<String>,
    State(state): State<Arc<AppState<C, L>>>,
) -> ApiResult<TraderResponse> {
    let entity_id = parse_entity_id(&id)?;
    let (trader, sequence) =
        tokio::time::timeout(state.request_timeout, state.runtime.inspect(&entity_id))
            .await
            .map_err(|_| ApiError::timeout())??;

    if sequence == 0 {
        return Err(ApiError::not_found(format!("No events for {entity_id}")));
    }
    Ok(Json(TraderResponse {
        entity_id,
        sequence,
        state: trader,
    }))
}

/// GET /v1/views/traders?baseAsset=BTC
pub async fn list_traders<C: Clock, L: EventLog>(
    Query(query): Query<TradersQuery>,
    State(state): State<Arc<AppState<C, L>>>,
) -> Json<Vec<TraderSummary>> {
    let traders = match query.base_asset.as_deref() {
        Some(asset) => state.directory.traders_by_base_asset(asset),
        None => state.directory.all(),
    };
    Json(traders)
}
