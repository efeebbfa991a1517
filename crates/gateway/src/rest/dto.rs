use kestrel_core::{
    Candle, EntityId, MovingAverageKind, Price, Quantity, Side, Timestamp, TraderProfile,
    TraderState,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request to onboard a trader
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub base_asset: String,
    pub quote_asset: String,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
    pub ma_kind: MovingAverageKind,
    pub short_period: u32,
    pub long_period: u32,
}

impl From<RegisterRequest> for TraderProfile {
    fn from(req: RegisterRequest) -> Self {
        TraderProfile {
            base_asset: req.base_asset,
            quote_asset: req.quote_asset,
            base_balance: req.base_balance,
            quote_balance: req.quote_balance,
            ma_kind: req.ma_kind,
            short_period: req.short_period,
            long_period: req.long_period,
        }
    }
}

/// Request to place a limit order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    /// Stamped by the gateway when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placed_at: Option<Timestamp>,
}

/// Optional body of a cancel request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<Timestamp>,
}

/// Execution reported against an open order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillOrderRequest {
    pub quantity: Quantity,
    pub price: Price,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<Timestamp>,
}

/// Market candle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleRequest {
    pub time: Timestamp,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
}

impl From<CandleRequest> for Candle {
    fn from(req: CandleRequest) -> Self {
        Candle {
            time: req.time,
            open: req.open,
            high: req.high,
            low: req.low,
            close: req.close,
            volume: req.volume,
        }
    }
}

/// State of one trader as of `sequence`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderResponse {
    pub entity_id: EntityId,
    pub sequence: u64,
    pub state: TraderState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradersQuery {
    #[serde(default)]
    pub base_asset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// `rejected`, `conflict`, `unavailable`, `timeout` or `malformed`
    pub kind: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(kind: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}
