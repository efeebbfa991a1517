use rust_decimal::Decimal;
use thiserror::Error;

use crate::entities::{OrderStatus, Side};
use crate::values::{Asset, OrderId, Price, Quantity};

/// Business-rule rejection of a trader command.
///
/// Returned by the state machine instead of events; state is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("trader is already registered with a different profile")]
    AlreadyRegistered,

    #[error("trader is not registered")]
    NotRegistered,

    #[error("invalid quantity {0}")]
    InvalidQuantity(Quantity),

    #[error("invalid price {0}")]
    InvalidPrice(Price),

    #[error("insufficient {asset}: required {required}, available {available}")]
    InsufficientBalance {
        asset: Asset,
        required: Decimal,
        available: Decimal,
    },

    #[error("client order id {0} was already used for a different order")]
    DuplicateClientOrderId(String),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("order {order_id} is {status:?}")]
    OrderNotOpen {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("fill of {requested} exceeds remaining {remaining} on order {order_id}")]
    FillExceedsRemaining {
        order_id: OrderId,
        requested: Quantity,
        remaining: Quantity,
    },

    #[error("{side} order {order_id} with limit {limit} cannot fill at {price}")]
    PriceOutsideLimit {
        order_id: OrderId,
        side: Side,
        limit: Price,
        price: Price,
    },

    #[error("invalid candle: {0}")]
    InvalidCandle(String),

    #[error("{0} amount out of range")]
    AmountOverflow(&'static str),
}

impl CommandError {
    /// Stable machine-readable code for client-facing rejections
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidProfile(_) => "invalid_profile",
            CommandError::AlreadyRegistered => "already_registered",
            CommandError::NotRegistered => "not_registered",
            CommandError::InvalidQuantity(_) => "invalid_quantity",
            CommandError::InvalidPrice(_) => "invalid_price",
            CommandError::InsufficientBalance { .. } => "insufficient_balance",
            CommandError::DuplicateClientOrderId(_) => "duplicate_client_order_id",
            CommandError::UnknownOrder(_) => "unknown_order",
            CommandError::OrderNotOpen { .. } => "order_not_open",
            CommandError::FillExceedsRemaining { .. } => "fill_exceeds_remaining",
            CommandError::PriceOutsideLimit { .. } => "price_outside_limit",
            CommandError::InvalidCandle(_) => "invalid_candle",
            CommandError::AmountOverflow(_) => "amount_overflow",
        }
    }
}
