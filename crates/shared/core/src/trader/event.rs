use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::{Side, TraderProfile};
use crate::values::{OrderId, Price, Quantity, Timestamp};

/// Facts recorded in a trader's event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraderEvent {
    TraderRegistered {
        profile: TraderProfile,
    },
    OrderPlaced {
        order_id: OrderId,
        side: Side,
        quantity: Quantity,
        price: Price,
        client_order_id: Option<String>,
        /// Balance held for the order (zero when unregistered)
        reserved: Decimal,
        placed_at: Timestamp,
    },
    OrderCancelled {
        order_id: OrderId,
        released: Decimal,
        cancelled_at: Timestamp,
    },
    /// Balance movements are computed when the fill is accepted so that
    /// replaying the event needs no arithmetic that could fail
    OrderFilled {
        order_id: OrderId,
        quantity: Quantity,
        price: Price,
        /// Taken out of the order's reservation
        consumed: Decimal,
        /// Added to available base
        base_credit: Decimal,
        /// Added to available quote (refund for buys, proceeds for sells)
        quote_credit: Decimal,
        filled_at: Timestamp,
    },
    CandleRecorded {
        time: Timestamp,
        close: Price,
    },
    /// Derived value published for read models; the windows themselves
    /// advance on `CandleRecorded`
    MovingAverageUpdated {
        period: u32,
        value: Decimal,
        time: Timestamp,
    },
}

impl TraderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TraderEvent::TraderRegistered { .. } => "trader_registered",
            TraderEvent::OrderPlaced { .. } => "order_placed",
            TraderEvent::OrderCancelled { .. } => "order_cancelled",
            TraderEvent::OrderFilled { .. } => "order_filled",
            TraderEvent::CandleRecorded { .. } => "candle_recorded",
            TraderEvent::MovingAverageUpdated { .. } => "moving_average_updated",
        }
    }
}
