use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::{OrderStatus, TraderProfile};
use crate::values::{OrderId, Quantity, Timestamp};

/// Answer returned to the caller of a trader command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraderReply {
    Registered {
        profile: TraderProfile,
    },
    OrderAccepted {
        order_id: OrderId,
    },
    OrderCancelled {
        order_id: OrderId,
        unfilled_quantity: Quantity,
    },
    OrderFilled {
        order_id: OrderId,
        filled_quantity: Quantity,
        remaining_quantity: Quantity,
        status: OrderStatus,
    },
    CandleAccepted {
        time: Timestamp,
        short_ma: Option<Decimal>,
        long_ma: Option<Decimal>,
    },
}
