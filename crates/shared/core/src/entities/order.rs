use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderStatus, Side};
use crate::values::{OrderId, Price, Quantity, Timestamp};

/// An order as tracked by its trader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    /// Limit price
    pub price: Price,
    pub client_order_id: Option<String>,
    pub status: OrderStatus,
    /// Amount still held against the trader's balance: quote for buys,
    /// base for sells. Zero for orders placed before registration.
    pub reserved: Decimal,
    pub placed_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    /// Returns remaining quantity to be filled
    pub fn remaining_quantity(&self) -> Quantity {
        self.quantity - self.filled_quantity
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Whether this order holds part of the trader's balance
    pub fn is_funded(&self) -> bool {
        self.reserved > Decimal::ZERO
    }

    /// True when the request describes the same order (used to recognise
    /// retried placements carrying the same client order id)
    pub fn same_terms(&self, side: Side, quantity: Quantity, price: Price) -> bool {
        self.side == side && self.quantity == quantity && self.price == price
    }
}
