use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::{Side, TraderProfile};
use crate::error::CommandError;
use crate::values::{OrderId, Price, Quantity, Timestamp};

/// One market candle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub time: Timestamp,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
}

impl Candle {
    pub fn validate(&self) -> Result<(), CommandError> {
        if [self.open, self.high, self.low, self.close]
            .iter()
            .any(|p| *p <= Decimal::ZERO)
        {
            return Err(CommandError::InvalidCandle(
                "prices must be positive".to_string(),
            ));
        }
        if self.volume < Decimal::ZERO {
            return Err(CommandError::InvalidCandle(
                "volume must not be negative".to_string(),
            ));
        }
        let body_high = self.open.max(self.close);
        let body_low = self.open.min(self.close);
        if self.high < body_high || self.low > body_low {
            return Err(CommandError::InvalidCandle(format!(
                "range {}..{} does not contain open {} and close {}",
                self.low, self.high, self.open, self.close
            )));
        }
        Ok(())
    }
}

/// Requests a trader entity can handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraderCommand {
    Register {
        profile: TraderProfile,
    },
    PlaceOrder {
        side: Side,
        quantity: Quantity,
        price: Price,
        /// Caller-chosen id; a retried placement with the same id and
        /// terms is answered without placing a second order
        client_order_id: Option<String>,
        placed_at: Timestamp,
    },
    CancelOrder {
        order_id: OrderId,
        cancelled_at: Timestamp,
    },
    /// Execution report for an open order (matching happens elsewhere)
    FillOrder {
        order_id: OrderId,
        quantity: Quantity,
        price: Price,
        filled_at: Timestamp,
    },
    AddCandle {
        candle: Candle,
    },
}

impl TraderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TraderCommand::Register { .. } => "register",
            TraderCommand::PlaceOrder { .. } => "place_order",
            TraderCommand::CancelOrder { .. } => "cancel_order",
            TraderCommand::FillOrder { .. } => "fill_order",
            TraderCommand::AddCandle { .. } => "add_candle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            time: Utc.timestamp_millis_opt(1_620_000_000_000).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(12.5),
        }
    }

    #[test]
    fn test_valid_candle() {
        assert!(candle(dec!(100), dec!(110), dec!(95), dec!(105)).validate().is_ok());
    }

    #[test]
    fn test_candle_range_must_contain_body() {
        let c = candle(dec!(100), dec!(104), dec!(95), dec!(105));
        assert!(matches!(c.validate(), Err(CommandError::InvalidCandle(_))));
    }

    #[test]
    fn test_candle_prices_positive() {
        let c = candle(dec!(0), dec!(110), dec!(0), dec!(105));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_command_wire_format() {
        let cmd = TraderCommand::CancelOrder {
            order_id: OrderId::from("order-1"),
            cancelled_at: Utc.timestamp_millis_opt(0).unwrap(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "cancel_order");
        assert_eq!(json["order_id"], "order-1");
    }
}
