//! Kestrel Core Domain
//!
//! Pure domain types for Kestrel: identifiers, balances, orders, moving
//! averages and the trader state machine.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod error;
pub mod event_sourced;
pub mod indicators;
pub mod trader;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{Holding, Order, OrderStatus, Side, TraderProfile};
pub use error::CommandError;
pub use event_sourced::{Decision, EventSourced};
pub use indicators::{MovingAverage, MovingAverageKind};
pub use trader::{Candle, TraderCommand, TraderEvent, TraderReply, TraderState};
pub use values::{Asset, EntityId, InvalidEntityId, OrderId, Price, Quantity, Timestamp};
