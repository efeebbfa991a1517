//! CSV record schemas
//!
//! The first column names the record kind (case-insensitive), the second
//! the target entity:
//!
//! ```text
//! PLACE,    entity, side, quantity, price[, client_order_id]
//! CANCEL,   entity, order_id
//! FILL,     entity, order_id, quantity, price
//! CANDLE,   entity, time_ms, open, high, low, close, volume
//! REGISTER, entity, base, quote, base_balance, quote_balance, ma_kind, short, long
//! ```
//!
//! A PLACE row without a client order id gets `<source>:<line>`, so a
//! resubmission after an unknown outcome cannot place the order twice.

use chrono::{TimeZone, Utc};
use csv::StringRecord;
use kestrel_core::{
    Candle, EntityId, MovingAverageKind, OrderId, Side, Timestamp, TraderCommand, TraderProfile,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("empty record")]
    Empty,

    #[error("unknown record kind '{0}'")]
    UnknownKind(String),

    #[error("{kind} expects {expected} columns, got {actual}")]
    ColumnCount {
        kind: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("invalid {field} '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("unreadable row: {0}")]
    Unreadable(String),
}

/// What a record asks the entity to do.
///
/// Timestamps of order actions are left to whoever executes the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRequest {
    Register(TraderProfile),
    Place {
        side: Side,
        quantity: Decimal,
        price: Decimal,
        client_order_id: Option<String>,
    },
    Cancel {
        order_id: OrderId,
    },
    Fill {
        order_id: OrderId,
        quantity: Decimal,
        price: Decimal,
    },
    Candle(Candle),
}

impl CommandRequest {
    /// Build the entity command, stamping order actions with `now`
    pub fn into_command(self, now: Timestamp) -> TraderCommand {
        match self {
            CommandRequest::Register(profile) => TraderCommand::Register { profile },
            CommandRequest::Place {
                side,
                quantity,
                price,
                client_order_id,
            } => TraderCommand::PlaceOrder {
                side,
                quantity,
                price,
                client_order_id,
                placed_at: now,
            },
            CommandRequest::Cancel { order_id } => TraderCommand::CancelOrder {
                order_id,
                cancelled_at: now,
            },
            CommandRequest::Fill {
                order_id,
                quantity,
                price,
            } => TraderCommand::FillOrder {
                order_id,
                quantity,
                price,
                filled_at: now,
            },
            CommandRequest::Candle(candle) => TraderCommand::AddCandle { candle },
        }
    }
}

/// One parsed row of an input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRecord {
    /// 1-based line in the source file
    pub line: u64,
    pub entity_id: EntityId,
    pub request: CommandRequest,
}

impl IngestRecord {
    pub fn parse(line: u64, row: &StringRecord) -> Result<Self, RecordError> {
        let fields = Fields(row);
        let kind = row.get(0).ok_or(RecordError::Empty)?;
        if row.len() == 1 && kind.is_empty() {
            return Err(RecordError::Empty);
        }

        let request = match kind.to_ascii_uppercase().as_str() {
            "PLACE" => {
                fields.expect_len("PLACE", "5 or 6", |n| n == 5 || n == 6)?;
                CommandRequest::Place {
                    side: fields.parse("side", 2)?,
                    quantity: fields.parse("quantity", 3)?,
                    price: fields.parse("price", 4)?,
                    client_order_id: row
                        .get(5)
                        .filter(|cid| !cid.is_empty())
                        .map(str::to_string),
                }
            }
            "CANCEL" => {
                fields.expect_len("CANCEL", "3", |n| n == 3)?;
                CommandRequest::Cancel {
                    order_id: fields.order_id(2)?,
                }
            }
            "FILL" => {
                fields.expect_len("FILL", "5", |n| n == 5)?;
                CommandRequest::Fill {
                    order_id: fields.order_id(2)?,
                    quantity: fields.parse("quantity", 3)?,
                    price: fields.parse("price", 4)?,
                }
            }
            "CANDLE" => {
                fields.expect_len("CANDLE", "8", |n| n == 8)?;
                CommandRequest::Candle(Candle {
                    time: fields.time_ms(2)?,
                    open: fields.parse("open", 3)?,
                    high: fields.parse("high", 4)?,
                    low: fields.parse("low", 5)?,
                    close: fields.parse("close", 6)?,
                    volume: fields.parse("volume", 7)?,
                })
            }
            "REGISTER" => {
                fields.expect_len("REGISTER", "9", |n| n == 9)?;
                CommandRequest::Register(TraderProfile {
                    base_asset: fields.text("base", 2)?.to_ascii_uppercase(),
                    quote_asset: fields.text("quote", 3)?.to_ascii_uppercase(),
                    base_balance: fields.parse("base_balance", 4)?,
                    quote_balance: fields.parse("quote_balance", 5)?,
                    ma_kind: fields.parse::<MovingAverageKind>("ma_kind", 6)?,
                    short_period: fields.parse("short", 7)?,
                    long_period: fields.parse("long", 8)?,
                })
            }
            other => return Err(RecordError::UnknownKind(other.to_string())),
        };

        let entity = fields.text("entity", 1)?;
        let entity_id = EntityId::new(entity).map_err(|e| RecordError::InvalidField {
            field: "entity",
            value: entity.to_string(),
            reason: e.to_string(),
        })?;

        Ok(IngestRecord {
            line,
            entity_id,
            request,
        })
    }

    /// Default a missing client order id to one derived from the row's origin
    pub fn keyed_by_source(mut self, source: &str) -> Self {
        if let CommandRequest::Place {
            client_order_id, ..
        } = &mut self.request
            && client_order_id.is_none()
        {
            *client_order_id = Some(format!("{source}:{}", self.line));
        }
        self
    }
}

struct Fields<'a>(&'a StringRecord);

impl Fields<'_> {
    fn expect_len(
        &self,
        kind: &'static str,
        expected: &'static str,
        ok: impl Fn(usize) -> bool,
    ) -> Result<(), RecordError> {
        if ok(self.0.len()) {
            Ok(())
        } else {
            Err(RecordError::ColumnCount {
                kind,
                expected,
                actual: self.0.len(),
            })
        }
    }

    fn text(&self, field: &'static str, index: usize) -> Result<&str, RecordError> {
        match self.0.get(index) {
            Some(value) if !value.is_empty() => Ok(value),
            value => Err(RecordError::InvalidField {
                field,
                value: value.unwrap_or_default().to_string(),
                reason: "missing value".to_string(),
            }),
        }
    }

    fn parse<T>(&self, field: &'static str, index: usize) -> Result<T, RecordError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        let value = self.text(field, index)?;
        value.parse().map_err(|e: T::Err| RecordError::InvalidField {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
    }

    fn order_id(&self, index: usize) -> Result<OrderId, RecordError> {
        self.text("order_id", index).map(OrderId::new)
    }

    fn time_ms(&self, index: usize) -> Result<Timestamp, RecordError> {
        let millis: i64 = self.parse("time_ms", index)?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| RecordError::InvalidField {
                field: "time_ms",
                value: millis.to_string(),
                reason: "out of range".to_string(),
            })
    }
}
