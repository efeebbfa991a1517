use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Candle, TraderCommand, TraderEvent, TraderReply};
use crate::entities::{Holding, Order, OrderStatus, Side, TraderProfile};
use crate::error::CommandError;
use crate::event_sourced::{Decision, EventSourced};
use crate::indicators::MovingAverage;
use crate::values::{OrderId, Price, Quantity, Timestamp};

type TraderDecision = Decision<TraderEvent, TraderReply>;

/// Balance movements caused by one fill
#[derive(Debug, Clone, Copy, Default)]
struct Settlement {
    consumed: Decimal,
    base_credit: Decimal,
    quote_credit: Decimal,
}

/// In-memory projection of one trader, rebuilt from its events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraderState {
    pub profile: Option<TraderProfile>,
    pub base: Holding,
    pub quote: Holding,
    /// Every order ever placed, open or closed
    pub orders: BTreeMap<OrderId, Order>,
    pub client_orders: BTreeMap<String, OrderId>,
    pub orders_placed: u64,
    pub short_ma: Option<MovingAverage>,
    pub long_ma: Option<MovingAverage>,
    pub last_candle_at: Option<Timestamp>,
}

impl TraderState {
    pub fn is_registered(&self) -> bool {
        self.profile.is_some()
    }

    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| o.is_open())
    }

    pub fn short_ma_value(&self) -> Option<Decimal> {
        self.short_ma.as_ref().and_then(MovingAverage::value)
    }

    pub fn long_ma_value(&self) -> Option<Decimal> {
        self.long_ma.as_ref().and_then(MovingAverage::value)
    }

    fn register(&self, profile: &TraderProfile) -> Result<TraderDecision, CommandError> {
        profile.validate()?;
        match &self.profile {
            Some(existing) if existing == profile => {
                Ok(Decision::reply_only(TraderReply::Registered {
                    profile: existing.clone(),
                }))
            }
            Some(_) => Err(CommandError::AlreadyRegistered),
            None => Ok(Decision::new(
                vec![TraderEvent::TraderRegistered {
                    profile: profile.clone(),
                }],
                TraderReply::Registered {
                    profile: profile.clone(),
                },
            )),
        }
    }

    fn place_order(
        &self,
        side: Side,
        quantity: Quantity,
        price: Price,
        client_order_id: Option<&String>,
        placed_at: Timestamp,
    ) -> Result<TraderDecision, CommandError> {
        if quantity <= Decimal::ZERO {
            return Err(CommandError::InvalidQuantity(quantity));
        }
        if price <= Decimal::ZERO {
            return Err(CommandError::InvalidPrice(price));
        }

        if let Some(cid) = client_order_id
            && let Some(existing) = self.client_orders.get(cid).and_then(|id| self.orders.get(id))
        {
            if existing.same_terms(side, quantity, price) {
                return Ok(Decision::reply_only(TraderReply::OrderAccepted {
                    order_id: existing.id.clone(),
                }));
            }
            return Err(CommandError::DuplicateClientOrderId(cid.clone()));
        }

        let reserved = match &self.profile {
            None => Decimal::ZERO,
            Some(profile) => {
                let (asset, required, available) = match side {
                    Side::Buy => (
                        &profile.quote_asset,
                        quantity
                            .checked_mul(price)
                            .ok_or(CommandError::AmountOverflow("order value"))?,
                        self.quote.available,
                    ),
                    Side::Sell => (&profile.base_asset, quantity, self.base.available),
                };
                if available < required {
                    return Err(CommandError::InsufficientBalance {
                        asset: asset.clone(),
                        required,
                        available,
                    });
                }
                required
            }
        };

        let order_id = OrderId::from_number(self.orders_placed + 1);
        Ok(Decision::new(
            vec![TraderEvent::OrderPlaced {
                order_id: order_id.clone(),
                side,
                quantity,
                price,
                client_order_id: client_order_id.cloned(),
                reserved,
                placed_at,
            }],
            TraderReply::OrderAccepted { order_id },
        ))
    }

    fn cancel_order(
        &self,
        order_id: &OrderId,
        cancelled_at: Timestamp,
    ) -> Result<TraderDecision, CommandError> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| CommandError::UnknownOrder(order_id.clone()))?;

        let reply = TraderReply::OrderCancelled {
            order_id: order_id.clone(),
            unfilled_quantity: order.remaining_quantity(),
        };

        match order.status {
            OrderStatus::Cancelled => Ok(Decision::reply_only(reply)),
            OrderStatus::Filled => Err(CommandError::OrderNotOpen {
                order_id: order_id.clone(),
                status: order.status,
            }),
            OrderStatus::Open | OrderStatus::PartiallyFilled => Ok(Decision::new(
                vec![TraderEvent::OrderCancelled {
                    order_id: order_id.clone(),
                    released: order.reserved,
                    cancelled_at,
                }],
                reply,
            )),
        }
    }

    fn fill_order(
        &self,
        order_id: &OrderId,
        quantity: Quantity,
        price: Price,
        filled_at: Timestamp,
    ) -> Result<TraderDecision, CommandError> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| CommandError::UnknownOrder(order_id.clone()))?;

        if !order.is_open() {
            return Err(CommandError::OrderNotOpen {
                order_id: order_id.clone(),
                status: order.status,
            });
        }
        if quantity <= Decimal::ZERO {
            return Err(CommandError::InvalidQuantity(quantity));
        }
        if price <= Decimal::ZERO {
            return Err(CommandError::InvalidPrice(price));
        }
        let remaining = order.remaining_quantity();
        if quantity > remaining {
            return Err(CommandError::FillExceedsRemaining {
                order_id: order_id.clone(),
                requested: quantity,
                remaining,
            });
        }
        let beyond_limit = match order.side {
            Side::Buy => price > order.price,
            Side::Sell => price < order.price,
        };
        if beyond_limit {
            return Err(CommandError::PriceOutsideLimit {
                order_id: order_id.clone(),
                side: order.side,
                limit: order.price,
                price,
            });
        }

        let remaining_after = remaining - quantity;
        let status = if remaining_after.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        let settlement = self.settle_fill(order, quantity, price, remaining_after.is_zero())?;

        Ok(Decision::new(
            vec![TraderEvent::OrderFilled {
                order_id: order_id.clone(),
                quantity,
                price,
                consumed: settlement.consumed,
                base_credit: settlement.base_credit,
                quote_credit: settlement.quote_credit,
                filled_at,
            }],
            TraderReply::OrderFilled {
                order_id: order_id.clone(),
                filled_quantity: order.filled_quantity + quantity,
                remaining_quantity: remaining_after,
                status,
            },
        ))
    }

    /// Balance movements of a fill, checked against overflow
    fn settle_fill(
        &self,
        order: &Order,
        quantity: Quantity,
        price: Price,
        complete: bool,
    ) -> Result<Settlement, CommandError> {
        if !order.is_funded() {
            return Ok(Settlement::default());
        }
        let cost = quantity
            .checked_mul(price)
            .ok_or(CommandError::AmountOverflow("fill value"))?;

        let settlement = match order.side {
            Side::Buy => {
                // Reserved at the limit; the final fill takes whatever is
                // left so no dust stays reserved
                let consumed = if complete {
                    order.reserved
                } else {
                    quantity
                        .checked_mul(order.price)
                        .map_or(order.reserved, |at_limit| at_limit.min(order.reserved))
                };
                Settlement {
                    consumed,
                    base_credit: quantity,
                    quote_credit: (consumed - cost).max(Decimal::ZERO),
                }
            }
            Side::Sell => Settlement {
                consumed: if complete {
                    order.reserved
                } else {
                    quantity.min(order.reserved)
                },
                base_credit: Decimal::ZERO,
                quote_credit: cost,
            },
        };

        let (base_consumed, quote_consumed) = match order.side {
            Side::Buy => (Decimal::ZERO, settlement.consumed),
            Side::Sell => (settlement.consumed, Decimal::ZERO),
        };
        if !self.base.can_settle(base_consumed, settlement.base_credit) {
            return Err(CommandError::AmountOverflow("base balance"));
        }
        if !self.quote.can_settle(quote_consumed, settlement.quote_credit) {
            return Err(CommandError::AmountOverflow("quote balance"));
        }
        Ok(settlement)
    }

    fn add_candle(&self, candle: &Candle) -> Result<TraderDecision, CommandError> {
        if !self.is_registered() {
            return Err(CommandError::NotRegistered);
        }
        candle.validate()?;

        if let Some(last) = self.last_candle_at
            && candle.time <= last
        {
            return Ok(Decision::reply_only(TraderReply::CandleAccepted {
                time: candle.time,
                short_ma: self.short_ma_value(),
                long_ma: self.long_ma_value(),
            }));
        }

        let mut events = vec![TraderEvent::CandleRecorded {
            time: candle.time,
            close: candle.close,
        }];

        let mut updated = |ma: &Option<MovingAverage>| -> Option<Decimal> {
            let mut ma = ma.clone()?;
            let value = ma.update(candle.close)?;
            events.push(TraderEvent::MovingAverageUpdated {
                period: ma.period(),
                value,
                time: candle.time,
            });
            Some(value)
        };
        let short_ma = updated(&self.short_ma);
        let long_ma = updated(&self.long_ma);

        Ok(Decision::new(
            events,
            TraderReply::CandleAccepted {
                time: candle.time,
                short_ma,
                long_ma,
            },
        ))
    }

    fn on_registered(&mut self, profile: &TraderProfile) {
        if self.profile.is_some() {
            return;
        }
        self.base.credit(profile.base_balance);
        self.quote.credit(profile.quote_balance);
        self.short_ma = Some(MovingAverage::new(profile.ma_kind, profile.short_period));
        self.long_ma = Some(MovingAverage::new(profile.ma_kind, profile.long_period));
        self.profile = Some(profile.clone());
    }

    #[allow(clippy::too_many_arguments)]
    fn on_order_placed(
        &mut self,
        order_id: &OrderId,
        side: Side,
        quantity: Quantity,
        price: Price,
        client_order_id: &Option<String>,
        reserved: Decimal,
        placed_at: Timestamp,
    ) {
        self.orders_placed += 1;
        match side {
            Side::Buy => self.quote.reserve(reserved),
            Side::Sell => self.base.reserve(reserved),
        }
        if let Some(cid) = client_order_id {
            self.client_orders.insert(cid.clone(), order_id.clone());
        }
        self.orders.insert(
            order_id.clone(),
            Order {
                id: order_id.clone(),
                side,
                quantity,
                filled_quantity: Decimal::ZERO,
                price,
                client_order_id: client_order_id.clone(),
                status: OrderStatus::Open,
                reserved,
                placed_at,
                updated_at: placed_at,
            },
        );
    }

    fn on_order_cancelled(&mut self, order_id: &OrderId, released: Decimal, at: Timestamp) {
        let Some(order) = self.orders.get_mut(order_id) else {
            return;
        };
        match order.side {
            Side::Buy => self.quote.release(released),
            Side::Sell => self.base.release(released),
        }
        order.reserved -= released;
        order.status = OrderStatus::Cancelled;
        order.updated_at = at;
    }

    fn on_order_filled(
        &mut self,
        order_id: &OrderId,
        quantity: Quantity,
        settlement: Settlement,
        at: Timestamp,
    ) {
        let Some(order) = self.orders.get_mut(order_id) else {
            return;
        };
        order.filled_quantity += quantity;
        order.status = if order.remaining_quantity() <= Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.updated_at = at;
        order.reserved -= settlement.consumed;

        match order.side {
            Side::Buy => self.quote.consume(settlement.consumed),
            Side::Sell => self.base.consume(settlement.consumed),
        }
        self.base.credit(settlement.base_credit);
        self.quote.credit(settlement.quote_credit);
    }

    fn on_candle_recorded(&mut self, time: Timestamp, close: Price) {
        if let Some(ma) = self.short_ma.as_mut() {
            ma.update(close);
        }
        if let Some(ma) = self.long_ma.as_mut() {
            ma.update(close);
        }
        self.last_candle_at = Some(time);
    }
}

impl EventSourced for TraderState {
    type Command = TraderCommand;
    type Event = TraderEvent;
    type Reply = TraderReply;
    type Error = CommandError;

    const ENTITY_TYPE: &'static str = "trader";

    fn handle(&self, command: &TraderCommand) -> Result<TraderDecision, CommandError> {
        match command {
            TraderCommand::Register { profile } => self.register(profile),
            TraderCommand::PlaceOrder {
                side,
                quantity,
                price,
                client_order_id,
                placed_at,
            } => self.place_order(
                *side,
                *quantity,
                *price,
                client_order_id.as_ref(),
                *placed_at,
            ),
            TraderCommand::CancelOrder {
                order_id,
                cancelled_at,
            } => self.cancel_order(order_id, *cancelled_at),
            TraderCommand::FillOrder {
                order_id,
                quantity,
                price,
                filled_at,
            } => self.fill_order(order_id, *quantity, *price, *filled_at),
            TraderCommand::AddCandle { candle } => self.add_candle(candle),
        }
    }

    fn apply(&mut self, event: &TraderEvent) {
        match event {
            TraderEvent::TraderRegistered { profile } => self.on_registered(profile),
            TraderEvent::OrderPlaced {
                order_id,
                side,
                quantity,
                price,
                client_order_id,
                reserved,
                placed_at,
            } => self.on_order_placed(
                order_id,
                *side,
                *quantity,
                *price,
                client_order_id,
                *reserved,
                *placed_at,
            ),
            TraderEvent::OrderCancelled {
                order_id,
                released,
                cancelled_at,
            } => self.on_order_cancelled(order_id, *released, *cancelled_at),
            TraderEvent::OrderFilled {
                order_id,
                quantity,
                consumed,
                base_credit,
                quote_credit,
                filled_at,
                ..
            } => self.on_order_filled(
                order_id,
                *quantity,
                Settlement {
                    consumed: *consumed,
                    base_credit: *base_credit,
                    quote_credit: *quote_credit,
                },
                *filled_at,
            ),
            TraderEvent::CandleRecorded { time, close } => self.on_candle_recorded(*time, *close),
            TraderEvent::MovingAverageUpdated { .. } => {}
        }
    }

    fn event_name(event: &TraderEvent) -> &'static str {
        event.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::MovingAverageKind;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn at(ms: i64) -> Timestamp {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn profile() -> TraderProfile {
        TraderProfile {
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            base_balance: dec!(2),
            quote_balance: dec!(10000),
            ma_kind: MovingAverageKind::Simple,
            short_period: 2,
            long_period: 3,
        }
    }

    /// Handle a command and apply its events, like the runtime does
    fn execute(
        state: &mut TraderState,
        command: TraderCommand,
    ) -> Result<(Vec<TraderEvent>, TraderReply), CommandError> {
        let decision = state.handle(&command)?;
        for event in &decision.events {
            state.apply(event);
        }
        Ok((decision.events, decision.reply))
    }

    fn place(side: Side, quantity: Decimal, price: Decimal) -> TraderCommand {
        TraderCommand::PlaceOrder {
            side,
            quantity,
            price,
            client_order_id: None,
            placed_at: at(1),
        }
    }

    fn registered() -> TraderState {
        let mut state = TraderState::default();
        execute(&mut state, TraderCommand::Register { profile: profile() }).unwrap();
        state
    }

    #[test]
    fn test_register_credits_balances() {
        let state = registered();
        assert!(state.is_registered());
        assert_eq!(state.base.available, dec!(2));
        assert_eq!(state.quote.available, dec!(10000));
        assert_eq!(state.short_ma.as_ref().unwrap().period(), 2);
    }

    #[test]
    fn test_register_twice_same_profile_is_noop() {
        let mut state = registered();
        let (events, reply) =
            execute(&mut state, TraderCommand::Register { profile: profile() }).unwrap();
        assert!(events.is_empty());
        assert_eq!(reply, TraderReply::Registered { profile: profile() });
        assert_eq!(state.quote.available, dec!(10000));
    }

    #[test]
    fn test_register_with_different_profile_rejected() {
        let mut state = registered();
        let mut other = profile();
        other.quote_balance = dec!(1);
        assert_eq!(
            execute(&mut state, TraderCommand::Register { profile: other }),
            Err(CommandError::AlreadyRegistered)
        );
    }

    #[test]
    fn test_place_order_reserves_quote_for_buy() {
        let mut state = registered();
        let (events, reply) = execute(&mut state, place(Side::Buy, dec!(0.5), dec!(100))).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(
            reply,
            TraderReply::OrderAccepted {
                order_id: OrderId::from("order-1")
            }
        );
        assert_eq!(state.quote.available, dec!(9950));
        assert_eq!(state.quote.reserved, dec!(50));
    }

    #[test]
    fn test_place_order_insufficient_balance() {
        let state = registered();
        let err = state
            .handle(&place(Side::Sell, dec!(3), dec!(100)))
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::InsufficientBalance {
                asset: "BTC".to_string(),
                required: dec!(3),
                available: dec!(2),
            }
        );
    }

    #[test]
    fn test_place_order_validates_terms() {
        let state = TraderState::default();
        assert_eq!(
            state.handle(&place(Side::Buy, dec!(0), dec!(100))),
            Err(CommandError::InvalidQuantity(dec!(0)))
        );
        assert_eq!(
            state.handle(&place(Side::Buy, dec!(1), dec!(-1))),
            Err(CommandError::InvalidPrice(dec!(-1)))
        );
    }

    #[test]
    fn test_unregistered_trader_tracks_orders_without_reservation() {
        let mut state = TraderState::default();
        execute(&mut state, place(Side::Buy, dec!(10), dec!(100.0))).unwrap();

        let order = state.order(&OrderId::from("order-1")).unwrap();
        assert_eq!(order.reserved, dec!(0));
        assert_eq!(state.quote, Holding::default());
    }

    #[test]
    fn test_client_order_id_retry_is_idempotent() {
        let mut state = registered();
        let cmd = TraderCommand::PlaceOrder {
            side: Side::Buy,
            quantity: dec!(1),
            price: dec!(100),
            client_order_id: Some("c-1".to_string()),
            placed_at: at(5),
        };
        let (first_events, first) = execute(&mut state, cmd.clone()).unwrap();
        let (second_events, second) = execute(&mut state, cmd).unwrap();

        assert_eq!(first_events.len(), 1);
        assert!(second_events.is_empty());
        assert_eq!(first, second);
        assert_eq!(state.orders.len(), 1);
    }

    #[test]
    fn test_client_order_id_reuse_with_other_terms_rejected() {
        let mut state = registered();
        let mut cmd = TraderCommand::PlaceOrder {
            side: Side::Buy,
            quantity: dec!(1),
            price: dec!(100),
            client_order_id: Some("c-1".to_string()),
            placed_at: at(5),
        };
        execute(&mut state, cmd.clone()).unwrap();
        if let TraderCommand::PlaceOrder { quantity, .. } = &mut cmd {
            *quantity = dec!(2);
        }
        assert_eq!(
            state.handle(&cmd),
            Err(CommandError::DuplicateClientOrderId("c-1".to_string()))
        );
    }

    #[test]
    fn test_cancel_releases_reservation_and_is_idempotent() {
        let mut state = registered();
        execute(&mut state, place(Side::Buy, dec!(2), dec!(100))).unwrap();

        let cancel = TraderCommand::CancelOrder {
            order_id: OrderId::from("order-1"),
            cancelled_at: at(9),
        };
        let (events, first) = execute(&mut state, cancel.clone()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(state.quote.available, dec!(10000));
        assert_eq!(state.quote.reserved, dec!(0));

        let (events, second) = execute(&mut state, cancel).unwrap();
        assert!(events.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_cancel_unknown_order() {
        let state = registered();
        let err = state
            .handle(&TraderCommand::CancelOrder {
                order_id: OrderId::from("order-7"),
                cancelled_at: at(1),
            })
            .unwrap_err();
        assert_eq!(err, CommandError::UnknownOrder(OrderId::from("order-7")));
    }

    #[test]
    fn test_buy_fill_with_price_improvement() {
        let mut state = registered();
        execute(&mut state, place(Side::Buy, dec!(2), dec!(100))).unwrap();

        let (_, reply) = execute(
            &mut state,
            TraderCommand::FillOrder {
                order_id: OrderId::from("order-1"),
                quantity: dec!(1),
                price: dec!(90),
                filled_at: at(3),
            },
        )
        .unwrap();
        assert_eq!(
            reply,
            TraderReply::OrderFilled {
                order_id: OrderId::from("order-1"),
                filled_quantity: dec!(1),
                remaining_quantity: dec!(1),
                status: OrderStatus::PartiallyFilled,
            }
        );
        // 200 reserved, 100 consumed, 10 refunded
        assert_eq!(state.quote.reserved, dec!(100));
        assert_eq!(state.quote.available, dec!(9810));
        assert_eq!(state.base.available, dec!(3));

        execute(
            &mut state,
            TraderCommand::FillOrder {
                order_id: OrderId::from("order-1"),
                quantity: dec!(1),
                price: dec!(100),
                filled_at: at(4),
            },
        )
        .unwrap();
        assert_eq!(state.quote.reserved, dec!(0));
        assert_eq!(state.quote.available, dec!(9810));
        assert_eq!(state.base.available, dec!(4));
        assert_eq!(state.open_orders().count(), 0);
    }

    #[test]
    fn test_sell_fill_credits_quote() {
        let mut state = registered();
        execute(&mut state, place(Side::Sell, dec!(1), dec!(100))).unwrap();
        execute(
            &mut state,
            TraderCommand::FillOrder {
                order_id: OrderId::from("order-1"),
                quantity: dec!(1),
                price: dec!(105),
                filled_at: at(2),
            },
        )
        .unwrap();
        assert_eq!(state.base.total(), dec!(1));
        assert_eq!(state.quote.available, dec!(10105));
    }

    #[test]
    fn test_fill_rules() {
        let mut state = registered();
        execute(&mut state, place(Side::Buy, dec!(1), dec!(100))).unwrap();
        let fill = |quantity, price| TraderCommand::FillOrder {
            order_id: OrderId::from("order-1"),
            quantity,
            price,
            filled_at: at(2),
        };

        assert!(matches!(
            state.handle(&fill(dec!(2), dec!(100))),
            Err(CommandError::FillExceedsRemaining { .. })
        ));
        assert!(matches!(
            state.handle(&fill(dec!(1), dec!(101))),
            Err(CommandError::PriceOutsideLimit { .. })
        ));

        execute(&mut state, fill(dec!(1), dec!(100))).unwrap();
        assert!(matches!(
            state.handle(&fill(dec!(1), dec!(100))),
            Err(CommandError::OrderNotOpen {
                status: OrderStatus::Filled,
                ..
            })
        ));
        assert!(matches!(
            state.handle(&TraderCommand::CancelOrder {
                order_id: OrderId::from("order-1"),
                cancelled_at: at(3),
            }),
            Err(CommandError::OrderNotOpen { .. })
        ));
    }

    fn candle(ms: i64, close: Decimal) -> TraderCommand {
        TraderCommand::AddCandle {
            candle: Candle {
                time: at(ms),
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(1),
            },
        }
    }

    #[test]
    fn test_candle_requires_registration() {
        let state = TraderState::default();
        assert_eq!(
            state.handle(&candle(1, dec!(10))),
            Err(CommandError::NotRegistered)
        );
    }

    #[test]
    fn test_candles_drive_moving_averages() {
        let mut state = registered();

        let (events, _) = execute(&mut state, candle(1, dec!(10))).unwrap();
        assert_eq!(events.len(), 1);

        let (events, reply) = execute(&mut state, candle(2, dec!(20))).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            reply,
            TraderReply::CandleAccepted {
                time: at(2),
                short_ma: Some(dec!(15)),
                long_ma: None,
            }
        );

        let (events, reply) = execute(&mut state, candle(3, dec!(30))).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            reply,
            TraderReply::CandleAccepted {
                time: at(3),
                short_ma: Some(dec!(25)),
                long_ma: Some(dec!(20)),
            }
        );
    }

    #[test]
    fn test_stale_candle_is_acknowledged_without_events() {
        let mut state = registered();
        execute(&mut state, candle(5, dec!(10))).unwrap();
        let before = state.clone();

        let (events, _) = execute(&mut state, candle(5, dec!(99))).unwrap();
        assert!(events.is_empty());
        assert_eq!(state, before);
    }

    #[test]
    fn test_oversized_buy_is_rejected_not_panicking() {
        let state = registered();
        assert_eq!(
            state.handle(&place(Side::Buy, Decimal::MAX, dec!(2))),
            Err(CommandError::AmountOverflow("order value"))
        );
    }

    #[test]
    fn test_sell_fill_overflowing_proceeds_is_rejected() {
        let mut state = registered();
        execute(&mut state, place(Side::Sell, dec!(2), dec!(1))).unwrap();
        let before = state.clone();

        let fill = |quantity, price| TraderCommand::FillOrder {
            order_id: OrderId::from("order-1"),
            quantity,
            price,
            filled_at: at(2),
        };
        assert_eq!(
            execute(&mut state, fill(dec!(2), Decimal::MAX / dec!(1.5))),
            Err(CommandError::AmountOverflow("fill value"))
        );
        // Proceeds fit on their own but not on top of the quote balance
        assert_eq!(
            execute(&mut state, fill(dec!(1), Decimal::MAX)),
            Err(CommandError::AmountOverflow("quote balance"))
        );
        assert_eq!(state, before);

        execute(&mut state, fill(dec!(2), dec!(3))).unwrap();
        assert_eq!(state.quote.available, dec!(10006));
        assert_eq!(state.base.reserved, dec!(0));
    }

    #[test]
    fn test_fill_event_replays_recorded_amounts() {
        let mut state = registered();
        execute(&mut state, place(Side::Buy, dec!(2), dec!(100))).unwrap();
        let (events, _) = execute(
            &mut state,
            TraderCommand::FillOrder {
                order_id: OrderId::from("order-1"),
                quantity: dec!(1),
                price: dec!(90),
                filled_at: at(3),
            },
        )
        .unwrap();
        assert!(matches!(
            &events[0],
            TraderEvent::OrderFilled {
                consumed,
                base_credit,
                quote_credit,
                ..
            } if *consumed == dec!(100) && *base_credit == dec!(1) && *quote_credit == dec!(10)
        ));
    }

    #[test]
    fn test_rejection_leaves_state_untouched() {
        let mut state = registered();
        let before = state.clone();
        assert!(execute(&mut state, place(Side::Buy, dec!(1000), dec!(1000))).is_err());
        assert_eq!(state, before);
    }
}
