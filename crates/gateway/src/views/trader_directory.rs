use dashmap::DashMap;
use futures_util::StreamExt;
use kestrel_core::{Asset, EntityId, EventSourced, Price, TraderEvent, TraderState};
use kestrel_ports::{EventLog, LogError};
use kestrel_runtime::CommittedEvent;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One row of the trader directory
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderSummary {
    pub entity_id: EntityId,
    pub base_asset: Asset,
    pub quote_asset: Asset,
    pub base_available: Decimal,
    pub base_reserved: Decimal,
    pub quote_available: Decimal,
    pub quote_reserved: Decimal,
    pub open_orders: usize,
    pub short_ma: Option<Decimal>,
    pub long_ma: Option<Decimal>,
    pub last_fill_price: Option<Price>,
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct Projection {
    state: TraderState,
    sequence: u64,
    last_fill_price: Option<Price>,
}

impl Projection {
    fn apply(&mut self, sequence: u64, event: &TraderEvent) {
        if let TraderEvent::OrderFilled { price, .. } = event {
            self.last_fill_price = Some(*price);
        }
        self.state.apply(event);
        self.sequence = sequence;
    }

    fn summary(&self, entity_id: &EntityId) -> Option<TraderSummary> {
        let profile = self.state.profile.as_ref()?;
        Some(TraderSummary {
            entity_id: entity_id.clone(),
            base_asset: profile.base_asset.clone(),
            quote_asset: profile.quote_asset.clone(),
            base_available: self.state.base.available,
            base_reserved: self.state.base.reserved,
            quote_available: self.state.quote.available,
            quote_reserved: self.state.quote.reserved,
            open_orders: self.state.open_orders().count(),
            short_ma: self.state.short_ma_value(),
            long_ma: self.state.long_ma_value(),
            last_fill_price: self.last_fill_price,
            sequence: self.sequence,
        })
    }
}

/// Directory of registered traders, kept up to date from committed events
///
/// Eventually consistent: it lags the entities by however long the
/// broadcast takes. When it notices a gap (a lagging receiver, or an entity
/// whose history predates this process) it rebuilds that trader from the log.
#[derive(Default)]
pub struct TraderDirectory {
    traders: DashMap<EntityId, Projection>,
}

impl TraderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed event. Returns false when it does not follow
    /// the last one seen for its entity.
    pub fn apply(&self, committed: &CommittedEvent<TraderEvent>) -> bool {
        let mut projection = self.traders.entry(committed.entity_id.clone()).or_default();
        if committed.sequence <= projection.sequence {
            return true;
        }
        if committed.sequence != projection.sequence + 1 {
            return false;
        }
        projection.apply(committed.sequence, &committed.event);
        true
    }

    /// Replace a trader's projection with a replay of its log
    pub async fn rebuild<L: EventLog>(&self, log: &L, entity_id: &EntityId) -> Result<(), LogError> {
        let mut projection = Projection::default();
        let mut events = log.read_from(entity_id, 0).await?;
        while let Some(persisted) = events.next().await {
            let persisted = persisted?;
            let event = persisted.decode::<TraderState>()?;
            projection.apply(persisted.sequence, &event);
        }
        debug!(entity_id = %entity_id, sequence = projection.sequence, "Directory entry rebuilt");
        self.traders.insert(entity_id.clone(), projection);
        Ok(())
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<TraderSummary> {
        self.traders.get(entity_id)?.summary(entity_id)
    }

    /// Registered traders trading `base_asset`, ordered by id
    pub fn traders_by_base_asset(&self, base_asset: &str) -> Vec<TraderSummary> {
        let mut traders: Vec<TraderSummary> = self
            .traders
            .iter()
            .filter_map(|entry| entry.value().summary(entry.key()))
            .filter(|summary| summary.base_asset.eq_ignore_ascii_case(base_asset))
            .collect();
        traders.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        traders
    }

    /// Registered traders, ordered by id
    pub fn all(&self) -> Vec<TraderSummary> {
        let mut traders: Vec<TraderSummary> = self
            .traders
            .iter()
            .filter_map(|entry| entry.value().summary(entry.key()))
            .collect();
        traders.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        traders
    }

    /// Keep the directory current until the event channel closes
    pub fn spawn_projection<L: EventLog>(
        self: Arc<Self>,
        log: Arc<L>,
        mut events: broadcast::Receiver<CommittedEvent<TraderEvent>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(committed) => {
                        if self.apply(&committed) {
                            continue;
                        }
                        if let Err(e) = self.rebuild(log.as_ref(), &committed.entity_id).await {
                            warn!(entity_id = %committed.entity_id, error = %e, "Directory rebuild failed");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Gaps are repaired when the next event shows up
                        warn!(skipped, "Directory projection lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Directory projection stopped");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kestrel_core::{MovingAverageKind, OrderId, Side, TraderProfile};
    use kestrel_event_log::InMemoryEventLog;
    use kestrel_ports::PersistedEvent;
    use rust_decimal_macros::dec;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn registered(base: &str) -> TraderEvent {
        TraderEvent::TraderRegistered {
            profile: TraderProfile {
                base_asset: base.to_string(),
                quote_asset: "USDT".to_string(),
                base_balance: dec!(1),
                quote_balance: dec!(1000),
                ma_kind: MovingAverageKind::Simple,
                short_period: 2,
                long_period: 4,
            },
        }
    }

    fn committed(entity: &str, sequence: u64, event: TraderEvent) -> CommittedEvent<TraderEvent> {
        CommittedEvent {
            entity_id: id(entity),
            sequence,
            event,
        }
    }

    #[test]
    fn test_traders_by_base_asset() {
        let directory = TraderDirectory::new();
        assert!(directory.apply(&committed("b-trader", 1, registered("BTC"))));
        assert!(directory.apply(&committed("a-trader", 1, registered("BTC"))));
        assert!(directory.apply(&committed("eth-trader", 1, registered("ETH"))));

        let btc: Vec<_> = directory
            .traders_by_base_asset("btc")
            .into_iter()
            .map(|s| s.entity_id.to_string())
            .collect();
        assert_eq!(btc, vec!["a-trader", "b-trader"]);
        assert_eq!(directory.all().len(), 3);
    }

    #[test]
    fn test_unregistered_entities_are_not_listed() {
        let directory = TraderDirectory::new();
        let placed = TraderEvent::OrderPlaced {
            order_id: OrderId::from("order-1"),
            side: Side::Buy,
            quantity: dec!(1),
            price: dec!(1),
            client_order_id: None,
            reserved: dec!(0),
            placed_at: Utc.timestamp_millis_opt(0).unwrap(),
        };
        assert!(directory.apply(&committed("acct1", 1, placed)));
        assert!(directory.get(&id("acct1")).is_none());
        assert!(directory.all().is_empty());
    }

    #[test]
    fn test_gap_is_reported_and_duplicates_ignored() {
        let directory = TraderDirectory::new();
        assert!(directory.apply(&committed("acct1", 1, registered("BTC"))));
        assert!(directory.apply(&committed("acct1", 1, registered("BTC"))));
        assert!(!directory.apply(&committed(
            "acct1",
            3,
            TraderEvent::CandleRecorded {
                time: Utc.timestamp_millis_opt(0).unwrap(),
                close: dec!(1),
            }
        )));
        assert_eq!(directory.get(&id("acct1")).unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_rebuild_from_log() {
        let log = InMemoryEventLog::new();
        let acct = id("acct1");
        let filled = TraderEvent::OrderPlaced {
            order_id: OrderId::from("order-1"),
            side: Side::Sell,
            quantity: dec!(1),
            price: dec!(10),
            client_order_id: None,
            reserved: dec!(1),
            placed_at: Utc.timestamp_millis_opt(0).unwrap(),
        };
        let fill = TraderEvent::OrderFilled {
            order_id: OrderId::from("order-1"),
            quantity: dec!(1),
            price: dec!(12),
            consumed: dec!(1),
            base_credit: dec!(0),
            quote_credit: dec!(12),
            filled_at: Utc.timestamp_millis_opt(1).unwrap(),
        };
        let batch = [registered("BTC"), filled, fill]
            .iter()
            .zip(1..)
            .map(|(event, seq)| PersistedEvent::encode::<TraderState>(seq, event).unwrap())
            .collect();
        log.append(&acct, 0, batch).await.unwrap();

        let directory = TraderDirectory::new();
        directory.rebuild(&log, &acct).await.unwrap();

        let summary = directory.get(&acct).unwrap();
        assert_eq!(summary.sequence, 3);
        assert_eq!(summary.last_fill_price, Some(dec!(12)));
        assert_eq!(summary.base_available, dec!(0));
        assert_eq!(summary.quote_available, dec!(1012));
        assert_eq!(summary.open_orders, 0);
    }
}
