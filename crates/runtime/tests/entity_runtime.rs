//! Integration tests for the entity runtime
//!
//! Tests ordering, recovery and eviction against the in-memory log:
//! - Per-entity serialization under concurrent dispatch
//! - Replay and snapshot recovery after restart
//! - Passivation (explicit, idle, resident cap) with queued work

use chrono::{TimeZone, Utc};
use futures_util::TryStreamExt;
use kestrel_core::{
    EntityId, EventSourced, MovingAverageKind, OrderId, OrderStatus, Side, Timestamp,
    TraderCommand, TraderEvent, TraderProfile, TraderReply, TraderState,
};
use kestrel_event_log::InMemoryEventLog;
use kestrel_ports::{EventLog, PersistedEvent};
use kestrel_runtime::{DispatchError, EntityRuntime, RuntimeConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

type Runtime = EntityRuntime<TraderState, InMemoryEventLog>;

fn runtime_with(log: &Arc<InMemoryEventLog>, config: RuntimeConfig) -> Runtime {
    EntityRuntime::new(Arc::clone(log), config)
}

fn runtime(log: &Arc<InMemoryEventLog>) -> Runtime {
    runtime_with(log, RuntimeConfig::default())
}

fn id(s: &str) -> EntityId {
    EntityId::new(s).unwrap()
}

fn at(ms: i64) -> Timestamp {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn place(side: Side, quantity: Decimal, price: Decimal) -> TraderCommand {
    TraderCommand::PlaceOrder {
        side,
        quantity,
        price,
        client_order_id: None,
        placed_at: at(1_000),
    }
}

fn cancel(order_id: &str) -> TraderCommand {
    TraderCommand::CancelOrder {
        order_id: OrderId::from(order_id),
        cancelled_at: at(2_000),
    }
}

fn register() -> TraderCommand {
    TraderCommand::Register {
        profile: TraderProfile {
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            base_balance: dec!(100),
            quote_balance: dec!(1000000),
            ma_kind: MovingAverageKind::Exponential,
            short_period: 3,
            long_period: 5,
        },
    }
}

/// Rebuild state by folding every logged event, bypassing the runtime
async fn replay(log: &InMemoryEventLog, entity: &EntityId) -> (TraderState, u64) {
    let events: Vec<PersistedEvent> = log
        .read_from(entity, 0)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let mut state = TraderState::default();
    for persisted in &events {
        state.apply(&persisted.decode::<TraderState>().unwrap());
    }
    (state, events.len() as u64)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Command Processing
// ============================================================================

#[tokio::test]
async fn test_place_and_cancel_leaves_other_order_open() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let acct = id("acct1");

    let first = runtime
        .dispatch(&acct, place(Side::Buy, dec!(10), dec!(100.0)))
        .await
        .unwrap();
    assert_eq!(
        first,
        TraderReply::OrderAccepted {
            order_id: OrderId::from("order-1")
        }
    );
    runtime
        .dispatch(&acct, place(Side::Sell, dec!(10), dec!(101.0)))
        .await
        .unwrap();
    runtime.dispatch(&acct, cancel("order-1")).await.unwrap();

    let (state, sequence) = runtime.inspect(&acct).await.unwrap();
    assert_eq!(sequence, 3);
    let open: Vec<_> = state.open_orders().map(|o| o.id.as_str().to_string()).collect();
    assert_eq!(open, vec!["order-2"]);
    assert_eq!(
        state.order(&OrderId::from("order-1")).unwrap().status,
        OrderStatus::Cancelled
    );
    assert_eq!(log.tail(&acct), 3);
}

#[tokio::test]
async fn test_rejection_persists_nothing() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let acct = id("acct1");

    let err = runtime.dispatch(&acct, cancel("order-9")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Rejected(_)));
    assert_eq!(log.tail(&acct), 0);

    // The entity keeps working after a rejection
    runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(1)))
        .await
        .unwrap();
    assert_eq!(runtime.inspect(&acct).await.unwrap().1, 1);
}

#[tokio::test]
async fn test_repeated_cancel_adds_no_events() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let acct = id("acct1");

    runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(10)))
        .await
        .unwrap();
    let first = runtime.dispatch(&acct, cancel("order-1")).await.unwrap();
    let second = runtime.dispatch(&acct, cancel("order-1")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(log.tail(&acct), 2);
}

#[tokio::test]
async fn test_concurrent_commands_to_one_entity_are_serialized() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let acct = id("acct1");

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let runtime = runtime.clone();
            let acct = acct.clone();
            tokio::spawn(async move {
                runtime
                    .dispatch(&acct, place(Side::Buy, dec!(1), Decimal::from(i + 1)))
                    .await
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        match task.await.unwrap().unwrap() {
            TraderReply::OrderAccepted { order_id } => ids.push(order_id),
            other => panic!("unexpected reply {other:?}"),
        }
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 50);

    // Gapless sequences in the log
    let events: Vec<_> = log.read_from(&acct, 0).await.unwrap().try_collect().await.unwrap();
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=50).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_entities_progress_independently() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);

    let tasks: Vec<_> = (0..20)
        .map(|n| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                let acct = id(&format!("acct{n}"));
                for _ in 0..5 {
                    runtime
                        .dispatch(&acct, place(Side::Sell, dec!(1), dec!(5)))
                        .await
                        .unwrap();
                }
                acct
            })
        })
        .collect();

    for task in tasks {
        let acct = task.await.unwrap();
        assert_eq!(log.tail(&acct), 5);
    }
    assert_eq!(runtime.resident_count(), 20);
}

#[tokio::test]
async fn test_subscribers_receive_committed_events() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let mut events = runtime.subscribe();
    let acct = id("acct1");

    runtime.dispatch(&acct, register()).await.unwrap();
    runtime
        .dispatch(&acct, place(Side::Buy, dec!(2), dec!(50)))
        .await
        .unwrap();

    let first = events.recv().await.unwrap();
    assert_eq!(first.entity_id, acct);
    assert_eq!(first.sequence, 1);
    assert!(matches!(first.event, TraderEvent::TraderRegistered { .. }));

    let second = events.recv().await.unwrap();
    assert_eq!(second.sequence, 2);
    assert!(matches!(second.event, TraderEvent::OrderPlaced { .. }));
}

// ============================================================================
// Recovery
// ============================================================================

async fn drive_workload(runtime: &Runtime, acct: &EntityId) {
    runtime.dispatch(acct, register()).await.unwrap();
    for i in 1..=12 {
        let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
        runtime
            .dispatch(acct, place(side, dec!(1), Decimal::from(100 + i)))
            .await
            .unwrap();
        runtime
            .dispatch(
                acct,
                TraderCommand::AddCandle {
                    candle: kestrel_core::Candle {
                        time: at(i * 60_000),
                        open: Decimal::from(100 + i),
                        high: Decimal::from(110 + i),
                        low: Decimal::from(90 + i),
                        close: Decimal::from(100 + i),
                        volume: dec!(3),
                    },
                },
            )
            .await
            .unwrap();
    }
    runtime.dispatch(acct, cancel("order-3")).await.unwrap();
    runtime
        .dispatch(
            acct,
            TraderCommand::FillOrder {
                order_id: OrderId::from("order-2"),
                quantity: dec!(0.5),
                price: dec!(101),
                filled_at: at(3_000),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_restart_replays_to_identical_state() {
    let log = Arc::new(InMemoryEventLog::new());
    let acct = id("acct1");

    let first = runtime_with(&log, RuntimeConfig::default().with_snapshot_every(0));
    drive_workload(&first, &acct).await;
    let (before, sequence) = first.inspect(&acct).await.unwrap();
    first.shutdown().await;

    let second = runtime(&log);
    let (after, recovered_sequence) = second.inspect(&acct).await.unwrap();
    assert_eq!(recovered_sequence, sequence);
    assert_eq!(after, before);

    let (replayed, replayed_sequence) = replay(&log, &acct).await;
    assert_eq!(replayed_sequence, sequence);
    assert_eq!(replayed, before);
}

#[tokio::test]
async fn test_snapshot_recovery_matches_full_replay() {
    let log = Arc::new(InMemoryEventLog::new());
    let acct = id("acct1");

    let first = runtime_with(&log, RuntimeConfig::default().with_snapshot_every(4));
    drive_workload(&first, &acct).await;
    let (before, sequence) = first.inspect(&acct).await.unwrap();
    first.shutdown().await;

    let snapshot = loop {
        if let Some(snapshot) = log.load_latest_snapshot(&acct).await.unwrap() {
            break snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert!(snapshot.sequence > 0);
    assert!(snapshot.sequence <= sequence);

    let second = runtime(&log);
    let (from_snapshot, recovered_sequence) = second.inspect(&acct).await.unwrap();
    assert_eq!(recovered_sequence, sequence);

    let (full_replay, _) = replay(&log, &acct).await;
    assert_eq!(from_snapshot, full_replay);
    assert_eq!(from_snapshot, before);
}

#[tokio::test]
async fn test_corrupt_event_fails_recovery() {
    let log = Arc::new(InMemoryEventLog::new());
    let acct = id("acct1");
    log.append(
        &acct,
        0,
        vec![PersistedEvent {
            sequence: 1,
            event_type: "order_placed".to_string(),
            payload: serde_json::json!({ "type": "no_such_event" }),
        }],
    )
    .await
    .unwrap();

    let runtime = runtime(&log);
    let err = runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Runtime(kestrel_runtime::RuntimeError::CorruptStream { .. })
    ));
    assert_eq!(log.tail(&acct), 1);
}

// ============================================================================
// Passivation
// ============================================================================

#[tokio::test]
async fn test_evicted_entity_reloads_on_next_command() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let acct = id("acct1");

    runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(10)))
        .await
        .unwrap();
    assert!(runtime.evict(&acct));
    wait_until(|| !runtime.is_resident(&acct)).await;

    let reply = runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(10)))
        .await
        .unwrap();
    assert_eq!(
        reply,
        TraderReply::OrderAccepted {
            order_id: OrderId::from("order-2")
        }
    );
    assert!(!runtime.evict(&id("never-seen")));
}

#[tokio::test]
async fn test_commands_queued_behind_passivation_are_redelivered() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let acct = id("acct1");

    runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(10)))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..30)
        .map(|_| {
            let runtime = runtime.clone();
            let acct = acct.clone();
            tokio::spawn(async move {
                runtime
                    .dispatch(&acct, place(Side::Sell, dec!(1), dec!(10)))
                    .await
            })
        })
        .collect();
    runtime.evict(&acct);

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(log.tail(&acct), 31);
    let (state, sequence) = runtime.inspect(&acct).await.unwrap();
    assert_eq!(sequence, 31);
    assert_eq!(state.orders_placed, 31);
}

#[tokio::test]
async fn test_idle_entities_passivate() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime_with(&log, RuntimeConfig::default().with_idle_timeout_ms(30));
    let acct = id("acct1");

    runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(10)))
        .await
        .unwrap();
    wait_until(|| runtime.resident_count() == 0).await;

    let (state, sequence) = runtime.inspect(&acct).await.unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(state.orders_placed, 1);
}

#[tokio::test]
async fn test_resident_cap_evicts_least_recently_used() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime_with(&log, RuntimeConfig::default().with_max_resident(2));

    for name in ["a", "b", "c"] {
        runtime
            .dispatch(&id(name), place(Side::Buy, dec!(1), dec!(10)))
            .await
            .unwrap();
    }
    wait_until(|| !runtime.is_resident(&id("a"))).await;
    assert!(runtime.is_resident(&id("c")));
    assert!(runtime.resident_count() <= 2);

    // Evicted state comes back from the log
    let (state, _) = runtime.inspect(&id("a")).await.unwrap();
    assert_eq!(state.orders_placed, 1);
}

#[tokio::test]
async fn test_shutdown_rejects_new_commands() {
    let log = Arc::new(InMemoryEventLog::new());
    let runtime = runtime(&log);
    let acct = id("acct1");

    runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(10)))
        .await
        .unwrap();
    runtime.shutdown().await;

    let err = runtime
        .dispatch(&acct, place(Side::Buy, dec!(1), dec!(10)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::Runtime(kestrel_runtime::RuntimeError::ShuttingDown)
    );
    assert_eq!(runtime.resident_count(), 0);
}
