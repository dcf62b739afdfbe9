// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for the FSM engine and rehydration round-trip.
//!
//! Uses proptest to verify mathematical properties (spec §8, invariants 6
//! and 7) that must hold for all valid tick sequences and context payloads,
//! not just the handful of examples exercised by the unit tests.

use std::sync::Arc;

use fsm_registry::fsm::{FsmDefinitionBuilder, FsmEngine, MatchStrategy};
use fsm_registry::registry::Rehydrator;
use fsm_registry::store::{MemoryHistoryStore, MemorySnapshotStore, SnapshotStore};
use proptest::prelude::*;

fn timer_definition() -> Arc<fsm_registry::FsmDefinition> {
    Arc::new(
        FsmDefinitionBuilder::new("timer", MatchStrategy::ByValue)
            .state("WAITING")
            .state("EXPIRED")
            .final_state("EXPIRED")
            .initial("WAITING")
            .timeout_after("WAITING", 5)
            .on_timeout("WAITING", "EXPIRED")
            .build()
            .unwrap(),
    )
}

proptest! {
    /// Invariant 6: `duration(state)` is non-decreasing while the machine
    /// stays in that state, and the engine never reports a duration larger
    /// than the number of `update()` calls made since entry.
    #[test]
    fn duration_is_monotonic_while_in_state(tick_count in 0u32..20) {
        let mut engine = FsmEngine::new(timer_definition(), serde_json::json!({}));
        engine.init().unwrap();

        for _ in 0..tick_count {
            let before = engine.duration();
            let was_waiting = engine.current_state() == Some("WAITING");
            engine.update().unwrap();
            if was_waiting && engine.current_state() == Some("WAITING") {
                prop_assert!(engine.duration() > before);
            }
        }
        // Once expired the timer reset to zero on entry into EXPIRED.
        if engine.current_state() == Some("EXPIRED") {
            prop_assert!(engine.duration() < 5);
        }
    }

    /// Invariant 7 (round-trip): rehydrating a persisted snapshot yields an
    /// instance whose `(current_state, context_data)` matches what was
    /// persisted, for any JSON-object-shaped context payload.
    #[test]
    fn rehydrate_round_trips_arbitrary_context(
        from_field in "[a-z]{1,12}",
        value in any::<i64>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let def = Arc::new(
                FsmDefinitionBuilder::new("probe", MatchStrategy::ByValue)
                    .state("IDLE")
                    .state("RINGING")
                    .initial("IDLE")
                    .on_event("IDLE", "Go", "RINGING")
                    .build()
                    .unwrap(),
            );
            let snapshot_store = Arc::new(MemorySnapshotStore::new());
            let history_store = Arc::new(MemoryHistoryStore::new());
            let context = serde_json::json!({ from_field.clone(): value });

            let mut engine = FsmEngine::new(def.clone(), context.clone());
            engine.init().unwrap();
            engine
                .process(&fsm_registry::Event::tagged("Go"))
                .unwrap();

            let row = fsm_registry::store::SnapshotRow::new(
                "probe-1",
                engine.current_state().unwrap(),
                engine.context().clone(),
                chrono::Utc::now(),
            );
            snapshot_store.upsert(row).await.unwrap();

            let rehydrator = Rehydrator::new(
                snapshot_store.clone(),
                history_store,
                std::time::Duration::from_secs(1),
            );
            let def_for_factory = def.clone();
            let rehydrated = rehydrator
                .rehydrate(
                    "probe-1",
                    Arc::new(move || FsmEngine::new(def_for_factory.clone(), serde_json::json!({}))),
                )
                .await
                .unwrap();

            prop_assert_eq!(rehydrated.current_state(), engine.current_state());
            prop_assert_eq!(rehydrated.context(), engine.context());
            prop_assert_eq!(rehydrated.is_complete(), engine.is_complete());
            Ok(())
        })?;
    }
}
