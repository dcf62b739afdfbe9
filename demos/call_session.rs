//! Runs the call-session scenario from the registry's own test suite as a
//! standalone demo: incoming call, eviction, rehydration, answer, hang up,
//! archival.
//!
//! ```sh
//! cargo run --example call_session
//! ```

use std::sync::Arc;
use std::time::Duration;

use fsm_registry::fsm::{Event, FsmDefinitionBuilder, FsmEngine, MatchStrategy};
use fsm_registry::runtime::MachineRuntime;
use fsm_registry::store::{MemoryHistoryStore, MemorySnapshotStore};
use fsm_registry::RuntimeConfig;

fn call_machine_factory() -> fsm_registry::registry::MachineFactory {
    let definition = Arc::new(
        FsmDefinitionBuilder::new("call", MatchStrategy::ByValue)
            .state("IDLE")
            .state("RINGING")
            .state("CONNECTED")
            .state("COMPLETED")
            .final_state("COMPLETED")
            .initial("IDLE")
            .on_event("IDLE", "IncomingCall", "RINGING")
            .on_event("RINGING", "Answer", "CONNECTED")
            .on_event("CONNECTED", "HangUp", "COMPLETED")
            .build()
            .expect("valid call definition"),
    );
    Arc::new(move || FsmEngine::new(definition.clone(), serde_json::json!({})))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let snapshot_store = Arc::new(MemorySnapshotStore::new());
    let history_store = Arc::new(MemoryHistoryStore::new());
    let runtime = Arc::new(MachineRuntime::new(
        snapshot_store,
        history_store,
        RuntimeConfig::default(),
    ));

    let state = runtime
        .dispatch("c1", &Event::tagged("IncomingCall"), call_machine_factory())
        .await
        .expect("incoming call accepted");
    println!("c1 -> {state}");

    let state = runtime
        .dispatch("c1", &Event::tagged("Answer"), call_machine_factory())
        .await
        .expect("answer accepted");
    println!("c1 -> {state}");

    let state = runtime
        .dispatch("c1", &Event::tagged("HangUp"), call_machine_factory())
        .await
        .expect("hangup accepted");
    println!("c1 -> {state} (terminal, archiving asynchronously)");

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("live machines remaining: {}", runtime.live_count());
    println!("archival stats: {:?}", runtime.archival_stats());

    runtime.shutdown(Duration::from_millis(200)).await;
}
