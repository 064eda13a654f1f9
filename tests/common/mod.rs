//! Shared fixtures for the integration test suites under `tests/`: a
//! minimal sample event builder and a tracing subscriber installer, mirroring
//! the per-test fixtures already used by each crate's own `#[cfg(test)]`
//! modules (see e.g. `bus`'s and `wal`'s).

use std::collections::HashSet;

use bus::{EventBus, EventBusConfig};
use dispatch::DispatcherConfig;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use types::{Actor, Band, Device, Event, Qos, Signature, Topic};
use wal::WalConfig;

/// Installs a `tracing` subscriber at `ERROR` level for the duration of the
/// process. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::ERROR).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Builds a minimal, well-formed event on `topic` with an empty payload,
/// suitable for tests that only care about delivery, not content.
pub fn sample_event(topic: Topic) -> Event {
    Event::new(
        topic,
        Actor {
            user_id: "u1".to_string(),
            capabilities: HashSet::new(),
            agent_id: None,
        },
        Device {
            device_id: "d1".to_string(),
            platform: None,
            app_version: None,
            locale: None,
        },
        "space-1",
        Band::Green,
        "v1",
        Qos {
            priority: 5,
            latency_budget_ms: 1000,
            routing: "gate-path".to_string(),
            retries: 0,
            deadline_ms: None,
        },
        HashSet::new(),
        serde_json::json!({}),
        "deadbeef",
        Signature {
            alg: "ed25519".to_string(),
            key_id: "k".to_string(),
            signature: "s".to_string(),
        },
    )
}

/// Builds an `EventBus` persisting under `base_path`, with an otherwise
/// default WAL/dispatcher configuration.
pub fn bus_over(base_path: &std::path::Path) -> EventBus {
    EventBus::with_defaults(EventBusConfig {
        wal: WalConfig {
            base_path: base_path.to_path_buf(),
            ..Default::default()
        },
        dispatcher: DispatcherConfig::default(),
    })
    .expect("valid bus config")
}
