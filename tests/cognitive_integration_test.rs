//! Wires a bus, a consumer registry, and a cognitive dispatcher together
//! through `CognitiveDispatcher::start_with_bus`, then publishes cognitive
//! events through the bus (not by calling `route` directly) to confirm the
//! subscription the dispatcher installs for every `CognitiveEventType`
//! actually routes published events end to end.

use std::{collections::HashSet, sync::Arc};

use cognitive::{CognitiveDispatcher, DispatcherConfig};
use consumer_registry::ConsumerRegistry;
use tempfile::tempdir;
use types::{CognitiveEvent, CognitiveEventType, RoutingStrategy, Topic, Trace};

mod common;
use common::{init_tracing, sample_event};

fn cognitive_event(event_type: CognitiveEventType, trace: Trace) -> types::Event {
    let cognitive = CognitiveEvent::new(event_type, trace, serde_json::json!({}), "test-producer");
    let mut event = sample_event(Topic::Cognitive(event_type));
    event.payload = serde_json::to_value(&cognitive).unwrap();
    event
}

#[tokio::test]
async fn sticky_session_events_route_successfully_through_the_bus() {
    init_tracing();
    let dir = tempdir().unwrap();
    let bus = common::bus_over(dir.path());
    bus.start().await.unwrap();

    let consumers = Arc::new(ConsumerRegistry::new());
    assert!(consumers.register("c1", None, 10, HashSet::new()));
    assert!(consumers.register("c2", None, 10, HashSet::new()));
    assert!(consumers.heartbeat("c1", 0, 0.1, 0.0, 0.0));
    assert!(consumers.heartbeat("c2", 0, 0.1, 0.0, 0.0));

    let dispatcher = Arc::new(CognitiveDispatcher::new(Arc::clone(&consumers), DispatcherConfig::default()));
    dispatcher
        .start_with_bus(&bus, bus.task_manager(), bus.shutdown_signal())
        .expect("cognitive subscriptions registered");

    let mut trace = Trace::new(Some("session-1".to_string()), 1);
    trace.routing_strategy = Some(RoutingStrategy::StickySession);

    let topic = Topic::Cognitive(CognitiveEventType::AttentionGateAdmit);
    for _ in 0..2 {
        let event = cognitive_event(CognitiveEventType::AttentionGateAdmit, trace.clone());
        let result = bus.publish(event, &topic.to_string(), true).await.unwrap();
        assert_eq!(result.successful_handlers, 1, "the routing subscription should have routed the event");
        assert_eq!(result.failed_handlers, 0);
    }
}

#[tokio::test]
async fn cognitive_event_with_no_registered_consumers_fails_the_handler() {
    init_tracing();
    let dir = tempdir().unwrap();
    let bus = common::bus_over(dir.path());
    bus.start().await.unwrap();

    let consumers = Arc::new(ConsumerRegistry::new());
    let dispatcher = Arc::new(CognitiveDispatcher::new(Arc::clone(&consumers), DispatcherConfig::default()));
    dispatcher
        .start_with_bus(&bus, bus.task_manager(), bus.shutdown_signal())
        .expect("cognitive subscriptions registered");

    let trace = Trace::new(None, 1);
    let topic = Topic::Cognitive(CognitiveEventType::MemoryWriteInitiated);
    let event = cognitive_event(CognitiveEventType::MemoryWriteInitiated, trace);
    let result = bus.publish(event, &topic.to_string(), true).await.unwrap();
    assert_eq!(result.successful_handlers, 0);
    assert_eq!(result.failed_handlers, 1, "no eligible consumer should surface as a failed handler, not a publish error");
}
