//! One failing handler must not prevent a co-subscribed succeeding handler
//! from running, and must not fail the publish call itself — only the
//! failing subscriber's own dispatch record.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use subscription::{Handler, HandlerError, HandlerKind};
use tempfile::tempdir;
use types::Topic;

mod common;
use common::{bus_over, init_tracing, sample_event};

struct AlwaysFails;

#[async_trait]
impl Handler for AlwaysFails {
    async fn handle(&self, _event: &types::Event) -> Result<(), HandlerError> {
        Err(HandlerError::Failed {
            reason: "intentional test failure".to_string(),
        })
    }
}

struct CountingHandler(Arc<AtomicUsize>);

#[async_trait]
impl Handler for CountingHandler {
    async fn handle(&self, _event: &types::Event) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn failing_handler_does_not_block_succeeding_sibling() {
    init_tracing();
    let dir = tempdir().unwrap();
    let bus = bus_over(dir.path());
    bus.start().await.unwrap();

    let succeeded = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        "HIPPO_ENCODE",
        HandlerKind::Async(Arc::new(AlwaysFails)),
        0,
        None,
        HashMap::new(),
        Vec::new(),
    )
    .unwrap();
    bus.subscribe(
        "HIPPO_ENCODE",
        HandlerKind::Async(Arc::new(CountingHandler(Arc::clone(&succeeded)))),
        0,
        None,
        HashMap::new(),
        Vec::new(),
    )
    .unwrap();

    let result = bus.publish(sample_event(Topic::HippoEncode), "HIPPO_ENCODE", true).await.unwrap();
    assert_eq!(result.total_handlers, 2);
    assert_eq!(result.successful_handlers, 1);
    assert_eq!(result.failed_handlers, 1);
    assert_eq!(succeeded.load(Ordering::SeqCst), 1);
}
