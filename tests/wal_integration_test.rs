//! Publishing through the bus (not the WAL crate directly) must persist
//! every event in order, rotate segments at the configured line count, and
//! let a cold `EventPersistence` replay everything back out.

use std::fs;

use tempfile::tempdir;
use types::Topic;
use wal::{EventPersistence, WalConfig};

mod common;
use common::{init_tracing, sample_event};

#[tokio::test]
async fn published_events_survive_restart_and_rotate_segments() {
    init_tracing();
    let dir = tempdir().unwrap();

    let topic = Topic::WorkspaceBroadcast;
    {
        let bus = bus::EventBus::with_defaults(bus::EventBusConfig {
            wal: WalConfig {
                base_path: dir.path().to_path_buf(),
                max_lines_per_file: 3,
                ..Default::default()
            },
            dispatcher: dispatch::DispatcherConfig::default(),
        })
        .unwrap();
        bus.start().await.unwrap();

        for i in 0..7u64 {
            let result = bus.publish(sample_event(topic.clone()), "WORKSPACE_BROADCAST", true).await.unwrap();
            assert!(result.success);
            let _ = i;
        }
    }

    let segment_files: Vec<_> = fs::read_dir(dir.path().join("wal")).unwrap().filter_map(|e| e.ok()).collect();
    assert!(segment_files.len() >= 3, "expected at least 3 rotated segments, got {}", segment_files.len());

    // A cold persistence layer over the same directory replays everything
    // the bus wrote, in order, regardless of which process wrote it.
    let persistence = EventPersistence::new(WalConfig {
        base_path: dir.path().to_path_buf(),
        max_lines_per_file: 3,
        ..Default::default()
    })
    .unwrap();
    let replayed = persistence.replay_events(&topic, 0, None, None).await.unwrap();
    assert_eq!(replayed.len(), 7);
    for (i, entry) in replayed.iter().enumerate() {
        assert_eq!(entry.offset, i as u64);
    }
    assert_eq!(persistence.get_latest_offset(&topic).await.unwrap(), 6);
}
