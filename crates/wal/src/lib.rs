#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Durable, ordered, replayable storage of events per topic: segment
//! rotation, per-group offset checkpointing, and a dead-letter file per
//! topic.

pub mod config;
pub mod error;
pub mod record;
mod writer;

use std::{
    collections::HashMap,
    fs,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

pub use config::WalConfig;
pub use error::Error;
pub use record::{DlqRecord, OffsetInfo, WalEntry, WalRecord};
use types::{Event, Topic};
use writer::TopicWriter;

/// Durable per-topic event log with segment rotation, offset
/// checkpointing, and a companion dead-letter file.
#[derive(Clone)]
pub struct EventPersistence {
    inner: Arc<Inner>,
}

struct Inner {
    config: WalConfig,
    writers: Mutex<HashMap<String, Arc<Mutex<TopicWriter>>>>,
}

impl EventPersistence {
    /// Creates a new persistence layer rooted at `config.base_path`,
    /// creating the WAL/DLQ/offsets directories if they don't exist.
    pub fn new(config: WalConfig) -> Result<Self, Error> {
        for dir in [config.wal_path(), config.dlq_path(), config.offsets_path()] {
            fs::create_dir_all(&dir).map_err(|source| Error::Persistence {
                topic: String::new(),
                operation: "create_dir".to_string(),
                path: Some(dir),
                source,
            })?;
        }
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                writers: Mutex::new(HashMap::new()),
            }),
        })
    }

    fn writer_for(&self, topic_stem: &str) -> Arc<Mutex<TopicWriter>> {
        let mut writers = self.inner.writers.lock().expect("wal writers lock poisoned");
        writers
            .entry(topic_stem.to_string())
            .or_insert_with(|| {
                let config = &self.inner.config;
                Arc::new(Mutex::new(
                    TopicWriter::open(
                        &config.wal_path(),
                        topic_stem,
                        config.max_file_size_mb,
                        config.max_lines_per_file,
                        config.max_segments_per_topic,
                        config.buffer_size,
                    )
                    .expect("failed to open wal segment writer"),
                ))
            })
            .clone()
    }

    /// Appends a single event, returning its assigned offset.
    pub async fn append_event(&self, event: &Event, topic: &Topic) -> Result<u64, Error> {
        let offsets = self.append_events_batch(std::slice::from_ref(event), topic).await?;
        Ok(offsets[0])
    }

    /// Appends a batch of events atomically with respect to offset
    /// assignment, returning the assigned offsets in order. An empty
    /// batch returns `Ok(vec![])` without advancing the offset counter.
    pub async fn append_events_batch(&self, events: &[Event], topic: &Topic) -> Result<Vec<u64>, Error> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let topic_stem = topic.file_stem();
        let fsync = self.inner.config.fsync_enabled;
        let writer = self.writer_for(&topic_stem);

        let mut metas = Vec::with_capacity(events.len());
        let mut payloads = Vec::with_capacity(events.len());
        for event in events {
            let mut meta = serde_json::to_value(event).map_err(|e| Error::Persistence {
                topic: topic_stem.clone(),
                operation: "project_meta".to_string(),
                path: None,
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            if let Some(obj) = meta.as_object_mut() {
                let _ = obj.remove("payload");
            }
            metas.push(meta);
            payloads.push(event.payload.clone());
        }

        let result = tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().expect("topic writer lock poisoned");
            writer.append_batch(metas, payloads, fsync)
        })
        .await
        .expect("wal append task panicked");

        match &result {
            Ok(offsets) => tracing::debug!(topic = %topic_stem, count = %offsets.len(), "appended events to wal"),
            Err(error) => tracing::error!(topic = %topic_stem, %error, "wal append failed"),
        }
        result
    }

    /// Returns the highest offset durably written for `topic`, or `-1` if
    /// nothing has been written yet.
    pub async fn get_latest_offset(&self, topic: &Topic) -> Result<i64, Error> {
        let writer = self.writer_for(&topic.file_stem());
        let offset = tokio::task::spawn_blocking(move || writer.lock().expect("topic writer lock poisoned").latest_offset())
            .await
            .expect("wal offset task panicked");
        Ok(offset)
    }

    /// Replays every record for `topic` with offset in
    /// `[from_offset, to_offset)` (or to the end if `to_offset` is
    /// `None`), bounded by `limit` if given. Corrupt lines are skipped
    /// and counted rather than treated as fatal.
    pub async fn replay_events(&self, topic: &Topic, from_offset: u64, to_offset: Option<u64>, limit: Option<usize>) -> Result<Vec<WalEntry>, Error> {
        let wal_dir = self.inner.config.wal_path();
        let topic_stem = topic.file_stem();
        tokio::task::spawn_blocking(move || replay_blocking(&wal_dir, &topic_stem, from_offset, to_offset, limit))
            .await
            .expect("wal replay task panicked")
    }

    /// Atomically commits the offset a consumer group has processed up
    /// to, via a temp-file-then-rename write.
    pub async fn commit_offset(&self, topic: &Topic, group: &str, offset: u64, segment: u32) -> Result<(), Error> {
        let offsets_dir = self.inner.config.offsets_path();
        let topic_stem = topic.file_stem();
        let group = group.to_string();
        let info = OffsetInfo {
            committed: offset,
            segment,
            ts: chrono::Utc::now(),
            group: group.clone(),
            topic: topic_stem.clone(),
        };
        tokio::task::spawn_blocking(move || commit_offset_blocking(&offsets_dir, &topic_stem, &group, &info))
            .await
            .expect("wal commit task panicked")
    }

    /// Reads the last committed offset checkpoint for `(topic, group)`,
    /// if any.
    pub async fn get_offset_info(&self, topic: &Topic, group: &str) -> Result<Option<OffsetInfo>, Error> {
        let offsets_dir = self.inner.config.offsets_path();
        let topic_stem = topic.file_stem();
        let group = group.to_string();
        tokio::task::spawn_blocking(move || read_offset_info_blocking(&offsets_dir, &topic_stem, &group))
            .await
            .expect("wal read offset task panicked")
    }

    /// Appends a dead-letter record for `event` to the topic's DLQ file.
    pub async fn append_to_dlq(&self, event: &Event, topic: &Topic, error: &str) -> Result<(), Error> {
        let dlq_dir = self.inner.config.dlq_path();
        let topic_stem = topic.file_stem();
        let record = DlqRecord {
            original_topic: topic.to_string(),
            error: error.to_string(),
            failed_at: chrono::Utc::now(),
            event: serde_json::to_value(event).map_err(|e| Error::Persistence {
                topic: topic_stem.clone(),
                operation: "project_dlq_record".to_string(),
                path: None,
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?,
        };
        tokio::task::spawn_blocking(move || append_dlq_blocking(&dlq_dir, &topic_stem, &record))
            .await
            .expect("wal dlq append task panicked")
    }

    /// Writes and removes a temp file under `base_path` to confirm the
    /// filesystem is writable.
    pub async fn health_check(&self) -> bool {
        let base_path = self.inner.config.base_path.clone();
        tokio::task::spawn_blocking(move || health_check_blocking(&base_path))
            .await
            .unwrap_or(false)
    }

    /// Flushes and releases every open segment writer.
    pub async fn close(&self) -> Result<(), Error> {
        let writers: Vec<_> = {
            let mut guard = self.inner.writers.lock().expect("wal writers lock poisoned");
            guard.drain().map(|(_, w)| w).collect()
        };
        tokio::task::spawn_blocking(move || {
            for writer in writers {
                drop(writer.lock().expect("topic writer lock poisoned"));
            }
        })
        .await
        .expect("wal close task panicked");
        Ok(())
    }
}

fn replay_blocking(wal_dir: &Path, topic_stem: &str, from_offset: u64, to_offset: Option<u64>, limit: Option<usize>) -> Result<Vec<WalEntry>, Error> {
    let mut segment_numbers: Vec<u32> = Vec::new();
    let prefix = format!("{topic_stem}.");
    if wal_dir.is_dir() {
        for entry in fs::read_dir(wal_dir).map_err(|source| Error::Persistence {
            topic: topic_stem.to_string(),
            operation: "scan_for_replay".to_string(),
            path: Some(wal_dir.to_path_buf()),
            source,
        })? {
            let entry = entry.map_err(|source| Error::Persistence {
                topic: topic_stem.to_string(),
                operation: "scan_for_replay_entry".to_string(),
                path: Some(wal_dir.to_path_buf()),
                source,
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(segment_str) = rest.strip_suffix(".jsonl") {
                    if let Ok(segment) = segment_str.parse::<u32>() {
                        segment_numbers.push(segment);
                    }
                }
            }
        }
    }
    segment_numbers.sort_unstable();

    let mut entries = Vec::new();
    let mut corrupt_lines = 0u64;

    'segments: for segment in segment_numbers {
        let path = writer::segment_path(wal_dir, topic_stem, segment);
        let file = fs::File::open(&path).map_err(|source| Error::Persistence {
            topic: topic_stem.to_string(),
            operation: "open_for_replay".to_string(),
            path: Some(path.clone()),
            source,
        })?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| Error::Persistence {
                topic: topic_stem.to_string(),
                operation: "read_for_replay".to_string(),
                path: Some(path.clone()),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(&line) {
                Ok(record) => {
                    if record.offset < from_offset {
                        continue;
                    }
                    if let Some(to) = to_offset {
                        if record.offset >= to {
                            break 'segments;
                        }
                    }
                    entries.push(record);
                    if let Some(limit) = limit {
                        if entries.len() >= limit {
                            break 'segments;
                        }
                    }
                }
                Err(error) => {
                    corrupt_lines += 1;
                    tracing::warn!(topic = %topic_stem, %segment, %error, "skipping corrupt wal line during replay");
                }
            }
        }
    }

    if corrupt_lines > 0 {
        tracing::warn!(topic = %topic_stem, %corrupt_lines, "replay skipped corrupt lines");
    }

    Ok(entries)
}

fn commit_offset_blocking(offsets_dir: &Path, topic_stem: &str, group: &str, info: &OffsetInfo) -> Result<(), Error> {
    fs::create_dir_all(offsets_dir).map_err(|source| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "create_offsets_dir".to_string(),
        path: Some(offsets_dir.to_path_buf()),
        source,
    })?;
    let final_path = offsets_dir.join(format!("{topic_stem}__{group}.json"));
    let tmp_path = offsets_dir.join(format!("{topic_stem}__{group}.json.tmp"));

    let json = serde_json::to_vec_pretty(info).map_err(|e| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "serialize_offset".to_string(),
        path: Some(tmp_path.clone()),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_data()?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    })();

    write_result.map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        Error::Persistence {
            topic: topic_stem.to_string(),
            operation: "commit_offset".to_string(),
            path: Some(final_path.clone()),
            source,
        }
    })
}

fn read_offset_info_blocking(offsets_dir: &Path, topic_stem: &str, group: &str) -> Result<Option<OffsetInfo>, Error> {
    let path = offsets_dir.join(format!("{topic_stem}__{group}.json"));
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).map_err(|source| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "read_offset_info".to_string(),
        path: Some(path.clone()),
        source,
    })?;
    let info = serde_json::from_str(&contents).map_err(|e| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "parse_offset_info".to_string(),
        path: Some(path),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    Ok(Some(info))
}

fn append_dlq_blocking(dlq_dir: &Path, topic_stem: &str, record: &DlqRecord) -> Result<(), Error> {
    fs::create_dir_all(dlq_dir).map_err(|source| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "create_dlq_dir".to_string(),
        path: Some(dlq_dir.to_path_buf()),
        source,
    })?;
    let path = dlq_dir.join(format!("{topic_stem}.dlq.jsonl"));
    let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).map_err(|source| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "open_dlq".to_string(),
        path: Some(path.clone()),
        source,
    })?;
    let mut line = serde_json::to_vec(record).map_err(|e| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "serialize_dlq_record".to_string(),
        path: Some(path.clone()),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    line.push(b'\n');
    file.write_all(&line).map_err(|source| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "append_dlq".to_string(),
        path: Some(path),
        source,
    })
}

fn health_check_blocking(base_path: &PathBuf) -> bool {
    let probe = base_path.join(".health_check");
    if fs::create_dir_all(base_path).is_err() {
        return false;
    }
    if fs::write(&probe, b"ok").is_err() {
        return false;
    }
    fs::remove_file(&probe).is_ok()
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use tempfile::tempdir;
    use types::{Actor, Band, Device, Event, Qos, Signature};

    use super::*;

    fn sample_event() -> Event {
        Event::new(
            Topic::WorkspaceBroadcast,
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
                priority: 0,
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

    #[tokio::test]
    async fn wal_round_trip_with_rotation() {
        let dir = tempdir().unwrap();
        let config = WalConfig {
            base_path: dir.path().to_path_buf(),
            max_lines_per_file: 3,
            ..Default::default()
        };
        let persistence = EventPersistence::new(config).unwrap();
        let topic = Topic::WorkspaceBroadcast;

        let events: Vec<Event> = (0..7).map(|_| sample_event()).collect();
        let offsets = persistence.append_events_batch(&events, &topic).await.unwrap();
        assert_eq!(offsets, (0..7).collect::<Vec<_>>());

        let segment_files: Vec<_> = fs::read_dir(dir.path().join("wal")).unwrap().filter_map(|e| e.ok()).collect();
        assert!(segment_files.len() >= 3, "expected at least 3 segments, got {}", segment_files.len());

        let replayed = persistence.replay_events(&topic, 0, None, None).await.unwrap();
        assert_eq!(replayed.len(), 7);
        for (i, entry) in replayed.iter().enumerate() {
            assert_eq!(entry.offset, i as u64);
        }

        assert_eq!(persistence.get_latest_offset(&topic).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn empty_batch_does_not_advance_offsets() {
        let dir = tempdir().unwrap();
        let persistence = EventPersistence::new(WalConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let topic = Topic::WorkspaceBroadcast;
        let offsets = persistence.append_events_batch(&[], &topic).await.unwrap();
        assert!(offsets.is_empty());
        assert_eq!(persistence.get_latest_offset(&topic).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn offsets_survive_a_fresh_persistence_instance() {
        let dir = tempdir().unwrap();
        let config = WalConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let topic = Topic::WorkspaceBroadcast;
        {
            let persistence = EventPersistence::new(config.clone()).unwrap();
            let events: Vec<Event> = (0..3).map(|_| sample_event()).collect();
            let _ = persistence.append_events_batch(&events, &topic).await.unwrap();
        }
        let persistence = EventPersistence::new(config).unwrap();
        assert_eq!(persistence.get_latest_offset(&topic).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn commit_and_read_offset_info_round_trip() {
        let dir = tempdir().unwrap();
        let persistence = EventPersistence::new(WalConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let topic = Topic::WorkspaceBroadcast;
        persistence.commit_offset(&topic, "group-a", 41, 0).await.unwrap();
        let info = persistence.get_offset_info(&topic, "group-a").await.unwrap().unwrap();
        assert_eq!(info.committed, 41);
        assert_eq!(info.group, "group-a");
    }

    #[tokio::test]
    async fn dlq_and_health_check() {
        let dir = tempdir().unwrap();
        let persistence = EventPersistence::new(WalConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        assert!(persistence.health_check().await);
        persistence.append_to_dlq(&sample_event(), &Topic::WorkspaceBroadcast, "boom").await.unwrap();
        let dlq_file = dir.path().join("dlq").join("workspace_broadcast.dlq.jsonl");
        assert!(dlq_file.exists());
    }
}
