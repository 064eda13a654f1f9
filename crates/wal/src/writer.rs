//! Per-topic segment writer: rotation, crash recovery, and append.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{error::Error, record::WalRecord};

/// Owns the currently open segment file for one topic and the bookkeeping
/// needed to decide when to rotate. Exactly one `TopicWriter` exists per
/// topic at a time, guarded by a per-topic lock in `EventPersistence` so
/// appends to different topics never contend with each other.
pub(crate) struct TopicWriter {
    wal_dir: PathBuf,
    topic_stem: String,
    segment: u32,
    lines_in_segment: u64,
    bytes_in_segment: u64,
    max_file_size_bytes: u64,
    max_lines_per_file: u64,
    max_segments_per_topic: u32,
    next_offset: u64,
    writer: BufWriter<File>,
}

impl TopicWriter {
    /// Opens (creating if needed) the writer for a topic, recovering the
    /// next offset and current segment from whatever is already on disk.
    pub(crate) fn open(
        wal_dir: &Path,
        topic_stem: &str,
        max_file_size_mb: u64,
        max_lines_per_file: u64,
        max_segments_per_topic: u32,
        buffer_size: usize,
    ) -> Result<Self, Error> {
        fs::create_dir_all(wal_dir).map_err(|source| Error::Persistence {
            topic: topic_stem.to_string(),
            operation: "create_wal_dir".to_string(),
            path: Some(wal_dir.to_path_buf()),
            source,
        })?;

        let (segment, next_offset, lines_in_segment, bytes_in_segment) = recover(wal_dir, topic_stem)?;

        let path = segment_path(wal_dir, topic_stem, segment);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::Persistence {
                topic: topic_stem.to_string(),
                operation: "open_segment".to_string(),
                path: Some(path),
                source,
            })?;

        Ok(Self {
            wal_dir: wal_dir.to_path_buf(),
            topic_stem: topic_stem.to_string(),
            segment,
            lines_in_segment,
            bytes_in_segment,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            max_lines_per_file,
            max_segments_per_topic,
            next_offset,
            writer: BufWriter::with_capacity(buffer_size, file),
        })
    }

    pub(crate) fn latest_offset(&self) -> i64 {
        if self.next_offset == 0 {
            -1
        } else {
            self.next_offset as i64 - 1
        }
    }

    /// Appends a batch of already-built records (offsets not yet
    /// assigned), assigning dense offsets starting at `next_offset`,
    /// rotating segments as needed. Returns the assigned offsets. On any
    /// I/O failure, no partial state is retained: the caller should
    /// discard this writer instance (its `next_offset` may have advanced
    /// past what was durably written) -- `EventPersistence` reopens a
    /// fresh writer by recovering from disk on the next call.
    pub(crate) fn append_batch(&mut self, metas: Vec<serde_json::Value>, payloads: Vec<serde_json::Value>, fsync: bool) -> Result<Vec<u64>, Error> {
        let mut offsets = Vec::with_capacity(metas.len());
        for (meta, payload) in metas.into_iter().zip(payloads.into_iter()) {
            self.maybe_rotate()?;

            let offset = self.next_offset;
            let record = WalRecord {
                offset,
                meta,
                payload,
                written_at: chrono::Utc::now(),
                segment_id: self.segment,
            };
            let mut line = serde_json::to_vec(&record).map_err(|e| Error::Persistence {
                topic: self.topic_stem.clone(),
                operation: "serialize".to_string(),
                path: None,
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            line.push(b'\n');

            self.writer.write_all(&line).map_err(|source| Error::Persistence {
                topic: self.topic_stem.clone(),
                operation: "append".to_string(),
                path: Some(self.current_path()),
                source,
            })?;

            self.lines_in_segment += 1;
            self.bytes_in_segment += line.len() as u64;
            self.next_offset += 1;
            offsets.push(offset);
        }

        self.writer.flush().map_err(|source| Error::Persistence {
            topic: self.topic_stem.clone(),
            operation: "flush".to_string(),
            path: Some(self.current_path()),
            source,
        })?;
        if fsync {
            self.writer.get_ref().sync_data().map_err(|source| Error::Persistence {
                topic: self.topic_stem.clone(),
                operation: "fsync".to_string(),
                path: Some(self.current_path()),
                source,
            })?;
        }

        Ok(offsets)
    }

    fn current_path(&self) -> PathBuf {
        segment_path(&self.wal_dir, &self.topic_stem, self.segment)
    }

    fn maybe_rotate(&mut self) -> Result<(), Error> {
        let needs_rotation = self.lines_in_segment >= self.max_lines_per_file || self.bytes_in_segment >= self.max_file_size_bytes;
        if !needs_rotation {
            return Ok(());
        }
        if self.segment + 1 >= self.max_segments_per_topic {
            return Err(Error::Rotation {
                topic: self.topic_stem.clone(),
                max_segments: self.max_segments_per_topic,
            });
        }
        self.segment += 1;
        self.lines_in_segment = 0;
        self.bytes_in_segment = 0;
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path).map_err(|source| Error::Persistence {
            topic: self.topic_stem.clone(),
            operation: "rotate".to_string(),
            path: Some(path),
            source,
        })?;
        self.writer = BufWriter::new(file);
        tracing::info!(topic = %self.topic_stem, segment = %self.segment, "wal segment rotated");
        Ok(())
    }
}

pub(crate) fn segment_path(wal_dir: &Path, topic_stem: &str, segment: u32) -> PathBuf {
    wal_dir.join(format!("{topic_stem}.{segment:08}.jsonl"))
}

/// Scans `wal_dir` for every segment file belonging to `topic_stem` and
/// returns `(highest_segment, next_offset, lines_in_highest_segment,
/// bytes_in_highest_segment)`. Absent any files, starts fresh at segment
/// 0 and offset 0.
fn recover(wal_dir: &Path, topic_stem: &str) -> Result<(u32, u64, u64, u64), Error> {
    let prefix = format!("{topic_stem}.");
    let mut segments: Vec<u32> = Vec::new();

    if wal_dir.is_dir() {
        for entry in fs::read_dir(wal_dir).map_err(|source| Error::Persistence {
            topic: topic_stem.to_string(),
            operation: "scan_wal_dir".to_string(),
            path: Some(wal_dir.to_path_buf()),
            source,
        })? {
            let entry = entry.map_err(|source| Error::Persistence {
                topic: topic_stem.to_string(),
                operation: "scan_wal_dir_entry".to_string(),
                path: Some(wal_dir.to_path_buf()),
                source,
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(segment_str) = rest.strip_suffix(".jsonl") {
                    if let Ok(segment) = segment_str.parse::<u32>() {
                        segments.push(segment);
                    }
                }
            }
        }
    }

    segments.sort_unstable();
    let Some(&highest) = segments.last() else {
        return Ok((0, 0, 0, 0));
    };

    let path = segment_path(wal_dir, topic_stem, highest);
    let file = File::open(&path).map_err(|source| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "open_for_recovery".to_string(),
        path: Some(path.clone()),
        source,
    })?;
    let len = file.metadata().map_err(|source| Error::Persistence {
        topic: topic_stem.to_string(),
        operation: "stat_for_recovery".to_string(),
        path: Some(path.clone()),
        source,
    })?.len();

    let reader = BufReader::new(file);
    let mut last_offset: Option<u64> = None;
    let mut line_count = 0u64;
    for line in reader.lines() {
        let line = line.map_err(|source| Error::Persistence {
            topic: topic_stem.to_string(),
            operation: "read_for_recovery".to_string(),
            path: Some(path.clone()),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        line_count += 1;
        if let Ok(record) = serde_json::from_str::<WalRecord>(&line) {
            last_offset = Some(record.offset);
        }
    }

    let next_offset = last_offset.map(|o| o + 1).unwrap_or(0);
    Ok((highest, next_offset, line_count, len))
}
