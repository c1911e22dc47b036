//! Append-only JSON-lines event log with an in-memory index
//!
//! Every upserted snapshot is appended as one line to `events.jsonl`. On open
//! the log is replayed so the last line per `event_id` wins. An unterminated
//! final line left by an interrupted write is repaired before appending. When
//! the log grows well past the number of live events it is rewritten from the
//! index.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{latest_per_signal, select, EventStore, HistoryFilter, StoreError};
use crate::data::WarningEvent;

const LOG_FILE: &str = "events.jsonl";
const COMPACT_FACTOR: usize = 4;
const COMPACT_MIN_LINES: usize = 1024;

pub struct FileEventStore {
    path: PathBuf,
    index: RwLock<HashMap<String, WarningEvent>>,
    log: Mutex<LogFile>,
    compact_floor: usize,
}

struct LogFile {
    file: File,
    lines: usize,
    /// Length of the log up to its last complete line
    bytes: u64,
}

impl LogFile {
    /// Append and sync `buf`. On failure the log is cut back to its previous
    /// length so a partial write cannot merge with the next record.
    fn append(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let written = self
            .file
            .write_all(buf)
            .and_then(|()| self.file.sync_data());
        match written {
            Ok(()) => {
                self.bytes += buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.file.set_len(self.bytes) {
                    tracing::error!(error = %cut, "Failed to truncate partial event log write");
                }
                Err(e)
            }
        }
    }
}

impl FileEventStore {
    /// Open or create the log under `data_dir`, replaying existing entries
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOG_FILE);

        let replayed = if path.exists() {
            replay(&path)?
        } else {
            Replayed::default()
        };
        let Replayed { index, lines, tail } = replayed;

        let mut file = open_append(&path)?;
        match tail {
            Tail::Clean => {}
            Tail::Unterminated => {
                file.write_all(b"\n")?;
                file.sync_data()?;
            }
            Tail::Torn(len) => {
                tracing::warn!(path = %path.display(), keep_bytes = len, "Truncating torn event log tail");
                file.set_len(len)?;
                file.sync_data()?;
            }
        }
        let bytes = file.metadata()?.len();

        tracing::info!(
            path = %path.display(),
            events = index.len(),
            log_lines = lines,
            "Event store opened"
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            log: Mutex::new(LogFile { file, lines, bytes }),
            compact_floor: COMPACT_MIN_LINES,
        })
    }

    /// Minimum log length before compaction is considered
    pub fn with_compaction_floor(mut self, lines: usize) -> Self {
        self.compact_floor = lines;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines currently in the log
    pub fn log_lines(&self) -> usize {
        self.log.lock().lines
    }

    fn compact_locked(&self, log: &mut LogFile) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let live = {
            let index = self.index.read();
            let tmp = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(tmp);
            for event in index.values() {
                let line = serde_json::to_string(event)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            let tmp = writer
                .into_inner()
                .map_err(|e| StoreError::Io(e.into_error()))?;
            tmp.sync_all()?;
            index.len()
        };

        std::fs::rename(&tmp_path, &self.path)?;
        log.file = open_append(&self.path)?;
        log.bytes = log.file.metadata()?.len();

        tracing::debug!(before = log.lines, after = live, "Event log compacted");
        log.lines = live;
        Ok(())
    }
}

impl EventStore for FileEventStore {
    fn upsert_batch(&self, events: &[WarningEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(events.len() * 512);
        for event in events {
            serde_json::to_writer(&mut buf, event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            buf.push(b'\n');
        }

        let mut log = self.log.lock();
        log.append(&buf)?;
        log.lines += events.len();

        let live = {
            let mut index = self.index.write();
            for event in events {
                index.insert(event.event_id.clone(), event.clone());
            }
            index.len()
        };

        if log.lines > self.compact_floor.max(live * COMPACT_FACTOR) {
            // The batch is already durable; a failed rewrite leaves the old log in place
            if let Err(e) = self.compact_locked(&mut log) {
                tracing::warn!(error = %e, "Event log compaction failed");
            }
        }

        Ok(())
    }

    fn get(&self, event_id: &str) -> Result<Option<WarningEvent>, StoreError> {
        Ok(self.index.read().get(event_id).cloned())
    }

    fn query(&self, filter: &HistoryFilter) -> Result<Vec<WarningEvent>, StoreError> {
        Ok(select(self.index.read().values(), filter))
    }

    fn watermarks(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        Ok(latest_per_signal(self.index.read().values()))
    }

    fn len(&self) -> usize {
        self.index.read().len()
    }
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

#[derive(Default)]
struct Replayed {
    index: HashMap<String, WarningEvent>,
    lines: usize,
    tail: Tail,
}

/// State of the last line of the log
#[derive(Default, Debug, PartialEq)]
enum Tail {
    #[default]
    Clean,
    /// A complete record missing its newline
    Unterminated,
    /// A partial record starting at this offset
    Torn(u64),
}

fn replay(path: &Path) -> Result<Replayed, StoreError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut replayed = Replayed::default();
    let mut offset: u64 = 0;
    let mut buf = Vec::new();
    let mut lineno = 0;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        lineno += 1;
        let terminated = buf.last() == Some(&b'\n');
        let text = String::from_utf8_lossy(&buf);
        let text = text.trim();
        let parsed = serde_json::from_str::<WarningEvent>(text);

        if !terminated {
            replayed.tail = match parsed {
                Ok(event) => {
                    replayed.lines += 1;
                    replayed.index.insert(event.event_id.clone(), event);
                    Tail::Unterminated
                }
                Err(_) => Tail::Torn(offset),
            };
            break;
        }
        offset += read as u64;

        if text.is_empty() {
            continue;
        }
        replayed.lines += 1;
        match parsed {
            Ok(event) => {
                replayed.index.insert(event.event_id.clone(), event);
            }
            Err(e) => {
                tracing::warn!(line = lineno, error = %e, "Skipping corrupt event log entry");
            }
        }
    }

    Ok(replayed)
}
