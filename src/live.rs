//! Live samples received from the message bus
//!
//! The listener task hands every message to a [`LiveRecorder`], which pushes
//! it into a bounded in-memory [`LiveBuffer`] and appends it to the
//! append-only [`LiveLog`] file. Readers take snapshots of the buffer; they
//! never read the file the writer is appending to.

use chrono::{Local, NaiveDateTime};
use log::{debug, info};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::dataset::{Column, Dataset};
use crate::error::Result;
use crate::normalize::coerce_number;
use crate::timestamp::parse_timestamp;

/// Header line written once when the log file is created
pub const LIVE_LOG_HEADER: &str = "timestamp,payload";

/// Format of the timestamp field in the log file
const LOG_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One received message
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveSample {
    pub timestamp: NaiveDateTime,
    pub payload: String,
}

impl LiveSample {
    /// Stamp a payload with the current local time
    ///
    /// The payload is decoded as UTF-8, replacing invalid sequences. Line
    /// breaks are flattened to spaces so one sample is one log line.
    pub fn received(payload: &[u8]) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            payload: String::from_utf8_lossy(payload).replace(['\r', '\n'], " "),
        }
    }

    /// The payload read as a number, accepting a decimal comma
    pub fn value(&self) -> Option<f64> {
        coerce_number(&self.payload)
    }

    fn to_line(&self) -> String {
        format!("{},{}\n", self.timestamp.format(LOG_TIME_FORMAT), self.payload)
    }

    fn from_line(line: &str) -> Option<Self> {
        let (timestamp, payload) = line.split_once(',')?;
        Some(Self {
            timestamp: parse_timestamp(timestamp)?,
            payload: payload.to_string(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bounded, thread-safe buffer of the most recent samples
///
/// When full, the oldest sample is evicted.
#[derive(Debug)]
pub struct LiveBuffer {
    capacity: usize,
    inner: Mutex<BufferState>,
}

#[derive(Debug, Default)]
struct BufferState {
    samples: VecDeque<LiveSample>,
    received: u64,
}

impl LiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(BufferState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, sample: LiveSample) {
        let mut state = lock(&self.inner);
        if state.samples.len() == self.capacity {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);
        state.received += 1;
    }

    /// Copy of every buffered sample, oldest first
    pub fn snapshot(&self) -> Vec<LiveSample> {
        lock(&self.inner).samples.iter().cloned().collect()
    }

    /// The last `n` samples, oldest first
    pub fn tail(&self, n: usize) -> Vec<LiveSample> {
        let state = lock(&self.inner);
        let skip = state.samples.len().saturating_sub(n);
        state.samples.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages pushed since creation, including evicted ones
    pub fn received(&self) -> u64 {
        lock(&self.inner).received
    }
}

/// Append-only `timestamp,payload` log file
#[derive(Clone, Debug)]
pub struct LiveLog {
    path: PathBuf,
}

impl LiveLog {
    /// Open the log, writing the header if the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(format!("{}\n", LIVE_LOG_HEADER).as_bytes())?;
            info!("created live log {}", path.display());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one sample as a single write
    pub fn append(&self, sample: &LiveSample) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(sample.to_line().as_bytes())?;
        Ok(())
    }

    /// Every complete sample in the file, in arrival order
    ///
    /// The header, unparseable lines and a trailing line without newline
    /// (a write in progress) are skipped.
    pub fn read_all(&self) -> Result<Vec<LiveSample>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut samples = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let Some(complete) = line.strip_suffix('\n') else {
                break;
            };
            let complete = complete.strip_suffix('\r').unwrap_or(complete);
            if complete == LIVE_LOG_HEADER {
                continue;
            }
            if let Some(sample) = LiveSample::from_line(complete) {
                samples.push(sample);
            }
        }
        Ok(samples)
    }
}

/// Sink for received messages: buffer plus optional log file
#[derive(Debug)]
pub struct LiveRecorder {
    buffer: LiveBuffer,
    log: Option<LiveLog>,
}

impl LiveRecorder {
    /// A recorder that keeps samples in memory only
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            buffer: LiveBuffer::new(capacity),
            log: None,
        }
    }

    /// A recorder backed by a log file
    ///
    /// Samples already in the file are loaded into the buffer, newest last,
    /// so a restarted server shows the feed it had before.
    pub fn with_log(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let log = LiveLog::open(path)?;
        let buffer = LiveBuffer::new(capacity);
        let existing = log.read_all()?;
        let skip = existing.len().saturating_sub(buffer.capacity());
        for sample in existing.into_iter().skip(skip) {
            buffer.push(sample);
        }
        debug!("live buffer preloaded with {} samples", buffer.len());
        Ok(Self {
            buffer,
            log: Some(log),
        })
    }

    /// Record one message in arrival order
    pub fn record(&self, payload: &[u8]) -> Result<LiveSample> {
        let sample = LiveSample::received(payload);
        if let Some(log) = &self.log {
            log.append(&sample)?;
        }
        self.buffer.push(sample.clone());
        debug!("live sample: {}", sample.payload);
        Ok(sample)
    }

    pub fn buffer(&self) -> &LiveBuffer {
        &self.buffer
    }

    pub fn log(&self) -> Option<&LiveLog> {
        self.log.as_ref()
    }

    /// (sample index, value) for every buffered sample with a numeric payload
    pub fn numeric_points(&self) -> Vec<(usize, f64)> {
        self.buffer
            .snapshot()
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.value().map(|v| (i, v)))
            .collect()
    }
}

/// Present samples as a two-column dataset for previews
pub fn samples_to_dataset(samples: &[LiveSample]) -> Dataset {
    Dataset::from_columns(vec![
        Column::timestamps("timestamp", samples.iter().map(|s| Some(s.timestamp)).collect()),
        Column::text("payload", samples.iter().map(|s| Some(s.payload.clone())).collect()),
    ])
    .unwrap_or_default()
}
