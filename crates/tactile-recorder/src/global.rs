//! Session recorder and dump buffer.
//!
//! # Storage layout
//!
//! | table      | purpose                                                  |
//! |------------|----------------------------------------------------------|
//! | `sessions` | one row per recording session (label, start, stop)       |
//! | `samples`  | every persisted message, recorded or dumped              |
//!
//! Columns of `samples`:
//!
//! | column      | type    | description                                  |
//! |-------------|---------|----------------------------------------------|
//! | id          | INTEGER | row id                                       |
//! | session_id  | INTEGER | owning session, `NULL` for dumped samples    |
//! | dump_stamp  | TEXT    | RFC-3339 dump tag, `NULL` for recorded ones  |
//! | stamp       | TEXT    | RFC-3339 message time (UTC)                  |
//! | topic       | TEXT    | message topic, e.g. `"bumper"`               |
//! | payload     | TEXT    | JSON-encoded message                         |
//!
//! # Dump buffers
//!
//! Each topic has its own dump buffer and buffer duration, so adapters of
//! different kinds sharing one recorder do not resize or flush each other's
//! history.  Buffered samples older than the topic's duration (relative to
//! its newest sample) are discarded, and no buffer holds more than
//! [`MAX_BUFFERED_SAMPLES`].  A dump clears its buffer only once the samples
//! are committed.
//!
//! # Example
//!
//! ```rust
//! use tactile_recorder::GlobalRecorder;
//!
//! let recorder = GlobalRecorder::open_in_memory().unwrap();
//! let session = recorder.start_recording("demo").unwrap();
//! assert!(recorder.is_recording());
//! assert_eq!(recorder.recorded_samples(session).unwrap().len(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tactile_middleware::Recorder;
use tactile_types::{BridgeError, TouchMessage};
use thiserror::Error;
use tracing::{debug, info};

/// Hard cap on the dump buffer, whatever the buffer duration.
pub const MAX_BUFFERED_SAMPLES: usize = 10_000;

const DEFAULT_BUFFER_DURATION: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("No recording session is open")]
    NotInitialized,
}

impl From<RecorderError> for BridgeError {
    fn from(e: RecorderError) -> Self {
        BridgeError::Recorder(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordedSample
// ─────────────────────────────────────────────────────────────────────────────

/// One message as stored by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSample {
    pub stamp: DateTime<Utc>,
    pub topic: String,
    pub payload: serde_json::Value,
}

impl RecordedSample {
    pub fn from_message<M: TouchMessage>(message: &M) -> Result<Self, RecorderError> {
        Ok(Self {
            stamp: message.stamp(),
            topic: M::KIND.topic().to_string(),
            payload: serde_json::to_value(message)?,
        })
    }

    /// Decode the payload back into a typed message.
    pub fn decode<M: TouchMessage>(&self) -> Result<M, RecorderError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GlobalRecorder
// ─────────────────────────────────────────────────────────────────────────────

struct TopicBuffer {
    samples: VecDeque<RecordedSample>,
    duration: Duration,
}

impl Default for TopicBuffer {
    fn default() -> Self {
        Self {
            samples: VecDeque::new(),
            duration: DEFAULT_BUFFER_DURATION,
        }
    }
}

impl TopicBuffer {
    fn prune(&mut self) {
        while self.samples.len() > MAX_BUFFERED_SAMPLES {
            self.samples.pop_front();
        }
        let Some(newest) = self.samples.back().map(|s| s.stamp) else {
            return;
        };
        let Ok(window) = chrono::Duration::from_std(self.duration) else {
            return;
        };
        let horizon = newest - window;
        while self.samples.front().is_some_and(|s| s.stamp < horizon) {
            self.samples.pop_front();
        }
    }
}

struct Inner {
    conn: Connection,
    session: Option<i64>,
    buffers: HashMap<String, TopicBuffer>,
}

/// SQLite-backed recorder shared by all adapters of a driver.
///
/// Adapters only hold a weak reference; the driver owns the recorder.
pub struct GlobalRecorder {
    inner: Mutex<Inner>,
}

impl GlobalRecorder {
    /// Open (or create) a recording database at `path`, creating missing
    /// parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, RecorderError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RecorderError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                label       TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                stopped_at  TEXT
            );
            CREATE TABLE IF NOT EXISTS samples (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  INTEGER REFERENCES sessions(id),
                dump_stamp  TEXT,
                stamp       TEXT NOT NULL,
                topic       TEXT NOT NULL,
                payload     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_samples_session ON samples(session_id);
            CREATE INDEX IF NOT EXISTS idx_samples_dump ON samples(dump_stamp);",
        )?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                session: None,
                buffers: HashMap::new(),
            }),
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Sessions
    // ───────────────────────────────────────────────────────────────────────

    /// Open a recording session.  Returns the already open session's id when
    /// one exists.
    pub fn start_recording(&self, label: &str) -> Result<i64, RecorderError> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.session {
            return Ok(id);
        }
        inner.conn.execute(
            "INSERT INTO sessions (label, started_at) VALUES (?1, ?2)",
            params![label, Utc::now().to_rfc3339()],
        )?;
        let id = inner.conn.last_insert_rowid();
        inner.session = Some(id);
        info!(session = id, label, "recording started");
        Ok(id)
    }

    /// Close the open recording session, returning its id.
    pub fn stop_recording(&self) -> Result<Option<i64>, RecorderError> {
        let mut inner = self.inner.lock();
        let Some(id) = inner.session else {
            return Ok(None);
        };
        inner.conn.execute(
            "UPDATE sessions SET stopped_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        inner.session = None;
        info!(session = id, "recording stopped");
        Ok(Some(id))
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// Id of the open recording session.
    pub fn current_session(&self) -> Option<i64> {
        self.inner.lock().session
    }

    /// Label of session `id`, if it exists.
    pub fn session_label(&self, id: i64) -> Result<Option<String>, RecorderError> {
        let inner = self.inner.lock();
        let label = inner
            .conn
            .query_row("SELECT label FROM sessions WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(label)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Samples
    // ───────────────────────────────────────────────────────────────────────

    /// Persist `sample` in the open session.
    pub fn record_sample(&self, sample: &RecordedSample) -> Result<(), RecorderError> {
        let inner = self.inner.lock();
        let session = inner.session.ok_or(RecorderError::NotInitialized)?;
        inner.conn.execute(
            "INSERT INTO samples (session_id, stamp, topic, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                session,
                sample.stamp.to_rfc3339(),
                sample.topic,
                sample.payload.to_string()
            ],
        )?;
        Ok(())
    }

    /// Append `sample` to the dump buffer of its topic.
    pub fn buffer_sample(&self, sample: RecordedSample) {
        let mut inner = self.inner.lock();
        let buffer = inner.buffers.entry(sample.topic.clone()).or_default();
        buffer.samples.push_back(sample);
        buffer.prune();
    }

    /// Write the dump buffer of `topic` under `stamp`.  Returns the number of
    /// samples written.  The buffer is left untouched when the write fails.
    pub fn flush_buffer(&self, topic: &str, stamp: DateTime<Utc>) -> Result<usize, RecorderError> {
        let mut inner = self.inner.lock();
        let Inner { conn, buffers, .. } = &mut *inner;
        let Some(buffer) = buffers.get_mut(topic).filter(|b| !b.samples.is_empty()) else {
            debug!(topic, %stamp, "dump buffer empty");
            return Ok(0);
        };
        let dump_stamp = stamp.to_rfc3339();

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO samples (dump_stamp, stamp, topic, payload) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for sample in &buffer.samples {
                stmt.execute(params![
                    dump_stamp,
                    sample.stamp.to_rfc3339(),
                    sample.topic,
                    sample.payload.to_string()
                ])?;
            }
        }
        tx.commit()?;

        let count = buffer.samples.len();
        buffer.samples.clear();
        info!(topic, %stamp, count, "dump buffer flushed");
        Ok(count)
    }

    /// Samples buffered across every topic.
    pub fn buffered_len(&self) -> usize {
        self.inner.lock().buffers.values().map(|b| b.samples.len()).sum()
    }

    pub fn buffered_len_of(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .buffers
            .get(topic)
            .map_or(0, |b| b.samples.len())
    }

    pub fn buffer_duration(&self, topic: &str) -> Duration {
        self.inner
            .lock()
            .buffers
            .get(topic)
            .map_or(DEFAULT_BUFFER_DURATION, |b| b.duration)
    }

    /// Change the dump window of `topic` and drop samples now outside it.
    pub fn resize_buffer(&self, topic: &str, duration: Duration) {
        let mut inner = self.inner.lock();
        let buffer = inner.buffers.entry(topic.to_string()).or_default();
        buffer.duration = duration;
        buffer.prune();
    }

    /// Samples recorded in session `id`, oldest first.
    pub fn recorded_samples(&self, id: i64) -> Result<Vec<RecordedSample>, RecorderError> {
        self.query_samples(
            "SELECT stamp, topic, payload FROM samples WHERE session_id = ?1 ORDER BY id",
            params![id],
        )
    }

    /// Samples written by the dump tagged `stamp`, oldest first.
    pub fn dumped_samples(&self, stamp: DateTime<Utc>) -> Result<Vec<RecordedSample>, RecorderError> {
        self.query_samples(
            "SELECT stamp, topic, payload FROM samples WHERE dump_stamp = ?1 ORDER BY id",
            params![stamp.to_rfc3339()],
        )
    }

    fn query_samples(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<RecordedSample>, RecorderError> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (stamp, topic, payload) = row?;
            samples.push(RecordedSample {
                stamp: DateTime::parse_from_rfc3339(&stamp)?.with_timezone(&Utc),
                topic,
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(samples)
    }
}

impl<M: TouchMessage> Recorder<M> for GlobalRecorder {
    fn is_initialized(&self) -> bool {
        self.is_recording()
    }

    fn write(&self, message: &M) -> Result<(), BridgeError> {
        let sample = RecordedSample::from_message(message)?;
        Ok(self.record_sample(&sample)?)
    }

    fn bufferize(&self, message: &M) -> Result<(), BridgeError> {
        self.buffer_sample(RecordedSample::from_message(message)?);
        Ok(())
    }

    fn flush(&self, stamp: DateTime<Utc>) -> Result<usize, BridgeError> {
        Ok(self.flush_buffer(M::KIND.topic(), stamp)?)
    }

    fn set_buffer_duration(&self, duration: Duration) {
        self.resize_buffer(M::KIND.topic(), duration);
    }
}
