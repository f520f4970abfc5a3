//! `tactile-recorder` – durable storage for bridged touch messages.
//!
//! # Modules
//!
//! - [`global`] – [`GlobalRecorder`][global::GlobalRecorder]: a SQLite-backed
//!   recorder shared by every adapter of a driver.  It persists messages of
//!   the open recording session and keeps a time-bounded dump buffer that is
//!   written out on demand.

pub mod global;

pub use global::{GlobalRecorder, RecordedSample, RecorderError};
