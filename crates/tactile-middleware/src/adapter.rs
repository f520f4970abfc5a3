//! [`EventAdapter`] – one named touch event, bridged to its sinks.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──start_process()──▶ Active ──stop_process()──▶ Idle
//! ```
//!
//! `start_process` on an active adapter and `stop_process` on an idle one are
//! no-ops.  A bus failure leaves the adapter in the state it was in.  Dropping
//! an active adapter stops it.
//!
//! # Locking
//!
//! Two locks, never nested in the opposite order:
//!
//! * `lifecycle` owns the subscription handle and serialises start/stop.
//!   It is only taken by administrative calls.
//! * `dispatch` guards the mode flags, the sinks and the `started` gate.  The
//!   delivery thread takes it just long enough to decide which sinks get the
//!   message; sinks are called after it is released.
//!
//! `stop_process` closes the gate before unsubscribing, and the bus joins the
//! delivery thread, so no sink is called once it returns.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tactile_types::{
    BridgeError, Bumper, HandTouch, HeadTouch, RawValue, SubscriptionId, TouchMessage,
};
use tracing::{debug, error, info, trace, warn};

use crate::bus::{EventCallback, SensorBus};
use crate::converter::{Converter, TouchEventConverter};
use crate::sink::{Publisher, Recorder};

/// Dump buffer length used until [`EventAdapter::set_buffer_duration`] is called.
pub const DEFAULT_BUFFER_DURATION_SECS: f32 = 10.0;

/// Shortest accepted dump buffer length.
pub const MIN_BUFFER_DURATION_SECS: f32 = 0.5;

pub type BumperEventAdapter = EventAdapter<Bumper>;
pub type HeadTouchEventAdapter = EventAdapter<HeadTouch>;
pub type HandTouchEventAdapter = EventAdapter<HandTouch>;

/// Result of [`EventAdapter::write_dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutcome {
    /// The recorder flushed this many buffered samples.
    Flushed(usize),
    SkippedNotDumping,
    SkippedNoRecorder,
    SkippedRecorderUninitialized,
}

/// Point-in-time view of an adapter's state.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterStatus {
    pub started: bool,
    pub subscription: Option<SubscriptionId>,
    pub publishing: bool,
    pub recording: bool,
    pub dumping: bool,
    pub buffer_duration_secs: f32,
    pub has_publisher: bool,
    pub has_recorder: bool,
}

struct DispatchState<M> {
    started: bool,
    publishing: bool,
    recording: bool,
    dumping: bool,
    buffer_duration_secs: f32,
    publisher: Option<Arc<dyn Publisher<M>>>,
    recorder: Option<Weak<dyn Recorder<M>>>,
}

impl<M> DispatchState<M> {
    fn live_recorder(&self) -> Option<Arc<dyn Recorder<M>>> {
        self.recorder.as_ref().and_then(Weak::upgrade)
    }

    // Decide which sinks receive the current message.
    fn route(&self) -> Route<M> {
        let publisher = if self.publishing {
            self.publisher
                .as_ref()
                .filter(|p| p.has_subscriber())
                .cloned()
        } else {
            None
        };
        let recorder = if self.recording || self.dumping {
            self.live_recorder()
        } else {
            None
        };
        let record = if self.recording {
            recorder.clone().filter(|r| r.is_initialized())
        } else {
            None
        };
        let buffer = if self.dumping { recorder } else { None };
        Route {
            publisher,
            record,
            buffer,
        }
    }
}

struct Route<M> {
    publisher: Option<Arc<dyn Publisher<M>>>,
    record: Option<Arc<dyn Recorder<M>>>,
    buffer: Option<Arc<dyn Recorder<M>>>,
}

impl<M> Route<M> {
    fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.record.is_none() && self.buffer.is_none()
    }

    fn deliver(&self, event: &str, message: &M) {
        if let Some(publisher) = &self.publisher
            && let Err(e) = publisher.publish(message)
        {
            warn!(event, topic = publisher.topic(), error = %e, "publish failed");
        }
        if let Some(recorder) = &self.record
            && let Err(e) = recorder.write(message)
        {
            warn!(event, error = %e, "record failed");
        }
        if let Some(recorder) = &self.buffer
            && let Err(e) = recorder.bufferize(message)
        {
            warn!(event, error = %e, "bufferize failed");
        }
    }
}

/// Bridges one named touch event from a [`SensorBus`] to a publisher and a
/// recorder.
///
/// Always handled through an `Arc`: the bus callback holds a weak reference
/// back to the adapter so a forgotten subscription cannot keep it alive.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tactile_middleware::{BroadcastPublisher, BumperEventAdapter, MemoryBus};
///
/// let bus = Arc::new(MemoryBus::default());
/// let adapter = BumperEventAdapter::new(
///     "bumper",
///     vec!["RightBumperPressed".to_string()],
///     10.0,
///     bus.clone(),
/// );
/// let channel = BroadcastPublisher::new("bumper", 16);
/// let _rx = channel.subscribe();
/// adapter.reset_publisher(channel);
/// adapter.set_publishing(true);
/// adapter.start_process().unwrap();
/// assert!(adapter.is_started());
/// adapter.stop_process().unwrap();
/// ```
pub struct EventAdapter<M: TouchMessage> {
    name: String,
    keys: Vec<String>,
    frequency: f32,
    session: Arc<dyn SensorBus>,
    converter: Box<dyn Converter<M>>,
    lifecycle: Mutex<Option<SubscriptionId>>,
    dispatch: Mutex<DispatchState<M>>,
    me: Weak<Self>,
}

impl<M: TouchMessage> EventAdapter<M> {
    /// Create an idle adapter using the key-indexed [`TouchEventConverter`].
    ///
    /// `frequency` is kept for reporting only; delivery is driven by the bus.
    pub fn new(
        name: impl Into<String>,
        keys: Vec<String>,
        frequency: f32,
        session: Arc<dyn SensorBus>,
    ) -> Arc<Self> {
        let name = name.into();
        let converter = TouchEventConverter::<M>::new(name.clone(), keys.clone());
        Self::with_converter(name, keys, frequency, session, converter)
    }

    /// Create an idle adapter with a custom converter.
    pub fn with_converter(
        name: impl Into<String>,
        keys: Vec<String>,
        frequency: f32,
        session: Arc<dyn SensorBus>,
        converter: impl Converter<M> + 'static,
    ) -> Arc<Self> {
        let name = name.into();
        debug!(event = %name, kind = %M::KIND, ?keys, frequency, "touch event adapter created");
        Arc::new_cyclic(|me| Self {
            name,
            keys,
            frequency,
            session,
            converter: Box::new(converter),
            lifecycle: Mutex::new(None),
            dispatch: Mutex::new(DispatchState {
                started: false,
                publishing: false,
                recording: false,
                dumping: false,
                buffer_duration_secs: DEFAULT_BUFFER_DURATION_SECS,
                publisher: None,
                recorder: None,
            }),
            me: me.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// `true` while a bus subscription is held.
    pub fn is_started(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ───────────────────────────────────────────────────────────────────────

    /// Subscribe to the bus and begin dispatching.  No-op when already
    /// started.
    ///
    /// # Errors
    ///
    /// Returns the bus's [`BridgeError::Subscription`]; the adapter stays idle.
    pub fn start_process(&self) -> Result<(), BridgeError> {
        let mut handle = self.lifecycle.lock();
        if let Some(id) = *handle {
            debug!(event = %self.name, subscription = %id, "already started");
            return Ok(());
        }

        let me = self.me.clone();
        let callback: EventCallback = Arc::new(move |key: &str, raw: &RawValue| {
            if let Some(adapter) = me.upgrade() {
                adapter.on_event(key, raw);
            }
        });
        let id = self.session.subscribe(&self.name, &self.keys, callback)?;

        self.dispatch.lock().started = true;
        *handle = Some(id);
        info!(event = %self.name, subscription = %id, keys = ?self.keys, "touch event registered");
        Ok(())
    }

    /// Unsubscribe from the bus.  No-op when idle.  Once this returns no
    /// further message reaches a sink.
    ///
    /// # Errors
    ///
    /// Returns the bus's [`BridgeError::Subscription`]; the adapter stays
    /// started.
    pub fn stop_process(&self) -> Result<(), BridgeError> {
        let mut handle = self.lifecycle.lock();
        let Some(id) = *handle else {
            debug!(event = %self.name, "not started");
            return Ok(());
        };

        self.dispatch.lock().started = false;
        if let Err(e) = self.session.unsubscribe(id) {
            self.dispatch.lock().started = true;
            warn!(event = %self.name, subscription = %id, error = %e, "unsubscribe rejected");
            return Err(e);
        }
        *handle = None;
        info!(event = %self.name, subscription = %id, "touch event unregistered");
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Sinks and flags
    // ───────────────────────────────────────────────────────────────────────

    /// Replace the publisher.  Applies from the next dispatched event.
    pub fn reset_publisher(&self, publisher: impl Publisher<M> + 'static) {
        let publisher: Arc<dyn Publisher<M>> = Arc::new(publisher);
        debug!(event = %self.name, topic = publisher.topic(), "publisher reset");
        self.dispatch.lock().publisher = Some(publisher);
    }

    /// Observe `recorder` without owning it.  The current buffer duration is
    /// forwarded to it.
    pub fn reset_recorder<R: Recorder<M> + 'static>(&self, recorder: &Arc<R>) {
        let recorder: Arc<dyn Recorder<M>> = recorder.clone();
        let mut state = self.dispatch.lock();
        recorder.set_buffer_duration(Duration::from_secs_f32(state.buffer_duration_secs));
        state.recorder = Some(Arc::downgrade(&recorder));
        debug!(event = %self.name, "recorder reset");
    }

    pub fn set_publishing(&self, state: bool) {
        self.dispatch.lock().publishing = state;
        debug!(event = %self.name, publishing = state);
    }

    pub fn set_recording(&self, state: bool) {
        self.dispatch.lock().recording = state;
        debug!(event = %self.name, recording = state);
    }

    pub fn set_dumping(&self, state: bool) {
        self.dispatch.lock().dumping = state;
        debug!(event = %self.name, dumping = state);
    }

    /// Set how much history the recorder's dump buffer keeps.
    ///
    /// Non-positive and non-finite values are ignored; values under
    /// [`MIN_BUFFER_DURATION_SECS`] are raised to it.
    pub fn set_buffer_duration(&self, seconds: f32) {
        if !seconds.is_finite() || seconds <= 0.0 {
            warn!(event = %self.name, seconds, "ignoring invalid buffer duration");
            return;
        }
        let seconds = seconds.max(MIN_BUFFER_DURATION_SECS);
        let mut state = self.dispatch.lock();
        state.buffer_duration_secs = seconds;
        if let Some(recorder) = state.live_recorder() {
            recorder.set_buffer_duration(Duration::from_secs_f32(seconds));
        }
        debug!(event = %self.name, seconds, "buffer duration set");
    }

    /// Flush the recorder's dump buffer, tagged with `stamp`.
    ///
    /// Requires dumping to be on and a live, initialised recorder; otherwise
    /// a warning is logged and a `Skipped*` outcome returned.
    ///
    /// # Errors
    ///
    /// Returns the recorder's error when the flush itself fails.
    pub fn write_dump(&self, stamp: DateTime<Utc>) -> Result<DumpOutcome, BridgeError> {
        let recorder = {
            let state = self.dispatch.lock();
            if !state.dumping {
                warn!(event = %self.name, "write_dump ignored: dumping is disabled");
                return Ok(DumpOutcome::SkippedNotDumping);
            }
            match state.live_recorder() {
                None => {
                    warn!(event = %self.name, "write_dump ignored: no recorder");
                    return Ok(DumpOutcome::SkippedNoRecorder);
                }
                Some(recorder) if !recorder.is_initialized() => {
                    warn!(event = %self.name, "write_dump ignored: recorder not initialized");
                    return Ok(DumpOutcome::SkippedRecorderUninitialized);
                }
                Some(recorder) => recorder,
            }
        };
        let flushed = recorder.flush(stamp)?;
        info!(event = %self.name, flushed, %stamp, "dump written");
        Ok(DumpOutcome::Flushed(flushed))
    }

    pub fn status(&self) -> AdapterStatus {
        let subscription = *self.lifecycle.lock();
        let state = self.dispatch.lock();
        AdapterStatus {
            started: subscription.is_some(),
            subscription,
            publishing: state.publishing,
            recording: state.recording,
            dumping: state.dumping,
            buffer_duration_secs: state.buffer_duration_secs,
            has_publisher: state.publisher.is_some(),
            has_recorder: state.live_recorder().is_some(),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Dispatch
    // ───────────────────────────────────────────────────────────────────────

    /// Bus callback: convert `raw` and route it to the enabled sinks.
    ///
    /// Never fails; unconvertible values and sink errors are logged and the
    /// event is dropped.
    pub fn on_event(&self, key: &str, raw: &RawValue) {
        let message = match self.converter.convert(key, raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(event = %self.name, key, error = %e, "dropping touch event");
                return;
            }
        };

        let route = {
            let state = self.dispatch.lock();
            if !state.started {
                trace!(event = %self.name, key, "not started; event ignored");
                return;
            }
            state.route()
        };
        if route.is_empty() {
            trace!(event = %self.name, key, "no sink enabled");
            return;
        }
        route.deliver(&self.name, &message);
    }
}

impl<M: TouchMessage> Drop for EventAdapter<M> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_process() {
            error!(event = %self.name, error = %e, "failed to unregister on drop");
        }
    }
}
