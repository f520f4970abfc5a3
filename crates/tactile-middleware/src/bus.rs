//! Sensor bus contract and an in-process implementation.
//!
//! A [`SensorBus`] delivers named raw sensor values to subscribers.  Each
//! subscription is served by exactly one delivery thread, so callbacks for a
//! given subscription never run concurrently and arrive in the order the
//! values were raised.
//!
//! [`MemoryBus`] is the in-process bus used by the CLI and the tests.  It also
//! keeps the latest value raised for every key, readable via
//! [`MemoryBus::get_data`].
//!
//! # Unsubscribe semantics
//!
//! [`SensorBus::unsubscribe`] blocks until the delivery thread has finished
//! any callback in progress.  When it is called *from* that delivery thread
//! (e.g. a subscriber dropping itself inside its own callback) it returns
//! without joining.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tactile_types::{BridgeError, RawValue, SubscriptionId};
use tracing::{debug, error, warn};

/// Default number of pending deliveries buffered per subscription before new
/// values are dropped for a slow subscriber.
const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Callback invoked on the delivery thread with `(key, value)`.
pub type EventCallback = Arc<dyn Fn(&str, &RawValue) + Send + Sync>;

/// Subscribe-by-name / unsubscribe-by-id event bus.
pub trait SensorBus: Send + Sync {
    /// Register `subscriber` for every key in `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Subscription`] when the bus rejects the request.
    fn subscribe(
        &self,
        subscriber: &str,
        keys: &[String],
        callback: EventCallback,
    ) -> Result<SubscriptionId, BridgeError>;

    /// Remove the subscription `id`.  No callback for `id` starts after this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Subscription`] for unknown ids.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BridgeError>;
}

struct Delivery {
    key: String,
    value: RawValue,
}

struct Subscription {
    subscriber: String,
    keys: Vec<String>,
    sender: SyncSender<Delivery>,
    active: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct BusState {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    data: HashMap<String, RawValue>,
}

/// In-process [`SensorBus`] with one delivery thread per subscription.
pub struct MemoryBus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl MemoryBus {
    /// Create a bus whose subscriptions buffer up to `queue_depth` pending
    /// deliveries each.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Store `value` under `key` and queue it for every subscription that
    /// listens to `key`.
    ///
    /// Returns the number of subscriptions the value was queued for.  A full
    /// queue drops the value for that subscription only.
    pub fn raise_event(&self, key: &str, value: impl Into<RawValue>) -> usize {
        let value = value.into();
        let mut state = self.state.lock();
        state.data.insert(key.to_string(), value.clone());

        let mut queued = 0;
        for (id, sub) in &state.subscriptions {
            if !sub.keys.iter().any(|k| k == key) {
                continue;
            }
            let delivery = Delivery {
                key: key.to_string(),
                value: value.clone(),
            };
            match sub.sender.try_send(delivery) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %sub.subscriber, subscription = %id, key, "delivery queue full; value dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(subscriber = %sub.subscriber, subscription = %id, "delivery thread gone");
                }
            }
        }
        queued
    }

    /// Latest value raised for `key`, if any.
    pub fn get_data(&self, key: &str) -> Option<RawValue> {
        self.state.lock().data.get(key).cloned()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Names of the subscribers currently listening to `key`.
    pub fn subscribers_of(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|sub| sub.keys.iter().any(|k| k == key))
            .map(|sub| sub.subscriber.clone())
            .collect()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl SensorBus for MemoryBus {
    fn subscribe(
        &self,
        subscriber: &str,
        keys: &[String],
        callback: EventCallback,
    ) -> Result<SubscriptionId, BridgeError> {
        if subscriber.is_empty() {
            return Err(BridgeError::subscription(subscriber, "subscriber name is empty"));
        }
        if keys.is_empty() {
            return Err(BridgeError::subscription(subscriber, "no keys to subscribe to"));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::sync_channel(self.queue_depth);
        let active = Arc::new(AtomicBool::new(true));

        let worker = {
            let owner = subscriber.to_string();
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name(format!("tactile-bus-{subscriber}"))
                .spawn(move || deliver(owner, receiver, active, callback))
                .map_err(|e| {
                    BridgeError::subscription(subscriber, format!("cannot spawn delivery thread: {e}"))
                })?
        };

        self.state.lock().subscriptions.insert(
            id,
            Subscription {
                subscriber: subscriber.to_string(),
                keys: keys.to_vec(),
                sender,
                active,
                worker,
            },
        );
        debug!(subscriber, subscription = %id, ?keys, "subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BridgeError> {
        let subscription = self
            .state
            .lock()
            .subscriptions
            .remove(&id)
            .ok_or_else(|| BridgeError::subscription(id.to_string(), "unknown subscription"))?;
        retire(subscription)
    }
}

impl Drop for MemoryBus {
    fn drop(&mut self) {
        let subscriptions: Vec<Subscription> =
            self.state.get_mut().subscriptions.drain().map(|(_, sub)| sub).collect();
        for sub in subscriptions {
            if let Err(e) = retire(sub) {
                warn!(error = %e, "failed to retire subscription on bus drop");
            }
        }
    }
}

// Deactivate a removed subscription and wait for its delivery thread.
fn retire(subscription: Subscription) -> Result<(), BridgeError> {
    let Subscription {
        subscriber,
        sender,
        active,
        worker,
        ..
    } = subscription;

    active.store(false, Ordering::Release);
    drop(sender);

    if worker.thread().id() == thread::current().id() {
        debug!(subscriber = %subscriber, "unsubscribed from own delivery thread");
        return Ok(());
    }
    worker
        .join()
        .map_err(|_| BridgeError::subscription(subscriber, "delivery thread panicked"))
}

fn deliver(
    subscriber: String,
    receiver: Receiver<Delivery>,
    active: Arc<AtomicBool>,
    callback: EventCallback,
) {
    while let Ok(delivery) = receiver.recv() {
        if !active.load(Ordering::Acquire) {
            break;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            callback(&delivery.key, &delivery.value)
        }));
        if outcome.is_err() {
            error!(subscriber = %subscriber, key = %delivery.key, "subscriber callback panicked");
        }
    }
    debug!(subscriber = %subscriber, "delivery thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_key: &str, _value: &RawValue| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn wait_for(counter: &AtomicUsize, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if counter.load(Ordering::SeqCst) >= expected {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn subscriber_receives_only_its_keys() {
        let bus = MemoryBus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("bumper", &keys(&["RightBumperPressed"]), counting_callback(&counter))
            .unwrap();

        assert_eq!(bus.raise_event("RightBumperPressed", 1.0), 1);
        assert_eq!(bus.raise_event("FrontTactilTouched", 1.0), 0);

        assert!(wait_for(&counter, 1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multiple_subscribers_receive_same_value() {
        let bus = MemoryBus::default();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", &keys(&["Key"]), counting_callback(&a)).unwrap();
        bus.subscribe("b", &keys(&["Key"]), counting_callback(&b)).unwrap();

        assert_eq!(bus.raise_event("Key", true), 2);
        assert!(wait_for(&a, 1));
        assert!(wait_for(&b, 1));
    }

    #[test]
    fn deliveries_preserve_order() {
        let bus = MemoryBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            "ordered",
            &keys(&["Key"]),
            Arc::new(move |_k: &str, v: &RawValue| {
                if let RawValue::Int(i) = v {
                    sink.lock().push(*i);
                }
            }),
        )
        .unwrap();

        for i in 0..100i64 {
            bus.raise_event("Key", i);
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().len() < 100 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        let seen = seen.lock();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = MemoryBus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus
            .subscribe("bumper", &keys(&["Key"]), counting_callback(&counter))
            .unwrap();
        bus.raise_event("Key", 1.0);
        assert!(wait_for(&counter, 1));

        bus.unsubscribe(id).unwrap();
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.raise_event("Key", 1.0), 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_waits_for_in_flight_callback() {
        let bus = MemoryBus::default();
        let finished = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));
        let (f, s) = (Arc::clone(&finished), Arc::clone(&started));
        let id = bus
            .subscribe(
                "slow",
                &keys(&["Key"]),
                Arc::new(move |_k: &str, _v: &RawValue| {
                    s.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    f.store(true, Ordering::SeqCst);
                }),
            )
            .unwrap();

        bus.raise_event("Key", 1.0);
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        bus.unsubscribe(id).unwrap();
        assert!(finished.load(Ordering::SeqCst), "callback must complete before unsubscribe returns");
    }

    #[test]
    fn unknown_subscription_is_an_error() {
        let bus = MemoryBus::default();
        let result = bus.unsubscribe(SubscriptionId(42));
        assert!(matches!(result, Err(BridgeError::Subscription { .. })));
    }

    #[test]
    fn empty_keys_are_rejected() {
        let bus = MemoryBus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let result = bus.subscribe("bumper", &[], counting_callback(&counter));
        assert!(matches!(result, Err(BridgeError::Subscription { .. })));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn panicking_callback_keeps_subscription_alive() {
        let bus = MemoryBus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe(
            "fragile",
            &keys(&["Key"]),
            Arc::new(move |_k: &str, v: &RawValue| {
                if matches!(v, RawValue::Empty) {
                    panic!("bad value");
                }
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        bus.raise_event("Key", RawValue::Empty);
        bus.raise_event("Key", 1.0);
        assert!(wait_for(&counter, 1));
    }

    #[test]
    fn full_queue_drops_values_instead_of_blocking() {
        let bus = MemoryBus::new(1);
        let release = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&release);
        bus.subscribe(
            "stuck",
            &keys(&["Key"]),
            Arc::new(move |_k: &str, _v: &RawValue| {
                while !r.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            }),
        )
        .unwrap();

        let queued: usize = (0..10).map(|_| bus.raise_event("Key", 1.0)).sum();
        assert!(queued < 10, "a depth-1 queue cannot hold ten values");
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn get_data_returns_latest_value() {
        let bus = MemoryBus::default();
        assert!(bus.get_data("HeadTouched").is_none());
        bus.raise_event("HeadTouched", 0.0);
        bus.raise_event("HeadTouched", 1.0);
        assert_eq!(bus.get_data("HeadTouched"), Some(RawValue::Float(1.0)));
        assert_eq!(bus.subscribers_of("HeadTouched").len(), 0);
    }
}
