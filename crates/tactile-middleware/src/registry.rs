//! [`EventRegistry`] – the driver's set of touch event adapters.
//!
//! Adapters of different message types are stored behind the object-safe
//! [`ManagedEvent`] trait so a driver can start, stop, toggle and dump them
//! together.  Registration is an explicit call made while the driver is being
//! set up; nothing registers itself.
//!
//! [`EventAdapterFactory`] builds an adapter together with the broadcast
//! channel it publishes on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tactile_types::{BridgeError, TouchKind, TouchMessage};
use tracing::{info, warn};

use crate::adapter::{AdapterStatus, DumpOutcome, EventAdapter};
use crate::bus::SensorBus;
use crate::sink::BroadcastPublisher;

/// Administrative surface shared by every [`EventAdapter`] instantiation.
pub trait ManagedEvent: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> TouchKind;
    fn start_process(&self) -> Result<(), BridgeError>;
    fn stop_process(&self) -> Result<(), BridgeError>;
    fn set_publishing(&self, state: bool);
    fn set_recording(&self, state: bool);
    fn set_dumping(&self, state: bool);
    fn set_buffer_duration(&self, seconds: f32);
    fn write_dump(&self, stamp: DateTime<Utc>) -> Result<DumpOutcome, BridgeError>;
    fn status(&self) -> AdapterStatus;
}

impl<M: TouchMessage> ManagedEvent for EventAdapter<M> {
    fn name(&self) -> &str {
        EventAdapter::name(self)
    }

    fn kind(&self) -> TouchKind {
        M::KIND
    }

    fn start_process(&self) -> Result<(), BridgeError> {
        EventAdapter::start_process(self)
    }

    fn stop_process(&self) -> Result<(), BridgeError> {
        EventAdapter::stop_process(self)
    }

    fn set_publishing(&self, state: bool) {
        EventAdapter::set_publishing(self, state)
    }

    fn set_recording(&self, state: bool) {
        EventAdapter::set_recording(self, state)
    }

    fn set_dumping(&self, state: bool) {
        EventAdapter::set_dumping(self, state)
    }

    fn set_buffer_duration(&self, seconds: f32) {
        EventAdapter::set_buffer_duration(self, seconds)
    }

    fn write_dump(&self, stamp: DateTime<Utc>) -> Result<DumpOutcome, BridgeError> {
        EventAdapter::write_dump(self, stamp)
    }

    fn status(&self) -> AdapterStatus {
        EventAdapter::status(self)
    }
}

/// Name, keys and nominal frequency of one bus event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDefinition {
    pub name: String,
    pub keys: Vec<String>,
    pub frequency: f32,
}

impl EventDefinition {
    pub fn new(name: impl Into<String>, keys: &[&str], frequency: f32) -> Self {
        Self {
            name: name.into(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            frequency,
        }
    }

    /// Front, left and back bumpers.
    pub fn bumper() -> Self {
        Self::new(
            "bumper",
            &["RightBumperPressed", "LeftBumperPressed", "BackBumperPressed"],
            10.0,
        )
    }

    /// Front, middle and rear tactile head buttons.
    pub fn head_touch() -> Self {
        Self::new(
            "head_touch",
            &["FrontTactilTouched", "MiddleTactilTouched", "RearTactilTouched"],
            10.0,
        )
    }

    /// The six hand contact sensors.
    pub fn hand_touch() -> Self {
        Self::new(
            "hand_touch",
            &[
                "HandRightBackTouched",
                "HandRightLeftTouched",
                "HandRightRightTouched",
                "HandLeftBackTouched",
                "HandLeftLeftTouched",
                "HandLeftRightTouched",
            ],
            10.0,
        )
    }
}

/// An adapter and the channel its publisher feeds.
pub struct BuiltEvent<M: TouchMessage> {
    pub adapter: Arc<EventAdapter<M>>,
    pub channel: BroadcastPublisher<M>,
}

/// Builds adapters on a shared bus session.
#[derive(Clone)]
pub struct EventAdapterFactory {
    session: Arc<dyn SensorBus>,
    channel_capacity: usize,
}

impl EventAdapterFactory {
    pub fn new(session: Arc<dyn SensorBus>, channel_capacity: usize) -> Self {
        Self {
            session,
            channel_capacity,
        }
    }

    /// Create an idle adapter for `definition` publishing on a fresh
    /// broadcast channel named after the message kind.
    pub fn build<M: TouchMessage>(&self, definition: &EventDefinition) -> BuiltEvent<M> {
        let adapter = EventAdapter::<M>::new(
            definition.name.clone(),
            definition.keys.clone(),
            definition.frequency,
            self.session.clone(),
        );
        let channel = BroadcastPublisher::new(M::KIND.topic(), self.channel_capacity);
        adapter.reset_publisher(channel.clone());
        BuiltEvent { adapter, channel }
    }
}

/// Ordered collection of registered adapters.
#[derive(Default)]
pub struct EventRegistry {
    events: Vec<Arc<dyn ManagedEvent>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `event`.  An event already registered under the same name is
    /// stopped and replaced.
    pub fn register(&mut self, event: Arc<dyn ManagedEvent>) {
        if let Some(slot) = self.events.iter_mut().find(|e| e.name() == event.name()) {
            if let Err(e) = slot.stop_process() {
                warn!(event = slot.name(), error = %e, "failed to stop replaced event");
            }
            *slot = event;
        } else {
            info!(event = event.name(), kind = %event.kind(), "event registered");
            self.events.push(event);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ManagedEvent>> {
        self.events.iter().find(|e| e.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Start every event.  All events are attempted; the first error is
    /// returned.
    pub fn start_all(&self) -> Result<(), BridgeError> {
        self.for_each_fallible(|e| e.start_process())
    }

    /// Stop every event.  All events are attempted; the first error is
    /// returned.
    pub fn stop_all(&self) -> Result<(), BridgeError> {
        self.for_each_fallible(|e| e.stop_process())
    }

    pub fn set_publishing(&self, state: bool) {
        self.events.iter().for_each(|e| e.set_publishing(state));
    }

    pub fn set_recording(&self, state: bool) {
        self.events.iter().for_each(|e| e.set_recording(state));
    }

    pub fn set_dumping(&self, state: bool) {
        self.events.iter().for_each(|e| e.set_dumping(state));
    }

    pub fn set_buffer_duration(&self, seconds: f32) {
        self.events.iter().for_each(|e| e.set_buffer_duration(seconds));
    }

    /// Ask every event to flush its dump buffer.  Returns the total number of
    /// samples flushed.
    ///
    /// # Errors
    ///
    /// Returns the first recorder error; remaining events are still flushed.
    pub fn write_dump(&self, stamp: DateTime<Utc>) -> Result<usize, BridgeError> {
        let mut total = 0;
        let mut first_error = None;
        for event in &self.events {
            match event.write_dump(stamp) {
                Ok(DumpOutcome::Flushed(n)) => total += n,
                Ok(_) => {}
                Err(e) => {
                    warn!(event = event.name(), error = %e, "dump failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    pub fn statuses(&self) -> Vec<(String, AdapterStatus)> {
        self.events
            .iter()
            .map(|e| (e.name().to_string(), e.status()))
            .collect()
    }

    fn for_each_fallible(
        &self,
        op: impl Fn(&dyn ManagedEvent) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError> {
        let mut first_error = None;
        for event in &self.events {
            if let Err(e) = op(event.as_ref()) {
                warn!(event = event.name(), error = %e, "lifecycle call failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use std::time::Duration;
    use tactile_types::{Bumper, HandTouch, HeadTouch};

    fn factory(bus: &Arc<MemoryBus>) -> EventAdapterFactory {
        EventAdapterFactory::new(bus.clone(), 16)
    }

    #[test]
    fn default_definitions_match_sensor_counts() {
        assert_eq!(EventDefinition::bumper().keys.len(), 3);
        assert_eq!(EventDefinition::head_touch().keys.len(), 3);
        assert_eq!(EventDefinition::hand_touch().keys.len(), 6);
    }

    #[test]
    fn start_and_stop_all() {
        let bus = Arc::new(MemoryBus::default());
        let factory = factory(&bus);
        let mut registry = EventRegistry::new();
        registry.register(factory.build::<Bumper>(&EventDefinition::bumper()).adapter);
        registry.register(factory.build::<HeadTouch>(&EventDefinition::head_touch()).adapter);
        registry.register(factory.build::<HandTouch>(&EventDefinition::hand_touch()).adapter);
        assert_eq!(registry.names(), vec!["bumper", "head_touch", "hand_touch"]);

        registry.start_all().unwrap();
        assert_eq!(bus.subscription_count(), 3);
        assert!(registry.statuses().iter().all(|(_, s)| s.started));

        registry.stop_all().unwrap();
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn registering_same_name_replaces_and_stops_old_event() {
        let bus = Arc::new(MemoryBus::default());
        let factory = factory(&bus);
        let mut registry = EventRegistry::new();

        let first = factory.build::<Bumper>(&EventDefinition::bumper()).adapter;
        first.start_process().unwrap();
        registry.register(first.clone());
        registry.register(factory.build::<Bumper>(&EventDefinition::bumper()).adapter);

        assert_eq!(registry.len(), 1);
        assert!(!first.is_started());
        assert!(!registry.get("bumper").unwrap().status().started);
    }

    #[tokio::test]
    async fn built_channel_receives_published_messages() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(MemoryBus::default());
        let built = factory(&bus).build::<HandTouch>(&EventDefinition::hand_touch());
        let mut rx = built.channel.subscribe();

        let mut registry = EventRegistry::new();
        registry.register(built.adapter.clone());
        registry.set_publishing(true);
        registry.start_all()?;

        bus.raise_event("HandLeftRightTouched", 1.0);
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await??;
        assert_eq!(msg.hand, tactile_types::HandSensor::LeftRight);
        Ok(())
    }

    #[test]
    fn write_dump_skips_events_without_recorder() {
        let bus = Arc::new(MemoryBus::default());
        let mut registry = EventRegistry::new();
        registry.register(factory(&bus).build::<Bumper>(&EventDefinition::bumper()).adapter);
        registry.set_dumping(true);
        assert_eq!(registry.write_dump(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn flags_fan_out_to_every_event() {
        let bus = Arc::new(MemoryBus::default());
        let factory = factory(&bus);
        let mut registry = EventRegistry::new();
        registry.register(factory.build::<Bumper>(&EventDefinition::bumper()).adapter);
        registry.register(factory.build::<HeadTouch>(&EventDefinition::head_touch()).adapter);

        registry.set_recording(true);
        registry.set_buffer_duration(3.0);
        for (_, status) in registry.statuses() {
            assert!(status.recording);
            assert!(!status.publishing);
            assert_eq!(status.buffer_duration_secs, 3.0);
        }
    }
}
