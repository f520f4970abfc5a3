//! Wires the bus, the recorder and the three touch adapters together.

use std::sync::Arc;

use colored::Colorize;
use tactile_middleware::{
    BroadcastPublisher, EventAdapterFactory, EventRegistry, MemoryBus, SensorBus,
};
use tactile_recorder::GlobalRecorder;
use tactile_types::{Bumper, HandTouch, HeadTouch, TouchKind, TouchMessage};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::{Config, EventConfig};

/// Everything the console operates on.
pub struct TouchDriver {
    bus: Arc<MemoryBus>,
    recorder: Arc<GlobalRecorder>,
    registry: EventRegistry,
    bumper: Option<BroadcastPublisher<Bumper>>,
    head_touch: Option<BroadcastPublisher<HeadTouch>>,
    hand_touch: Option<BroadcastPublisher<HandTouch>>,
}

impl TouchDriver {
    /// Build the enabled adapters from `cfg`.  Adapters are left idle.
    pub fn build(cfg: &Config, recorder: GlobalRecorder) -> Self {
        let bus = Arc::new(MemoryBus::new(cfg.channel_capacity));
        let recorder = Arc::new(recorder);
        let session: Arc<dyn SensorBus> = bus.clone();
        let factory = EventAdapterFactory::new(session, cfg.channel_capacity);
        let mut registry = EventRegistry::new();

        let bumper = attach::<Bumper>(&factory, &cfg.bumper, &recorder, &mut registry);
        let head_touch = attach::<HeadTouch>(&factory, &cfg.head_touch, &recorder, &mut registry);
        let hand_touch = attach::<HandTouch>(&factory, &cfg.hand_touch, &recorder, &mut registry);

        registry.set_buffer_duration(cfg.buffer_duration_secs);
        registry.set_publishing(cfg.publish);
        registry.set_recording(cfg.record);
        registry.set_dumping(cfg.dump);

        Self {
            bus,
            recorder,
            registry,
            bumper,
            head_touch,
            hand_touch,
        }
    }

    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    pub fn recorder(&self) -> &Arc<GlobalRecorder> {
        &self.recorder
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Receivers currently attached to each enabled topic.
    pub fn listener_counts(&self) -> Vec<(TouchKind, usize)> {
        let mut counts = Vec::new();
        if let Some(channel) = &self.bumper {
            counts.push((TouchKind::Bumper, channel.subscriber_count()));
        }
        if let Some(channel) = &self.head_touch {
            counts.push((TouchKind::HeadTouch, channel.subscriber_count()));
        }
        if let Some(channel) = &self.hand_touch {
            counts.push((TouchKind::HandTouch, channel.subscriber_count()));
        }
        counts
    }

    /// Print every published message on the console.
    pub fn spawn_listeners(&self, handle: &Handle) {
        if let Some(channel) = &self.bumper {
            spawn_listener(handle, channel);
        }
        if let Some(channel) = &self.head_touch {
            spawn_listener(handle, channel);
        }
        if let Some(channel) = &self.hand_touch {
            spawn_listener(handle, channel);
        }
    }

    /// Stop every adapter and close the recording session.
    pub fn shutdown(&self) {
        if let Err(e) = self.registry.stop_all() {
            warn!(error = %e, "failed to stop every adapter");
        }
        if let Err(e) = self.recorder.stop_recording() {
            warn!(error = %e, "failed to close recording session");
        }
    }
}

fn attach<M: TouchMessage>(
    factory: &EventAdapterFactory,
    event: &EventConfig,
    recorder: &Arc<GlobalRecorder>,
    registry: &mut EventRegistry,
) -> Option<BroadcastPublisher<M>> {
    if !event.enabled {
        info!(event = %event.name, "event disabled in config");
        return None;
    }
    let built = factory.build::<M>(&event.definition());
    built.adapter.reset_recorder(recorder);
    registry.register(built.adapter);
    Some(built.channel)
}

fn spawn_listener<M: TouchMessage>(handle: &Handle, channel: &BroadcastPublisher<M>) {
    let mut rx = channel.subscribe();
    handle.spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let state = if message.state().is_pressed() {
                        "pressed".green()
                    } else {
                        "released".dimmed()
                    };
                    println!("  {} {} {:?}", format!("[{}]", M::KIND).cyan(), state, message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %M::KIND, skipped, "console listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
