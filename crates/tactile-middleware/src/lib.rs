//! `tactile-middleware` – bridges robot touch events to their sinks.
//!
//! Subscribes to named contact-sensor events on a [`SensorBus`], converts
//! every raw value into a typed touch message and fans it out to a live
//! publisher and a recorder without blocking the bus delivery thread.
//!
//! # Modules
//!
//! - [`bus`] – the [`SensorBus`] contract and [`MemoryBus`], an in-process
//!   bus that delivers each subscription on its own worker thread.
//! - [`converter`] – raw value → touch message conversion.
//! - [`sink`] – [`Publisher`] and [`Recorder`] contracts plus the
//!   broadcast-channel backed [`BroadcastPublisher`].
//! - [`adapter`] – [`EventAdapter`], the per-event lifecycle and dispatch
//!   state machine.
//! - [`registry`] – [`EventRegistry`] and [`EventAdapterFactory`] used by
//!   drivers to build, register and drive adapters together.

pub mod adapter;
pub mod bus;
pub mod converter;
pub mod registry;
pub mod sink;

pub use adapter::{
    AdapterStatus, BumperEventAdapter, DumpOutcome, EventAdapter, HandTouchEventAdapter,
    HeadTouchEventAdapter,
};
pub use bus::{EventCallback, MemoryBus, SensorBus};
pub use converter::{Converter, TouchEventConverter};
pub use registry::{BuiltEvent, EventAdapterFactory, EventDefinition, EventRegistry, ManagedEvent};
pub use sink::{BroadcastPublisher, Publisher, Recorder};
