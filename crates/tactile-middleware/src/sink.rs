//! Sink contracts consumed by [`EventAdapter`][crate::adapter::EventAdapter].
//!
//! | Sink | Receives |
//! |---|---|
//! | [`Publisher`] | every dispatched message while publishing is on and someone listens |
//! | [`Recorder::write`] | every dispatched message while recording is on |
//! | [`Recorder::bufferize`] | every dispatched message while dumping is on; drained by [`Recorder::flush`] |
//!
//! Sinks are called from the bus delivery thread.  They must be quick or
//! buffer internally; a slow sink delays that subscription's deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tactile_types::BridgeError;
use tokio::sync::broadcast;

/// Default channel capacity of a [`BroadcastPublisher`].
pub const DEFAULT_CAPACITY: usize = 256;

/// Live delivery of structured messages.
pub trait Publisher<M>: Send + Sync {
    /// Name of the outbound topic.
    fn topic(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`BridgeError::Publish`] when the message cannot be handed off.
    fn publish(&self, message: &M) -> Result<(), BridgeError>;

    /// Whether anyone currently listens on [`topic`][Publisher::topic].
    fn has_subscriber(&self) -> bool;
}

/// Durable recording plus a bounded dump buffer.
pub trait Recorder<M>: Send + Sync {
    /// Whether a recording session is open.
    fn is_initialized(&self) -> bool;

    /// Persist `message` in the current recording session.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Recorder`] on storage failure.
    fn write(&self, message: &M) -> Result<(), BridgeError>;

    /// Keep `message` in the dump buffer until the next [`flush`][Recorder::flush].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Recorder`] when the message cannot be buffered.
    fn bufferize(&self, message: &M) -> Result<(), BridgeError>;

    /// Move the buffered `M` messages to durable storage, tagged with
    /// `stamp`.  Returns the number of samples flushed; on error the buffer
    /// is kept.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Recorder`] on storage failure.
    fn flush(&self, stamp: DateTime<Utc>) -> Result<usize, BridgeError>;

    /// How much `M` history the dump buffer keeps.
    fn set_buffer_duration(&self, duration: Duration);
}

/// [`Publisher`] backed by a Tokio broadcast channel.
///
/// Cloning is cheap and every clone feeds the same channel, so a driver can
/// hand one clone to an adapter and keep another to create receivers.
#[derive(Debug)]
pub struct BroadcastPublisher<M> {
    topic: String,
    sender: broadcast::Sender<M>,
}

impl<M> Clone for BroadcastPublisher<M> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<M: Clone + Send + 'static> BroadcastPublisher<M> {
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            sender,
        }
    }

    /// Open a new receiver on this topic.
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<M: Clone + Send + Sync + 'static> Publisher<M> for BroadcastPublisher<M> {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, message: &M) -> Result<(), BridgeError> {
        self.sender
            .send(message.clone())
            .map(|_| ())
            .map_err(|_| BridgeError::Publish {
                topic: self.topic.clone(),
                details: "no subscribers".to_string(),
            })
    }

    fn has_subscriber(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_receiver() -> Result<(), Box<dyn std::error::Error>> {
        let publisher = BroadcastPublisher::<u32>::new("bumper", DEFAULT_CAPACITY);
        let mut rx1 = publisher.subscribe();
        let mut rx2 = publisher.clone().subscribe();

        publisher.publish(&7)?;

        assert_eq!(rx1.recv().await?, 7);
        assert_eq!(rx2.recv().await?, 7);
        Ok(())
    }

    #[test]
    fn has_subscriber_tracks_receivers() {
        let publisher = BroadcastPublisher::<u32>::new("head_touch", 4);
        assert!(!publisher.has_subscriber());
        let rx = publisher.subscribe();
        assert!(publisher.has_subscriber());
        assert_eq!(publisher.subscriber_count(), 1);
        drop(rx);
        assert!(!publisher.has_subscriber());
    }

    #[test]
    fn publish_without_receivers_is_an_error() {
        let publisher = BroadcastPublisher::<u32>::new("hand_touch", 4);
        let err = publisher.publish(&1).unwrap_err();
        assert!(matches!(err, BridgeError::Publish { .. }));
        assert_eq!(publisher.topic(), "hand_touch");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let publisher = BroadcastPublisher::<u32>::new("bumper", 0);
        let _rx = publisher.subscribe();
        assert!(publisher.publish(&1).is_ok());
    }
}
