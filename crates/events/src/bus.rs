//! Lifecycle event sources and an in-memory broadcast bus.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::LifecycleEvent;

/// Default buffer of the broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// An unordered, best-effort stream of lifecycle events.
///
/// The stream may end or yield an error at any time; both end ingestion for
/// that subscription.
pub type EventStream = BoxStream<'static, Result<LifecycleEvent>>;

/// Source of container lifecycle events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribe to lifecycle events.
    async fn subscribe(&self) -> Result<EventStream>;
}

#[derive(Debug, Clone)]
enum Delivery {
    Event(LifecycleEvent),
    Failure(String),
}

/// Subscription handle for receiving events.
pub struct EventSubscription {
    receiver: broadcast::Receiver<Delivery>,
}

impl EventSubscription {
    /// Receive the next event.
    ///
    /// Returns `Ok(None)` once the bus is closed. Events lost to a lagging
    /// receiver are skipped.
    pub async fn recv(&mut self) -> Result<Option<LifecycleEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(Delivery::Event(event)) => return Ok(Some(event)),
                Ok(Delivery::Failure(reason)) => return Err(Error::stream_failed(reason)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, lifecycle events lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    /// Turn the subscription into an [`EventStream`].
    pub fn into_stream(self) -> EventStream {
        stream::unfold(Some(self), |state| async move {
            let mut subscription = state?;
            match subscription.recv().await {
                Ok(Some(event)) => Some((Ok(event), Some(subscription))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

/// In-memory lifecycle event bus.
///
/// Every subscriber sees every event published after it subscribed. Closing
/// the bus ends all streams.
pub struct EventBus {
    sender: RwLock<Option<broadcast::Sender<Delivery>>>,
}

impl EventBus {
    /// Create a new bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new bus with the given channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Publish an event to current subscribers.
    ///
    /// Returns the number of subscribers that received it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the bus was closed.
    pub async fn publish(&self, event: LifecycleEvent) -> Result<usize> {
        let sender = self.sender.read().await;
        let sender = sender.as_ref().ok_or(Error::ChannelClosed)?;

        debug!(
            container_id = %event.id.short(),
            kind = %event.kind,
            "Publishing lifecycle event"
        );

        // No receivers is not an error: events are best effort.
        Ok(sender.send(Delivery::Event(event)).unwrap_or(0))
    }

    /// Make every current stream fail with `reason`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the bus was closed.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<()> {
        let sender = self.sender.read().await;
        let sender = sender.as_ref().ok_or(Error::ChannelClosed)?;
        let _ = sender.send(Delivery::Failure(reason.into()));
        Ok(())
    }

    /// Close the bus; all streams end after draining buffered events.
    pub async fn close(&self) {
        self.sender.write().await.take();
    }

    /// Subscribe to all events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the bus was closed.
    pub async fn subscription(&self) -> Result<EventSubscription> {
        let sender = self.sender.read().await;
        let sender = sender.as_ref().ok_or(Error::ChannelClosed)?;
        Ok(EventSubscription {
            receiver: sender.subscribe(),
        })
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .await
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for EventBus {
    async fn subscribe(&self) -> Result<EventStream> {
        let subscription = self
            .subscription()
            .await
            .map_err(|e| Error::subscription_failed(e.to_string()))?;
        Ok(subscription.into_stream())
    }
}
