//! Result dispatcher
//!
//! Every envelope leaves the process through [`Dispatcher::deliver`]. The
//! dispatcher encodes the envelope and hands it to whatever sink is attached to
//! its [`DispatchContext`]. With no sink attached, deliveries are dropped.

mod sinks;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ResultEnvelope;

pub use sinks::{ChannelSink, StdoutSink};

/// Notification name shared by every envelope kind
pub const NOTIFICATION_NAME: &str = "commandResult";

/// A named outbound notification carrying an encoded envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub name: String,
    pub payload: String,
}

/// Errors raised by a notification sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Receiver is gone")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound transport to the requesting side
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), SinkError>;
}

/// Holder for the active sink, injected at startup.
///
/// Cloning shares the same slot, so attaching or detaching is seen by every
/// dispatcher built from it.
#[derive(Clone, Default)]
pub struct DispatchContext {
    sink: Arc<RwLock<Option<Arc<dyn NotificationSink>>>>,
}

impl DispatchContext {
    /// Create a context with no requester attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with a sink already attached
    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        let context = Self::new();
        context.attach(sink);
        context
    }

    /// Route future deliveries to `sink`
    pub fn attach(&self, sink: Arc<dyn NotificationSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    /// Drop the active sink; later deliveries are discarded
    pub fn detach(&self) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = None;
        }
    }

    fn current(&self) -> Option<Arc<dyn NotificationSink>> {
        self.sink.read().ok().and_then(|slot| slot.clone())
    }
}

/// Encodes envelopes and sends them over the context's sink
#[derive(Clone)]
pub struct Dispatcher {
    context: DispatchContext,
}

impl Dispatcher {
    pub fn new(context: DispatchContext) -> Self {
        Self { context }
    }

    /// Send one envelope. Fire and forget: failures are logged, never returned.
    pub async fn deliver(&self, envelope: &ResultEnvelope) {
        let Some(sink) = self.context.current() else {
            tracing::debug!(
                request_id = envelope.request_id(),
                "No requester attached, dropping {:?} envelope",
                envelope.status()
            );
            return;
        };

        let payload = match serde_json::to_string(envelope) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("Failed to encode envelope for {}: {}", envelope.request_id(), e);
                return;
            }
        };

        let notification = Notification {
            name: NOTIFICATION_NAME.to_string(),
            payload,
        };

        if let Err(e) = sink.send(notification).await {
            tracing::warn!(
                request_id = envelope.request_id(),
                "Envelope delivery failed: {}",
                e
            );
        }
    }
}
