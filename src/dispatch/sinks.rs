//! Notification sinks

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use super::{Notification, NotificationSink, SinkError};

/// Writes each notification as one JSON line on stdout.
///
/// Logs go to stderr, so stdout carries nothing but notifications.
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for StdoutSink {
    async fn send(&self, notification: Notification) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&notification)
            .map_err(|e| SinkError::Io(std::io::Error::other(e)))?;
        line.push(b'\n');

        // Hold the lock across the whole line so concurrent requests never interleave
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Forwards notifications into an in-process channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&self, notification: Notification) -> Result<(), SinkError> {
        self.tx.send(notification).map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);

        let result = sink
            .send(Notification {
                name: "commandResult".to_string(),
                payload: "{}".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }

    #[test]
    fn test_notification_line_shape() {
        let notification = Notification {
            name: "commandResult".to_string(),
            payload: r#"{"requestId":"r1"}"#.to_string(),
        };
        let line = serde_json::to_string(&notification).unwrap();
        assert_eq!(
            line,
            r#"{"name":"commandResult","payload":"{\"requestId\":\"r1\"}"}"#
        );
    }
}
