//! Stdio bridge
//!
//! Stands in for the UI transport: named requests arrive one JSON object per
//! line (`{"name": "getKernels", "body": {"requestId": "..."}}`) and
//! notifications leave through whatever sink the router's dispatcher holds.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::router::IntentRouter;

/// A named inbound request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    pub name: String,
    #[serde(default)]
    pub body: Value,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<InboundMessage>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Feed every line of `reader` to the router until EOF, then wait for tracked
/// requests to finish.
///
/// Lines are decoded lossily, so invalid UTF-8 only spoils its own line. A read
/// error ends input, but tracked requests are still drained before it is returned.
pub async fn serve<R>(mut reader: R, mut router: IntentRouter) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    let result = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::info!("Input closed, shutting down");
                break Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to read request input: {}", e);
                break Err(e);
            }
        }

        let line = String::from_utf8_lossy(&buf);
        match parse_line(&line) {
            Ok(Some(message)) => router.handle_message(&message.name, message.body).await,
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping malformed request line: {}", e),
        }
    };

    router.shutdown().await;
    result?;
    Ok(())
}
