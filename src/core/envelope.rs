//! Result envelopes - the unit of outcome delivered back to the requester

use serde::{Deserialize, Serialize};

use super::IntentType;
use crate::kernel::KernelRecord;

/// Outcome status carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Exited,
}

/// Output stream a data envelope was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

/// Structured payload, shaped per intent.
///
/// Serialized untagged so the wire form is `{"text": ..}`, `{"kernel": {..}}`
/// or `{"kernels": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text { text: String },
    Kernel { kernel: KernelRecord },
    KernelList { kernels: Vec<KernelRecord> },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }
}

/// A single correlated outcome.
///
/// Fields are private: the constructors guarantee that error envelopes never
/// carry a payload and ok envelopes never carry an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    request_id: String,
    intent_type: IntentType,
    status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<Channel>,
}

impl ResultEnvelope {
    /// Successful completion, optionally with a payload
    pub fn ok(request_id: impl Into<String>, intent: IntentType, payload: Option<Payload>) -> Self {
        Self {
            request_id: request_id.into(),
            intent_type: intent,
            status: Status::Ok,
            payload,
            error_message: None,
            channel: None,
        }
    }

    /// A chunk of streamed process output
    pub fn output(
        request_id: impl Into<String>,
        intent: IntentType,
        channel: Channel,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: Some(channel),
            ..Self::ok(request_id, intent, Some(Payload::text(text)))
        }
    }

    /// Failure with a description
    pub fn error(request_id: impl Into<String>, intent: IntentType, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            intent_type: intent,
            status: Status::Error,
            payload: None,
            error_message: Some(message.into()),
            channel: None,
        }
    }

    /// Streamed process exited
    pub fn exited(request_id: impl Into<String>, intent: IntentType) -> Self {
        Self {
            request_id: request_id.into(),
            intent_type: intent,
            status: Status::Exited,
            payload: None,
            error_message: None,
            channel: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn intent_type(&self) -> IntentType {
        self.intent_type
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn channel(&self) -> Option<Channel> {
        self.channel
    }

    /// Data envelopes carry a chunk of streamed output
    pub fn is_data(&self) -> bool {
        self.channel.is_some()
    }
}
