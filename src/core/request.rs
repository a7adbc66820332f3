//! Inbound requests
//!
//! A request is a named intent plus a flat JSON body. The body always carries a
//! caller-chosen correlation id; everything else is an intent parameter.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Body key holding the correlation id
pub const REQUEST_ID_KEY: &str = "requestId";

/// Legacy body key for the correlation id, still sent by older UIs
pub const LEGACY_REQUEST_ID_KEY: &str = "messageId";

/// Errors raised while turning an inbound message into a [`Request`]
#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("Unknown intent: {0}")]
    UnknownIntent(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },
}

/// Named intents understood by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentType {
    StartKernel,
    GetKernel,
    GetKernels,
    StopKernel,
    RunCommand,
}

impl IntentType {
    pub const ALL: [IntentType; 5] = [
        IntentType::StartKernel,
        IntentType::GetKernel,
        IntentType::GetKernels,
        IntentType::StopKernel,
        IntentType::RunCommand,
    ];

    /// Wire name of the intent
    pub fn name(&self) -> &'static str {
        match self {
            IntentType::StartKernel => "startKernel",
            IntentType::GetKernel => "getKernel",
            IntentType::GetKernels => "getKernels",
            IntentType::StopKernel => "stopKernel",
            IntentType::RunCommand => "runCommand",
        }
    }

    /// Look up an intent by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|intent| intent.name() == name)
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single request parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<u16> for ParamValue {
    fn from(value: u16) -> Self {
        ParamValue::Number(value.into())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// An immutable request consumed by the intent router
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    request_id: String,
    intent: IntentType,
    params: HashMap<String, ParamValue>,
}

impl Request {
    pub fn new(request_id: impl Into<String>, intent: IntentType) -> Self {
        Self {
            request_id: request_id.into(),
            intent,
            params: HashMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build a request from a named message and its body.
    ///
    /// The body is either a JSON object or a string holding an encoded JSON
    /// object. A missing correlation id becomes the empty string; the process
    /// hosts drop such requests silently.
    pub fn from_message(name: &str, body: Value) -> Result<Self, RequestError> {
        let intent = IntentType::from_name(name)
            .ok_or_else(|| RequestError::UnknownIntent(name.to_string()))?;

        let object = match body {
            Value::Object(map) => map,
            Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(RequestError::InvalidBody(
                        "encoded body is not an object".to_string(),
                    ))
                }
                Err(e) => return Err(RequestError::InvalidBody(e.to_string())),
            },
            Value::Null => Map::new(),
            other => {
                return Err(RequestError::InvalidBody(format!(
                    "expected an object, got {}",
                    json_kind(&other)
                )))
            }
        };

        Ok(Self::from_object(intent, object))
    }

    fn from_object(intent: IntentType, object: Map<String, Value>) -> Self {
        let mut primary_id = None;
        let mut legacy_id = None;
        let mut params = HashMap::new();

        for (key, value) in object {
            if key == REQUEST_ID_KEY || key == LEGACY_REQUEST_ID_KEY {
                if let Value::String(id) = value {
                    if id.is_empty() {
                        continue;
                    }
                    if key == REQUEST_ID_KEY {
                        primary_id = Some(id);
                    } else {
                        legacy_id = Some(id);
                    }
                }
                continue;
            }

            let param = match value {
                Value::String(s) => ParamValue::Text(s),
                Value::Number(n) => ParamValue::Number(n),
                Value::Bool(b) => ParamValue::Bool(b),
                other => {
                    tracing::debug!("Ignoring {} parameter '{}'", json_kind(&other), key);
                    continue;
                }
            };
            params.insert(key, param);
        }

        Self {
            request_id: primary_id.or(legacy_id).unwrap_or_default(),
            intent,
            params,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn intent(&self) -> IntentType {
        self.intent
    }

    /// Get a parameter as text. Empty strings count as absent.
    pub fn text_param(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            ParamValue::Text(s) if !s.is_empty() => Some(s.clone()),
            ParamValue::Text(_) => None,
            ParamValue::Number(n) => Some(n.to_string()),
            ParamValue::Bool(_) => None,
        }
    }

    /// Get a port-sized numeric parameter, accepting numbers or numeric strings
    pub fn port_param(&self, key: &str) -> Result<Option<u16>, RequestError> {
        let invalid = |reason: String| RequestError::InvalidParameter {
            key: key.to_string(),
            reason,
        };

        match self.params.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(ParamValue::Text(s)) => s
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| invalid(format!("'{}' is not a valid port", s))),
            Some(ParamValue::Number(n)) => n
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| invalid(format!("{} is not a valid port", n))),
            Some(ParamValue::Bool(_)) => Err(invalid("expected a number".to_string())),
        }
    }

    /// Get a boolean parameter; "true"/"false" strings are accepted
    pub fn bool_param(&self, key: &str) -> Option<bool> {
        match self.params.get(key)? {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Text(s) => s.parse().ok(),
            ParamValue::Number(_) => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_names_round_trip() {
        for intent in IntentType::ALL {
            assert_eq!(IntentType::from_name(intent.name()), Some(intent));
        }
        assert_eq!(IntentType::from_name("deleteEverything"), None);
    }

    #[test]
    fn test_from_message_object_body() {
        let req = Request::from_message(
            "startKernel",
            json!({"requestId": "r1", "image": "jupyter/base-notebook", "port": 8000}),
        )
        .unwrap();

        assert_eq!(req.request_id(), "r1");
        assert_eq!(req.intent(), IntentType::StartKernel);
        assert_eq!(req.text_param("image").as_deref(), Some("jupyter/base-notebook"));
        assert_eq!(req.port_param("port"), Ok(Some(8000)));
    }

    #[test]
    fn test_from_message_legacy_string_body() {
        let body = Value::String(r#"{"messageId":"m7","kernelId":"abc123"}"#.to_string());
        let req = Request::from_message("stopKernel", body).unwrap();

        assert_eq!(req.request_id(), "m7");
        assert_eq!(req.text_param("kernelId").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_request_id_wins_over_legacy_key() {
        let req = Request::from_message(
            "getKernels",
            json!({"messageId": "old", "requestId": "new"}),
        )
        .unwrap();
        assert_eq!(req.request_id(), "new");
    }

    #[test]
    fn test_empty_request_id_falls_back_to_legacy_key() {
        let req = Request::from_message(
            "getKernels",
            json!({"messageId": "m1", "requestId": ""}),
        )
        .unwrap();
        assert_eq!(req.request_id(), "m1");

        let req = Request::from_message(
            "getKernels",
            json!({"messageId": "", "requestId": ""}),
        )
        .unwrap();
        assert_eq!(req.request_id(), "");
    }

    #[test]
    fn test_missing_request_id_is_empty() {
        let req = Request::from_message("getKernels", json!({})).unwrap();
        assert_eq!(req.request_id(), "");

        let req = Request::from_message("getKernels", Value::Null).unwrap();
        assert_eq!(req.request_id(), "");
    }

    #[test]
    fn test_unknown_intent() {
        let err = Request::from_message("formatDisk", json!({"requestId": "x"})).unwrap_err();
        assert_eq!(err, RequestError::UnknownIntent("formatDisk".to_string()));
    }

    #[test]
    fn test_invalid_body() {
        assert!(matches!(
            Request::from_message("getKernel", json!([1, 2])),
            Err(RequestError::InvalidBody(_))
        ));
        assert!(matches!(
            Request::from_message("getKernel", Value::String("not json".to_string())),
            Err(RequestError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_port_param_variants() {
        let req = Request::new("r", IntentType::StartKernel)
            .with_param("a", "9000")
            .with_param("b", "")
            .with_param("c", "http")
            .with_param("d", true);

        assert_eq!(req.port_param("a"), Ok(Some(9000)));
        assert_eq!(req.port_param("b"), Ok(None));
        assert_eq!(req.port_param("missing"), Ok(None));
        assert!(req.port_param("c").is_err());
        assert!(req.port_param("d").is_err());

        let req = Request::from_message("startKernel", json!({"port": 70000})).unwrap();
        assert!(req.port_param("port").is_err());
    }

    #[test]
    fn test_text_and_bool_params() {
        let req = Request::from_message(
            "runCommand",
            json!({"cmd": "", "captureOutput": false, "flag": "true", "nested": {"a": 1}}),
        )
        .unwrap();

        assert_eq!(req.text_param("cmd"), None);
        assert_eq!(req.bool_param("captureOutput"), Some(false));
        assert_eq!(req.bool_param("flag"), Some(true));
        assert_eq!(req.text_param("nested"), None);
    }
}
