//! Envelope model for decrypted frame payloads.
//!
//! Inbound, a frame's plaintext parses as one envelope:
//! `{"time": <token>, "content": [<call>, ...]}`. A call either names an
//! operation (`f_name`) or carries a control tag (`type`); its remaining
//! members are the arguments. The correlation key (`f_name` if present,
//! else `type`) must be unique within one batch.
//!
//! Outbound, results travel as
//! `{"time": <echoed token>, "content": {<key>: {"content": .., "type": ..}}}`.

use crate::error::{constants, RelayError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Control tag a peer sends to request teardown of its own session.
pub const DISCONNECT_TAG: &str = "disconnect";

/// Correlation key used for forced error replies with no call-derived key.
pub const ERROR_KEY: &str = "error";

/// One requested operation or control signal within a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// A named operation with its arguments.
    Function {
        name: String,
        args: Map<String, Value>,
    },
    /// A non-operation signal such as `disconnect`.
    Control {
        tag: String,
        args: Map<String, Value>,
    },
}

impl Call {
    /// The key this call's result will be correlated under.
    pub fn correlation_key(&self) -> &str {
        match self {
            Call::Function { name, .. } => name,
            Call::Control { tag, .. } => tag,
        }
    }

    /// Split into the dispatchable operation name and its arguments.
    pub fn into_parts(self) -> (String, Map<String, Value>) {
        match self {
            Call::Function { name, args } => (name, args),
            Call::Control { tag, args } => (tag, args),
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            _ => return Err(RelayError::Protocol(constants::ERR_CALL_NOT_OBJECT.into())),
        };

        match map.remove("f_name") {
            Some(Value::String(name)) => return Ok(Call::Function { name, args: map }),
            Some(_) => return Err(RelayError::Protocol("f_name is not a string".into())),
            None => {}
        }

        match map.remove("type") {
            Some(Value::String(tag)) => Ok(Call::Control { tag, args: map }),
            Some(_) => Err(RelayError::Protocol("type is not a string".into())),
            None => Err(RelayError::Protocol(constants::ERR_CALL_UNTAGGED.into())),
        }
    }
}

/// A decrypted inbound envelope: an opaque time token plus a batch of calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub time: Value,
    pub calls: Vec<Call>,
}

impl Envelope {
    /// Parse one envelope out of a frame's plaintext.
    ///
    /// Everything that goes wrong here happened after decryption succeeded,
    /// so every failure is a recoverable `Protocol` error.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::Protocol(format!("invalid envelope JSON: {e}")))?;

        let mut map = match value {
            Value::Object(map) => map,
            _ => {
                return Err(RelayError::Protocol(
                    constants::ERR_ENVELOPE_NOT_OBJECT.into(),
                ))
            }
        };

        let time = map.remove("time").unwrap_or(Value::Null);
        let content = map.remove("content").ok_or_else(|| {
            RelayError::Protocol(constants::ERR_ENVELOPE_MISSING_CONTENT.into())
        })?;

        let items = match content {
            Value::Array(items) => items,
            _ => {
                return Err(RelayError::Protocol(
                    constants::ERR_CONTENT_NOT_SEQUENCE.into(),
                ))
            }
        };
        if items.is_empty() {
            return Err(RelayError::Protocol(constants::ERR_EMPTY_BATCH.into()));
        }

        let calls = items
            .into_iter()
            .map(Call::from_value)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { time, calls })
    }

    /// The batch's ordered correlation-key set.
    ///
    /// Duplicate keys would make result correlation ambiguous, so they are
    /// rejected up front rather than silently overwritten.
    pub fn correlation_keys(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::with_capacity(self.calls.len());
        let mut keys = Vec::with_capacity(self.calls.len());

        for call in &self.calls {
            let key = call.correlation_key();
            if !seen.insert(key) {
                return Err(RelayError::Protocol(format!(
                    "duplicate correlation key `{key}` in batch"
                )));
            }
            keys.push(key.to_string());
        }

        Ok(keys)
    }
}

/// Kind tag of an outbound result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Function,
    Error,
    Disconnect,
}

/// One call's outcome as it travels back to the peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMessage {
    pub content: Value,
    #[serde(rename = "type")]
    pub kind: ResultKind,
}

impl ResultMessage {
    pub fn function(content: Value) -> Self {
        Self {
            content,
            kind: ResultKind::Function,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            content: Value::String(detail.into()),
            kind: ResultKind::Error,
        }
    }

    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self {
            content: Value::String(reason.into()),
            kind: ResultKind::Disconnect,
        }
    }
}

/// Serialize one outbound envelope, echoing the inbound time token.
pub fn encode_reply(time: &Value, results: &BTreeMap<String, ResultMessage>) -> Result<String> {
    #[derive(Serialize)]
    struct Reply<'a> {
        time: &'a Value,
        content: &'a BTreeMap<String, ResultMessage>,
    }

    serde_json::to_string(&Reply {
        time,
        content: results,
    })
    .map_err(|e| RelayError::SerializeError(e.to_string()))
}
