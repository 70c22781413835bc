//! Agent-leg message shapes and classification.
//!
//! The browser agent speaks a thin wrapper protocol around CDP: commands
//! travel wrapped in `forwardCDPCommand`, events come back wrapped in
//! `forwardCDPEvent`, and the agent may interleave an advisory log
//! stream (`method: "log"`). Responses are plain `{id, result?, error?}`
//! frames correlated by the relay-allocated wire id.
//!
//! # Format
//!
//! ```json
//! { "id": 7, "method": "forwardCDPCommand",
//!   "params": { "method": "Page.navigate", "sessionId": "S", "params": { ... } } }
//!
//! { "id": 7, "result": { ... } }
//!
//! { "method": "forwardCDPEvent",
//!   "params": { "method": "Page.loadEventFired", "sessionId": "S", "params": { ... } } }
//!
//! { "method": "log", "params": { "level": "warn", "args": ["..."] } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, WireId};

use super::envelope::EventEnvelope;

// ============================================================================
// Constants
// ============================================================================

/// Reserved verb wrapping a forwarded CDP command.
pub const FORWARD_COMMAND_METHOD: &str = "forwardCDPCommand";

/// Reserved verb wrapping a forwarded CDP event.
pub const FORWARD_EVENT_METHOD: &str = "forwardCDPEvent";

/// Reserved verb for agent log lines.
pub const LOG_METHOD: &str = "log";

// ============================================================================
// ForwardCommand
// ============================================================================

/// A CDP command wrapped for delivery to the agent.
///
/// The `id` is the relay-allocated [`WireId`], never the client's own
/// command id, so concurrent clients cannot collide at the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardCommand {
    /// Relay-allocated correlation id.
    pub id: WireId,

    /// Always [`FORWARD_COMMAND_METHOD`].
    pub method: String,

    /// The wrapped CDP command.
    pub params: ForwardedCall,
}

/// The CDP command carried inside a [`ForwardCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardedCall {
    /// CDP method name.
    pub method: String,

    /// Target session, if any.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,

    /// Command parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ForwardCommand {
    /// Wraps a CDP command for the agent leg.
    #[must_use]
    pub fn new(
        id: WireId,
        method: impl Into<String>,
        session_id: Option<SessionId>,
        params: Option<Value>,
    ) -> Self {
        Self {
            id,
            method: FORWARD_COMMAND_METHOD.to_string(),
            params: ForwardedCall {
                method: method.into(),
                session_id,
                params,
            },
        }
    }

    /// Serializes the wrapped command to a JSON-text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on serialization failure.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// LogLevel / LogLine
// ============================================================================

/// Severity of an agent log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Plain console output.
    Log,
    /// Debug chatter.
    Debug,
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

impl LogLevel {
    /// Lowercase wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// An advisory log line from the agent.
///
/// Never affects protocol state; forwarded to the diagnostic sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    /// Severity.
    pub level: LogLevel,

    /// Pre-rendered message fragments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl LogLine {
    /// Renders the line as `[level] arg arg ...` for the sink.
    #[must_use]
    pub fn render(&self) -> String {
        format!("[{}] {}", self.level.as_str(), self.args.join(" "))
    }
}

// ============================================================================
// ExtensionMessage
// ============================================================================

/// A classified frame received from the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionMessage {
    /// Response to a forwarded command, correlated by wire id.
    Response {
        /// The relay-allocated id being answered.
        id: WireId,
        /// Result payload (success).
        result: Option<Value>,
        /// Error description (failure).
        error: Option<String>,
    },

    /// A forwarded CDP event.
    Event(EventEnvelope),

    /// An advisory log line.
    Log(LogLine),
}

impl ExtensionMessage {
    /// Classifies and parses a raw agent frame.
    ///
    /// Classification is by present fields: a reserved `method` selects
    /// event or log; otherwise an integer `id` selects response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] for frames that fit none of
    /// the three shapes or carry fields of the wrong type.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| Error::malformed(format!("invalid JSON: {e}")))?;

        let Some(object) = value.as_object() else {
            return Err(Error::malformed("frame is not a JSON object"));
        };

        match object.get("method").and_then(Value::as_str) {
            Some(FORWARD_EVENT_METHOD) => {
                let params = object
                    .get("params")
                    .cloned()
                    .ok_or_else(|| Error::malformed("event is missing params"))?;
                let event: EventEnvelope = serde_json::from_value(params)
                    .map_err(|e| Error::malformed(format!("bad event params: {e}")))?;
                if event.method.is_empty() {
                    return Err(Error::malformed("event method is empty"));
                }
                Ok(Self::Event(event))
            }

            Some(LOG_METHOD) => {
                let params = object
                    .get("params")
                    .cloned()
                    .ok_or_else(|| Error::malformed("log is missing params"))?;
                let line: LogLine = serde_json::from_value(params)
                    .map_err(|e| Error::malformed(format!("bad log params: {e}")))?;
                Ok(Self::Log(line))
            }

            Some(other) => Err(Error::malformed(format!("unknown method: {other}"))),

            None => {
                let id = object
                    .get("id")
                    .ok_or_else(|| Error::malformed("frame has neither method nor id"))?
                    .as_u64()
                    .ok_or_else(|| Error::malformed("id is not an integer"))?;

                let error = match object.get("error") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(reason)) => Some(reason.clone()),
                    Some(_) => return Err(Error::malformed("error is not a string")),
                };

                Ok(Self::Response {
                    id: WireId::from_u64(id),
                    result: object.get("result").cloned(),
                    error,
                })
            }
        }
    }

    /// Serializes the message back to its wire form.
    ///
    /// Used by tests and tooling that emulate an agent; the relay itself
    /// only parses this direction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on serialization failure.
    pub fn serialize(&self) -> Result<String> {
        let value = match self {
            Self::Response { id, result, error } => {
                let mut object = serde_json::Map::new();
                object.insert("id".to_string(), serde_json::to_value(id)?);
                if let Some(result) = result {
                    object.insert("result".to_string(), result.clone());
                }
                if let Some(error) = error {
                    object.insert("error".to_string(), Value::String(error.clone()));
                }
                Value::Object(object)
            }
            Self::Event(event) => serde_json::json!({
                "method": FORWARD_EVENT_METHOD,
                "params": event,
            }),
            Self::Log(line) => serde_json::json!({
                "method": LOG_METHOD,
                "params": line,
            }),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
