//! Client-leg message shapes.
//!
//! Frames exchanged between a controlling client and the relay endpoint.
//!
//! # Format
//!
//! Command (client → relay):
//! ```json
//! { "id": 1, "method": "Page.navigate", "params": { "url": "..." }, "sessionId": "ABC" }
//! ```
//!
//! Response (relay → client):
//! ```json
//! { "id": 1, "result": { ... } }
//! { "id": 1, "error": "ExtensionNotConnected" }
//! ```
//!
//! Event (relay → client):
//! ```json
//! { "method": "Page.loadEventFired", "params": { ... }, "sessionId": "ABC" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, SessionId};

// ============================================================================
// ClientCommand
// ============================================================================

/// A CDP command received from a client, to be forwarded to the agent.
///
/// `sessionId` targets a specific browser session; when absent the
/// command addresses the top-level browser target. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCommand {
    /// Client-scoped correlation id.
    pub id: CommandId,

    /// CDP method name, e.g. `Page.navigate`.
    pub method: String,

    /// Command parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Target session, if any.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,
}

impl ClientCommand {
    /// Parses a raw client frame into a command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] when the frame is not a JSON
    /// object, `id` is absent or not an integer, or `method` is absent
    /// or empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| Error::malformed(format!("invalid JSON: {e}")))?;

        let Some(object) = value.as_object() else {
            return Err(Error::malformed("frame is not a JSON object"));
        };

        match object.get("id") {
            Some(id) if id.is_i64() || id.is_u64() => {}
            Some(_) => return Err(Error::malformed("id is not an integer")),
            None => return Err(Error::malformed("command is missing id")),
        }

        match object.get("method") {
            Some(Value::String(method)) if !method.is_empty() => {}
            Some(Value::String(_)) => return Err(Error::malformed("method is empty")),
            Some(_) => return Err(Error::malformed("method is not a string")),
            None => return Err(Error::malformed("command is missing method")),
        }

        if let Some(session) = object.get("sessionId")
            && !session.is_string()
            && !session.is_null()
        {
            return Err(Error::malformed("sessionId is not a string"));
        }

        serde_json::from_value(value).map_err(|e| Error::malformed(e.to_string()))
    }

    /// Serializes the command to a JSON-text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on serialization failure.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// CommandResponse
// ============================================================================

/// A command response, terminal for the matching pending call.
///
/// Exactly one of `result` / `error` is set by well-behaved producers;
/// the relay itself only ever sets one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Matches the command's id.
    pub id: CommandId,

    /// Result payload (success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error description (failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: CommandId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: CommandId, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Serializes the response to a JSON-text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on serialization failure.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// EventEnvelope
// ============================================================================

/// A CDP event relayed to clients.
///
/// Carries no correlation id and never consumes a pending-call slot.
/// Events with a `sessionId` are scoped to that session; events without
/// one are browser-level and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// CDP event name, e.g. `Target.attachedToTarget`.
    pub method: String,

    /// Session scope, if any.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,

    /// Event payload.
    #[serde(default)]
    pub params: Value,
}

impl EventEnvelope {
    /// Serializes the event to a JSON-text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on serialization failure.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_full_command() {
        let raw = r#"{"id":1,"method":"Page.navigate","params":{"url":"https://example.com"},"sessionId":"S1"}"#;
        let command = ClientCommand::parse(raw).expect("parse");

        assert_eq!(command.id, CommandId::new(1));
        assert_eq!(command.method, "Page.navigate");
        assert_eq!(command.session_id, Some(SessionId::from("S1")));
        assert_eq!(
            command.params,
            Some(json!({"url": "https://example.com"}))
        );
    }

    #[test]
    fn test_parse_minimal_command() {
        let command = ClientCommand::parse(r#"{"id":2,"method":"Browser.getVersion"}"#)
            .expect("parse");
        assert_eq!(command.id, CommandId::new(2));
        assert!(command.params.is_none());
        assert!(command.session_id.is_none());
    }

    #[test]
    fn test_parse_rejects_missing_id() {
        let err = ClientCommand::parse(r#"{"method":"Page.enable"}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn test_parse_rejects_non_integer_id() {
        let err = ClientCommand::parse(r#"{"id":"one","method":"Page.enable"}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_method() {
        let err = ClientCommand::parse(r#"{"id":3}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(ClientCommand::parse("[1,2,3]").is_err());
        assert!(ClientCommand::parse("not json").is_err());
    }

    #[test]
    fn test_response_shapes() {
        let ok = CommandResponse::success(CommandId::new(5), json!({"product": "Chrome"}));
        assert!(!ok.is_error());
        let json = ok.serialize().expect("serialize");
        assert!(json.contains("result"));
        assert!(!json.contains("error"));

        let failed = CommandResponse::failure(CommandId::new(5), "ExtensionNotConnected");
        assert!(failed.is_error());
        let json = failed.serialize().expect("serialize");
        assert!(json.contains("ExtensionNotConnected"));
        assert!(!json.contains("result"));
    }

    #[test]
    fn test_event_session_scoping_shape() {
        let event = EventEnvelope {
            method: "Page.loadEventFired".to_string(),
            session_id: None,
            params: json!({"timestamp": 1.0}),
        };
        let json = event.serialize().expect("serialize");
        assert!(!json.contains("sessionId"));

        let scoped = EventEnvelope {
            session_id: Some(SessionId::from("S9")),
            ..event
        };
        let json = scoped.serialize().expect("serialize");
        assert!(json.contains(r#""sessionId":"S9""#));
    }

    #[test]
    fn test_command_roundtrip() {
        let command = ClientCommand {
            id: CommandId::new(17),
            method: "Runtime.evaluate".to_string(),
            params: Some(json!({"expression": "1+1"})),
            session_id: Some(SessionId::from("SESS")),
        };

        let raw = command.serialize().expect("serialize");
        let back = ClientCommand::parse(&raw).expect("parse");
        assert_eq!(back, command);
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;

        fn arb_params() -> impl Strategy<Value = Option<Value>> {
            prop_oneof![
                Just(None),
                "[a-z]{1,8}".prop_map(|s| Some(json!({ "value": s }))),
                any::<i64>().prop_map(|n| Some(json!({ "n": n }))),
            ]
        }

        proptest! {
            #[test]
            fn command_roundtrip(
                id in any::<i64>(),
                method in "[A-Za-z]{1,12}\\.[A-Za-z]{1,12}",
                params in arb_params(),
                session in proptest::option::of("[A-Z0-9]{1,16}"),
            ) {
                let command = ClientCommand {
                    id: CommandId::new(id),
                    method,
                    params,
                    session_id: session.map(SessionId::new),
                };

                let raw = command.serialize().unwrap();
                let back = ClientCommand::parse(&raw).unwrap();
                prop_assert_eq!(back, command);
            }

            #[test]
            fn response_roundtrip(id in any::<i64>(), error in proptest::option::of("[a-zA-Z ]{0,24}")) {
                let response = match &error {
                    Some(reason) => CommandResponse::failure(CommandId::new(id), reason.clone()),
                    None => CommandResponse::success(CommandId::new(id), json!({"ok": true})),
                };

                let raw = response.serialize().unwrap();
                let back: CommandResponse = serde_json::from_str(&raw).unwrap();
                prop_assert_eq!(back, response);
            }
        }
    }
}
