//! Wire message types and the relay codec.
//!
//! This module defines the JSON-text frame shapes exchanged on both legs
//! of the relay and classifies raw frames into typed envelopes.
//!
//! # Frame Shapes
//!
//! | Shape | Leg | Purpose |
//! |-------|-----|---------|
//! | [`ClientCommand`] | client → relay | CDP command to forward |
//! | [`CommandResponse`] | relay → client / agent → relay | command result or error |
//! | [`EventEnvelope`] | relay → client | CDP event fanout |
//! | [`ForwardCommand`] | relay → agent | wrapped command (`forwardCDPCommand`) |
//! | [`ExtensionMessage`] | agent → relay | response, event (`forwardCDPEvent`) or log |
//!
//! Classification is purely by present fields: an integer `id` with
//! `result`/`error` is a response; `method` equal to a reserved forwarding
//! verb is an event; `method: "log"` is a log line; anything else is
//! [`MalformedMessage`](crate::Error::MalformedMessage). Parsing and
//! serialization are side-effect free.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Client-leg shapes and parsing |
//! | `extension` | Agent-leg shapes, classification, log levels |

// ============================================================================
// Submodules
// ============================================================================

/// Client-leg message shapes.
pub mod envelope;

/// Agent-leg message shapes and classification.
pub mod extension;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{ClientCommand, CommandResponse, EventEnvelope};
pub use extension::{ExtensionMessage, ForwardCommand, LogLevel, LogLine};
