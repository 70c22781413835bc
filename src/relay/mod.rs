//! The relay transport layer.
//!
//! One process sits between controlling clients and the browser-side
//! agent, multiplexing commands, responses, events and log lines across
//! a single extension channel.
//!
//! ```text
//! client ──► RelayServer ──► ExtensionChannel ──► agent
//!                  ▲                                 │
//!                  └──── responses / events ◄────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | The one bidirectional agent connection |
//! | `endpoint` | Per-connection endpoint tokens and URLs |
//! | `pending` | In-flight command registry |
//! | `server` | Client-facing WebSocket endpoint |

// ============================================================================
// Submodules
// ============================================================================

/// Extension channel state machine and mailbox.
pub mod channel;

/// Endpoint token allocation.
pub mod endpoint;

/// Pending-call registry.
pub mod pending;

/// The relay server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelMessage, ExtensionChannel};
pub use endpoint::{EndpointToken, cdp_url};
pub use pending::{CallKey, PendingCallRegistry};
pub use server::RelayServer;
