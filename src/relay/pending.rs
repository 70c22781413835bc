//! Pending-call registry.
//!
//! Tracks in-flight commands awaiting a response from the agent. The
//! registry is the single source of truth for "is this command still
//! outstanding": every entry is resolved at most once, by exactly one of
//! a matching response, an explicit timeout, or channel closure.
//!
//! # Correlation
//!
//! Client ids are only unique per connection, so entries are keyed by a
//! relay-allocated [`WireId`] and remember their originating
//! `(connection, id)` pair. A client reusing an id while its call is
//! still pending is rejected with
//! [`Error::DuplicateId`](crate::Error::DuplicateId) without disturbing
//! the original entry.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, ConnectionId, WireId};
use crate::protocol::CommandResponse;

// ============================================================================
// Constants
// ============================================================================

/// Maximum simultaneously pending calls before new registrations are
/// rejected.
const MAX_PENDING_CALLS: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// Identifies a call from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallKey {
    /// Originating client connection.
    pub connection: ConnectionId,
    /// Client-scoped command id.
    pub id: CommandId,
}

/// Receiver half handed to the task awaiting the response.
pub type CallReceiver = oneshot::Receiver<Result<CommandResponse>>;

/// One in-flight command.
struct PendingCall {
    key: CallKey,
    /// Extension-channel generation the command was sent on.
    generation: u64,
    created_at: Instant,
    deadline: Instant,
    timeout_ms: u64,
    tx: oneshot::Sender<Result<CommandResponse>>,
}

// ============================================================================
// PendingCallRegistry
// ============================================================================

/// Registry of in-flight commands, shared across client handlers and the
/// extension consumer loop.
#[derive(Default)]
pub struct PendingCallRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    calls: FxHashMap<WireId, PendingCall>,
    /// Secondary index for duplicate-id detection.
    keys: FxHashSet<CallKey>,
}

impl PendingCallRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending call and allocates its wire id.
    ///
    /// The returned receiver completes with the client-facing response
    /// (or the failure reason) exactly once.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateId`] if `key` is already pending
    /// - [`Error::Connection`] if the pending-call cap is reached
    pub fn register(
        &self,
        key: CallKey,
        generation: u64,
        timeout: Duration,
    ) -> Result<(WireId, CallReceiver)> {
        let mut inner = self.inner.lock();

        if inner.keys.contains(&key) {
            return Err(Error::duplicate_id(key.connection, key.id));
        }

        if inner.calls.len() >= MAX_PENDING_CALLS {
            warn!(
                pending = inner.calls.len(),
                max = MAX_PENDING_CALLS,
                "Too many pending calls"
            );
            return Err(Error::connection(format!(
                "Too many pending calls: {}/{}",
                inner.calls.len(),
                MAX_PENDING_CALLS
            )));
        }

        let wire_id = WireId::next();
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();

        inner.keys.insert(key);
        inner.calls.insert(
            wire_id,
            PendingCall {
                key,
                generation,
                created_at: now,
                deadline: now + timeout,
                timeout_ms: timeout.as_millis() as u64,
                tx,
            },
        );

        Ok((wire_id, rx))
    }

    /// Fulfills the call matching `wire_id` with an agent response.
    ///
    /// Stale or duplicate responses (no matching entry) are logged and
    /// dropped, never fatal.
    pub fn resolve(&self, wire_id: WireId, result: Option<Value>, error: Option<String>) {
        let call = self.take(wire_id);

        let Some(call) = call else {
            debug!(%wire_id, "Response for unknown or stale call, dropped");
            return;
        };

        let response = CommandResponse {
            id: call.key.id,
            result,
            error,
        };
        let _ = call.tx.send(Ok(response));
    }

    /// Rejects the call matching `wire_id` with `error`.
    ///
    /// No-op (logged) if the entry is already gone.
    pub fn reject(&self, wire_id: WireId, error: Error) {
        let call = self.take(wire_id);

        let Some(call) = call else {
            debug!(%wire_id, "Rejection for unknown or stale call, dropped");
            return;
        };

        let _ = call.tx.send(Err(error));
    }

    /// Removes an entry without resolving it.
    ///
    /// Used when forwarding to the agent fails after registration.
    pub fn remove(&self, wire_id: WireId) {
        self.take(wire_id);
    }

    /// Rejects every call sent on `generation` with
    /// [`Error::ChannelClosed`].
    ///
    /// Called when the agent on that channel generation disconnects.
    /// Returns the number of calls cancelled.
    pub fn cancel_generation(&self, generation: u64) -> usize {
        let cancelled = self.drain_where(|call| call.generation == generation);
        let count = cancelled.len();

        for call in cancelled {
            let _ = call.tx.send(Err(Error::ChannelClosed));
        }

        if count > 0 {
            debug!(count, generation, "Cancelled pending calls on channel close");
        }
        count
    }

    /// Rejects every currently pending call with [`Error::ChannelClosed`].
    ///
    /// Used on relay shutdown. Returns the number of calls cancelled.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.drain_where(|_| true);
        let count = cancelled.len();

        for call in cancelled {
            let _ = call.tx.send(Err(Error::ChannelClosed));
        }
        count
    }

    /// Discards every call originating from `connection`.
    ///
    /// A disconnected client has no one listening; the entries are
    /// simply dropped, and no abort is sent to the agent.
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let discarded = self.drain_where(|call| call.key.connection == connection);
        let count = discarded.len();

        if count > 0 {
            debug!(%connection, count, "Discarded pending calls for closed connection");
        }
        count
    }

    /// Rejects every call whose deadline has elapsed with
    /// [`Error::RequestTimeout`].
    ///
    /// Returns the number of calls expired.
    pub fn expire(&self, now: Instant) -> usize {
        let overdue = self.drain_where(|call| call.deadline <= now);
        let count = overdue.len();

        for call in overdue {
            let waited = now.duration_since(call.created_at).as_millis() as u64;
            warn!(
                id = %call.key.id,
                connection = %call.key.connection,
                waited_ms = waited,
                "Pending call timed out"
            );
            let _ = call
                .tx
                .send(Err(Error::request_timeout(call.key.id, call.timeout_ms)));
        }
        count
    }

    /// Returns the number of pending calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    /// Returns `true` if `key` is currently pending.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, key: CallKey) -> bool {
        self.inner.lock().keys.contains(&key)
    }

    /// Removes and returns the entry for `wire_id`, keeping the
    /// duplicate-id index consistent.
    fn take(&self, wire_id: WireId) -> Option<PendingCall> {
        let mut inner = self.inner.lock();
        let call = inner.calls.remove(&wire_id)?;
        inner.keys.remove(&call.key);
        Some(call)
    }

    /// Removes and returns every entry matching `predicate`.
    fn drain_where(&self, predicate: impl Fn(&PendingCall) -> bool) -> Vec<PendingCall> {
        let mut inner = self.inner.lock();
        let matching: Vec<WireId> = inner
            .calls
            .iter()
            .filter(|(_, call)| predicate(call))
            .map(|(wire_id, _)| *wire_id)
            .collect();

        matching
            .into_iter()
            .filter_map(|wire_id| {
                let call = inner.calls.remove(&wire_id)?;
                inner.keys.remove(&call.key);
                Some(call)
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn key(connection: ConnectionId, id: i64) -> CallKey {
        CallKey {
            connection,
            id: CommandId::new(id),
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = PendingCallRegistry::new();
        let connection = ConnectionId::next();

        let (wire_id, rx) = registry
            .register(key(connection, 2), 1, Duration::from_secs(30))
            .expect("register");
        assert_eq!(registry.pending_count(), 1);

        registry.resolve(wire_id, Some(json!({"product": "Chrome"})), None);

        let response = rx.await.expect("channel").expect("response");
        assert_eq!(response.id, CommandId::new(2));
        assert_eq!(response.result, Some(json!({"product": "Chrome"})));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_original_untouched() {
        let registry = PendingCallRegistry::new();
        let connection = ConnectionId::next();

        let (wire_id, rx) = registry
            .register(key(connection, 1), 1, Duration::from_secs(30))
            .expect("register");

        let err = registry
            .register(key(connection, 1), 1, Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId { .. }));

        // The original call still resolves normally.
        registry.resolve(wire_id, Some(json!({})), None);
        let response = rx.await.expect("channel").expect("response");
        assert_eq!(response.id, CommandId::new(1));
    }

    #[tokio::test]
    async fn test_same_id_different_connections() {
        let registry = PendingCallRegistry::new();
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        let (wire_a, rx_a) = registry
            .register(key(a, 1), 1, Duration::from_secs(30))
            .expect("register a");
        let (wire_b, rx_b) = registry
            .register(key(b, 1), 1, Duration::from_secs(30))
            .expect("register b");
        assert_ne!(wire_a, wire_b);

        registry.resolve(wire_b, Some(json!({"who": "b"})), None);
        registry.resolve(wire_a, Some(json!({"who": "a"})), None);

        let response_a = rx_a.await.expect("channel").expect("response");
        let response_b = rx_b.await.expect("channel").expect("response");
        assert_eq!(response_a.result, Some(json!({"who": "a"})));
        assert_eq!(response_b.result, Some(json!({"who": "b"})));
    }

    #[tokio::test]
    async fn test_stale_response_dropped() {
        let registry = PendingCallRegistry::new();

        // No entry exists; must not panic or create state.
        registry.resolve(WireId::from_u64(9999), Some(json!({})), None);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_generation_empties_registry() {
        let registry = PendingCallRegistry::new();
        let connection = ConnectionId::next();

        let mut receivers = Vec::new();
        for id in 0..5 {
            let (_, rx) = registry
                .register(key(connection, id), 7, Duration::from_secs(30))
                .expect("register");
            receivers.push(rx);
        }

        assert_eq!(registry.cancel_generation(7), 5);
        assert_eq!(registry.pending_count(), 0);

        for rx in receivers {
            let err = rx.await.expect("channel").unwrap_err();
            assert!(matches!(err, Error::ChannelClosed));
        }
    }

    #[tokio::test]
    async fn test_cancel_generation_scoped() {
        let registry = PendingCallRegistry::new();
        let connection = ConnectionId::next();

        let (_, rx_old) = registry
            .register(key(connection, 1), 1, Duration::from_secs(30))
            .expect("register");
        let (wire_new, rx_new) = registry
            .register(key(connection, 2), 2, Duration::from_secs(30))
            .expect("register");

        assert_eq!(registry.cancel_generation(1), 1);
        assert!(matches!(
            rx_old.await.expect("channel").unwrap_err(),
            Error::ChannelClosed
        ));

        // Generation 2 survives and resolves.
        registry.resolve(wire_new, Some(json!({})), None);
        assert!(rx_new.await.expect("channel").is_ok());
    }

    #[tokio::test]
    async fn test_cancel_connection_discards_only_own_calls() {
        let registry = PendingCallRegistry::new();
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        let (_, _rx_a) = registry
            .register(key(a, 1), 1, Duration::from_secs(30))
            .expect("register");
        let (wire_b, rx_b) = registry
            .register(key(b, 1), 1, Duration::from_secs(30))
            .expect("register");

        assert_eq!(registry.cancel_connection(a), 1);
        assert_eq!(registry.pending_count(), 1);

        registry.resolve(wire_b, None, Some("still here".to_string()));
        let response = rx_b.await.expect("channel").expect("response");
        assert_eq!(response.error.as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn test_expire_rejects_only_overdue() {
        let registry = PendingCallRegistry::new();
        let connection = ConnectionId::next();

        let (_, rx_fast) = registry
            .register(key(connection, 1), 1, Duration::from_millis(0))
            .expect("register");
        let (_, _rx_slow) = registry
            .register(key(connection, 2), 1, Duration::from_secs(60))
            .expect("register");

        let expired = registry.expire(Instant::now() + Duration::from_millis(1));
        assert_eq!(expired, 1);
        assert_eq!(registry.pending_count(), 1);

        let err = rx_fast.await.expect("channel").unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_at_most_one_resolution() {
        let registry = PendingCallRegistry::new();
        let connection = ConnectionId::next();

        let (wire_id, rx) = registry
            .register(key(connection, 3), 1, Duration::from_secs(30))
            .expect("register");

        registry.resolve(wire_id, Some(json!(1)), None);
        // Second resolution hits no entry and is dropped.
        registry.resolve(wire_id, Some(json!(2)), None);
        registry.reject(wire_id, Error::ChannelClosed);

        let response = rx.await.expect("channel").expect("response");
        assert_eq!(response.result, Some(json!(1)));
    }

    #[test]
    fn test_pending_cap() {
        let registry = PendingCallRegistry::new();
        let connection = ConnectionId::next();

        let mut receivers = Vec::new();
        for id in 0..MAX_PENDING_CALLS as i64 {
            receivers.push(
                registry
                    .register(key(connection, id), 1, Duration::from_secs(30))
                    .expect("register"),
            );
        }

        let err = registry
            .register(key(connection, -1), 1, Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }
}
