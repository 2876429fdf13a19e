//! The connection manager: every live connection, keyed by id.
//!
//! Requests for the same connection arrive on arbitrary tasks, so unlike
//! a single-owner registry this one sits behind a `DashMap` and hands out
//! `Arc<ConnectionContext>` clones. Removing an entry never invalidates a
//! context a request is still holding; it only stops new requests from
//! finding it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hubwire_transport::{ConnectionId, PipeOptions};
use rand::Rng;

use crate::{ConnectionContext, RegistryError};

/// Registry of active connections.
///
/// ## Lifecycle
///
/// ```text
/// create_connection() ──→ [Created] ── negotiate response ──→ [Negotiated]
///                                                                  │
///                                                   transport attaches
///                                                                  ▼
///        scan() / dispose() ◀──── idle past disconnect timeout ── [Connected]
///                │
///                ▼
///            [Closed] (removed from the map)
/// ```
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<ConnectionContext>>,
    pipe_options: PipeOptions,
}

impl ConnectionManager {
    /// Creates an empty manager whose connections use `pipe_options` for
    /// their pipe pairs.
    pub fn new(pipe_options: PipeOptions) -> Self {
        Self {
            connections: DashMap::new(),
            pipe_options,
        }
    }

    /// Registers a new connection under a freshly generated id.
    pub fn create_connection(&self) -> Arc<ConnectionContext> {
        let id = ConnectionId::new(generate_token());
        let context = Arc::new(ConnectionContext::new(id.clone(), &self.pipe_options));
        self.connections.insert(id.clone(), Arc::clone(&context));

        tracing::info!(connection_id = %id, "connection created");
        context
    }

    /// Looks a connection up by id.
    pub fn try_get(&self, id: &ConnectionId) -> Option<Arc<ConnectionContext>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`try_get`](Self::try_get) but reports a missing id as an error.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] if the id is unknown.
    pub fn get(&self, id: &ConnectionId) -> Result<Arc<ConnectionContext>, RegistryError> {
        self.try_get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Removes a connection without disposing it.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionContext>> {
        let removed = self.connections.remove(id).map(|(_, context)| context);
        if removed.is_some() {
            tracing::debug!(connection_id = %id, "connection removed");
        }
        removed
    }

    /// Removes and disposes a connection. Returns `false` if it was
    /// already gone.
    pub fn dispose(&self, id: &ConnectionId) -> bool {
        match self.remove(id) {
            Some(context) => {
                context.dispose();
                tracing::info!(connection_id = %id, "connection disposed");
                true
            }
            None => false,
        }
    }

    /// Disposes every connection that has had no transport attached for
    /// at least `disconnect_timeout`.
    ///
    /// Call this periodically. Returns the ids that were removed.
    pub fn scan(&self, disconnect_timeout: Duration) -> Vec<ConnectionId> {
        // Collect first: disposing while iterating would deadlock on the
        // shard we are reading from.
        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_idle(disconnect_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        idle.into_iter()
            .filter(|id| {
                tracing::info!(connection_id = %id, "disposing idle connection");
                self.dispose(id)
            })
            .collect()
    }

    /// Disposes every connection. Used at shutdown.
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in &ids {
            self.dispose(id);
        }
        tracing::info!(count = ids.len(), "all connections closed");
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Generates a connection id: 16 random bytes, hex-encoded.
///
/// `rand::rng()` is a thread-local CSPRNG, so ids are not guessable by
/// other clients.
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
