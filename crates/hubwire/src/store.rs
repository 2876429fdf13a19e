//! Live hub connections and broadcast fan-out.

use std::sync::Arc;

use dashmap::DashMap;
use hubwire_protocol::{HubMessage, SerializationCache};
use hubwire_transport::ConnectionId;

use crate::HubConnection;

/// Every connection that has completed the protocol handshake.
///
/// Clones share the same map, so a store handed to the hub handler and
/// one kept by application code see the same connections.
#[derive(Debug, Clone, Default)]
pub struct HubConnectionStore {
    connections: Arc<DashMap<ConnectionId, HubConnection>>,
}

impl HubConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: HubConnection) {
        self.connections.insert(connection.id().clone(), connection);
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<HubConnection> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<HubConnection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Sends `message` to every connection.
    ///
    /// The message is serialized at most once per protocol: connections
    /// sharing a protocol share the cached bytes. Connections that fail
    /// (already closed, or the protocol cannot encode the message) are
    /// skipped. Returns how many connections the message was queued for.
    pub async fn broadcast(&self, message: HubMessage) -> usize {
        let cache = SerializationCache::new(message);

        // Snapshot first so no map shard stays locked across a write.
        let targets: Vec<HubConnection> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut delivered = 0;
        for connection in &targets {
            match connection.send_cached(&cache).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        error = %e,
                        "broadcast skipped connection"
                    );
                }
            }
        }

        tracing::debug!(delivered, total = targets.len(), cached = cache.len(), "broadcast sent");
        delivered
    }
}
