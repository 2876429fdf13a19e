//! `HubwireServer` builder and server loop.
//!
//! This is the entry point for running a Hubwire server. It ties the
//! layers together: HTTP endpoints → registry → transports → hub handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hubwire_protocol::{HubProtocol, JsonHubProtocol, ProtocolSet};
use hubwire_registry::ConnectionManager;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::{
    ConnectionHandler, HttpConnectionOptions, HttpDispatcher, HubConnectionHandler,
    HubConnectionStore, HubDispatcher, HubwireError, routes,
};

/// Builder for configuring and starting a Hubwire server.
///
/// # Example
///
/// ```rust,ignore
/// use hubwire::prelude::*;
///
/// let server = HubwireServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(MyHub::default())
///     .await?;
/// server.run().await
/// ```
pub struct HubwireServerBuilder {
    bind_addr: String,
    options: HttpConnectionOptions,
    protocols: ProtocolSet,
    store: HubConnectionStore,
}

impl HubwireServerBuilder {
    /// Creates a new builder with default settings and the JSON protocol
    /// registered.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            options: HttpConnectionOptions::default(),
            protocols: ProtocolSet::new().with(JsonHubProtocol::default()),
            store: HubConnectionStore::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Replaces the HTTP and transport options.
    pub fn options(mut self, options: HttpConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers an additional hub protocol, replacing any protocol with
    /// the same name.
    pub fn protocol(mut self, protocol: impl HubProtocol + 'static) -> Self {
        self.protocols = self.protocols.with(protocol);
        self
    }

    /// The store hub connections are registered in. Keep a clone to
    /// broadcast from outside the hub.
    pub fn store(&self) -> HubConnectionStore {
        self.store.clone()
    }

    /// Builds the server around a hub dispatcher.
    pub async fn build<D: HubDispatcher>(
        self,
        dispatcher: D,
    ) -> Result<HubwireServer<HubConnectionHandler<D>>, HubwireError> {
        let handler = HubConnectionHandler::new(
            Arc::new(dispatcher),
            self.protocols.clone(),
            self.store.clone(),
            self.options.handshake_timeout(),
        );
        self.build_with_handler(handler).await
    }

    /// Builds the server around a raw connection handler that works on
    /// the byte pipes directly.
    pub async fn build_with_handler<H: ConnectionHandler>(
        self,
        handler: H,
    ) -> Result<HubwireServer<H>, HubwireError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let manager = Arc::new(ConnectionManager::new(self.options.pipe_options()));
        let dispatcher = Arc::new(HttpDispatcher::new(
            manager,
            Arc::new(handler),
            self.options,
        ));

        Ok(HubwireServer {
            listener,
            dispatcher,
            store: self.store,
        })
    }
}

impl Default for HubwireServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Hubwire server.
///
/// Call [`run()`](Self::run) to start serving requests.
pub struct HubwireServer<H> {
    listener: TcpListener,
    dispatcher: Arc<HttpDispatcher<H>>,
    store: HubConnectionStore,
}

impl HubwireServer<()> {
    /// Creates a new builder.
    pub fn builder() -> HubwireServerBuilder {
        HubwireServerBuilder::new()
    }
}

impl<H: ConnectionHandler> HubwireServer<H> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The registry of every connection this server has negotiated.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        self.dispatcher.manager()
    }

    /// The hub connections that have completed the protocol handshake.
    pub fn store(&self) -> &HubConnectionStore {
        &self.store
    }

    /// The router serving this server's endpoints, for mounting into a
    /// larger application.
    pub fn router(&self) -> Router {
        routes::router(Arc::clone(&self.dispatcher))
    }

    /// Serves requests until the process is terminated.
    pub async fn run(self) -> Result<(), HubwireError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves requests until `shutdown` resolves, then disposes every
    /// connection.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), HubwireError> {
        let router = self.router();
        let manager = Arc::clone(self.dispatcher.manager());
        let options = self.dispatcher.options();
        let scan = spawn_scan_loop(
            Arc::clone(&manager),
            options.scan_interval(),
            options.disconnect_timeout(),
        );

        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            path = %options.path,
            "Hubwire server running"
        );
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        scan.abort();
        manager.close_all();
        tracing::info!("Hubwire server stopped");
        result.map_err(HubwireError::from)
    }
}

/// Periodically disposes connections that have been without a transport
/// for longer than `disconnect_timeout`.
pub fn spawn_scan_loop(
    manager: Arc<ConnectionManager>,
    interval: Duration,
    disconnect_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = manager.scan(disconnect_timeout);
            if !removed.is_empty() {
                tracing::debug!(count = removed.len(), "scan removed idle connections");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use hubwire_transport::TransportKind;

    use super::*;

    #[tokio::test]
    async fn test_spawn_scan_loop_removes_idle_connections() {
        let manager = Arc::new(ConnectionManager::default());
        let idle = manager.create_connection();
        let busy = manager.create_connection();
        let _lease = busy.try_attach(TransportKind::ServerSentEvents).unwrap();

        let scan = spawn_scan_loop(Arc::clone(&manager), Duration::from_millis(10), Duration::ZERO);
        for _ in 0..100 {
            if manager.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scan.abort();

        assert!(manager.try_get(idle.id()).is_none());
        assert!(manager.try_get(busy.id()).is_some());
    }
}
