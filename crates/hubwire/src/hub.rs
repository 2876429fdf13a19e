//! The hub layer: turns a connection's byte pipes into a stream of
//! [`HubMessage`]s.
//!
//! Each connection gets one task running [`HubConnectionHandler`]. The
//! flow is:
//!   1. Read the negotiation frame → pick a protocol from the registered set
//!   2. Raise `on_connected` on the dispatcher
//!   3. Loop: slice frames off the inbound buffer → decode → dispatch
//!   4. Raise `on_disconnected` and complete the outbound pipe

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use hubwire_protocol::{
    CompletionMessage, HubMessage, HubProtocol, InvocationBinder, InvocationMessage,
    ProtocolError, ProtocolSet, SerializationCache, negotiation,
};
use hubwire_registry::ConnectionContext;
use hubwire_transport::{ConnectionId, FlushResult, ReadResult};

use crate::{HubConnectionStore, HubwireError};

/// Runs the application side of a connection.
///
/// The endpoint dispatcher spawns `on_connected` the first time a
/// transport attaches. When the returned future finishes, the
/// connection's outbound pipe is completed and the transport winds down.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connected(
        &self,
        connection: Arc<ConnectionContext>,
    ) -> impl Future<Output = ()> + Send;
}

/// What a hub needs to provide: method signatures for decoding, plus
/// callbacks for the connection lifecycle and each decoded message.
///
/// Invocations whose arguments failed to bind never reach
/// [`dispatch`](Self::dispatch); the handler answers them itself.
pub trait HubDispatcher: InvocationBinder + 'static {
    fn on_connected(&self, _connection: &HubConnection) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn dispatch(
        &self,
        connection: &HubConnection,
        message: HubMessage,
    ) -> impl Future<Output = Result<(), HubwireError>> + Send;

    fn on_disconnected(&self, _connection: &HubConnection) -> impl Future<Output = ()> + Send {
        async {}
    }
}

// ---------------------------------------------------------------------------
// HubConnection
// ---------------------------------------------------------------------------

/// A connection that has finished the protocol handshake.
///
/// Cheap to clone; every clone writes to the same outbound pipe.
#[derive(Clone)]
pub struct HubConnection {
    context: Arc<ConnectionContext>,
    protocol: Arc<dyn HubProtocol>,
}

impl HubConnection {
    pub fn new(context: Arc<ConnectionContext>, protocol: Arc<dyn HubProtocol>) -> Self {
        Self { context, protocol }
    }

    pub fn id(&self) -> &ConnectionId {
        self.context.id()
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    pub fn protocol(&self) -> &Arc<dyn HubProtocol> {
        &self.protocol
    }

    /// Serializes `message` with this connection's protocol and queues it.
    pub async fn send(&self, message: &HubMessage) -> Result<(), HubwireError> {
        let payload = self.protocol.to_bytes(message)?;
        self.write(payload).await
    }

    /// Queues the cache's rendering of its message for this connection's
    /// protocol, serializing it only if no other connection with the same
    /// protocol already did.
    pub async fn send_cached(&self, cache: &SerializationCache) -> Result<(), HubwireError> {
        let payload = cache.get_serialized_message(self.protocol.as_ref())?;
        self.write(payload).await
    }

    /// Ends the connection from the server side.
    pub fn abort(&self) {
        tracing::debug!(connection_id = %self.id(), "hub connection aborted");
        self.context.cancellation().cancel();
    }

    async fn write(&self, payload: Bytes) -> Result<(), HubwireError> {
        match self.context.application().output().write(payload).await {
            FlushResult::Flushed => Ok(()),
            FlushResult::Cancelled | FlushResult::Completed => {
                Err(HubwireError::ConnectionClosed(self.id().clone()))
            }
        }
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("id", self.id())
            .field("protocol", &self.protocol.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HubConnectionHandler
// ---------------------------------------------------------------------------

/// The standard [`ConnectionHandler`]: negotiates a hub protocol and feeds
/// decoded messages to a [`HubDispatcher`].
pub struct HubConnectionHandler<D> {
    dispatcher: Arc<D>,
    protocols: ProtocolSet,
    store: HubConnectionStore,
    handshake_timeout: Duration,
}

impl<D: HubDispatcher> HubConnectionHandler<D> {
    pub fn new(
        dispatcher: Arc<D>,
        protocols: ProtocolSet,
        store: HubConnectionStore,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            protocols,
            store,
            handshake_timeout,
        }
    }

    pub fn store(&self) -> &HubConnectionStore {
        &self.store
    }

    async fn run(&self, context: Arc<ConnectionContext>) {
        let connection_id = context.id().clone();
        let mut buffer = BytesMut::new();

        let protocol = match tokio::time::timeout(
            self.handshake_timeout,
            self.negotiate(&context, &mut buffer),
        )
        .await
        {
            Ok(Some(protocol)) => protocol,
            Ok(None) => {
                context.application().output().complete();
                return;
            }
            Err(_) => {
                tracing::info!(%connection_id, "protocol handshake timed out");
                context.application().output().complete();
                return;
            }
        };

        context.set_protocol(protocol.name(), protocol.transfer_format());
        tracing::debug!(%connection_id, protocol = protocol.name(), "hub protocol negotiated");

        let connection = HubConnection::new(Arc::clone(&context), protocol);
        self.store.add(connection.clone());
        self.dispatcher.on_connected(&connection).await;

        if let Err(e) = self.message_loop(&connection, &mut buffer).await {
            tracing::error!(%connection_id, error = %e, "hub connection terminated");
        }

        self.store.remove(&connection_id);
        self.dispatcher.on_disconnected(&connection).await;
        context.application().output().complete();
        tracing::debug!(%connection_id, "hub connection ended");
    }

    /// Reads until a complete negotiation frame arrives. Returns `None`
    /// if the input ends first or the frame names an unusable protocol.
    async fn negotiate(
        &self,
        context: &ConnectionContext,
        buffer: &mut BytesMut,
    ) -> Option<Arc<dyn HubProtocol>> {
        let connection_id = context.id();
        loop {
            let mut input: &[u8] = &buffer[..];
            let before = input.len();
            match negotiation::try_parse_message(&mut input) {
                Ok(Some(message)) => {
                    let consumed = before - input.len();
                    buffer.advance(consumed);
                    let protocol = self.protocols.get(message.protocol()).cloned();
                    if protocol.is_none() {
                        tracing::info!(
                            %connection_id,
                            protocol = message.protocol(),
                            "client requested an unsupported protocol"
                        );
                    }
                    return protocol;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(%connection_id, error = %e, "invalid negotiation frame");
                    return None;
                }
            }

            match context.application().input().read().await {
                ReadResult::Data(data) => buffer.extend_from_slice(&data),
                ReadResult::Cancelled | ReadResult::Completed => return None,
            }
        }
    }

    async fn message_loop(
        &self,
        connection: &HubConnection,
        buffer: &mut BytesMut,
    ) -> Result<(), HubwireError> {
        let connection_id = connection.id();
        let input = Arc::clone(connection.context().application().input());
        let binder: &dyn InvocationBinder = self.dispatcher.as_ref();

        loop {
            // Drain every complete frame before reading again.
            let mut frames: &[u8] = &buffer[..];
            let before = frames.len();
            let mut messages = Vec::new();
            loop {
                let remaining = frames.len();
                match connection.protocol().try_parse_message(&mut frames, binder) {
                    Ok(Some(message)) => messages.push(message),
                    Ok(None) => break,
                    Err(e @ ProtocolError::Format(_)) => return Err(e.into()),
                    Err(e) if frames.len() == remaining => return Err(e.into()),
                    Err(e) => {
                        tracing::debug!(%connection_id, error = %e, "dropping undecodable message");
                    }
                }
            }
            let consumed = before - frames.len();
            buffer.advance(consumed);

            for message in messages {
                self.handle_message(connection, message).await?;
            }

            match input.read().await {
                ReadResult::Data(data) => buffer.extend_from_slice(&data),
                ReadResult::Cancelled | ReadResult::Completed => return Ok(()),
            }
        }
    }

    async fn handle_message(
        &self,
        connection: &HubConnection,
        message: HubMessage,
    ) -> Result<(), HubwireError> {
        match message {
            HubMessage::Ping => {
                tracing::trace!(connection_id = %connection.id(), "ping received");
                Ok(())
            }
            HubMessage::Invocation(invocation) | HubMessage::StreamInvocation(invocation)
                if invocation.arguments().is_err() =>
            {
                reject_unbound(connection, &invocation).await
            }
            message => {
                tracing::debug!(
                    connection_id = %connection.id(),
                    kind = ?message.message_type(),
                    "dispatching message"
                );
                if let Err(e) = self.dispatcher.dispatch(connection, message).await {
                    match e {
                        HubwireError::ConnectionClosed(_) => return Err(e),
                        e => tracing::warn!(
                            connection_id = %connection.id(),
                            error = %e,
                            "dispatch failed"
                        ),
                    }
                }
                Ok(())
            }
        }
    }
}

impl<D: HubDispatcher> ConnectionHandler for HubConnectionHandler<D> {
    fn on_connected(
        &self,
        connection: Arc<ConnectionContext>,
    ) -> impl Future<Output = ()> + Send {
        self.run(connection)
    }
}

/// Answers an invocation whose arguments could not be bound. Fire-and-forget
/// invocations have nobody to answer, so those are only logged.
async fn reject_unbound(
    connection: &HubConnection,
    invocation: &InvocationMessage,
) -> Result<(), HubwireError> {
    let Err(error) = invocation.arguments() else {
        return Ok(());
    };
    tracing::debug!(
        connection_id = %connection.id(),
        method = invocation.target(),
        error = %error,
        "invocation arguments failed to bind"
    );

    match invocation.invocation_id() {
        Some(id) => {
            let completion = CompletionMessage::with_error(
                id,
                format!(
                    "Failed to invoke '{}' due to an error on the server. {error}",
                    invocation.target()
                ),
            );
            connection.send(&HubMessage::Completion(completion)).await
        }
        None => Ok(()),
    }
}
