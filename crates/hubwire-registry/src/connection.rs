//! Per-connection state: the pipe pair, the transport slot, and the
//! lifecycle state machine.
//!
//! A [`ConnectionContext`] is shared between every request that touches
//! the same logical connection. The HTTP requests come and go (one for a
//! WebSocket, many for long polling), but the context, its pipes, and the
//! application task outlive them all.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hubwire_transport::{
    ConnectionId, DuplexPipe, PipeOptions, SharedTransferFormat, TransferFormat, TransportKind,
};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::RegistryError;

/// Where a connection is in its lifecycle.
///
/// ```text
///   negotiate
///       │
///       ▼
///   [Created] ──→ [Negotiated] ──→ [Connected] ──→ [Closing] ──→ [Closed]
///                                       ▲   │
///                                       └───┘ (each poll re-attaches)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, negotiate response not yet written.
    Created,
    /// The client knows its id but has not connected a transport yet.
    Negotiated,
    /// A transport has attached at least once.
    Connected,
    /// Disposal has started; no new transports may attach.
    Closing,
    /// Disposed. The entry is about to leave the registry.
    Closed,
}

/// Mutable bookkeeping guarded by one lock.
struct Inner {
    state: ConnectionState,
    transport_kind: Option<TransportKind>,
    items: HashMap<String, String>,
    protocol: Option<String>,
    last_seen: Instant,
    application_started: bool,
    /// Token of the poll request currently holding the transport slot.
    current_poll: Option<CancellationToken>,
}

/// Everything the server knows about one logical connection.
pub struct ConnectionContext {
    id: ConnectionId,
    /// Transport side: transports read outbound data from here and write
    /// inbound data into it.
    transport: DuplexPipe,
    /// Application side: the connection handler's view of the same pipes.
    application: DuplexPipe,
    cancel: CancellationToken,
    format: SharedTransferFormat,
    /// Held by whichever request is currently running a transport.
    transport_slot: Arc<tokio::sync::Mutex<()>>,
    inner: Mutex<Inner>,
}

impl ConnectionContext {
    /// Creates a fresh context in the [`ConnectionState::Created`] state.
    pub fn new(id: ConnectionId, pipe_options: &PipeOptions) -> Self {
        let (transport, application) = DuplexPipe::create_connection_pair(pipe_options);
        Self {
            id,
            transport,
            application,
            cancel: CancellationToken::new(),
            format: SharedTransferFormat::new(TransferFormat::Text),
            transport_slot: Arc::new(tokio::sync::Mutex::new(())),
            inner: Mutex::new(Inner {
                state: ConnectionState::Created,
                transport_kind: None,
                items: HashMap::new(),
                protocol: None,
                last_seen: Instant::now(),
                application_started: false,
                current_poll: None,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn transport(&self) -> &DuplexPipe {
        &self.transport
    }

    pub fn application(&self) -> &DuplexPipe {
        &self.application
    }

    /// Cancelled when the connection is aborted or disposed.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shared with the WebSocket transport so a binary protocol chosen
    /// during negotiation switches the frame type mid-connection.
    pub fn transfer_format(&self) -> &SharedTransferFormat {
        &self.format
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.lock().transport_kind
    }

    pub fn protocol(&self) -> Option<String> {
        self.lock().protocol.clone()
    }

    /// Records the hub protocol the client picked and switches the
    /// transfer format to match.
    pub fn set_protocol(&self, name: impl Into<String>, format: TransferFormat) {
        self.lock().protocol = Some(name.into());
        self.format.set(format);
    }

    pub fn item(&self, key: &str) -> Option<String> {
        self.lock().items.get(key).cloned()
    }

    pub fn set_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().items.insert(key.into(), value.into());
    }

    /// When a transport last released the connection (or when it was
    /// created, if none has yet).
    pub fn last_seen(&self) -> Instant {
        self.lock().last_seen
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Moves `Created` to `Negotiated`. Later states are left alone.
    pub fn mark_negotiated(&self) {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Created {
            inner.state = ConnectionState::Negotiated;
        }
    }

    /// Returns `true` exactly once: the first caller starts the
    /// application task, everyone after that just reuses the pipes.
    pub fn start_application(&self) -> bool {
        let mut inner = self.lock();
        !std::mem::replace(&mut inner.application_started, true)
    }

    /// Attaches a streaming transport (WebSockets or SSE).
    ///
    /// Fails straight away if another request already holds the slot.
    ///
    /// # Errors
    /// - [`RegistryError::Closed`] if disposal has started
    /// - [`RegistryError::TransportMismatch`] if a different kind attached before
    /// - [`RegistryError::AlreadyAttached`] if a transport is running
    pub fn try_attach(
        self: &Arc<Self>,
        kind: TransportKind,
    ) -> Result<TransportLease, RegistryError> {
        let mut inner = self.lock();
        self.check_attachable(&inner, kind)?;

        let guard = Arc::clone(&self.transport_slot)
            .try_lock_owned()
            .map_err(|_| RegistryError::AlreadyAttached(self.id.clone()))?;

        inner.transport_kind = Some(kind);
        inner.state = ConnectionState::Connected;
        drop(inner);

        tracing::debug!(connection_id = %self.id, transport = %kind, "transport attached");
        Ok(TransportLease {
            context: Arc::clone(self),
            _guard: guard,
        })
    }

    /// Attaches a long-polling request.
    ///
    /// A poll never fails because another poll is active: the previous
    /// poll's token is cancelled and this call waits for it to release
    /// the slot. The returned token is cancelled when a later poll
    /// replaces this one.
    ///
    /// # Errors
    /// - [`RegistryError::Closed`] if disposal has started
    /// - [`RegistryError::TransportMismatch`] if the connection uses a
    ///   streaming transport
    pub async fn attach_poll(
        self: &Arc<Self>,
    ) -> Result<(TransportLease, CancellationToken), RegistryError> {
        let token = CancellationToken::new();
        {
            let mut inner = self.lock();
            self.check_attachable(&inner, TransportKind::LongPolling)?;
            if let Some(previous) = inner.current_poll.replace(token.clone()) {
                tracing::debug!(connection_id = %self.id, "superseding previous poll");
                previous.cancel();
            }
            inner.transport_kind = Some(TransportKind::LongPolling);
        }

        let guard = tokio::select! {
            guard = Arc::clone(&self.transport_slot).lock_owned() => guard,
            // A newer poll arrived while we were still waiting.
            _ = token.cancelled() => return Err(RegistryError::AlreadyAttached(self.id.clone())),
        };

        let mut inner = self.lock();
        if matches!(inner.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Err(RegistryError::Closed(self.id.clone()));
        }
        inner.state = ConnectionState::Connected;
        drop(inner);

        Ok((
            TransportLease {
                context: Arc::clone(self),
                _guard: guard,
            },
            token,
        ))
    }

    /// True when no transport is attached and none has been for longer
    /// than `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        if self.transport_slot.try_lock().is_err() {
            return false;
        }
        self.last_seen().elapsed() >= timeout
    }

    /// Tears the connection down: cancels the token and completes both
    /// outbound pipes so readers on either side observe the end.
    pub fn dispose(&self) {
        {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.state = ConnectionState::Closing;
            if let Some(poll) = inner.current_poll.take() {
                poll.cancel();
            }
        }

        self.cancel.cancel();
        self.application.output().complete();
        self.transport.output().complete();

        self.lock().state = ConnectionState::Closed;
        tracing::debug!(connection_id = %self.id, "connection disposed");
    }

    fn check_attachable(&self, inner: &Inner, kind: TransportKind) -> Result<(), RegistryError> {
        if matches!(inner.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Err(RegistryError::Closed(self.id.clone()));
        }
        match inner.transport_kind {
            Some(active) if active != kind => Err(RegistryError::TransportMismatch {
                id: self.id.clone(),
                active,
                requested: kind,
            }),
            _ => Ok(()),
        }
    }

    fn touch(&self) {
        self.lock().last_seen = Instant::now();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing inside the lock can panic, but recover anyway rather
        // than poisoning every later request.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("transport_kind", &self.transport_kind())
            .finish_non_exhaustive()
    }
}

/// Proof that a request owns the connection's transport slot.
///
/// Dropping the lease frees the slot and stamps `last_seen`, which is
/// what the idle scan measures from.
#[derive(Debug)]
pub struct TransportLease {
    context: Arc<ConnectionContext>,
    _guard: OwnedMutexGuard<()>,
}

impl TransportLease {
    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }
}

impl Drop for TransportLease {
    fn drop(&mut self) {
        self.context.touch();
    }
}
