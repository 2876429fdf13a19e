//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The transport runs two loops over one upgraded socket:
//!
//! - **receiving**: client frames → transport output pipe
//! - **sending**: transport input pipe → client frames
//!
//! Whichever loop finishes first starts the shutdown. The other one gets
//! `close_timeout` to wind down; if it doesn't, both are dropped and the
//! socket is abandoned without waiting for the client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;

use crate::pipe::{DuplexPipe, FlushResult, PipeReader, PipeWriter, ReadResult};
use crate::{HttpTransport, SharedTransferFormat, TransferFormat, TransportError, TransportKind};

/// Tunables for the socket transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketOptions {
    /// How long the second loop may take to finish after the first one
    /// did, in milliseconds.
    pub close_timeout_ms: u64,
}

impl WebSocketOptions {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            close_timeout_ms: 5_000,
        }
    }
}

/// How a socket exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOutcome {
    /// Both loops finished within the close timeout.
    Graceful,
    /// The close handshake did not complete in time and the socket was
    /// dropped.
    Aborted,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Receiving,
    Sending,
}

/// Full-duplex transport over an already-upgraded WebSocket.
///
/// Generic over the socket so it works with any
/// `WebSocketStream<T>`, whether backed by a hyper upgrade, a TCP stream,
/// or an in-memory duplex in tests.
pub struct WebSocketsTransport<S> {
    socket: S,
    pipe: DuplexPipe,
    format: SharedTransferFormat,
    options: WebSocketOptions,
}

impl<S> WebSocketsTransport<S>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin,
{
    /// Creates a transport for `socket`, moving data through the
    /// transport side of a connection's pipe pair.
    pub fn new(
        socket: S,
        pipe: DuplexPipe,
        format: SharedTransferFormat,
        options: WebSocketOptions,
    ) -> Self {
        Self {
            socket,
            pipe,
            format,
            options,
        }
    }

    async fn run(self, cancel: CancellationToken) -> Result<SocketOutcome, TransportError> {
        let (sink, stream) = self.socket.split();
        let pipe = self.pipe;

        let receiving = receive_loop(stream, Arc::clone(pipe.output()));
        let sending = send_loop(sink, Arc::clone(pipe.input()), self.format, cancel);
        tokio::pin!(receiving);
        tokio::pin!(sending);

        let (side, first) = tokio::select! {
            result = &mut receiving => (Side::Receiving, result),
            result = &mut sending => (Side::Sending, result),
        };
        tracing::debug!(?side, ok = first.is_ok(), "websocket loop finished");

        // Unblock the loop that is still running.
        match side {
            Side::Receiving => pipe.input().cancel_pending_read(),
            Side::Sending => pipe.output().cancel_pending_flush(),
        }

        let remaining = async {
            match side {
                Side::Receiving => (&mut sending).await,
                Side::Sending => (&mut receiving).await,
            }
        };

        let close_timeout = self.options.close_timeout();
        match tokio::time::timeout(close_timeout, remaining).await {
            Ok(second) => {
                first?;
                second?;
                Ok(SocketOutcome::Graceful)
            }
            Err(_) => {
                tracing::debug!(
                    timeout = ?close_timeout,
                    "websocket close timed out, aborting"
                );
                first?;
                Ok(SocketOutcome::Aborted)
            }
        }
    }
}

impl<S> HttpTransport for WebSocketsTransport<S>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin,
{
    type Outcome = SocketOutcome;

    fn kind(&self) -> TransportKind {
        TransportKind::WebSockets
    }

    fn process_request(
        self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<SocketOutcome, TransportError>> + Send {
        self.run(cancel)
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

async fn receive_loop<R>(mut stream: R, app: Arc<PipeWriter>) -> Result<(), TransportError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let result = loop {
        let Some(message) = stream.next().await else {
            break Ok(());
        };
        let data: Bytes = match message {
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => message.into_data(),
            Ok(Message::Close(frame)) => {
                tracing::trace!(?frame, "client closed websocket");
                break Ok(());
            }
            Ok(_) => continue,
            Err(e) if is_disconnect(&e) => {
                tracing::debug!(error = %e, "client disconnected without closing");
                break Ok(());
            }
            Err(e) => break Err(TransportError::from(e)),
        };

        match app.write(data).await {
            FlushResult::Flushed => {}
            FlushResult::Cancelled | FlushResult::Completed => break Ok(()),
        }
    };

    app.complete();
    result
}

async fn send_loop<W>(
    mut sink: W,
    app: Arc<PipeReader>,
    format: SharedTransferFormat,
    cancel: CancellationToken,
) -> Result<(), TransportError>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let result = loop {
        let data = match app.read_cancellable(&cancel).await {
            ReadResult::Data(data) => data,
            ReadResult::Cancelled | ReadResult::Completed => break Ok(()),
        };

        let message = match format.get() {
            TransferFormat::Binary => Message::Binary(data),
            TransferFormat::Text => match String::from_utf8(data.to_vec()) {
                Ok(text) => Message::text(text),
                Err(e) => {
                    break Err(TransportError::SendFailed(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e,
                    )));
                }
            },
        };

        if let Err(e) = sink.send(message).await {
            break Err(TransportError::from(e));
        }
    };

    let code = if result.is_ok() {
        CloseCode::Normal
    } else {
        CloseCode::Error
    };
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(""),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::trace!(error = %e, "close frame not sent");
    }

    result
}

fn is_disconnect(error: &WsError) -> bool {
    use tokio_tungstenite::tungstenite::error::ProtocolError;
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Io(_)
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}
