//! Server-Sent Events transport.
//!
//! One long-lived response carries every server-to-client message as an
//! event. Clients submit their own messages through the separate send
//! endpoint, so this transport only ever reads from the pipe.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::pipe::{PipeReader, ReadResult};
use crate::{HttpTransport, TransportError, TransportKind};

/// Response headers every event-stream response carries.
pub const EVENT_STREAM_HEADERS: [(&str, &str); 3] = [
    ("content-type", "text/event-stream"),
    ("cache-control", "no-cache"),
    ("content-encoding", "identity"),
];

/// Comment line written before the first event so clients fire their
/// open callback straight away.
const PREAMBLE: &[u8] = b":\r\n";

/// Streams the connection's outbound data as `data:` events.
pub struct ServerSentEventsTransport<W> {
    writer: W,
    app: Arc<PipeReader>,
}

impl<W> ServerSentEventsTransport<W>
where
    W: AsyncWrite + Send + Unpin,
{
    /// Creates a transport that writes events to `writer`, reading from
    /// the transport side's input pipe.
    pub fn new(writer: W, app: Arc<PipeReader>) -> Self {
        Self { writer, app }
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<(), TransportError> {
        self.writer
            .write_all(PREAMBLE)
            .await
            .map_err(TransportError::WriteFailed)?;
        self.writer.flush().await.map_err(TransportError::WriteFailed)?;

        let mut event = Vec::new();
        loop {
            let data = match self.app.read_cancellable(&cancel).await {
                ReadResult::Data(data) => data,
                ReadResult::Cancelled | ReadResult::Completed => {
                    tracing::trace!("event stream closed");
                    return Ok(());
                }
            };

            tracing::debug!(len = data.len(), "writing event");
            event.clear();
            format_event(&data, &mut event);
            self.writer
                .write_all(&event)
                .await
                .map_err(TransportError::WriteFailed)?;
            self.writer.flush().await.map_err(TransportError::WriteFailed)?;
        }
    }
}

impl<W> HttpTransport for ServerSentEventsTransport<W>
where
    W: AsyncWrite + Send + Unpin,
{
    type Outcome = ();

    fn kind(&self) -> TransportKind {
        TransportKind::ServerSentEvents
    }

    fn process_request(
        self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.run(cancel)
    }
}

/// Encodes `data` as one event: a `data:` line per input line, then a
/// blank line.
pub fn format_event(data: &[u8], out: &mut Vec<u8>) {
    for line in data.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}
