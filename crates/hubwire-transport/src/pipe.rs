//! Bounded, cancellable byte pipes between a transport and the application.
//!
//! Every connection owns two pipes, wired up as a pair of [`DuplexPipe`]s:
//!
//! ```text
//!            transport side                    application side
//!   ┌────────────────────────────┐      ┌────────────────────────────┐
//!   │ output ──── bytes from client ────▶ input                      │
//!   │ input  ◀─── bytes to client ──────  output                     │
//!   └────────────────────────────┘      └────────────────────────────┘
//! ```
//!
//! Both directions are bounded: a writer suspends while the reader has not
//! drained earlier chunks, and a reader suspends while nothing is queued.
//! Neither side ever spins.
//!
//! Cancellation is cooperative. [`PipeReader::cancel_pending_read`] makes
//! the current (or, if none is pending, the next) read return
//! [`ReadResult::Cancelled`] instead of waiting. Shutdown code relies on
//! this to unblock a loop that is stuck waiting on a silent peer.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

/// Sizing for a connection's pipes.
#[derive(Debug, Clone)]
pub struct PipeOptions {
    /// How many chunks may be queued in one direction before writers
    /// suspend.
    pub capacity: usize,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

/// The outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// A chunk of data, in the order it was written.
    Data(Bytes),
    /// The read was cancelled before data arrived.
    Cancelled,
    /// The writer completed and every queued chunk has been read.
    Completed,
}

/// The outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// The chunk was queued for the reader.
    Flushed,
    /// The write was cancelled while waiting for capacity.
    Cancelled,
    /// The pipe is closed (writer completed or reader gone); data dropped.
    Completed,
}

/// Reading half of a pipe.
#[derive(Debug)]
pub struct PipeReader {
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    cancel: Notify,
}

impl PipeReader {
    /// Waits for the next chunk.
    pub async fn read(&self) -> ReadResult {
        self.read_inner(None, false).await
    }

    /// Waits for the next chunk, giving up when `token` is cancelled.
    pub async fn read_cancellable(&self, token: &CancellationToken) -> ReadResult {
        self.read_inner(Some(token), false).await
    }

    /// Waits for data, then drains everything already queued into one chunk.
    ///
    /// Used by transports that deliver whatever is available per HTTP
    /// response rather than one message at a time.
    pub async fn read_batch(&self, token: &CancellationToken) -> ReadResult {
        self.read_inner(Some(token), true).await
    }

    /// Cancels the pending read, or the next one if none is pending.
    pub fn cancel_pending_read(&self) {
        self.cancel.notify_one();
    }

    async fn read_inner(&self, token: Option<&CancellationToken>, batch: bool) -> ReadResult {
        let never = CancellationToken::new();
        let token = token.unwrap_or(&never);

        let mut rx = tokio::select! {
            biased;
            _ = token.cancelled() => return ReadResult::Cancelled,
            _ = self.cancel.notified() => return ReadResult::Cancelled,
            rx = self.rx.lock() => rx,
        };

        let first = tokio::select! {
            biased;
            _ = token.cancelled() => return ReadResult::Cancelled,
            _ = self.cancel.notified() => return ReadResult::Cancelled,
            chunk = rx.recv() => chunk,
        };

        let Some(first) = first else {
            return ReadResult::Completed;
        };
        if !batch {
            return ReadResult::Data(first);
        }

        let mut combined: Option<BytesMut> = None;
        while let Ok(more) = rx.try_recv() {
            combined
                .get_or_insert_with(|| BytesMut::from(&first[..]))
                .extend_from_slice(&more);
        }
        match combined {
            Some(all) => ReadResult::Data(all.freeze()),
            None => ReadResult::Data(first),
        }
    }
}

/// Writing half of a pipe.
#[derive(Debug)]
pub struct PipeWriter {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    cancel: Notify,
}

impl PipeWriter {
    /// Queues a chunk, suspending while the pipe is full.
    ///
    /// Empty chunks are accepted and discarded.
    pub async fn write(&self, data: impl Into<Bytes>) -> FlushResult {
        let data = data.into();
        let Some(tx) = self.sender() else {
            return FlushResult::Completed;
        };
        if data.is_empty() {
            return FlushResult::Flushed;
        }

        tokio::select! {
            biased;
            _ = self.cancel.notified() => FlushResult::Cancelled,
            sent = tx.send(data) => match sent {
                Ok(()) => FlushResult::Flushed,
                Err(_) => FlushResult::Completed,
            },
        }
    }

    /// Marks the pipe complete. The reader sees [`ReadResult::Completed`]
    /// once it has drained what is already queued.
    pub fn complete(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Returns `true` once [`complete`](Self::complete) has been called.
    pub fn is_completed(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Cancels the pending write, or the next one if none is pending.
    pub fn cancel_pending_flush(&self) {
        self.cancel.notify_one();
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Creates a single bounded pipe.
pub fn pipe(options: &PipeOptions) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(options.capacity.max(1));
    (
        PipeWriter {
            tx: Mutex::new(Some(tx)),
            cancel: Notify::new(),
        },
        PipeReader {
            rx: tokio::sync::Mutex::new(rx),
            cancel: Notify::new(),
        },
    )
}

/// One side of a connection: what it reads and what it writes.
///
/// Cloning shares the same underlying pipes.
#[derive(Debug, Clone)]
pub struct DuplexPipe {
    input: Arc<PipeReader>,
    output: Arc<PipeWriter>,
}

impl DuplexPipe {
    /// Creates the two cross-wired sides of a connection.
    ///
    /// Returns `(transport, application)`: whatever the transport writes
    /// the application reads, and vice versa.
    pub fn create_connection_pair(options: &PipeOptions) -> (DuplexPipe, DuplexPipe) {
        let (to_app_writer, to_app_reader) = pipe(options);
        let (to_transport_writer, to_transport_reader) = pipe(options);

        let transport = DuplexPipe {
            input: Arc::new(to_transport_reader),
            output: Arc::new(to_app_writer),
        };
        let application = DuplexPipe {
            input: Arc::new(to_app_reader),
            output: Arc::new(to_transport_writer),
        };
        (transport, application)
    }

    /// The side this party reads from.
    pub fn input(&self) -> &Arc<PipeReader> {
        &self.input
    }

    /// The side this party writes to.
    pub fn output(&self) -> &Arc<PipeWriter> {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn small() -> PipeOptions {
        PipeOptions { capacity: 1 }
    }

    #[tokio::test]
    async fn test_write_then_read_preserves_order() {
        let (writer, reader) = pipe(&PipeOptions::default());
        writer.write(Bytes::from_static(b"one")).await;
        writer.write(Bytes::from_static(b"two")).await;

        assert_eq!(reader.read().await, ReadResult::Data(Bytes::from_static(b"one")));
        assert_eq!(reader.read().await, ReadResult::Data(Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn test_write_full_pipe_suspends_until_drained() {
        let (writer, reader) = pipe(&small());
        assert_eq!(writer.write(Bytes::from_static(b"a")).await, FlushResult::Flushed);

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), writer.write(Bytes::from_static(b"b")))
                .await;
        assert!(blocked.is_err(), "second write should wait for capacity");

        assert_eq!(reader.read().await, ReadResult::Data(Bytes::from_static(b"a")));
        assert_eq!(writer.write(Bytes::from_static(b"c")).await, FlushResult::Flushed);
        assert_eq!(reader.read().await, ReadResult::Data(Bytes::from_static(b"c")));
    }

    #[tokio::test]
    async fn test_read_empty_pipe_suspends() {
        let (_writer, reader) = pipe(&small());
        let waited = tokio::time::timeout(Duration::from_millis(20), reader.read()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_pending_read_unblocks_waiting_reader() {
        let (_writer, reader) = pipe(&small());
        let reader = Arc::new(reader);

        let waiting = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.read().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        reader.cancel_pending_read();

        assert_eq!(waiting.await.unwrap(), ReadResult::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_pending_read_without_waiter_applies_to_next_read() {
        let (writer, reader) = pipe(&PipeOptions::default());
        reader.cancel_pending_read();
        writer.write(Bytes::from_static(b"x")).await;

        assert_eq!(reader.read().await, ReadResult::Cancelled);
        assert_eq!(reader.read().await, ReadResult::Data(Bytes::from_static(b"x")));
    }

    #[tokio::test]
    async fn test_read_cancellable_token_returns_cancelled() {
        let (_writer, reader) = pipe(&small());
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(reader.read_cancellable(&token).await, ReadResult::Cancelled);
    }

    #[tokio::test]
    async fn test_complete_drains_then_reports_completed() {
        let (writer, reader) = pipe(&PipeOptions::default());
        writer.write(Bytes::from_static(b"last")).await;
        writer.complete();

        assert!(writer.is_completed());
        assert_eq!(reader.read().await, ReadResult::Data(Bytes::from_static(b"last")));
        assert_eq!(reader.read().await, ReadResult::Completed);
        assert_eq!(reader.read().await, ReadResult::Completed);
    }

    #[tokio::test]
    async fn test_write_after_complete_returns_completed() {
        let (writer, _reader) = pipe(&PipeOptions::default());
        writer.complete();
        assert_eq!(writer.write(Bytes::from_static(b"late")).await, FlushResult::Completed);
    }

    #[tokio::test]
    async fn test_write_after_reader_dropped_returns_completed() {
        let (writer, reader) = pipe(&PipeOptions::default());
        drop(reader);
        assert_eq!(writer.write(Bytes::from_static(b"x")).await, FlushResult::Completed);
    }

    #[tokio::test]
    async fn test_cancel_pending_flush_unblocks_full_writer() {
        let (writer, _reader) = pipe(&small());
        let writer = Arc::new(writer);
        writer.write(Bytes::from_static(b"fill")).await;

        let waiting = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.write(Bytes::from_static(b"stuck")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.cancel_pending_flush();

        assert_eq!(waiting.await.unwrap(), FlushResult::Cancelled);
    }

    #[tokio::test]
    async fn test_read_batch_concatenates_queued_chunks() {
        let (writer, reader) = pipe(&PipeOptions::default());
        writer.write(Bytes::from_static(b"ab")).await;
        writer.write(Bytes::from_static(b"cd")).await;

        let token = CancellationToken::new();
        assert_eq!(
            reader.read_batch(&token).await,
            ReadResult::Data(Bytes::from_static(b"abcd"))
        );
    }

    #[tokio::test]
    async fn test_connection_pair_is_cross_wired() {
        let (transport, application) = DuplexPipe::create_connection_pair(&PipeOptions::default());

        transport.output().write(Bytes::from_static(b"from client")).await;
        application.output().write(Bytes::from_static(b"to client")).await;

        assert_eq!(
            application.input().read().await,
            ReadResult::Data(Bytes::from_static(b"from client"))
        );
        assert_eq!(
            transport.input().read().await,
            ReadResult::Data(Bytes::from_static(b"to client"))
        );
    }
}
