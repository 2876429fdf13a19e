//! Long-polling transport.
//!
//! Unlike the other transports this one has no loop: every poll request
//! performs exactly one bounded read from the pipe and then returns. The
//! hosting layer turns the [`PollOutcome`] into a status code.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::pipe::{PipeReader, ReadResult};
use crate::{HttpTransport, TransportError, TransportKind};

/// Tunables for long polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LongPollingOptions {
    /// How long a poll waits for data before answering empty, in seconds.
    pub poll_timeout_secs: u64,
}

impl LongPollingOptions {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

impl Default for LongPollingOptions {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 90,
        }
    }
}

/// What a single poll produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Everything that was queued when the poll woke up.
    Data(Bytes),
    /// Nothing arrived within the poll timeout; the client should poll again.
    TimedOut,
    /// A newer poll for the same connection took over, or the client went
    /// away. The connection is unaffected.
    Superseded,
    /// The application finished or the connection was cancelled; the
    /// logical connection is over.
    Completed,
}

/// Serves one poll request.
pub struct LongPollingTransport {
    app: Arc<PipeReader>,
    poll: CancellationToken,
    timeout: Duration,
}

impl LongPollingTransport {
    /// Creates a transport for a single request.
    ///
    /// `poll` is cancelled when this request is superseded by a newer one
    /// or when the client disconnects.
    pub fn new(
        app: Arc<PipeReader>,
        poll: CancellationToken,
        options: &LongPollingOptions,
    ) -> Self {
        Self {
            app,
            poll,
            timeout: options.poll_timeout(),
        }
    }

    async fn run(self, cancel: CancellationToken) -> Result<PollOutcome, TransportError> {
        let outcome = tokio::select! {
            biased;
            _ = self.poll.cancelled() => PollOutcome::Superseded,
            result = self.app.read_batch(&cancel) => match result {
                ReadResult::Data(data) => PollOutcome::Data(data),
                ReadResult::Cancelled | ReadResult::Completed => PollOutcome::Completed,
            },
            _ = tokio::time::sleep(self.timeout) => PollOutcome::TimedOut,
        };

        match &outcome {
            PollOutcome::Data(data) => tracing::debug!(len = data.len(), "writing poll response"),
            PollOutcome::TimedOut => tracing::info!("poll request timed out"),
            PollOutcome::Superseded => tracing::debug!("poll request superseded or disconnected"),
            PollOutcome::Completed => tracing::info!("terminating long polling connection"),
        }
        Ok(outcome)
    }
}

impl HttpTransport for LongPollingTransport {
    type Outcome = PollOutcome;

    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    fn process_request(
        self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<PollOutcome, TransportError>> + Send {
        self.run(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{PipeOptions, pipe};

    fn options(secs: u64) -> LongPollingOptions {
        LongPollingOptions {
            poll_timeout_secs: secs,
        }
    }

    #[tokio::test]
    async fn test_process_request_queued_data_returns_batch() {
        let (writer, reader) = pipe(&PipeOptions::default());
        writer.write(Bytes::from_static(b"a")).await;
        writer.write(Bytes::from_static(b"b")).await;

        let transport =
            LongPollingTransport::new(Arc::new(reader), CancellationToken::new(), &options(1));
        let outcome = transport.process_request(CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Data(Bytes::from_static(b"ab")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_request_idle_returns_timed_out() {
        let (_writer, reader) = pipe(&PipeOptions::default());
        let transport =
            LongPollingTransport::new(Arc::new(reader), CancellationToken::new(), &options(5));
        let outcome = transport.process_request(CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_process_request_completed_pipe_returns_completed() {
        let (writer, reader) = pipe(&PipeOptions::default());
        writer.complete();
        let transport =
            LongPollingTransport::new(Arc::new(reader), CancellationToken::new(), &options(5));
        let outcome = transport.process_request(CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Completed);
    }

    #[tokio::test]
    async fn test_process_request_connection_cancelled_returns_completed() {
        let (_writer, reader) = pipe(&PipeOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let transport =
            LongPollingTransport::new(Arc::new(reader), CancellationToken::new(), &options(5));
        assert_eq!(
            transport.process_request(cancel).await.unwrap(),
            PollOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_process_request_poll_cancelled_returns_superseded() {
        let (_writer, reader) = pipe(&PipeOptions::default());
        let poll = CancellationToken::new();
        let transport = LongPollingTransport::new(Arc::new(reader), poll.clone(), &options(5));

        let handle = tokio::spawn(transport.process_request(CancellationToken::new()));
        poll.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), PollOutcome::Superseded);
    }

    #[test]
    fn test_long_polling_options_deserialize_partial_uses_defaults() {
        let options: LongPollingOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.poll_timeout(), Duration::from_secs(90));
    }
}
