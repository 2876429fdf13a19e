//! Server configuration.
//!
//! Every struct here deserializes from a partial document: missing fields
//! fall back to their defaults, so a config file only needs to name what
//! it changes.

use std::time::Duration;

use hubwire_transport::{LongPollingOptions, PipeOptions, TransportKind, WebSocketOptions};
use serde::Deserialize;

/// Which transports clients may connect with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnabledTransports {
    pub web_sockets: bool,
    pub server_sent_events: bool,
    pub long_polling: bool,
}

impl EnabledTransports {
    pub fn allows(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::WebSockets => self.web_sockets,
            TransportKind::ServerSentEvents => self.server_sent_events,
            TransportKind::LongPolling => self.long_polling,
        }
    }
}

impl Default for EnabledTransports {
    fn default() -> Self {
        Self {
            web_sockets: true,
            server_sent_events: true,
            long_polling: true,
        }
    }
}

/// Options for the HTTP endpoints and the connections they create.
///
/// The four values advertised by `/negotiate` (keep-alive, disconnect,
/// transport-connect and long-poll delay) are plain seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConnectionOptions {
    /// Prefix every endpoint is mounted under.
    pub path: String,
    pub transports: EnabledTransports,
    pub keep_alive_timeout_secs: u64,
    /// How long a connection may go without an attached transport before
    /// the background scan disposes it.
    pub disconnect_timeout_secs: u64,
    pub transport_connect_timeout_secs: u64,
    pub long_poll_delay_secs: u64,
    /// How often the background scan runs, in milliseconds.
    pub scan_interval_ms: u64,
    /// How long a new connection has to send its protocol handshake.
    pub handshake_timeout_secs: u64,
    /// Chunks each direction of a connection's pipe can hold before
    /// writers wait.
    pub pipe_capacity: usize,
    /// How long `/send` waits for room in a full pipe before answering 503.
    pub send_timeout_secs: u64,
    pub web_sockets: WebSocketOptions,
    pub long_polling: LongPollingOptions,
}

impl HttpConnectionOptions {
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    /// Clamped to at least one millisecond.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn pipe_options(&self) -> PipeOptions {
        PipeOptions {
            capacity: self.pipe_capacity,
        }
    }
}

impl Default for HttpConnectionOptions {
    fn default() -> Self {
        Self {
            path: "/signalr".to_string(),
            transports: EnabledTransports::default(),
            keep_alive_timeout_secs: 100_000,
            disconnect_timeout_secs: 5,
            transport_connect_timeout_secs: 30,
            long_poll_delay_secs: 0,
            scan_interval_ms: 1_000,
            handshake_timeout_secs: 5,
            pipe_capacity: PipeOptions::default().capacity,
            send_timeout_secs: 5,
            web_sockets: WebSocketOptions::default(),
            long_polling: LongPollingOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_connection_options_defaults() {
        let options = HttpConnectionOptions::default();
        assert_eq!(options.path, "/signalr");
        assert_eq!(options.disconnect_timeout(), Duration::from_secs(5));
        assert_eq!(options.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(options.send_timeout(), Duration::from_secs(5));
        assert!(options.transports.allows(TransportKind::WebSockets));
    }

    #[test]
    fn test_http_connection_options_deserialize_partial_keeps_defaults() {
        let options: HttpConnectionOptions = serde_json::from_str(
            r#"{"path": "/hub", "transports": {"web_sockets": false}, "web_sockets": {"close_timeout_ms": 250}}"#,
        )
        .unwrap();

        assert_eq!(options.path, "/hub");
        assert!(!options.transports.allows(TransportKind::WebSockets));
        assert!(options.transports.allows(TransportKind::LongPolling));
        assert_eq!(options.web_sockets.close_timeout(), Duration::from_millis(250));
        assert_eq!(options.long_polling.poll_timeout(), Duration::from_secs(90));
    }
}
