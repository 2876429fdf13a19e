/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Sending data to the client failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Writing the HTTP response body failed.
    #[error("response write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// The WebSocket protocol reported an error.
    #[cfg(feature = "websocket")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
