//! The HTTP endpoint operations.
//!
//! Each public method serves one endpoint and returns a finished
//! response; [`crate::routes`] only wires them to paths. Connection
//! lookups, transport attachment and status codes all live here:
//!
//! ```text
//! negotiate ──→ registry entry ──→ connect?transport=…
//!                                     │
//!          ┌──────────────────────────┼──────────────────────────┐
//!          ▼                          ▼                          ▼
//!    WebSockets (101)          Server-Sent Events          long polling
//!    task runs socket          task writes events          one read per
//!    → dispose on end          → dispose on end            request
//! ```

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use hubwire_registry::{ConnectionContext, ConnectionManager, RegistryError};
use hubwire_transport::{
    ConnectionId, EVENT_STREAM_HEADERS, FlushResult, HttpTransport, LongPollingTransport,
    PollOutcome, ServerSentEventsTransport, SocketOutcome, TransportKind, WebSocketsTransport,
};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::create_response;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_util::io::ReaderStream;

use crate::{ConnectionHandler, HttpConnectionOptions};

/// Size of the in-memory buffer between the event-stream transport and
/// the response body.
const EVENT_STREAM_BUFFER: usize = 16 * 1024;

/// Item key under which the `connectionData` query value is stored.
pub const CONNECTION_DATA_ITEM: &str = "connectionData";

/// Query parameters the endpoints understand. Everything is optional; each
/// endpoint checks for what it needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionQuery {
    pub connection_token: Option<String>,
    pub transport: Option<String>,
    pub connection_data: Option<String>,
    pub client_protocol: Option<String>,
}

/// Serves the endpoints for one mounted hub.
pub struct HttpDispatcher<H> {
    manager: Arc<ConnectionManager>,
    handler: Arc<H>,
    options: HttpConnectionOptions,
}

impl<H: ConnectionHandler> HttpDispatcher<H> {
    pub fn new(
        manager: Arc<ConnectionManager>,
        handler: Arc<H>,
        options: HttpConnectionOptions,
    ) -> Self {
        Self {
            manager,
            handler,
            options,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn options(&self) -> &HttpConnectionOptions {
        &self.options
    }

    // -----------------------------------------------------------------------
    // negotiate / abort / send
    // -----------------------------------------------------------------------

    /// Creates a connection and describes it to the client.
    pub fn negotiate(&self, query: &ConnectionQuery) -> Response {
        let context = self.manager.create_connection();
        let id = context.id().as_str();
        let options = &self.options;

        let payload = serde_json::json!({
            "ConnectionToken": id,
            "ConnectionId": id,
            "KeepAliveTimeout": options.keep_alive_timeout_secs,
            "DisconnectTimeout": options.disconnect_timeout_secs,
            "TryWebSockets": options.transports.web_sockets,
            "ProtocolVersion": query.client_protocol,
            "TransportConnectTimeout": options.transport_connect_timeout_secs,
            "LongPollDelay": options.long_poll_delay_secs,
        });
        context.mark_negotiated();

        (
            [(header::CONTENT_TYPE, "application/json")],
            payload.to_string(),
        )
            .into_response()
    }

    /// Cancels the connection. The transport notices and shuts down.
    pub fn abort(&self, query: &ConnectionQuery) -> Response {
        let context = match self.lookup(query) {
            Ok(context) => context,
            Err(response) => return response,
        };
        tracing::info!(connection_id = %context.id(), "connection aborted by client");
        context.cancellation().cancel();
        StatusCode::OK.into_response()
    }

    /// Feeds the form field `data` into the connection's inbound pipe.
    ///
    /// The body is parsed as a form regardless of its content type, since
    /// some clients leave it out.
    pub async fn send(&self, query: &ConnectionQuery, body: Bytes) -> Response {
        let context = match self.lookup(query) {
            Ok(context) => context,
            Err(response) => return response,
        };

        if context.transport_kind() == Some(TransportKind::WebSockets) {
            return text(
                StatusCode::METHOD_NOT_ALLOWED,
                "POST requests are not allowed for WebSocket connections.",
            );
        }

        let data = url::form_urlencoded::parse(&body)
            .find(|(key, _)| key == "data")
            .map(|(_, value)| value.into_owned());
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return text(StatusCode::OK, "");
        };

        tracing::debug!(connection_id = %context.id(), len = data.len(), "received send payload");
        let write = context.transport().output().write(data.into_bytes());
        let flushed = tokio::select! {
            () = context.cancellation().cancelled() => FlushResult::Cancelled,
            flushed = tokio::time::timeout(self.options.send_timeout(), write) => match flushed {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(connection_id = %context.id(), "send timed out on a full pipe");
                    return text(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Connection is not accepting data.",
                    );
                }
            },
        };
        match flushed {
            FlushResult::Flushed => {}
            FlushResult::Cancelled | FlushResult::Completed => {
                tracing::debug!(connection_id = %context.id(), "send after application finished");
            }
        }
        text(StatusCode::OK, "")
    }

    // -----------------------------------------------------------------------
    // connect
    // -----------------------------------------------------------------------

    /// Attaches the transport named by the `transport` query parameter.
    pub async fn connect(&self, query: &ConnectionQuery, request: Request) -> Response {
        let Some(kind) = query.transport.as_deref().and_then(TransportKind::from_query) else {
            tracing::debug!(transport = ?query.transport, "ignoring unsupported transport");
            return StatusCode::OK.into_response();
        };

        if !self.options.transports.allows(kind) {
            return text(
                StatusCode::NOT_FOUND,
                &format!("{kind} transport not supported by this end point type"),
            );
        }

        let context = match self.lookup(query) {
            Ok(context) => context,
            Err(response) => return response,
        };

        match kind {
            TransportKind::WebSockets => self.connect_web_sockets(context, query, request),
            TransportKind::ServerSentEvents => self.connect_event_stream(context, query),
            TransportKind::LongPolling => self.poll(context, query).await,
        }
    }

    fn connect_web_sockets(
        &self,
        context: Arc<ConnectionContext>,
        query: &ConnectionQuery,
        mut request: Request,
    ) -> Response {
        let Some(switching) = websocket_handshake(&request) else {
            return text(StatusCode::BAD_REQUEST, "Not a WebSocket request.");
        };
        let Some(on_upgrade) = request.extensions_mut().remove::<hyper::upgrade::OnUpgrade>() else {
            return text(StatusCode::BAD_REQUEST, "Not a WebSocket request.");
        };

        let lease = match context.try_attach(TransportKind::WebSockets) {
            Ok(lease) => lease,
            Err(e) => return registry_response(&e),
        };
        self.on_attached(&context, query);

        let manager = Arc::clone(&self.manager);
        let options = self.options.web_sockets.clone();
        tokio::spawn(async move {
            let connection_id = context.id().clone();
            match on_upgrade.await {
                Ok(upgraded) => {
                    let socket =
                        WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                            .await;
                    let transport = WebSocketsTransport::new(
                        socket,
                        context.transport().clone(),
                        context.transfer_format().clone(),
                        options,
                    );
                    match transport.process_request(context.cancellation().clone()).await {
                        Ok(SocketOutcome::Graceful) => {
                            tracing::debug!(%connection_id, "websocket closed");
                        }
                        Ok(SocketOutcome::Aborted) => {
                            tracing::info!(
                                %connection_id,
                                "websocket close timed out, socket aborted"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                %connection_id,
                                error = %e,
                                "websocket transport failed"
                            );
                        }
                    }
                }
                Err(e) => tracing::error!(%connection_id, error = %e, "websocket upgrade failed"),
            }
            drop(lease);
            manager.dispose(&connection_id);
        });

        switching
    }

    fn connect_event_stream(
        &self,
        context: Arc<ConnectionContext>,
        query: &ConnectionQuery,
    ) -> Response {
        let lease = match context.try_attach(TransportKind::ServerSentEvents) {
            Ok(lease) => lease,
            Err(e) => return registry_response(&e),
        };
        self.on_attached(&context, query);

        // Cancelled when the response body is dropped, i.e. when the
        // client goes away.
        let request_cancel = context.cancellation().child_token();
        let body_guard = request_cancel.clone().drop_guard();

        let (writer, reader) = tokio::io::duplex(EVENT_STREAM_BUFFER);
        let transport =
            ServerSentEventsTransport::new(writer, Arc::clone(context.transport().input()));
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            let connection_id = context.id().clone();
            if let Err(e) = transport.process_request(request_cancel).await {
                tracing::debug!(%connection_id, error = %e, "event stream ended");
            }
            drop(lease);
            manager.dispose(&connection_id);
        });

        let stream = ReaderStream::new(reader).map(move |chunk| {
            let _alive = &body_guard;
            chunk
        });
        let mut response = Response::new(Body::from_stream(stream));
        for (name, value) in EVENT_STREAM_HEADERS {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        response
    }

    async fn poll(&self, context: Arc<ConnectionContext>, query: &ConnectionQuery) -> Response {
        let (lease, poll) = match context.attach_poll().await {
            Ok(attached) => attached,
            // Replaced by a newer poll before this one got the slot.
            Err(RegistryError::AlreadyAttached(_)) => return text(StatusCode::OK, ""),
            Err(e) => return registry_response(&e),
        };
        self.on_attached(&context, query);

        let transport = LongPollingTransport::new(
            Arc::clone(context.transport().input()),
            poll,
            &self.options.long_polling,
        );
        let outcome = transport.process_request(context.cancellation().clone()).await;
        drop(lease);

        match outcome {
            Ok(PollOutcome::Data(data)) => {
                ([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response()
            }
            Ok(PollOutcome::TimedOut | PollOutcome::Superseded) => text(StatusCode::OK, ""),
            Ok(PollOutcome::Completed) => {
                self.manager.dispose(context.id());
                StatusCode::NO_CONTENT.into_response()
            }
            Err(e) => {
                tracing::error!(
                    connection_id = %context.id(),
                    error = %e,
                    "long polling transport failed"
                );
                self.manager.dispose(context.id());
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lookup(&self, query: &ConnectionQuery) -> Result<Arc<ConnectionContext>, Response> {
        let Some(token) = query.connection_token.as_deref() else {
            return Err(text(StatusCode::BAD_REQUEST, "Connection ID required"));
        };
        self.manager
            .get(&ConnectionId::new(token))
            .map_err(|e| registry_response(&e))
    }

    /// Bookkeeping shared by every successful attach: remember the
    /// connection data and start the application the first time.
    fn on_attached(&self, context: &Arc<ConnectionContext>, query: &ConnectionQuery) {
        if let Some(data) = &query.connection_data {
            context.set_item(CONNECTION_DATA_ITEM, data.as_str());
        }

        if !context.start_application() {
            return;
        }
        tracing::info!(connection_id = %context.id(), "starting application");
        let handler = Arc::clone(&self.handler);
        let context = Arc::clone(context);
        tokio::spawn(async move {
            handler.on_connected(Arc::clone(&context)).await;
            context.application().output().complete();
            tracing::debug!(connection_id = %context.id(), "application completed");
        });
    }
}

// ---------------------------------------------------------------------------
// Legacy no-op endpoints
// ---------------------------------------------------------------------------

pub async fn ping() -> Response {
    text(StatusCode::OK, "{\"Response\":\"pong\"}")
}

pub async fn start() -> Response {
    text(StatusCode::OK, "{\"Response\":\"started\"}")
}

pub async fn reconnect() -> Response {
    StatusCode::OK.into_response()
}

fn text(status: StatusCode, body: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        body.to_string(),
    )
        .into_response()
}

fn registry_response(error: &RegistryError) -> Response {
    let status = match error {
        RegistryError::NotFound(_) | RegistryError::Closed(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyAttached(_) | RegistryError::TransportMismatch { .. } => {
            StatusCode::CONFLICT
        }
    };
    tracing::debug!(error = %error, status = status.as_u16(), "connection request rejected");
    text(status, &error.to_string())
}

/// Runs tungstenite's server handshake checks against the request's head
/// and returns the `101 Switching Protocols` response it builds.
fn websocket_handshake(request: &Request) -> Option<Response> {
    let mut head = axum::http::Request::new(());
    *head.method_mut() = request.method().clone();
    *head.uri_mut() = request.uri().clone();
    *head.version_mut() = request.version();
    *head.headers_mut() = request.headers().clone();

    match create_response(&head) {
        Ok(response) => {
            let (parts, ()) = response.into_parts();
            Some(Response::from_parts(parts, Body::empty()))
        }
        Err(e) => {
            tracing::debug!(error = %e, "websocket handshake rejected");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request() -> Request {
        Request::builder()
            .method("GET")
            .uri("/signalr/connect?transport=webSockets&connectionToken=t")
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "keep-alive, Upgrade")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_websocket_handshake_valid_request_switches_protocols() {
        let response = websocket_handshake(&upgrade_request()).unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            response.headers()[header::SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_websocket_handshake_missing_upgrade_is_none() {
        let mut request = upgrade_request();
        request.headers_mut().remove(header::UPGRADE);
        assert!(websocket_handshake(&request).is_none());
    }

    #[test]
    fn test_websocket_handshake_wrong_version_is_none() {
        let mut request = upgrade_request();
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        assert!(websocket_handshake(&request).is_none());
    }

    #[test]
    fn test_websocket_handshake_connect_method_is_none() {
        let mut request = upgrade_request();
        *request.method_mut() = axum::http::Method::CONNECT;
        assert!(websocket_handshake(&request).is_none());
    }

    #[test]
    fn test_registry_response_maps_status_codes() {
        let id = ConnectionId::new("c");
        assert_eq!(
            registry_response(&RegistryError::NotFound(id.clone())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            registry_response(&RegistryError::AlreadyAttached(id.clone())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            registry_response(&RegistryError::TransportMismatch {
                id,
                active: TransportKind::WebSockets,
                requested: TransportKind::LongPolling,
            })
            .status(),
            StatusCode::CONFLICT
        );
    }
}
