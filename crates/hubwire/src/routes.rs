//! Mounts the endpoint operations on an `axum` router.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;

use crate::dispatcher::{self, ConnectionQuery, HttpDispatcher};
use crate::ConnectionHandler;

type Dispatcher<H> = State<Arc<HttpDispatcher<H>>>;

/// Builds the router for one hub, nested under the configured path.
///
/// | Path          | Method       | Operation                |
/// |---------------|--------------|--------------------------|
/// | `/negotiate`  | GET          | create a connection      |
/// | `/connect`    | GET, CONNECT | attach a transport       |
/// | `/send`       | POST         | client → server data (SSE/LP) |
/// | `/abort`      | POST         | cancel the connection    |
/// | `/ping`       | GET          | liveness                 |
/// | `/start`      | POST         | legacy no-op             |
/// | `/reconnect`  | POST         | legacy no-op             |
pub fn router<H: ConnectionHandler>(endpoints: Arc<HttpDispatcher<H>>) -> Router {
    let prefix = endpoints.options().path.trim_end_matches('/').to_string();

    let routes = Router::new()
        .route("/negotiate", get(negotiate::<H>))
        // axum 0.7 has no CONNECT filter; the fallback sees every other method.
        .route("/connect", get(connect::<H>).fallback(connect_other::<H>))
        .route("/send", post(send::<H>))
        .route("/abort", post(abort::<H>))
        .route("/ping", get(dispatcher::ping))
        .route("/start", post(dispatcher::start))
        .route("/reconnect", post(dispatcher::reconnect))
        .with_state(endpoints);

    if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    }
}

async fn negotiate<H: ConnectionHandler>(
    State(dispatcher): Dispatcher<H>,
    Query(query): Query<ConnectionQuery>,
) -> Response {
    dispatcher.negotiate(&query)
}

async fn connect<H: ConnectionHandler>(
    State(dispatcher): Dispatcher<H>,
    Query(query): Query<ConnectionQuery>,
    request: Request,
) -> Response {
    dispatcher.connect(&query, request).await
}

async fn connect_other<H: ConnectionHandler>(
    state: Dispatcher<H>,
    query: Query<ConnectionQuery>,
    request: Request,
) -> Response {
    if request.method() != Method::CONNECT {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    connect(state, query, request).await
}

async fn send<H: ConnectionHandler>(
    State(dispatcher): Dispatcher<H>,
    Query(query): Query<ConnectionQuery>,
    body: Bytes,
) -> Response {
    dispatcher.send(&query, body).await
}

async fn abort<H: ConnectionHandler>(
    State(dispatcher): Dispatcher<H>,
    Query(query): Query<ConnectionQuery>,
) -> Response {
    dispatcher.abort(&query)
}
