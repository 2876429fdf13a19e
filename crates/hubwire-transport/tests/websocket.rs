//! Integration tests for the WebSocket transport.
//!
//! These tests run the transport against a real `tokio-tungstenite` client
//! over a loopback TCP connection, with the application side of the pipe
//! pair driven directly from the test.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use hubwire_transport::{
        DuplexPipe, HttpTransport, PipeOptions, ReadResult, SharedTransferFormat, SocketOutcome,
        TransferFormat, WebSocketOptions, WebSocketsTransport,
    };
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
    use tokio_util::sync::CancellationToken;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;
    type Outcome = Result<SocketOutcome, hubwire_transport::TransportError>;

    /// Connects a client to a freshly bound server and starts the transport
    /// on the server side.
    async fn start(
        format: TransferFormat,
        close_timeout_ms: u64,
        cancel: CancellationToken,
    ) -> (Client, DuplexPipe, JoinHandle<Outcome>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let socket = server.await.unwrap();

        let (transport_side, application) =
            DuplexPipe::create_connection_pair(&PipeOptions::default());
        let transport = WebSocketsTransport::new(
            socket,
            transport_side,
            SharedTransferFormat::new(format),
            WebSocketOptions { close_timeout_ms },
        );
        let handle = tokio::spawn(transport.process_request(cancel));
        (client, application, handle)
    }

    /// Drives the client until the server's close frame has been answered.
    async fn drain(client: &mut Client) -> Vec<Message> {
        let mut seen = Vec::new();
        while let Some(Ok(message)) = client.next().await {
            seen.push(message);
        }
        seen
    }

    #[tokio::test]
    async fn test_process_request_relays_both_directions() {
        let (mut client, application, handle) =
            start(TransferFormat::Text, 1_000, CancellationToken::new()).await;

        client.send(Message::text("from client")).await.unwrap();
        assert_eq!(
            application.input().read().await,
            ReadResult::Data(Bytes::from_static(b"from client"))
        );

        application
            .output()
            .write(Bytes::from_static(b"from server"))
            .await;
        let received = client.next().await.unwrap().unwrap();
        assert_eq!(received, Message::text("from server"));

        application.output().complete();
        let rest = drain(&mut client).await;
        assert!(matches!(rest.last(), Some(Message::Close(_))));

        assert_eq!(handle.await.unwrap().unwrap(), SocketOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_process_request_binary_format_sends_binary_messages() {
        let (mut client, application, handle) =
            start(TransferFormat::Binary, 1_000, CancellationToken::new()).await;

        application
            .output()
            .write(Bytes::from_static(&[0x01, 0xFF]))
            .await;
        let received = client.next().await.unwrap().unwrap();
        assert_eq!(received, Message::Binary(Bytes::from_static(&[0x01, 0xFF])));

        application.output().complete();
        drain(&mut client).await;
        assert_eq!(handle.await.unwrap().unwrap(), SocketOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_process_request_client_close_completes_application_input() {
        let (mut client, application, handle) =
            start(TransferFormat::Text, 1_000, CancellationToken::new()).await;

        client.send(Message::Close(None)).await.unwrap();
        drain(&mut client).await;

        assert_eq!(application.input().read().await, ReadResult::Completed);
        assert_eq!(handle.await.unwrap().unwrap(), SocketOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_process_request_cancel_closes_socket() {
        let cancel = CancellationToken::new();
        let (mut client, _application, handle) =
            start(TransferFormat::Text, 1_000, cancel.clone()).await;

        cancel.cancel();
        let rest = drain(&mut client).await;
        assert!(matches!(rest.last(), Some(Message::Close(_))));
        assert_eq!(handle.await.unwrap().unwrap(), SocketOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_process_request_unacknowledged_close_returns_aborted() {
        let (client, application, handle) =
            start(TransferFormat::Text, 50, CancellationToken::new()).await;

        // The client stays connected but never reads, so the close frame is
        // never answered.
        application.output().complete();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("transport should give up after the close timeout")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SocketOutcome::Aborted);

        drop(client);
    }
}
