//! Integration tests for the WebSocket transport.
//!
//! A real listener on an OS-assigned port and a real `tokio-tungstenite`
//! client, so frames actually cross the loopback interface.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use rollcall_transport::{Connection, Transport, TransportError, WebSocketTransport};
    use tokio_tungstenite::tungstenite::Message;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds on port 0, connects one client, returns both ends.
    async fn pair() -> (rollcall_transport::WebSocketConnection, Client) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");

        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        (server.await.expect("accept task"), client)
    }

    #[tokio::test]
    async fn test_local_addr_reports_assigned_port() {
        let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_unresolvable_address_returns_bind_failed() {
        let result = WebSocketTransport::bind("definitely.not.a.host.invalid:1").await;
        assert!(matches!(result, Err(TransportError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn test_send_utf8_arrives_as_text_frame() {
        let (server, mut client) = pair().await;
        assert!(server.id().into_inner() > 0);
        assert!(server.peer_addr().is_some());

        server.send(br#"{"type":"ListActive"}"#).await.unwrap();

        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_text());
        assert_eq!(msg.into_text().unwrap().as_str(), r#"{"type":"ListActive"}"#);
    }

    #[tokio::test]
    async fn test_send_non_utf8_arrives_as_binary_frame() {
        let (server, mut client) = pair().await;

        server.send(&[0xff, 0x00, 0xfe]).await.unwrap();

        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_binary());
        assert_eq!(msg.into_data().as_ref(), &[0xff, 0x00, 0xfe]);
    }

    #[tokio::test]
    async fn test_recv_accepts_text_and_binary() {
        let (server, mut client) = pair().await;

        client.send(Message::Text("scan".into())).await.unwrap();
        client
            .send(Message::Binary(b"raw".to_vec().into()))
            .await
            .unwrap();

        assert_eq!(server.recv().await.unwrap().unwrap(), b"scan");
        assert_eq!(server.recv().await.unwrap().unwrap(), b"raw");
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_client_close() {
        let (server, mut client) = pair().await;

        client.send(Message::Close(None)).await.unwrap();

        let result = server.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_send_is_not_blocked_by_pending_recv() {
        let (server, mut client) = pair().await;
        let server = Arc::new(server);

        let reader = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.recv().await })
        };
        // Give the reader time to park inside recv.
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), server.send(b"pushed"))
            .await
            .expect("send must not wait for recv")
            .unwrap();
        let pushed = client.next().await.unwrap().unwrap();
        assert_eq!(pushed.into_data().as_ref(), b"pushed");

        client.send(Message::Text("reply".into())).await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap().unwrap(), b"reply");
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (server, mut client) = pair().await;

        server.close().await.unwrap();

        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_close());
    }
}
