//! End-to-end tests over real WebSocket connections.

use futures_util::{SinkExt, StreamExt};
use presence_core::{serve, Hub};
use presence_protocol::{codec, ClientId, ServerMessage};
use presence_transport::WebSocketTransport;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start() -> (Arc<Hub>, String) {
    let hub = Arc::new(Hub::new());
    let transport = WebSocketTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let url = format!("ws://{}", transport.local_addr().unwrap());

    let server_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        serve(server_hub, &transport).await.unwrap();
    });

    (hub, url)
}

async fn next(ws: &mut Client) -> ServerMessage {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return codec::decode(&text).unwrap();
        }
    }
}

async fn connect(url: &str, name: &str) -> (Client, ClientId) {
    let (mut ws, _) = connect_async(url).await.unwrap();
    ws.send(Message::Text(
        json!({ "user_data": { "name": name } }).to_string(),
    ))
    .await
    .unwrap();

    match next(&mut ws).await {
        ServerMessage::ConnectionInfo { client_id, .. } => (ws, client_id),
        other => panic!("Expected connection_info, got {:?}", other),
    }
}

#[tokio::test]
async fn test_presence_over_websocket() {
    let (hub, url) = start().await;

    let (mut alice, alice_id) = connect(&url, "alice").await;
    let (mut bob, bob_id) = connect(&url, "bob").await;
    assert_eq!((alice_id.get(), bob_id.get()), (1, 2));

    assert!(matches!(
        next(&mut bob).await,
        ServerMessage::ExistingUser { client_id, .. } if client_id == alice_id
    ));
    assert!(matches!(
        next(&mut alice).await,
        ServerMessage::UserConnected { client_id, .. } if client_id == bob_id
    ));

    alice.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next(&mut alice).await, ServerMessage::relay("hello"));
    assert_eq!(next(&mut bob).await, ServerMessage::relay("hello"));

    bob.close(None).await.unwrap();
    assert_eq!(
        next(&mut alice).await,
        ServerMessage::user_disconnected(bob_id)
    );
    assert_eq!(hub.len(), 1);

    let (_carol, carol_id) = connect(&url, "carol").await;
    assert_eq!(carol_id, bob_id);
}

#[tokio::test]
async fn test_malformed_admission_over_websocket() {
    let (hub, url) = start().await;

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    ws.send(Message::Text("not an admission".into()))
        .await
        .unwrap();

    // The server closes without ever sending connection_info
    let end = timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => panic!("unexpected message: {text}"),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());
    assert_eq!(hub.stats().high_water, 0);
}
