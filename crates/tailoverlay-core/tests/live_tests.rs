//! Integration tests for the live stream and the host lifecycle, against a
//! real listener.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::MockConnectInfo;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{upload_request, TestWorkspace, CODE, GUEST, LOCAL};
use tailoverlay_core::web::{HostOptions, WorkspaceHost};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn loopback_options() -> HostOptions {
    HostOptions {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        sweep_interval: Duration::from_millis(50),
        max_upload_size: common::MAX_UPLOAD,
    }
}

async fn next_json(socket: &mut Socket) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for an event")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn next_close(socket: &mut Socket) -> Option<CloseCode> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

#[tokio::test]
async fn test_host_stream_follows_workspace_activity() {
    let ws = TestWorkspace::new();
    let host = WorkspaceHost::start(Arc::clone(&ws.session), loopback_options())
        .await
        .unwrap();

    let (mut socket, _) = connect_async(format!("ws://{}/ws", host.local_addr()))
        .await
        .unwrap();

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "presence");
    assert_eq!(event["data"]["status"], "joined");
    assert_eq!(event["data"]["identity"]["deviceName"], "host-a");

    let reply = ws.session.request_join(GUEST, CODE).await.unwrap();
    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "join:request");
    assert_eq!(event["data"]["identity"]["deviceName"], "dev-b");
    if let tailoverlay_core::session::JoinReply::Pending { request_id } = reply {
        ws.session.approve(LOCAL, request_id).await.unwrap();
    }

    let (status, body) = ws
        .call_json(
            GUEST,
            upload_request(Some(("notes.txt", "text/plain", b"0123456789")), &[]),
        )
        .await;
    assert_eq!(status, axum::http::StatusCode::OK);
    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "post:new");
    assert_eq!(event["data"]["id"], body["post"]["id"]);

    // Unknown frames are dropped without side effects.
    socket
        .send(Message::Text(r#"{"type":"post:new","data":{}}"#.into()))
        .await
        .unwrap();
    socket
        .send(Message::Text(r#"{"type":"chat","text":"hi there"}"#.into()))
        .await
        .unwrap();
    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "chat");
    assert_eq!(event["data"]["text"], "hi there");
    assert_eq!(event["data"]["senderIdentity"]["deviceName"], "host-a");
    assert_eq!(ws.session.messages(LOCAL).await.unwrap().len(), 1);

    host.stop().await;
    assert_eq!(next_close(&mut socket).await, Some(CloseCode::Away));
    assert!(!host.is_running().await);
}

#[tokio::test]
async fn test_stop_is_idempotent_and_releases_port() {
    let ws = TestWorkspace::new();
    let host = WorkspaceHost::start(Arc::clone(&ws.session), loopback_options())
        .await
        .unwrap();
    let addr = host.local_addr();
    assert_ne!(addr.port(), 0);
    assert!(host.is_running().await);

    host.stop().await;
    host.stop().await;

    assert!(TcpListener::bind(addr).await.is_ok());
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let ws = TestWorkspace::new();
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = HostOptions {
        bind: taken.local_addr().unwrap(),
        ..loopback_options()
    };

    let result = WorkspaceHost::start(Arc::clone(&ws.session), options).await;
    assert!(matches!(
        result,
        Err(tailoverlay_core::Error::BindFailed { .. })
    ));
}

#[tokio::test]
async fn test_non_member_stream_is_closed_with_policy_violation() {
    let ws = TestWorkspace::new();

    // Serve the router so every connection appears to come from the guest.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = ws
        .router()
        .layer(MockConnectInfo(SocketAddr::new(GUEST, 40_000)));
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(next_close(&mut socket).await, Some(CloseCode::Policy));

    // Traffic while refused never reaches the guest.
    ws.session.post_chat(LOCAL, "members only").await.unwrap();
    assert_eq!(ws.session.subscriber_count().await, 0);

    // Once admitted, the same peer gets the stream.
    ws.admit(GUEST).await;
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "presence");
    assert_eq!(event["data"]["identity"]["deviceName"], "dev-b");

    server.abort();
}
