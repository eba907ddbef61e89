//! Integration tests for subscription routing, teardown, and reconnect.
//!
//! Each test runs an in-process graphql-transport-ws server on a loopback
//! listener and drives the client against it.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use hasura_link::{
    Client, ClientError, ConnectionKind, GraphQLRequest, ReconnectConfig, SubscriptionMessage,
};

type ServerWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    (listener, url)
}

/// Accept one connection and complete the graphql-transport-ws handshake.
/// Returns the socket and the client's `connection_init` frame.
async fn accept_and_ack(listener: &TcpListener) -> (ServerWs, serde_json::Value) {
    let (stream, _) = listener.accept().await.expect("accept");
    let mut ws = accept_async(stream).await.expect("websocket accept");
    let init = next_frame(&mut ws).await.expect("init frame");
    assert_eq!(init["type"], "connection_init");
    send_frame(&mut ws, &json!({"type": "connection_ack"})).await;
    (ws, init)
}

/// Read the next protocol frame, answering transport pings along the way.
/// Returns `None` once the connection is closed.
async fn next_frame(ws: &mut ServerWs) -> Option<serde_json::Value> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(&text).expect("frame json"));
            }
            Ok(Message::Ping(payload)) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            _ => {}
        }
    }
}

async fn send_frame(ws: &mut ServerWs, frame: &serde_json::Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

#[tokio::test]
async fn test_subscription_receives_data_and_complete() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_ack(&listener).await;

        let subscribe = next_frame(&mut ws).await.expect("subscribe frame");
        assert_eq!(subscribe["type"], "subscribe");
        let id = subscribe["id"].as_str().expect("id").to_string();
        assert_eq!(
            subscribe["payload"]["query"],
            "subscription { events { id } }"
        );

        send_frame(
            &mut ws,
            &json!({
                "type": "next",
                "id": id,
                "payload": {"data": {"events": [{"id": "e1"}]}}
            }),
        )
        .await;
        send_frame(&mut ws, &json!({"type": "complete", "id": id})).await;
    });

    let client = Client::builder()
        .websocket_url(url)
        .no_reconnect()
        .build()
        .expect("build client");
    assert_eq!(client.connection_kind(), ConnectionKind::WebSocket);

    let mut stream = client
        .subscribe(GraphQLRequest::subscription("subscription { events { id } }"))
        .await
        .expect("subscribe");

    let message = stream.next().await.expect("first message");
    let SubscriptionMessage::Data(response) = message else {
        panic!("expected data, got {message:?}");
    };
    let events: serde_json::Value = response.field("events").expect("events");
    assert_eq!(events[0]["id"], "e1");

    assert!(matches!(
        stream.next().await,
        Some(SubscriptionMessage::Complete)
    ));
    assert!(stream.next().await.is_none());

    server.await.expect("server task");
}

#[tokio::test]
async fn test_connection_init_carries_headers() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, init) = accept_and_ack(&listener).await;
        assert_eq!(
            init["payload"]["headers"]["x-hasura-admin-secret"],
            "top-secret"
        );
        assert_eq!(
            init["payload"]["headers"]["Content-Type"],
            "application/json"
        );

        let subscribe = next_frame(&mut ws).await.expect("subscribe frame");
        let id = subscribe["id"].as_str().expect("id").to_string();
        send_frame(&mut ws, &json!({"type": "complete", "id": id})).await;
    });

    let client = Client::builder()
        .websocket_url(url)
        .admin_secret("top-secret")
        .no_reconnect()
        .build()
        .expect("build client");

    let mut stream = client
        .subscribe(GraphQLRequest::subscription("subscription { events }"))
        .await
        .expect("subscribe");
    assert!(matches!(
        stream.next().await,
        Some(SubscriptionMessage::Complete)
    ));

    server.await.expect("server task");
}

#[tokio::test]
async fn test_split_link_routes_by_operation_kind() {
    let http_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"users": [{"id": "u1"}]}})),
        )
        .mount(&http_server)
        .await;

    let (listener, ws_url) = bind().await;
    let ws_server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_ack(&listener).await;
        let subscribe = next_frame(&mut ws).await.expect("subscribe frame");
        // The only operation arriving here is the subscription.
        assert_eq!(
            subscribe["payload"]["query"],
            "subscription { events { id } }"
        );
        let id = subscribe["id"].as_str().expect("id").to_string();
        send_frame(
            &mut ws,
            &json!({
                "type": "next",
                "id": id,
                "payload": {"data": {"events": []}}
            }),
        )
        .await;
        send_frame(&mut ws, &json!({"type": "complete", "id": id})).await;
    });

    let client = Client::builder()
        .http_url(format!("{}/v1/graphql", http_server.uri()))
        .websocket_url(ws_url)
        .no_reconnect()
        .build()
        .expect("build client");
    assert_eq!(client.connection_kind(), ConnectionKind::Both);

    // The query goes over HTTP.
    let response = client
        .execute(GraphQLRequest::query("{ users { id } }"))
        .await
        .expect("query over HTTP");
    assert!(response.data.is_some());

    // The subscription goes over the socket.
    let mut stream = client
        .subscribe(GraphQLRequest::subscription("subscription { events { id } }"))
        .await
        .expect("subscribe");
    assert!(matches!(
        stream.next().await,
        Some(SubscriptionMessage::Data(_))
    ));

    ws_server.await.expect("ws server task");

    let requests = http_server
        .received_requests()
        .await
        .expect("requests recorded");
    assert_eq!(requests.len(), 1, "only the query touches HTTP");
}

#[tokio::test]
async fn test_shutdown_closes_the_socket() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_ack(&listener).await;
        let subscribe = next_frame(&mut ws).await.expect("subscribe frame");
        let id = subscribe["id"].as_str().expect("id").to_string();
        send_frame(
            &mut ws,
            &json!({
                "type": "next",
                "id": id,
                "payload": {"data": {"events": []}}
            }),
        )
        .await;

        // The client is shutting down: nothing but the close should follow.
        assert!(next_frame(&mut ws).await.is_none(), "socket must close");
    });

    let client = Client::builder()
        .websocket_url(url)
        .no_reconnect()
        .build()
        .expect("build client");

    let mut stream = client
        .subscribe(GraphQLRequest::subscription("subscription { events { id } }"))
        .await
        .expect("subscribe");
    assert!(matches!(
        stream.next().await,
        Some(SubscriptionMessage::Data(_))
    ));

    client.shutdown().await;

    // Active streams are completed during teardown.
    assert!(matches!(
        stream.next().await,
        Some(SubscriptionMessage::Complete) | None
    ));

    let err = client
        .subscribe(GraphQLRequest::subscription("subscription { events }"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Closed));

    server.await.expect("server task");
}

#[tokio::test]
async fn test_reconnect_replays_active_subscriptions() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        // First connection: deliver one event, then drop the socket.
        let (mut ws, _) = accept_and_ack(&listener).await;
        let subscribe = next_frame(&mut ws).await.expect("subscribe frame");
        let id = subscribe["id"].as_str().expect("id").to_string();
        send_frame(
            &mut ws,
            &json!({
                "type": "next",
                "id": id,
                "payload": {"data": {"counter": 1}}
            }),
        )
        .await;
        drop(ws);

        // Second connection: the client replays the same subscription.
        let (mut ws, _) = accept_and_ack(&listener).await;
        let replay = next_frame(&mut ws).await.expect("replayed subscribe");
        assert_eq!(replay["type"], "subscribe");
        assert_eq!(replay["id"].as_str().expect("id"), id);
        assert_eq!(
            replay["payload"]["query"],
            "subscription { counter }"
        );
        send_frame(
            &mut ws,
            &json!({
                "type": "next",
                "id": id,
                "payload": {"data": {"counter": 2}}
            }),
        )
        .await;
        send_frame(&mut ws, &json!({"type": "complete", "id": id})).await;
    });

    let client = Client::builder()
        .websocket_url(url)
        .reconnect(
            ReconnectConfig::new()
                .max_attempts(5)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_millis(200)),
        )
        .build()
        .expect("build client");

    let mut stream = client
        .subscribe(GraphQLRequest::subscription("subscription { counter }"))
        .await
        .expect("subscribe");

    let first = stream.next().await.expect("first event");
    let SubscriptionMessage::Data(response) = first else {
        panic!("expected data, got {first:?}");
    };
    assert_eq!(response.data.unwrap()["counter"], 1);

    // The drop is invisible to the stream; the next event arrives after the
    // automatic reconnect.
    let second = stream.next().await.expect("event after reconnect");
    let SubscriptionMessage::Data(response) = second else {
        panic!("expected data, got {second:?}");
    };
    assert_eq!(response.data.unwrap()["counter"], 2);

    assert!(matches!(
        stream.next().await,
        Some(SubscriptionMessage::Complete)
    ));

    server.await.expect("server task");
}

#[tokio::test]
async fn test_websocket_only_client_executes_queries_over_the_socket() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_ack(&listener).await;
        let subscribe = next_frame(&mut ws).await.expect("subscribe frame");
        assert_eq!(subscribe["payload"]["query"], "{ users { id } }");
        let id = subscribe["id"].as_str().expect("id").to_string();
        send_frame(
            &mut ws,
            &json!({
                "type": "next",
                "id": id,
                "payload": {"data": {"users": [{"id": "u1"}]}}
            }),
        )
        .await;
    });

    let client = Client::builder()
        .websocket_url(url)
        .no_reconnect()
        .build()
        .expect("build client");

    let response = client
        .execute(GraphQLRequest::query("{ users { id } }"))
        .await
        .expect("query over the socket");
    let users: serde_json::Value = response.field("users").expect("users");
    assert_eq!(users[0]["id"], "u1");

    server.await.expect("server task");
}
