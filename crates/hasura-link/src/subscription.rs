//! GraphQL subscription support over WebSocket.
//!
//! Implements the graphql-transport-ws protocol (graphql-ws). One connection
//! is shared by all subscriptions issued through a client; operations are
//! multiplexed by id. The connection is owned by a driver task that handles
//! dispatch, keep-alive pings, and automatic reconnection; the rest of the
//! crate only holds a command channel and a close handle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ClientError, Result};
use crate::request::GraphQLRequest;
use crate::response::{GraphQLError, GraphQLResponse};

/// Type alias for a connected WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket message types for the graphql-transport-ws protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProtocolMessage {
    /// Client -> Server: initialize the connection.
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Server -> Client: connection accepted.
    ConnectionAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Bidirectional keep-alive.
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Keep-alive response.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Client -> Server: start an operation.
    Subscribe { id: String, payload: SubscribePayload },
    /// Server -> Client: an operation result.
    Next { id: String, payload: GraphQLResponse },
    /// Server -> Client: the operation failed.
    Error {
        id: String,
        payload: Vec<GraphQLError>,
    },
    /// Either direction: the operation is finished.
    Complete { id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscribePayload {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<Value>,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    operation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<Value>,
}

impl From<GraphQLRequest> for SubscribePayload {
    fn from(request: GraphQLRequest) -> Self {
        Self {
            query: request.query,
            variables: request.variables,
            operation_name: request.operation_name,
            extensions: request.extensions,
        }
    }
}

/// Configuration for automatic reconnection.
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts. `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial delay between reconnection attempts.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of reconnection attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the initial delay between reconnection attempts.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between reconnection attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before a given attempt (0-indexed), with ±10% jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64) as u64;

        let jitter_range = delay_ms / 10;
        if jitter_range == 0 {
            return Duration::from_millis(delay_ms);
        }
        let jitter = rand::random::<u64>() % (jitter_range * 2);
        Duration::from_millis(delay_ms - jitter_range + jitter)
    }
}

/// Configuration for the subscription connection.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// WebSocket URL for subscriptions.
    pub url: String,
    /// Connection initialization payload (headers, auth tokens).
    pub init_payload: Option<Value>,
    /// Additional headers for the WebSocket handshake.
    pub headers: HashMap<String, String>,
    /// Connection timeout.
    pub connection_timeout: Duration,
    /// Time to wait for the server's `connection_ack`.
    pub ack_timeout: Duration,
    /// Keep-alive ping interval. `None` disables pings.
    pub keep_alive_interval: Option<Duration>,
    /// Auto-reconnect configuration. `None` disables reconnection.
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            init_payload: None,
            headers: HashMap::new(),
            connection_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            keep_alive_interval: Some(Duration::from_secs(30)),
            reconnect: Some(ReconnectConfig::default()),
        }
    }
}

/// A message received from a subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    /// Data received from the subscription.
    Data(GraphQLResponse),
    /// The subscription completed normally.
    Complete,
    /// The subscription failed.
    Error(ClientError),
}

/// A stream of subscription messages.
#[derive(Debug)]
pub struct SubscriptionStream {
    receiver: mpsc::Receiver<SubscriptionMessage>,
    subscription_id: String,
    command_tx: Option<mpsc::Sender<Command>>,
}

impl SubscriptionStream {
    /// Get the next message from the subscription.
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        self.receiver.recv().await
    }

    /// Stop the subscription, telling the server to complete it.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx
                .send(Command::Complete {
                    id: self.subscription_id.clone(),
                })
                .await;
        }
    }

    /// Get the subscription ID.
    pub fn id(&self) -> &str {
        &self.subscription_id
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.try_send(Command::Complete {
                id: self.subscription_id.clone(),
            });
        }
    }
}

/// Command sent to the connection driver task.
enum Command {
    Subscribe { id: String },
    Complete { id: String },
    Close,
}

struct SubscriptionEntry {
    payload: SubscribePayload,
    tx: mpsc::Sender<SubscriptionMessage>,
}

struct ConnectionState {
    subscriptions: HashMap<String, SubscriptionEntry>,
    next_id: u64,
    closed: bool,
    started: bool,
}

struct ConnectionInner {
    config: SubscriptionConfig,
    state: Mutex<ConnectionState>,
    command_tx: mpsc::Sender<Command>,
    command_rx: Mutex<Option<mpsc::Receiver<Command>>>,
}

/// A shared GraphQL subscription connection.
///
/// The underlying socket is opened lazily on the first subscription and
/// reused for every subsequent one. Cloning is cheap and all clones share
/// the same connection.
#[derive(Clone)]
pub struct SubscriptionConnection {
    inner: Arc<ConnectionInner>,
}

impl SubscriptionConnection {
    /// Create a new, not-yet-connected subscription connection.
    pub fn new(config: SubscriptionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                state: Mutex::new(ConnectionState {
                    subscriptions: HashMap::new(),
                    next_id: 1,
                    closed: false,
                    started: false,
                }),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
            }),
        }
    }

    /// The configured WebSocket URL.
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Subscribe to a GraphQL operation.
    ///
    /// Starts the connection driver on first use. The operation is
    /// re-subscribed automatically after a reconnect.
    pub async fn subscribe(&self, request: GraphQLRequest) -> Result<SubscriptionStream> {
        let (id, rx) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ClientError::WebSocket("connection is closed".into()));
            }

            let id = state.next_id.to_string();
            state.next_id += 1;

            let (tx, rx) = mpsc::channel(32);
            state.subscriptions.insert(
                id.clone(),
                SubscriptionEntry {
                    payload: request.into(),
                    tx,
                },
            );

            if !state.started {
                state.started = true;
                let receiver = self
                    .inner
                    .command_rx
                    .lock()
                    .take()
                    .expect("driver started once");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    drive_connection(inner, receiver).await;
                });
            }

            (id, rx)
        };

        self.inner
            .command_tx
            .send(Command::Subscribe { id: id.clone() })
            .await
            .map_err(|_| ClientError::WebSocket("connection task terminated".into()))?;

        Ok(SubscriptionStream {
            receiver: rx,
            subscription_id: id,
            command_tx: Some(self.inner.command_tx.clone()),
        })
    }

    /// Close the connection.
    ///
    /// Active subscriptions receive a `Complete` message and the socket is
    /// shut down. Closing an already-closed (or never-opened) connection has
    /// no effect.
    pub async fn close(&self) {
        let started = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.started
        };
        if started {
            let _ = self.inner.command_tx.send(Command::Close).await;
        }
    }
}

/// Drive the connection: connect, replay subscriptions, dispatch frames,
/// and reconnect with backoff until closed.
async fn drive_connection(inner: Arc<ConnectionInner>, mut command_rx: mpsc::Receiver<Command>) {
    let config = inner.config.clone();
    let mut attempt: u32 = 0;

    'connection: loop {
        if inner.state.lock().closed {
            complete_all(&inner);
            break;
        }

        let mut socket = match establish(&config).await {
            Ok(socket) => {
                attempt = 0;
                socket
            }
            Err(err) => {
                tracing::debug!(
                    target: "hasura_link::subscription",
                    "connection attempt failed: {err}"
                );
                match reconnect_delay(&config, attempt) {
                    Some(delay) => {
                        attempt += 1;
                        if wait_or_close(&inner, &mut command_rx, delay).await {
                            complete_all(&inner);
                            break 'connection;
                        }
                        continue 'connection;
                    }
                    None => {
                        fail_all(&inner, err);
                        break 'connection;
                    }
                }
            }
        };

        // Replay every registered subscription on the fresh connection.
        let mut live: HashSet<String> = HashSet::new();
        let pending: Vec<(String, SubscribePayload)> = {
            let state = inner.state.lock();
            state
                .subscriptions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.payload.clone()))
                .collect()
        };
        let mut replay_failed = false;
        for (id, payload) in pending {
            let frame = ProtocolMessage::Subscribe {
                id: id.clone(),
                payload,
            };
            if send_frame(&mut socket, &frame).await.is_err() {
                replay_failed = true;
                break;
            }
            live.insert(id);
        }
        if replay_failed {
            match reconnect_delay(&config, attempt) {
                Some(delay) => {
                    attempt += 1;
                    if wait_or_close(&inner, &mut command_rx, delay).await {
                        complete_all(&inner);
                        break 'connection;
                    }
                    continue 'connection;
                }
                None => {
                    fail_all(&inner, ClientError::WebSocket("connection lost".into()));
                    break 'connection;
                }
            }
        }

        let keep_alive = config.keep_alive_interval;
        let mut ping_timer =
            tokio::time::interval(keep_alive.unwrap_or(Duration::from_secs(3600)));
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.tick().await;

        let lost = loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(Command::Subscribe { id }) => {
                        if live.contains(&id) {
                            continue;
                        }
                        let payload = inner
                            .state
                            .lock()
                            .subscriptions
                            .get(&id)
                            .map(|entry| entry.payload.clone());
                        let Some(payload) = payload else { continue };
                        let frame = ProtocolMessage::Subscribe { id: id.clone(), payload };
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break true;
                        }
                        live.insert(id);
                    }
                    Some(Command::Complete { id }) => {
                        inner.state.lock().subscriptions.remove(&id);
                        if live.remove(&id) {
                            let frame = ProtocolMessage::Complete { id };
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Some(Command::Close) | None => {
                        inner.state.lock().closed = true;
                        complete_all(&inner);
                        let _ = socket.close(None).await;
                        break false;
                    }
                },
                message = socket.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ProtocolMessage>(&text) {
                            Ok(frame) => {
                                if let Some(pong) = dispatch(&inner, &mut live, frame) {
                                    let _ = send_frame(&mut socket, &pong).await;
                                }
                            }
                            Err(err) => {
                                tracing::debug!(
                                    target: "hasura_link::subscription",
                                    "undecodable frame: {err}"
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break true,
                    Some(Err(_)) => break true,
                    _ => {}
                },
                _ = ping_timer.tick(), if keep_alive.is_some() => {
                    let frame = ProtocolMessage::Ping { payload: None };
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break true;
                    }
                }
            }
        };

        if !lost {
            break 'connection;
        }

        tracing::debug!(target: "hasura_link::subscription", "connection lost");
        match reconnect_delay(&config, attempt) {
            Some(delay) => {
                attempt += 1;
                if wait_or_close(&inner, &mut command_rx, delay).await {
                    complete_all(&inner);
                    break 'connection;
                }
            }
            None => {
                fail_all(&inner, ClientError::WebSocket("connection lost".into()));
                break 'connection;
            }
        }
    }

    inner.state.lock().closed = true;
}

/// Connect, send `connection_init`, and wait for `connection_ack`.
async fn establish(config: &SubscriptionConfig) -> Result<WsStream> {
    let mut request = tokio_tungstenite::tungstenite::http::Request::builder()
        .uri(&config.url)
        .header("Sec-WebSocket-Protocol", "graphql-transport-ws");
    for (name, value) in &config.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    let request = request
        .body(())
        .map_err(|e| ClientError::WebSocket(e.to_string()))?;

    let connect_future = tokio_tungstenite::connect_async(request);
    let (mut socket, _) = tokio::time::timeout(config.connection_timeout, connect_future)
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(|e| ClientError::WebSocket(e.to_string()))?;

    let init = ProtocolMessage::ConnectionInit {
        payload: config.init_payload.clone(),
    };
    send_frame(&mut socket, &init).await?;

    tokio::time::timeout(config.ack_timeout, wait_for_ack(&mut socket))
        .await
        .map_err(|_| ClientError::WebSocket("connection_ack timeout".into()))??;

    tracing::debug!(target: "hasura_link::subscription", "connection acknowledged");
    Ok(socket)
}

async fn wait_for_ack(socket: &mut WsStream) -> Result<()> {
    while let Some(message) = socket.next().await {
        match message.map_err(|e| ClientError::WebSocket(e.to_string()))? {
            Message::Text(text) => {
                let frame: ProtocolMessage = serde_json::from_str(&text)
                    .map_err(|e| ClientError::WebSocket(format!("undecodable frame: {e}")))?;
                match frame {
                    ProtocolMessage::ConnectionAck { .. } => return Ok(()),
                    ProtocolMessage::Ping { payload } => {
                        let pong = ProtocolMessage::Pong { payload };
                        send_frame(socket, &pong).await?;
                    }
                    other => {
                        return Err(ClientError::WebSocket(format!(
                            "expected connection_ack, got {}",
                            frame_name(&other)
                        )));
                    }
                }
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => {
                return Err(ClientError::WebSocket(
                    "connection closed before ack".into(),
                ));
            }
            _ => {}
        }
    }
    Err(ClientError::WebSocket("connection closed before ack".into()))
}

/// Route a server frame to its subscription. Returns a frame to send back,
/// if the protocol requires one.
fn dispatch(
    inner: &Arc<ConnectionInner>,
    live: &mut HashSet<String>,
    frame: ProtocolMessage,
) -> Option<ProtocolMessage> {
    match frame {
        ProtocolMessage::Next { id, payload } => {
            let state = inner.state.lock();
            if let Some(entry) = state.subscriptions.get(&id) {
                let _ = entry.tx.try_send(SubscriptionMessage::Data(payload));
            }
            None
        }
        ProtocolMessage::Error { id, payload } => {
            live.remove(&id);
            let mut state = inner.state.lock();
            if let Some(entry) = state.subscriptions.remove(&id) {
                let _ = entry
                    .tx
                    .try_send(SubscriptionMessage::Error(ClientError::Graphql(payload)));
            }
            None
        }
        ProtocolMessage::Complete { id } => {
            live.remove(&id);
            let mut state = inner.state.lock();
            if let Some(entry) = state.subscriptions.remove(&id) {
                let _ = entry.tx.try_send(SubscriptionMessage::Complete);
            }
            None
        }
        ProtocolMessage::Ping { payload } => Some(ProtocolMessage::Pong { payload }),
        _ => None,
    }
}

async fn send_frame(socket: &mut WsStream, frame: &ProtocolMessage) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| ClientError::WebSocket(e.to_string()))
}

/// Sleep before a reconnect attempt, reacting to commands in the meantime.
/// Returns `true` when a close was requested.
async fn wait_or_close(
    inner: &Arc<ConnectionInner>,
    command_rx: &mut mpsc::Receiver<Command>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = command_rx.recv() => match cmd {
                Some(Command::Close) | None => {
                    inner.state.lock().closed = true;
                    return true;
                }
                // Registered subscriptions replay on reconnect.
                Some(Command::Subscribe { .. }) => {}
                Some(Command::Complete { id }) => {
                    inner.state.lock().subscriptions.remove(&id);
                }
            }
        }
    }
}

fn reconnect_delay(config: &SubscriptionConfig, attempt: u32) -> Option<Duration> {
    let reconnect = config.reconnect.as_ref()?;
    if let Some(max) = reconnect.max_attempts
        && attempt >= max
    {
        return None;
    }
    Some(reconnect.delay_for_attempt(attempt))
}

fn complete_all(inner: &Arc<ConnectionInner>) {
    let mut state = inner.state.lock();
    for (_, entry) in state.subscriptions.drain() {
        let _ = entry.tx.try_send(SubscriptionMessage::Complete);
    }
}

fn fail_all(inner: &Arc<ConnectionInner>, error: ClientError) {
    let mut state = inner.state.lock();
    state.closed = true;
    for (_, entry) in state.subscriptions.drain() {
        let _ = entry.tx.try_send(SubscriptionMessage::Error(error.clone()));
    }
}

fn frame_name(frame: &ProtocolMessage) -> &'static str {
    match frame {
        ProtocolMessage::ConnectionInit { .. } => "connection_init",
        ProtocolMessage::ConnectionAck { .. } => "connection_ack",
        ProtocolMessage::Ping { .. } => "ping",
        ProtocolMessage::Pong { .. } => "pong",
        ProtocolMessage::Subscribe { .. } => "subscribe",
        ProtocolMessage::Next { .. } => "next",
        ProtocolMessage::Error { .. } => "error",
        ProtocolMessage::Complete { .. } => "complete",
    }
}
