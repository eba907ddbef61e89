//! Client configuration layer for Hasura-style GraphQL endpoints.
//!
//! This crate assembles a GraphQL client from a handful of configuration
//! values: it selects the cache policy, builds the authentication headers,
//! picks the transport (HTTP, WebSocket, or a split that routes each
//! operation by its kind), and wires shutdown so that the transport is torn
//! down after the client's own cleanup. Query execution is delegated to
//! `reqwest`; subscriptions run over `tokio-tungstenite` speaking the
//! graphql-transport-ws protocol.
//!
//! # Building a client
//!
//! ```ignore
//! use hasura_link::{Client, Environment, GraphQLRequest};
//!
//! let client = Client::builder()
//!     .http_url("https://api.example.com/v1/graphql")
//!     .websocket_url("wss://api.example.com/v1/graphql")
//!     .admin_secret("top-secret")
//!     .environment(Environment::Interactive)
//!     .build()?;
//!
//! // Queries and mutations go over HTTP.
//! let request = GraphQLRequest::query("{ users { id name } }");
//! let response = client.execute(request).await?;
//!
//! // Subscriptions go over the shared WebSocket connection.
//! let subscription = GraphQLRequest::subscription("subscription { events { id } }");
//! let mut stream = client.subscribe(subscription).await?;
//! while let Some(message) = stream.next().await {
//!     println!("{message:?}");
//! }
//!
//! // Closes in order: client cleanup first, then the WebSocket connection.
//! client.shutdown().await;
//! ```
//!
//! # Headers
//!
//! Every request carries `Content-Type: application/json` plus at most one
//! authentication header: `x-hasura-admin-secret` when an admin secret is
//! configured, otherwise `Authorization: Bearer <token>` when a token is.
//! Caller-supplied headers override both. The same map is sent to the
//! WebSocket server inside the `connection_init` payload.
//!
//! # Cache modes
//!
//! The cache mode decides both the cache instance and the default request
//! policies, so the two always match:
//!
//! - [`CacheMode::Memory`]: in-memory cache, `cache-and-network` queries.
//! - [`CacheMode::None`]: same cache object, but `no-cache` policy keeps it
//!   out of every read and write path.
//! - [`CacheMode::Custom`]: bring your own [`QueryCache`].
//!
//! The default mode depends on the [`Environment`] the caller declares:
//! `None` for server processes, `Memory` for interactive applications.

mod cache;
mod client;
mod environment;
mod error;
mod headers;
mod link;
mod request;
mod response;
mod subscription;

pub use cache::{
    CacheMode, DefaultOptions, ErrorPolicy, FetchPolicy, MemoryCache, OperationOptions, QueryCache,
};
pub use client::{Client, ClientBuilder, QueryWatch};
pub use environment::Environment;
pub use error::{ClientError, Result};
pub use headers::{ADMIN_SECRET_HEADER, build_headers};
pub use link::{ConnectionKind, HttpLink, Link, Teardown, TransportOptions};
pub use request::{GraphQLRequest, OperationType, ROOT_TYPES_QUERY};
pub use response::{GraphQLError, GraphQLLocation, GraphQLResponse, PathSegment};
pub use subscription::{
    ReconnectConfig, SubscriptionConfig, SubscriptionConnection, SubscriptionMessage,
    SubscriptionStream,
};
