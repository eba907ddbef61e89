//! Client assembly: cache mode, headers, link, and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::cache::{CacheMode, DefaultOptions, ErrorPolicy, FetchPolicy, QueryCache};
use crate::environment::Environment;
use crate::error::{ClientError, Result};
use crate::headers::build_headers;
use crate::link::{ConnectionKind, Link, Teardown, TransportOptions};
use crate::request::{GraphQLRequest, OperationType, ROOT_TYPES_QUERY};
use crate::response::GraphQLResponse;
use crate::subscription::{ReconnectConfig, SubscriptionMessage, SubscriptionStream};

/// Builder for assembling a [`Client`].
///
/// All fields are optional; the only hard requirement is at least one
/// endpoint URL. Unset values fall back to environment-derived defaults.
#[derive(Default)]
pub struct ClientBuilder {
    http_url: Option<String>,
    websocket_url: Option<String>,
    admin_secret: Option<String>,
    token: Option<String>,
    headers: HashMap<String, String>,
    cache: Option<CacheMode>,
    default_options: DefaultOptions,
    environment: Environment,
    transport: TransportOptions,
}

impl ClientBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the HTTP(S) endpoint for queries and mutations.
    pub fn http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = Some(url.into());
        self
    }

    /// Set the WS(S) endpoint for subscriptions.
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Authenticate with the Hasura admin secret.
    ///
    /// Takes precedence over [`token`](Self::token) when both are set.
    pub fn admin_secret(mut self, secret: impl Into<String>) -> Self {
        self.admin_secret = Some(secret.into());
        self
    }

    /// Authenticate with a bearer token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add a header to every request, overriding generated headers of the
    /// same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the cache mode explicitly instead of deriving it from the
    /// environment.
    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.cache = Some(mode);
        self
    }

    /// Override the cache-mode-derived default options, field by field.
    pub fn default_options(mut self, options: DefaultOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Set the execution environment used for defaults.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the request timeout for HTTP operations.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.transport.request_timeout = Some(timeout);
        self
    }

    /// Set the WebSocket connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.transport.connection_timeout = timeout;
        self
    }

    /// Set the keep-alive ping interval for the WebSocket connection.
    ///
    /// Set to `None` to disable keep-alive pings.
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.transport.keep_alive_interval = interval;
        self
    }

    /// Set the WebSocket reconnect configuration.
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.transport.reconnect = Some(config);
        self
    }

    /// Disable automatic WebSocket reconnection.
    pub fn no_reconnect(mut self) -> Self {
        self.transport.reconnect = None;
        self
    }

    /// Use an existing HTTP client instead of building one.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.transport.http_client = Some(client);
        self
    }

    /// Assemble the client.
    ///
    /// The cache and the default options are derived together from one cache
    /// mode (explicit, or the environment default), then caller overrides
    /// are merged over the derived options field by field.
    pub fn build(self) -> Result<Client> {
        let mode = self
            .cache
            .unwrap_or_else(|| self.environment.default_cache_mode());
        let (cache, mode_options) = mode.materialize();
        let options = mode_options.merged_with(self.default_options);

        let headers = build_headers(
            self.admin_secret.as_deref(),
            self.token.as_deref(),
            &self.headers,
        );

        let (link, teardown) = Link::build(
            self.http_url.as_deref(),
            self.websocket_url.as_deref(),
            headers.clone(),
            self.transport,
        )?;

        tracing::debug!(
            target: "hasura_link::client",
            "client assembled: {:?} link, {mode:?} cache",
            link.kind()
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                link,
                cache,
                options,
                headers,
                teardown: Mutex::new(Some(teardown)),
                stopped: AtomicBool::new(false),
            }),
        })
    }
}

struct ClientInner {
    link: Link,
    cache: Arc<dyn QueryCache>,
    options: DefaultOptions,
    headers: HashMap<String, String>,
    teardown: Mutex<Option<Teardown>>,
    stopped: AtomicBool,
}

/// A GraphQL client for a Hasura-style endpoint.
///
/// Assembled by [`ClientBuilder`]; owns the transport link, the cache, the
/// merged default options, and the transport teardown handle. Cloning is
/// cheap and clones share all of these.
///
/// # Example
///
/// ```ignore
/// use hasura_link::{Client, GraphQLRequest};
///
/// let client = Client::builder()
///     .http_url("https://api.example.com/v1/graphql")
///     .websocket_url("wss://api.example.com/v1/graphql")
///     .admin_secret("top-secret")
///     .build()?;
///
/// let request = GraphQLRequest::query("{ users { id name } }");
/// let response = client.execute(request).await?;
///
/// client.shutdown().await;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection_kind", &self.inner.link.kind())
            .field("headers", &self.inner.headers)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The headers sent with every request.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.inner.headers
    }

    /// The connection kind the transport was built as.
    pub fn connection_kind(&self) -> ConnectionKind {
        self.inner.link.kind()
    }

    /// The merged default options in effect.
    pub fn default_options(&self) -> DefaultOptions {
        self.inner.options
    }

    /// The cache backing this client.
    pub fn cache(&self) -> Arc<dyn QueryCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Execute a query or mutation, honoring the default fetch and error
    /// policies for its operation class.
    ///
    /// For subscriptions, use [`subscribe`](Self::subscribe) instead.
    pub async fn execute(&self, request: GraphQLRequest) -> Result<GraphQLResponse> {
        self.ensure_running()?;
        if request.is_subscription() {
            return Err(ClientError::Request(
                "use subscribe() for subscription operations".into(),
            ));
        }

        if request.operation_type() == OperationType::Mutation {
            let error_policy = self
                .inner
                .options
                .mutation
                .error_policy
                .unwrap_or(ErrorPolicy::None);
            let response = self.transport_execute(&request).await?;
            return error_policy.apply(response);
        }

        let class = self.inner.options.query;
        let fetch_policy = class.fetch_policy.unwrap_or(FetchPolicy::CacheFirst);
        let error_policy = class.error_policy.unwrap_or(ErrorPolicy::None);

        let key = request.fingerprint();
        if fetch_policy == FetchPolicy::CacheFirst
            && let Some(hit) = self.inner.cache.read(&key)
        {
            tracing::debug!(target: "hasura_link::client", "cache hit for {key}");
            return error_policy.apply(hit);
        }

        let response = self.transport_execute(&request).await?;
        if fetch_policy.writes_cache() && !response.has_errors() {
            self.inner.cache.write(&key, &response);
        }
        error_policy.apply(response)
    }

    /// Execute a query and deserialize its data.
    pub async fn query<T: DeserializeOwned>(&self, query: impl Into<String>) -> Result<T> {
        self.execute(GraphQLRequest::query(query)).await?.data()
    }

    /// Execute a query with variables and deserialize its data.
    pub async fn query_with_variables<T: DeserializeOwned>(
        &self,
        query: impl Into<String>,
        variables: impl Serialize,
    ) -> Result<T> {
        self.execute(GraphQLRequest::query(query).variables(variables))
            .await?
            .data()
    }

    /// Execute a mutation and deserialize its data.
    pub async fn mutate<T: DeserializeOwned>(&self, mutation: impl Into<String>) -> Result<T> {
        self.execute(GraphQLRequest::mutation(mutation))
            .await?
            .data()
    }

    /// Execute a mutation with variables and deserialize its data.
    pub async fn mutate_with_variables<T: DeserializeOwned>(
        &self,
        mutation: impl Into<String>,
        variables: impl Serialize,
    ) -> Result<T> {
        self.execute(GraphQLRequest::mutation(mutation).variables(variables))
            .await?
            .data()
    }

    /// Fetch the schema's root operation types.
    pub async fn introspect(&self) -> Result<GraphQLResponse> {
        self.execute(GraphQLRequest::query(ROOT_TYPES_QUERY)).await
    }

    /// Watch a query: the stream yields the cached response first (when the
    /// watch fetch policy reads the cache) and then the network response.
    ///
    /// Under [`FetchPolicy::CacheFirst`] a cache hit ends the stream without
    /// a network round trip.
    pub fn watch(&self, request: GraphQLRequest) -> Result<QueryWatch> {
        self.ensure_running()?;
        if request.is_subscription() {
            return Err(ClientError::Request(
                "use subscribe() for subscription operations".into(),
            ));
        }

        let class = self.inner.options.watch_query;
        let fetch_policy = class.fetch_policy.unwrap_or(FetchPolicy::CacheFirst);
        let error_policy = class.error_policy.unwrap_or(ErrorPolicy::None);

        let (tx, rx) = mpsc::channel(8);
        let client = self.clone();
        tokio::spawn(async move {
            let key = request.fingerprint();
            if fetch_policy.reads_cache()
                && let Some(hit) = client.inner.cache.read(&key)
            {
                if tx.send(error_policy.apply(hit)).await.is_err() {
                    return;
                }
                if fetch_policy == FetchPolicy::CacheFirst {
                    return;
                }
            }

            let result = match client.transport_execute(&request).await {
                Ok(response) => {
                    if fetch_policy.writes_cache() && !response.has_errors() {
                        client.inner.cache.write(&key, &response);
                    }
                    error_policy.apply(response)
                }
                Err(err) => Err(err),
            };
            let _ = tx.send(result).await;
        });

        Ok(QueryWatch { receiver: rx })
    }

    /// Subscribe to a GraphQL subscription over the WebSocket link.
    pub async fn subscribe(&self, request: GraphQLRequest) -> Result<SubscriptionStream> {
        self.ensure_running()?;
        if !request.is_subscription() {
            return Err(ClientError::Request(
                "expected a subscription operation".into(),
            ));
        }
        let websocket = self.inner.link.websocket().ok_or_else(|| {
            ClientError::InvalidConfiguration(
                "no WebSocket endpoint configured for subscriptions".into(),
            )
        })?;
        websocket.subscribe(request).await
    }

    /// Shut the client down.
    ///
    /// Inner cleanup runs first (new operations are refused, the cache is
    /// cleared), then the transport teardown closes any open WebSocket
    /// connection. The teardown handle is taken out of the client, so it
    /// fires at most once even when shutdown is called again.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.cache.clear();

        let teardown = self.inner.teardown.lock().take();
        if let Some(teardown) = teardown {
            tracing::debug!(target: "hasura_link::client", "closing transport");
            teardown.close().await;
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    /// Send one operation over whichever transport the link provides.
    ///
    /// With no HTTP half, single-result operations run over the WebSocket
    /// connection as a one-shot subscribe/next/complete exchange.
    async fn transport_execute(&self, request: &GraphQLRequest) -> Result<GraphQLResponse> {
        if let Some(http) = self.inner.link.http() {
            return http.execute(request).await;
        }

        let websocket = self
            .inner
            .link
            .websocket()
            .expect("a link always has at least one transport");
        let mut stream = websocket.subscribe(request.clone()).await?;
        match stream.next().await {
            Some(SubscriptionMessage::Data(response)) => {
                stream.stop().await;
                Ok(response)
            }
            Some(SubscriptionMessage::Error(err)) => Err(err),
            Some(SubscriptionMessage::Complete) | None => Err(ClientError::InvalidBody(
                "connection closed before a result was received".into(),
            )),
        }
    }
}

/// A stream of responses for a watched query.
pub struct QueryWatch {
    receiver: mpsc::Receiver<Result<GraphQLResponse>>,
}

impl QueryWatch {
    /// Get the next response.
    pub async fn next(&mut self) -> Option<Result<GraphQLResponse>> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OperationOptions;

    #[test]
    fn test_build_requires_an_endpoint() {
        let err = Client::builder().build().unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_server_environment_defaults_to_no_cache() {
        let client = Client::builder()
            .http_url("https://api.example.com/v1/graphql")
            .build()
            .unwrap();

        let options = client.default_options();
        assert_eq!(options.query.fetch_policy, Some(FetchPolicy::NoCache));
        assert_eq!(options.watch_query.fetch_policy, Some(FetchPolicy::NoCache));
    }

    #[test]
    fn test_interactive_environment_defaults_to_memory_cache() {
        let client = Client::builder()
            .http_url("https://api.example.com/v1/graphql")
            .environment(Environment::Interactive)
            .build()
            .unwrap();

        let options = client.default_options();
        assert_eq!(
            options.query.fetch_policy,
            Some(FetchPolicy::CacheAndNetwork)
        );
        assert_eq!(options.query.error_policy, Some(ErrorPolicy::All));
    }

    #[test]
    fn test_caller_options_override_mode_options() {
        let client = Client::builder()
            .http_url("https://api.example.com/v1/graphql")
            .cache(CacheMode::Memory)
            .default_options(DefaultOptions {
                query: OperationOptions {
                    fetch_policy: Some(FetchPolicy::NetworkOnly),
                    error_policy: None,
                },
                ..Default::default()
            })
            .build()
            .unwrap();

        let options = client.default_options();
        assert_eq!(options.query.fetch_policy, Some(FetchPolicy::NetworkOnly));
        // The unset override field keeps the mode-derived value.
        assert_eq!(options.query.error_policy, Some(ErrorPolicy::All));
    }

    #[test]
    fn test_header_precedence_in_built_client() {
        let client = Client::builder()
            .http_url("https://api.example.com/v1/graphql")
            .admin_secret("secret")
            .token("token")
            .build()
            .unwrap();

        assert_eq!(
            client.headers().get("x-hasura-admin-secret"),
            Some(&"secret".to_string())
        );
        assert!(!client.headers().contains_key("Authorization"));
    }

    #[tokio::test]
    async fn test_subscribe_without_websocket_endpoint() {
        let client = Client::builder()
            .http_url("https://api.example.com/v1/graphql")
            .build()
            .unwrap();

        let err = client
            .subscribe(GraphQLRequest::subscription("subscription { events }"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_execute_rejects_subscriptions() {
        let client = Client::builder()
            .http_url("https://api.example.com/v1/graphql")
            .build()
            .unwrap();

        let err = client
            .execute(GraphQLRequest::subscription("subscription { events }"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Request(_)));
    }

    #[tokio::test]
    async fn test_operations_refused_after_shutdown() {
        let client = Client::builder()
            .http_url("https://api.example.com/v1/graphql")
            .build()
            .unwrap();

        client.shutdown().await;
        // A second shutdown is harmless; the teardown has already been taken.
        client.shutdown().await;

        let err = client
            .execute(GraphQLRequest::query("{ users { id } }"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }
}
