//! Transport link construction.
//!
//! The link is decided by which endpoints are configured: HTTP only,
//! WebSocket only, or both — in which case each operation is routed by its
//! kind (subscriptions over the socket, everything else over HTTP). Building
//! a link also yields the [`Teardown`] handle that releases the transport's
//! long-lived resources.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use url::Url;

use crate::error::{ClientError, Result};
use crate::request::GraphQLRequest;
use crate::response::GraphQLResponse;
use crate::subscription::{ReconnectConfig, SubscriptionConfig, SubscriptionConnection};

/// The transport shape derived from the configured endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Queries and mutations over HTTP; no subscription support.
    Http,
    /// Every operation over one WebSocket connection.
    WebSocket,
    /// Subscriptions over WebSocket, everything else over HTTP.
    Both,
}

impl ConnectionKind {
    /// Derive the connection kind from validated endpoint URLs.
    ///
    /// Fails with [`ClientError::InvalidConfiguration`] when neither endpoint
    /// is set or an endpoint carries an unsupported scheme — never silently
    /// falls back to HTTP.
    pub fn resolve(http_url: Option<&Url>, websocket_url: Option<&Url>) -> Result<Self> {
        if let Some(url) = http_url {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return Err(ClientError::InvalidConfiguration(format!(
                    "unsupported scheme '{scheme}' for HTTP endpoint '{url}'"
                )));
            }
        }
        if let Some(url) = websocket_url {
            let scheme = url.scheme();
            if scheme != "ws" && scheme != "wss" {
                return Err(ClientError::InvalidConfiguration(format!(
                    "unsupported scheme '{scheme}' for WebSocket endpoint '{url}'"
                )));
            }
        }

        match (http_url, websocket_url) {
            (Some(_), Some(_)) => Ok(Self::Both),
            (None, Some(_)) => Ok(Self::WebSocket),
            (Some(_), None) => Ok(Self::Http),
            (None, None) => Err(ClientError::InvalidConfiguration(
                "no endpoint configured: set an HTTP or WebSocket URL".into(),
            )),
        }
    }
}

/// Transport settings shared by both link halves.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Request timeout for HTTP operations. `None` disables the timeout.
    pub request_timeout: Option<Duration>,
    /// WebSocket connection timeout.
    pub connection_timeout: Duration,
    /// Keep-alive ping interval for the WebSocket connection. `None`
    /// disables pings.
    pub keep_alive_interval: Option<Duration>,
    /// WebSocket reconnect configuration. `None` disables reconnection.
    pub reconnect: Option<ReconnectConfig>,
    /// A pre-built HTTP client to use instead of constructing one.
    pub http_client: Option<reqwest::Client>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            connection_timeout: Duration::from_secs(30),
            keep_alive_interval: Some(Duration::from_secs(30)),
            reconnect: Some(ReconnectConfig::default()),
            http_client: None,
        }
    }
}

/// The HTTP half of a link: posts operations as JSON to one endpoint.
#[derive(Clone)]
pub struct HttpLink {
    endpoint: Url,
    client: reqwest::Client,
    headers: HashMap<String, String>,
}

impl HttpLink {
    fn new(
        endpoint: Url,
        headers: HashMap<String, String>,
        transport: &TransportOptions,
    ) -> Result<Self> {
        let client = match transport.http_client.clone() {
            Some(client) => client,
            None => {
                // Credential inclusion: cookies ride along on every request.
                let mut builder = reqwest::Client::builder().cookie_store(true);
                if let Some(timeout) = transport.request_timeout {
                    builder = builder.timeout(timeout);
                }
                builder
                    .build()
                    .map_err(|e| ClientError::Request(e.to_string()))?
            }
        };
        Ok(Self {
            endpoint,
            client,
            headers,
        })
    }

    /// The endpoint this link posts to.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Execute one operation and decode the GraphQL response.
    pub async fn execute(&self, request: &GraphQLRequest) -> Result<GraphQLResponse> {
        let body = serde_json::to_vec(request)?;
        let mut http_request = self.client.post(self.endpoint.clone());
        for (name, value) in &self.headers {
            http_request = http_request.header(name.as_str(), value.as_str());
        }

        let response = http_request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                message: (!body.is_empty()).then_some(body),
            });
        }

        response
            .json::<GraphQLResponse>()
            .await
            .map_err(|e| ClientError::Json(e.to_string()))
    }
}

/// Releases the transport resources a link holds open.
///
/// Only the WebSocket connection is a long-lived resource; for pure-HTTP
/// links the handle does nothing. Closing twice has no further effect.
pub struct Teardown {
    connection: Option<SubscriptionConnection>,
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown")
            .field("is_noop", &self.is_noop())
            .finish()
    }
}

impl Teardown {
    fn noop() -> Self {
        Self { connection: None }
    }

    fn for_connection(connection: SubscriptionConnection) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    /// Whether this handle has anything to release.
    pub fn is_noop(&self) -> bool {
        self.connection.is_none()
    }

    /// Close the WebSocket connection, if the link opened one.
    pub async fn close(&self) {
        if let Some(ref connection) = self.connection {
            connection.close().await;
        }
    }
}

/// The assembled transport.
pub enum Link {
    /// HTTP only.
    Http(HttpLink),
    /// WebSocket only.
    WebSocket(SubscriptionConnection),
    /// Split transport routing by operation kind.
    Split {
        /// Carries queries and mutations.
        http: HttpLink,
        /// Carries subscriptions.
        websocket: SubscriptionConnection,
    },
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Build the link for the given endpoints and headers.
    ///
    /// Returns the link and its teardown handle. The header map is applied
    /// to HTTP requests directly and travels to the WebSocket server inside
    /// the `connection_init` payload (under `"headers"`) as well as on the
    /// handshake request.
    pub fn build(
        http_url: Option<&str>,
        websocket_url: Option<&str>,
        headers: HashMap<String, String>,
        transport: TransportOptions,
    ) -> Result<(Self, Teardown)> {
        let http_url = http_url.map(Url::parse).transpose()?;
        let websocket_url = websocket_url.map(Url::parse).transpose()?;
        let kind = ConnectionKind::resolve(http_url.as_ref(), websocket_url.as_ref())?;

        match kind {
            ConnectionKind::Http => {
                let http = HttpLink::new(
                    http_url.expect("http kind implies http url"),
                    headers,
                    &transport,
                )?;
                Ok((Self::Http(http), Teardown::noop()))
            }
            ConnectionKind::WebSocket => {
                let websocket = Self::websocket_connection(
                    &websocket_url.expect("websocket kind implies websocket url"),
                    &headers,
                    &transport,
                );
                let teardown = Teardown::for_connection(websocket.clone());
                Ok((Self::WebSocket(websocket), teardown))
            }
            ConnectionKind::Both => {
                let http = HttpLink::new(
                    http_url.expect("both kind implies http url"),
                    headers.clone(),
                    &transport,
                )?;
                let websocket = Self::websocket_connection(
                    &websocket_url.expect("both kind implies websocket url"),
                    &headers,
                    &transport,
                );
                // Only the socket needs tearing down; HTTP holds nothing open.
                let teardown = Teardown::for_connection(websocket.clone());
                Ok((Self::Split { http, websocket }, teardown))
            }
        }
    }

    fn websocket_connection(
        url: &Url,
        headers: &HashMap<String, String>,
        transport: &TransportOptions,
    ) -> SubscriptionConnection {
        let config = SubscriptionConfig {
            url: url.to_string(),
            init_payload: Some(json!({ "headers": headers })),
            headers: headers.clone(),
            connection_timeout: transport.connection_timeout,
            ack_timeout: SubscriptionConfig::default().ack_timeout,
            keep_alive_interval: transport.keep_alive_interval,
            reconnect: transport.reconnect.clone(),
        };
        SubscriptionConnection::new(config)
    }

    /// The connection kind this link was built as.
    pub fn kind(&self) -> ConnectionKind {
        match self {
            Self::Http(_) => ConnectionKind::Http,
            Self::WebSocket(_) => ConnectionKind::WebSocket,
            Self::Split { .. } => ConnectionKind::Both,
        }
    }

    /// The HTTP half, when present.
    pub(crate) fn http(&self) -> Option<&HttpLink> {
        match self {
            Self::Http(http) | Self::Split { http, .. } => Some(http),
            Self::WebSocket(_) => None,
        }
    }

    /// The WebSocket half, when present.
    pub(crate) fn websocket(&self) -> Option<&SubscriptionConnection> {
        match self {
            Self::WebSocket(websocket) | Self::Split { websocket, .. } => Some(websocket),
            Self::Http(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_connection_kind_table() {
        let http = url("https://api.example.com/v1/graphql");
        let ws = url("wss://api.example.com/v1/graphql");

        assert_eq!(
            ConnectionKind::resolve(Some(&http), Some(&ws)).unwrap(),
            ConnectionKind::Both
        );
        assert_eq!(
            ConnectionKind::resolve(None, Some(&ws)).unwrap(),
            ConnectionKind::WebSocket
        );
        assert_eq!(
            ConnectionKind::resolve(Some(&http), None).unwrap(),
            ConnectionKind::Http
        );
    }

    #[test]
    fn test_no_endpoint_is_invalid() {
        let err = ConnectionKind::resolve(None, None).unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalid_schemes() {
        let err =
            ConnectionKind::resolve(Some(&url("ftp://api.example.com/graphql")), None).unwrap_err();
        let ClientError::InvalidConfiguration(message) = err else {
            panic!("expected InvalidConfiguration");
        };
        assert!(message.contains("ftp"));

        // An HTTP scheme on the WebSocket side is rejected, not coerced.
        let err = ConnectionKind::resolve(None, Some(&url("https://api.example.com/graphql")))
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_http_only_link_has_noop_teardown() {
        let (link, teardown) = Link::build(
            Some("https://api.example.com/v1/graphql"),
            None,
            HashMap::new(),
            TransportOptions::default(),
        )
        .unwrap();

        assert_eq!(link.kind(), ConnectionKind::Http);
        assert!(teardown.is_noop());
        assert!(link.websocket().is_none());
    }

    #[tokio::test]
    async fn test_noop_teardown_close_has_no_effect() {
        let (_, teardown) = Link::build(
            Some("https://api.example.com/v1/graphql"),
            None,
            HashMap::new(),
            TransportOptions::default(),
        )
        .unwrap();
        teardown.close().await;
        teardown.close().await;
    }

    #[test]
    fn test_split_link() {
        let (link, teardown) = Link::build(
            Some("https://api.example.com/v1/graphql"),
            Some("wss://api.example.com/v1/graphql"),
            HashMap::new(),
            TransportOptions::default(),
        )
        .unwrap();

        assert_eq!(link.kind(), ConnectionKind::Both);
        assert!(link.http().is_some());
        assert!(link.websocket().is_some());
        assert!(!teardown.is_noop());
    }

    #[test]
    fn test_build_rejects_unparsable_url() {
        let err = Link::build(
            Some("not a url"),
            None,
            HashMap::new(),
            TransportOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }
}
