//! Error types for client construction and operation execution.

use std::fmt;

use crate::response::GraphQLError;

/// Errors produced while building or using a client.
#[derive(Debug, Clone)]
pub enum ClientError {
    /// The client configuration is invalid (bad endpoint scheme, missing
    /// endpoint, or an otherwise unusable combination of settings).
    InvalidConfiguration(String),
    /// Invalid URL provided.
    InvalidUrl(String),
    /// Invalid header name or value.
    InvalidHeader(String),
    /// HTTP request failed.
    Request(String),
    /// Connection refused or failed.
    Connection(String),
    /// Request or handshake timed out.
    Timeout,
    /// HTTP error status (4xx or 5xx).
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Optional error message from the response body.
        message: Option<String>,
    },
    /// JSON serialization/deserialization error.
    Json(String),
    /// Invalid response body.
    InvalidBody(String),
    /// WebSocket error.
    WebSocket(String),
    /// Errors returned by the GraphQL server.
    Graphql(Vec<GraphQLError>),
    /// The client has been shut down.
    Closed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
            Self::InvalidHeader(msg) => write!(f, "Invalid header: {msg}"),
            Self::Request(msg) => write!(f, "HTTP request error: {msg}"),
            Self::Connection(msg) => write!(f, "Connection error: {msg}"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::HttpStatus { status, message } => {
                if let Some(msg) = message {
                    write!(f, "HTTP {status}: {msg}")
                } else {
                    write!(f, "HTTP {status}")
                }
            }
            Self::Json(msg) => write!(f, "JSON error: {msg}"),
            Self::InvalidBody(msg) => write!(f, "Invalid response body: {msg}"),
            Self::WebSocket(msg) => write!(f, "WebSocket error: {msg}"),
            Self::Graphql(errors) => {
                let combined = errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "GraphQL error: {combined}")
            }
            Self::Closed => write!(f, "Client has been shut down"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// A specialized Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
