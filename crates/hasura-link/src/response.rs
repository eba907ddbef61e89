//! GraphQL response types.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::ClientError;

/// An error returned by the GraphQL server, as defined by the GraphQL
/// response format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GraphQLError {}

/// A location in a GraphQL document (1-indexed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphQLLocation {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

/// A GraphQL response: data, errors, or both (partial success).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// The data returned by the operation.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors that occurred during execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// Additional response metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    /// Check if the response contains errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// All error messages joined into one string.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }

    /// Deserialize the response data as `T`.
    ///
    /// Fails if the server reported errors or if there is no data.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        if self.has_errors() {
            return Err(ClientError::Graphql(self.errors.clone()));
        }
        match &self.data {
            Some(data) => serde_json::from_value(data.clone())
                .map_err(|e| ClientError::Json(format!("failed to deserialize response: {e}"))),
            None => Err(ClientError::InvalidBody(
                "no data in GraphQL response".into(),
            )),
        }
    }

    /// Deserialize a single field of the response data as `T`.
    ///
    /// For a response like `{"data": {"user": {...}}}`, `field("user")`
    /// deserializes the inner object.
    pub fn field<T: DeserializeOwned>(&self, field: &str) -> Result<T, ClientError> {
        if self.has_errors() {
            return Err(ClientError::Graphql(self.errors.clone()));
        }
        match &self.data {
            Some(Value::Object(data)) => {
                let value = data.get(field).ok_or_else(|| {
                    ClientError::InvalidBody(format!("field '{field}' not found in response"))
                })?;
                serde_json::from_value(value.clone()).map_err(|e| {
                    ClientError::Json(format!("failed to deserialize field '{field}': {e}"))
                })
            }
            Some(_) => Err(ClientError::InvalidBody(
                "response data is not an object".into(),
            )),
            None => Err(ClientError::InvalidBody(
                "no data in GraphQL response".into(),
            )),
        }
    }

    /// Convert into a Result, failing when the server reported errors.
    pub fn into_result(self) -> Result<Self, ClientError> {
        if self.has_errors() {
            Err(ClientError::Graphql(self.errors))
        } else {
            Ok(self)
        }
    }

    /// The same response with server errors dropped.
    pub fn without_errors(mut self) -> Self {
        self.errors.clear();
        self
    }
}
