//! GraphQL request types.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The top-level kind of a GraphQL operation.
///
/// The kind is decided once when the request is constructed and drives
/// transport routing: subscriptions go over the WebSocket link, everything
/// else over HTTP (when both are configured).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only).
    #[default]
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (streams results over a persistent connection).
    Subscription,
}

/// A GraphQL request: document text, variables, and optional metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLRequest {
    /// The GraphQL document text.
    pub query: String,

    /// Optional variables for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Optional operation name (for documents with multiple operations).
    #[serde(skip_serializing_if = "Option::is_none", rename = "operationName")]
    pub operation_name: Option<String>,

    /// Extensions (implementation-specific metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,

    #[serde(skip)]
    pub(crate) operation_type: OperationType,
}

impl GraphQLRequest {
    /// Create a query request.
    pub fn query(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Query)
    }

    /// Create a mutation request.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Mutation)
    }

    /// Create a subscription request.
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Subscription)
    }

    /// Create a request from a raw document, inferring the operation kind
    /// from the document's first definition.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let operation_type = infer_operation_type(&query);
        Self {
            query,
            variables: None,
            operation_name: None,
            extensions: None,
            operation_type,
        }
    }

    fn with_type(query: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
            extensions: None,
            operation_type,
        }
    }

    /// Set a single variable value.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Set all variables from a serializable value.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        self.variables = serde_json::to_value(variables).ok();
        self
    }

    /// Set variables from a map.
    pub fn variables_map(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = Some(Value::Object(variables.into_iter().collect()));
        self
    }

    /// Set the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set extensions metadata.
    pub fn extensions(mut self, extensions: impl Serialize) -> Self {
        self.extensions = serde_json::to_value(extensions).ok();
        self
    }

    /// The operation kind of this request.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Check if this is a subscription.
    pub fn is_subscription(&self) -> bool {
        self.operation_type == OperationType::Subscription
    }

    /// A stable fingerprint of the document, variables, and operation name,
    /// used as the cache key for this request.
    pub(crate) fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.query.hash(&mut hasher);
        if let Some(ref variables) = self.variables {
            variables.to_string().hash(&mut hasher);
        }
        if let Some(ref name) = self.operation_name {
            name.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}

/// Decide the operation kind from the first meaningful token of a document.
///
/// Comments and whitespace are skipped; a document starting with `{` is a
/// query in shorthand form. This is the full extent of document inspection —
/// no other validation or parsing happens in this crate.
fn infer_operation_type(document: &str) -> OperationType {
    for line in document.lines() {
        let line = match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('{') {
            return OperationType::Query;
        }
        let keyword: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
            .collect();
        return match keyword.as_str() {
            "mutation" => OperationType::Mutation,
            "subscription" => OperationType::Subscription,
            _ => OperationType::Query,
        };
    }
    OperationType::Query
}

/// Introspection query returning the schema's root operation types.
pub const ROOT_TYPES_QUERY: &str = r"
    query RootTypes {
        __schema {
            queryType { name }
            mutationType { name }
            subscriptionType { name }
        }
    }
";
