//! Cache selection and per-operation default policies.
//!
//! A cache mode picks both the cache instance and the default request
//! policies in one step, so the two can never be combined across modes. The
//! `None` mode still allocates a real cache object — the distinction between
//! `Memory` and `None` lives entirely in the fetch policy, which never reads
//! from or writes to the cache in `None` mode.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Result;
use crate::response::GraphQLResponse;

/// A rule governing whether an operation reads from cache, network, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Return the cached response when present; hit the network otherwise.
    CacheFirst,
    /// Emit the cached response (for watched queries), then always hit the
    /// network and refresh the cache.
    CacheAndNetwork,
    /// Always hit the network; refresh the cache with the result.
    NetworkOnly,
    /// Always hit the network; never touch the cache.
    NoCache,
}

impl FetchPolicy {
    /// Whether this policy consults the cache before the network.
    pub fn reads_cache(self) -> bool {
        matches!(self, Self::CacheFirst | Self::CacheAndNetwork)
    }

    /// Whether network results are written back to the cache.
    pub fn writes_cache(self) -> bool {
        !matches!(self, Self::NoCache)
    }
}

/// A rule governing how partial-success responses (data + errors) surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// GraphQL errors fail the call.
    None,
    /// Data and errors are surfaced together.
    All,
    /// Errors are dropped; only data is surfaced.
    Ignore,
}

impl ErrorPolicy {
    /// Apply this policy to a response.
    pub(crate) fn apply(self, response: GraphQLResponse) -> Result<GraphQLResponse> {
        match self {
            Self::None => response.into_result(),
            Self::All => Ok(response),
            Self::Ignore => Ok(response.without_errors()),
        }
    }
}

/// Default policies for one class of operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationOptions {
    /// Fetch policy, when set.
    pub fetch_policy: Option<FetchPolicy>,
    /// Error policy, when set.
    pub error_policy: Option<ErrorPolicy>,
}

impl OperationOptions {
    fn merged_with(self, overrides: Self) -> Self {
        Self {
            fetch_policy: overrides.fetch_policy.or(self.fetch_policy),
            error_policy: overrides.error_policy.or(self.error_policy),
        }
    }
}

/// Default policies per operation class.
///
/// Unset fields fall back to the crate defaults at call time
/// ([`FetchPolicy::CacheFirst`], [`ErrorPolicy::None`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultOptions {
    /// Policies for watched queries.
    pub watch_query: OperationOptions,
    /// Policies for one-shot queries.
    pub query: OperationOptions,
    /// Policies for mutations.
    pub mutation: OperationOptions,
}

impl DefaultOptions {
    /// Merge caller overrides over these options, field by field.
    pub fn merged_with(self, overrides: Self) -> Self {
        Self {
            watch_query: self.watch_query.merged_with(overrides.watch_query),
            query: self.query.merged_with(overrides.query),
            mutation: self.mutation.merged_with(overrides.mutation),
        }
    }
}

/// A cache for query responses and the entities they contain.
///
/// Implement this to plug a custom store into [`CacheMode::Custom`]. Keys are
/// request fingerprints; entities are keyed by their `id` field alone, with
/// no type-based key augmentation.
pub trait QueryCache: Send + Sync {
    /// Read the cached response for a request fingerprint.
    fn read(&self, key: &str) -> Option<GraphQLResponse>;

    /// Store a response under a request fingerprint.
    fn write(&self, key: &str, response: &GraphQLResponse);

    /// Read a cached entity by its `id` value.
    fn entity(&self, id: &str) -> Option<Value>;

    /// Drop all cached responses and entities.
    fn clear(&self);
}

/// In-memory [`QueryCache`] implementation.
#[derive(Default)]
pub struct MemoryCache {
    responses: RwLock<HashMap<String, GraphQLResponse>>,
    entities: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn index_entities(&self, value: &Value) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(id)) = map.get("id") {
                    self.entities.write().insert(id.clone(), value.clone());
                }
                for child in map.values() {
                    self.index_entities(child);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.index_entities(item);
                }
            }
            _ => {}
        }
    }
}

impl QueryCache for MemoryCache {
    fn read(&self, key: &str) -> Option<GraphQLResponse> {
        self.responses.read().get(key).cloned()
    }

    fn write(&self, key: &str, response: &GraphQLResponse) {
        if let Some(ref data) = response.data {
            self.index_entities(data);
        }
        self.responses
            .write()
            .insert(key.to_string(), response.clone());
    }

    fn entity(&self, id: &str) -> Option<Value> {
        self.entities.read().get(id).cloned()
    }

    fn clear(&self) {
        self.responses.write().clear();
        self.entities.write().clear();
    }
}

/// Selects the cache implementation and the matching default policies.
#[derive(Clone, Default)]
pub enum CacheMode {
    /// In-memory cache; queries read the cache and refresh from the network.
    Memory,
    /// Caching disabled through policy; a cache object still backs the
    /// client because one is always required.
    #[default]
    None,
    /// A caller-supplied cache implementation. Policies stay unset so the
    /// caller configures them through the default-options override.
    Custom(Arc<dyn QueryCache>),
}

impl fmt::Debug for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "Memory"),
            Self::None => write!(f, "None"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl CacheMode {
    /// Build the cache instance for this mode.
    pub fn build_cache(&self) -> Arc<dyn QueryCache> {
        match self {
            Self::Memory | Self::None => Arc::new(MemoryCache::new()),
            Self::Custom(cache) => Arc::clone(cache),
        }
    }

    /// The default request policies paired with this mode.
    pub fn default_options(&self) -> DefaultOptions {
        match self {
            Self::Memory => DefaultOptions {
                watch_query: OperationOptions {
                    fetch_policy: Some(FetchPolicy::CacheAndNetwork),
                    error_policy: Some(ErrorPolicy::All),
                },
                query: OperationOptions {
                    fetch_policy: Some(FetchPolicy::CacheAndNetwork),
                    error_policy: Some(ErrorPolicy::All),
                },
                mutation: OperationOptions {
                    fetch_policy: None,
                    error_policy: Some(ErrorPolicy::All),
                },
            },
            Self::None => DefaultOptions {
                watch_query: OperationOptions {
                    fetch_policy: Some(FetchPolicy::NoCache),
                    error_policy: None,
                },
                query: OperationOptions {
                    fetch_policy: Some(FetchPolicy::NoCache),
                    error_policy: None,
                },
                mutation: OperationOptions::default(),
            },
            Self::Custom(_) => DefaultOptions::default(),
        }
    }

    /// Cache instance and default options, derived together from one mode.
    pub(crate) fn materialize(&self) -> (Arc<dyn QueryCache>, DefaultOptions) {
        (self.build_cache(), self.default_options())
    }
}
