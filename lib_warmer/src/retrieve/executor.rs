//! # Executor Contract
//!
//! The boundary between the warming engine and the host application. A host
//! wraps each re-invocable upstream call in an [`Executor`] and hands it over
//! together with the request that just completed; from then on the engine
//! replays the call on its own schedule to keep the cached result fresh.
//!
//! Executors are identified by their [`Executor::route`] string. The engine
//! relies on route equality to recognize that two requests belong to the same
//! upstream endpoint, and to re-attach executors to subscriptions restored
//! from a persisted snapshot.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::fingerprint::{self, Fingerprint};

/// # Warm Request
///
/// The canonical shape of an upstream request: a stable route identifier plus
/// the parameter payload that was sent with it. This is what executors are
/// re-invoked with and what the registry stores as a subscription's origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmRequest {
    /// Stable identifier of the endpoint this request targets.
    pub id: String,
    /// Parameter payload. For batched requests, one field of this object
    /// holds the batchable collection (see [`ExecuteOutcome::batch_key`]).
    pub data: Value,
}

impl WarmRequest {
    /// Creates a request from a route identifier and a parameter payload.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), data }
    }

    /// Fingerprint over the full semantic content (identifier and payload).
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint::fingerprint(&self.id, &self.data)
    }

    /// Fingerprint over the identifier alone; shared by every request
    /// against the same route. Batched (group) subscriptions are keyed by
    /// this.
    pub fn group_fingerprint(&self) -> Fingerprint {
        fingerprint::group_fingerprint(&self.id)
    }

    /// Extracts this request's value under the batch field.
    ///
    /// Single-element arrays are unwrapped to the element itself, so a
    /// request shaped `{"symbols": ["BTC"]}` contributes the item `"BTC"`
    /// to its group. Returns `None` when the field is absent.
    pub fn batch_item(&self, batch_key: &str) -> Option<Value> {
        match self.data.get(batch_key)? {
            Value::Array(items) if items.len() == 1 => Some(items[0].clone()),
            other => Some(other.clone()),
        }
    }

    /// Returns a copy of this request with the batch field coerced to an
    /// array, the shape a group subscription's origin is kept in.
    pub fn batch_shaped(&self, batch_key: &str) -> WarmRequest {
        let mut shaped = self.clone();
        if let Some(value) = shaped.data.get_mut(batch_key) {
            if !value.is_array() {
                *value = Value::Array(vec![value.take()]);
            }
        }
        shaped
    }
}

impl fmt::Display for WarmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.data)
    }
}

/// # Cache Mode
///
/// Directive attached to every executor invocation, telling the host-side
/// call how to treat its own cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Serve from cache when a fresh entry exists.
    Standard,
    /// Treat any cached entry as already expired. Warm-up invocations always
    /// use this so the call reaches the upstream provider and rewrites the
    /// cache with a fresh result.
    Bypass,
}

/// One per-item result of a batched upstream call: the single-item request
/// that would have produced it, and its position in the batched response.
#[derive(Debug, Clone, PartialEq)]
pub struct SubResult {
    /// The equivalent single-item request for this slice of the response.
    pub request: WarmRequest,
    /// Zero-based position of the item in the batched response.
    pub index: usize,
}

/// # Execute Outcome
///
/// What an executor reports back after a call completes. Besides the payload
/// itself it carries the metadata that drives subscription establishment:
/// whether the call was batched, how long the result stays fresh, and the
/// per-item breakdown of a batched response.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOutcome {
    /// Response body, already normalized by the host.
    pub payload: Value,
    /// Names the field of the request `data` that holds the batchable
    /// collection. Present only for batch-capable routes.
    pub batch_key: Option<String>,
    /// Result-level freshness. When present and non-zero it overrides the
    /// configured warm-up interval for subscriptions made from this outcome.
    pub max_age: Option<Duration>,
    /// Ordered per-item sub-results of a batched response.
    pub sub_results: Vec<SubResult>,
}

impl ExecuteOutcome {
    /// Creates an outcome carrying just a response payload.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Marks the outcome as batched over the named request field.
    pub fn with_batch_key(mut self, batch_key: impl Into<String>) -> Self {
        self.batch_key = Some(batch_key.into());
        self
    }

    /// Sets the result-level freshness window.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Appends one per-item sub-result of a batched response.
    pub fn with_sub_result(mut self, request: WarmRequest, index: usize) -> Self {
        self.sub_results.push(SubResult { request, index });
        self
    }
}

/// # Executor
///
/// A re-invocable upstream call. Implementations wrap whatever client the
/// host uses (HTTP, database, message bus) behind a uniform async interface
/// the engine can replay without knowing anything about the transport.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable identity of the originating route.
    ///
    /// Two subscriptions share an upstream call exactly when their routes
    /// are equal, and snapshots persist this string so a resolver can find
    /// the executor again after a restart. It must not change across runs.
    fn route(&self) -> &str;

    /// Executes the request against the upstream provider.
    ///
    /// With [`CacheMode::Bypass`] the call must go through to the provider
    /// even when a cached result exists. Errors are reported as-is; the
    /// engine counts consecutive failures per subscription and evicts
    /// entries that stay unhealthy.
    async fn execute(&self, request: WarmRequest, cache: CacheMode) -> anyhow::Result<ExecuteOutcome>;
}

/// # Executor Fn
///
/// Adapter that turns an async closure into an [`Executor`], for hosts that
/// don't want to define a named type per route.
pub struct ExecutorFn<F> {
    route: String,
    call: F,
}

impl<F, Fut> ExecutorFn<F>
where
    F: Fn(WarmRequest, CacheMode) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ExecuteOutcome>> + Send + 'static,
{
    /// Wraps an async closure under the given route identity.
    pub fn new(route: impl Into<String>, call: F) -> Self {
        Self {
            route: route.into(),
            call,
        }
    }

    /// Convenience for the common case: wrap and immediately erase to a
    /// shared [`Executor`] handle.
    pub fn arc(route: impl Into<String>, call: F) -> Arc<dyn Executor> {
        Arc::new(Self::new(route, call))
    }
}

#[async_trait]
impl<F, Fut> Executor for ExecutorFn<F>
where
    F: Fn(WarmRequest, CacheMode) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecuteOutcome>> + Send,
{
    fn route(&self) -> &str {
        &self.route
    }

    async fn execute(&self, request: WarmRequest, cache: CacheMode) -> anyhow::Result<ExecuteOutcome> {
        (self.call)(request, cache).await
    }
}

/// # Executor Resolver
///
/// Maps persisted route strings back to live executors when restoring a
/// registry snapshot. Entries whose route cannot be resolved are skipped
/// during restore and logged.
pub trait ExecutorResolver {
    /// Returns the executor registered for `route`, if any.
    fn resolve(&self, route: &str) -> Option<Arc<dyn Executor>>;
}

/// The obvious resolver: a map from route strings to executors.
impl ExecutorResolver for HashMap<String, Arc<dyn Executor>> {
    fn resolve(&self, route: &str) -> Option<Arc<dyn Executor>> {
        self.get(route).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn executor_fn_adapts_a_closure() {
        // 1. Wrap a closure that echoes the requested symbol.
        let executor = ExecutorFn::arc("markets/quote", |request: WarmRequest, cache| async move {
            assert_eq!(cache, CacheMode::Bypass);
            Ok(ExecuteOutcome::new(json!({ "echo": request.data })))
        });

        // 2. Route identity comes from the wrapper.
        assert_eq!(executor.route(), "markets/quote");

        // 3. The call goes through to the closure.
        let request = WarmRequest::new("markets/quote", json!({"symbol": "BTC"}));
        let outcome = executor
            .execute(request, CacheMode::Bypass)
            .await
            .unwrap();
        assert_eq!(outcome.payload, json!({"echo": {"symbol": "BTC"}}));
    }

    #[test]
    fn batch_item_unwraps_single_element_arrays() {
        let request = WarmRequest::new("markets/quotes", json!({"symbols": ["BTC"]}));
        assert_eq!(request.batch_item("symbols"), Some(json!("BTC")));

        let plain = WarmRequest::new("markets/quotes", json!({"symbols": "BTC"}));
        assert_eq!(plain.batch_item("symbols"), Some(json!("BTC")));

        let missing = WarmRequest::new("markets/quotes", json!({"other": 1}));
        assert_eq!(missing.batch_item("symbols"), None);
    }

    #[test]
    fn batch_shaped_coerces_the_field_to_an_array() {
        // 1. A scalar batch field becomes a one-element array.
        let request = WarmRequest::new("markets/quotes", json!({"symbols": "BTC", "fresh": true}));
        let shaped = request.batch_shaped("symbols");
        assert_eq!(shaped.data, json!({"symbols": ["BTC"], "fresh": true}));

        // 2. An already-array field is left untouched.
        let request = WarmRequest::new("markets/quotes", json!({"symbols": ["BTC", "ETH"]}));
        let shaped = request.batch_shaped("symbols");
        assert_eq!(shaped.data, json!({"symbols": ["BTC", "ETH"]}));
    }

    #[test]
    fn resolver_map_round_trips_by_route() {
        let executor = ExecutorFn::arc("markets/quote", |_request, _cache| async {
            Ok(ExecuteOutcome::default())
        });
        let mut routes: HashMap<String, Arc<dyn Executor>> = HashMap::new();
        routes.insert(executor.route().to_string(), Arc::clone(&executor));

        assert!(routes.resolve("markets/quote").is_some());
        assert!(routes.resolve("markets/depth").is_none());
    }
}
