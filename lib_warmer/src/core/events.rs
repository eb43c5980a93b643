//! # Warming Event Taxonomy
//!
//! Every state transition in the warming engine is expressed as a
//! [`WarmEvent`] on the internal bus. Components never call into each
//! other's state directly; they publish an event and the lifecycle consumer
//! applies it. This keeps the registry single-writer and makes the whole
//! engine observable from the outside through the event tap.
//!
//! ## Event Flow:
//!
//! 1.  **`Execute`** arrives from the host when an upstream call completes.
//! 2.  The establisher expands it into **`Subscribe`** (and, for batched
//!     calls, **`JoinGroup`**) traffic.
//! 3.  Scheduled timers emit **`Requested`**; the runner answers each tick
//!     with **`Fulfilled`** or **`Failed`**.
//! 4.  Eviction flows through **`Unsubscribe`** (demand-driven, prunes group
//!     membership), **`Stop`** (administrative, does not), and
//!     **`LeaveGroup`** (drained-group check).
//! 5.  **`TtlReset`** is purely observational: a fresh request renewed a
//!     subscription before its idle timeout fired.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::retrieve::executor::{ExecuteOutcome, Executor, SubResult, WarmRequest};
use crate::utils::fingerprint::Fingerprint;

/// # Execute Report
///
/// Inbound "this call just completed" notification: the original request
/// plus the outcome metadata that drives establishment. The payload itself
/// stays with the host's cache; the engine only needs the batching and
/// freshness hints.
#[derive(Clone)]
pub struct ExecuteReport {
    /// The request exactly as the host executed it.
    pub request: WarmRequest,
    /// The replayable call that produced the result.
    pub executor: Arc<dyn Executor>,
    /// Batch field name, when the route is batch-capable.
    pub batch_key: Option<String>,
    /// Result-level freshness override.
    pub max_age: Option<Duration>,
    /// Per-item breakdown of a batched response.
    pub sub_results: Vec<SubResult>,
}

impl ExecuteReport {
    /// Builds a report from a completed call and its outcome.
    pub fn from_outcome(
        request: WarmRequest,
        executor: Arc<dyn Executor>,
        outcome: &ExecuteOutcome,
    ) -> Self {
        Self {
            request,
            executor,
            batch_key: outcome.batch_key.clone(),
            max_age: outcome.max_age,
            sub_results: outcome.sub_results.clone(),
        }
    }
}

impl fmt::Debug for ExecuteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteReport")
            .field("request", &self.request)
            .field("route", &self.executor.route())
            .field("batch_key", &self.batch_key)
            .field("max_age", &self.max_age)
            .field("sub_results", &self.sub_results.len())
            .finish()
    }
}

/// # Subscribe Payload
///
/// Everything needed to create a subscription, or to renew one that already
/// exists (a heartbeat). The registry decides which of the two it is when
/// the event is applied.
#[derive(Clone)]
pub struct SubscribePayload {
    /// Explicit registry key. When absent, the key is the origin's full
    /// fingerprint; group subscriptions set it to the group fingerprint.
    pub key: Option<Fingerprint>,
    /// The request this subscription replays.
    pub origin: WarmRequest,
    /// The call to replay it with.
    pub executor: Arc<dyn Executor>,
    /// Result-level freshness carried over from establishment.
    pub max_age: Option<Duration>,
    /// Group this subscription belongs to, for members of a batch.
    pub parent: Option<Fingerprint>,
    /// Batch field name, for group subscriptions.
    pub batch_key: Option<String>,
    /// Membership carried by a restored group subscription. Any keys in
    /// here are from a previous incarnation and are cleared on application;
    /// live membership always arrives via [`WarmEvent::JoinGroup`].
    pub child_last_seen: HashMap<Fingerprint, DateTime<Utc>>,
}

impl SubscribePayload {
    /// Payload for a standalone (root) subscription keyed by its origin.
    pub fn root(origin: WarmRequest, executor: Arc<dyn Executor>, max_age: Option<Duration>) -> Self {
        Self {
            key: None,
            origin,
            executor,
            max_age,
            parent: None,
            batch_key: None,
            child_last_seen: HashMap::new(),
        }
    }

    /// Payload for a member of a batched group.
    pub fn child(
        origin: WarmRequest,
        executor: Arc<dyn Executor>,
        max_age: Option<Duration>,
        parent: Fingerprint,
        batch_key: String,
    ) -> Self {
        Self {
            key: None,
            origin,
            executor,
            max_age,
            parent: Some(parent),
            batch_key: Some(batch_key),
            child_last_seen: HashMap::new(),
        }
    }

    /// The registry key this payload lands under.
    pub fn resolved_key(&self) -> Fingerprint {
        self.key.clone().unwrap_or_else(|| self.origin.fingerprint())
    }
}

impl fmt::Debug for SubscribePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribePayload")
            .field("key", &self.key)
            .field("origin", &self.origin)
            .field("route", &self.executor.route())
            .field("parent", &self.parent)
            .field("batch_key", &self.batch_key)
            .field("children", &self.child_last_seen.len())
            .finish()
    }
}

/// One member carried by a join-group event.
#[derive(Debug, Clone)]
pub struct GroupMember {
    /// The member's own subscription key.
    pub key: Fingerprint,
    /// The member's value under the group's batch field (e.g. one symbol).
    pub item: Value,
    /// When the member was last requested.
    pub seen_at: DateTime<Utc>,
}

/// # Join Group Payload
///
/// Merges members into an existing group subscription: their items are
/// unioned into the parent's batched origin and their last-seen timestamps
/// recorded. Joining also counts as demand for the group itself.
#[derive(Debug, Clone)]
pub struct JoinGroupPayload {
    /// Key of the group subscription being joined.
    pub parent: Fingerprint,
    /// Field of the parent's origin holding the batched collection.
    pub batch_key: String,
    /// Members to merge in.
    pub members: Vec<GroupMember>,
}

/// # Warm Event
///
/// The full vocabulary of the warming bus. Everything the engine does is one
/// of these.
#[derive(Debug, Clone)]
pub enum WarmEvent {
    /// A host upstream call completed; establish warming for it.
    Execute(ExecuteReport),
    /// Create a subscription, or renew it if it already exists.
    Subscribe(SubscribePayload),
    /// Merge members into an existing group subscription.
    JoinGroup(JoinGroupPayload),
    /// A warm-up timer fired for this key; refresh it now.
    Requested {
        /// Subscription due for refresh.
        key: Fingerprint,
    },
    /// A warm-up invocation succeeded.
    Fulfilled {
        /// Subscription that was refreshed.
        key: Fingerprint,
    },
    /// A warm-up invocation failed.
    Failed {
        /// Subscription whose refresh failed.
        key: Fingerprint,
        /// Rendered error chain from the executor.
        reason: String,
    },
    /// Remove a subscription because demand for it ended. Members leaving a
    /// group this way are pruned from the parent's batch.
    Unsubscribe {
        /// Subscription to remove.
        key: Fingerprint,
    },
    /// Remove a subscription administratively, without touching any group
    /// it belongs to.
    Stop {
        /// Subscription to remove.
        key: Fingerprint,
    },
    /// A member left the named group; check whether the group drained.
    LeaveGroup {
        /// Key of the group subscription.
        parent: Fingerprint,
        /// Batch field of the group's origin.
        batch_key: String,
    },
    /// A fresh request renewed this subscription before its idle timeout
    /// fired. Observational only.
    TtlReset {
        /// Subscription that was renewed.
        key: Fingerprint,
    },
}

impl WarmEvent {
    /// The subscription key this event is about, when it names exactly one.
    pub fn key(&self) -> Option<&Fingerprint> {
        match self {
            WarmEvent::Execute(_) | WarmEvent::JoinGroup(_) => None,
            WarmEvent::Subscribe(payload) => payload.key.as_ref(),
            WarmEvent::Requested { key }
            | WarmEvent::Fulfilled { key }
            | WarmEvent::Failed { key, .. }
            | WarmEvent::Unsubscribe { key }
            | WarmEvent::Stop { key }
            | WarmEvent::TtlReset { key } => Some(key),
            WarmEvent::LeaveGroup { parent, .. } => Some(parent),
        }
    }

    /// Short lowercase tag for logs and event filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            WarmEvent::Execute(_) => "execute",
            WarmEvent::Subscribe(_) => "subscribe",
            WarmEvent::JoinGroup(_) => "join-group",
            WarmEvent::Requested { .. } => "requested",
            WarmEvent::Fulfilled { .. } => "fulfilled",
            WarmEvent::Failed { .. } => "failed",
            WarmEvent::Unsubscribe { .. } => "unsubscribe",
            WarmEvent::Stop { .. } => "stop",
            WarmEvent::LeaveGroup { .. } => "leave-group",
            WarmEvent::TtlReset { .. } => "timeout-reset",
        }
    }
}
