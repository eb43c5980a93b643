//! # Subscription Registry
//!
//! The process-wide table of live warm-up obligations, keyed by request
//! fingerprint. All mutation funnels through the lifecycle consumer (one
//! writer, serialized), so the interior mutex is uncontended by design; it
//! exists so read-only views (snapshots, counts) can be taken from other
//! tasks without handing out the map itself.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::events::{JoinGroupPayload, SubscribePayload};
use crate::retrieve::executor::{Executor, WarmRequest};
use crate::utils::fingerprint::Fingerprint;

/// # Subscription
///
/// One live warm-up obligation: the request to replay, the call to replay it
/// with, and the bookkeeping the eviction policies run on.
#[derive(Clone)]
pub struct Subscription {
    /// Registry key (full fingerprint, or group fingerprint for parents).
    pub key: Fingerprint,
    /// The request replayed on every warm-up tick.
    pub origin: WarmRequest,
    /// The replayable upstream call.
    pub executor: Arc<dyn Executor>,
    /// Refresh period the subscription was scheduled with.
    pub refresh_interval: Duration,
    /// Key of the group this entry is a member of, for children.
    pub parent: Option<Fingerprint>,
    /// Membership map, present only on group (parent) entries: child key to
    /// last-seen timestamp.
    pub child_last_seen: HashMap<Fingerprint, DateTime<Utc>>,
    /// Field of `origin.data` holding the batched collection, on group
    /// entries and their children.
    pub batch_key: Option<String>,
    /// Consecutive failures since the last success.
    pub error_count: u32,
    /// True once a later registration was deduplicated onto this entry.
    pub is_duplicate: bool,
}

impl Subscription {
    /// Whether this entry owns a warm-up timer (no parent above it).
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether this entry is a batched group parent.
    pub fn is_group(&self) -> bool {
        self.parent.is_none() && self.batch_key.is_some()
    }

    /// Serializable mirror of this entry.
    pub fn record(&self) -> SubscriptionRecord {
        SubscriptionRecord {
            key: self.key.clone(),
            origin: self.origin.clone(),
            route: self.executor.route().to_string(),
            refresh_interval_ms: self.refresh_interval.as_millis() as u64,
            parent: self.parent.clone(),
            child_last_seen: self.child_last_seen.clone(),
            batch_key: self.batch_key.clone(),
            error_count: self.error_count,
            is_duplicate: self.is_duplicate,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("route", &self.executor.route())
            .field("refresh_interval", &self.refresh_interval)
            .field("parent", &self.parent)
            .field("children", &self.child_last_seen.len())
            .field("batch_key", &self.batch_key)
            .field("error_count", &self.error_count)
            .field("is_duplicate", &self.is_duplicate)
            .finish()
    }
}

/// # Subscription Record
///
/// The serialized form of a [`Subscription`]. Executors don't serialize;
/// their stable `route` string is persisted instead, and a resolver maps it
/// back to a live executor on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    /// Registry key.
    pub key: Fingerprint,
    /// The request replayed on every warm-up tick.
    pub origin: WarmRequest,
    /// Route identity of the executor that served this subscription.
    pub route: String,
    /// Refresh period in milliseconds.
    pub refresh_interval_ms: u64,
    /// Parent group key, for children.
    pub parent: Option<Fingerprint>,
    /// Membership map, for group entries.
    #[serde(default)]
    pub child_last_seen: HashMap<Fingerprint, DateTime<Utc>>,
    /// Batch field name, for group entries and their children.
    pub batch_key: Option<String>,
    /// Consecutive failures at snapshot time.
    pub error_count: u32,
    /// Deduplication marker at snapshot time.
    pub is_duplicate: bool,
}

/// Serializable registry state, for persistence across restarts and for
/// tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    /// All live entries, ordered by key.
    pub entries: Vec<SubscriptionRecord>,
}

/// # Registry
///
/// Fingerprint-keyed table of live subscriptions.
pub struct Registry {
    subscriptions: Mutex<HashMap<Fingerprint, Subscription>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.subscriptions.lock().expect("Registry lock poisoned").len()
    }

    /// Whether the registry has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.subscriptions
            .lock()
            .expect("Registry lock poisoned")
            .contains_key(key)
    }

    /// Clone of the entry for `key`, if any.
    pub fn get(&self, key: &Fingerprint) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .expect("Registry lock poisoned")
            .get(key)
            .cloned()
    }

    /// Upserts a subscription from a subscribe payload.
    ///
    /// A fresh key inserts a new entry. An existing key is a heartbeat: the
    /// origin and refresh interval are refreshed and the failure count
    /// cleared, but identity fields (`executor`, `parent`) and the live
    /// membership map are kept. Returns `true` for the heartbeat case.
    pub fn apply_subscribe(&self, payload: SubscribePayload, default_interval: Duration) -> bool {
        let key = payload.resolved_key();
        let interval = payload
            .max_age
            .filter(|age| !age.is_zero())
            .unwrap_or(default_interval);

        let mut subs = self.subscriptions.lock().expect("Registry lock poisoned");
        match subs.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.origin = payload.origin;
                entry.refresh_interval = interval;
                if payload.batch_key.is_some() {
                    entry.batch_key = payload.batch_key;
                }
                entry.error_count = 0;
                entry.is_duplicate = true;
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Subscription {
                    key,
                    origin: payload.origin,
                    executor: payload.executor,
                    refresh_interval: interval,
                    parent: payload.parent,
                    child_last_seen: payload.child_last_seen,
                    batch_key: payload.batch_key,
                    error_count: 0,
                    is_duplicate: false,
                });
                false
            }
        }
    }

    /// Merges members into an existing group entry: last-seen timestamps are
    /// upserted and each member's item unioned into the parent's batched
    /// origin. Returns `false` when the parent is unknown (benign race).
    pub fn apply_join(&self, payload: &JoinGroupPayload) -> bool {
        let mut subs = self.subscriptions.lock().expect("Registry lock poisoned");
        let Some(parent) = subs.get_mut(&payload.parent) else {
            return false;
        };

        for member in &payload.members {
            parent
                .child_last_seen
                .insert(member.key.clone(), member.seen_at);
            if let Some(items) = parent
                .origin
                .data
                .get_mut(payload.batch_key.as_str())
                .and_then(Value::as_array_mut)
            {
                if !items.contains(&member.item) {
                    items.push(member.item.clone());
                }
            }
        }
        true
    }

    /// Clears the failure count after a successful warm-up. Returns `false`
    /// when the entry is already gone (late completion).
    pub fn record_success(&self, key: &Fingerprint) -> bool {
        let mut subs = self.subscriptions.lock().expect("Registry lock poisoned");
        match subs.get_mut(key) {
            Some(entry) => {
                entry.error_count = 0;
                true
            }
            None => false,
        }
    }

    /// Increments the failure count after a failed warm-up and returns the
    /// new count. `None` when the entry is already gone (late completion).
    pub fn record_failure(&self, key: &Fingerprint) -> Option<u32> {
        let mut subs = self.subscriptions.lock().expect("Registry lock poisoned");
        let entry = subs.get_mut(key)?;
        entry.error_count += 1;
        Some(entry.error_count)
    }

    /// Removes and returns the entry for `key`.
    pub fn remove(&self, key: &Fingerprint) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .expect("Registry lock poisoned")
            .remove(key)
    }

    /// Removes a departed child from its parent's membership map and batched
    /// origin. Returns `false` when the parent is unknown.
    pub fn prune_member(&self, parent: &Fingerprint, batch_key: &str, child: &Subscription) -> bool {
        let mut subs = self.subscriptions.lock().expect("Registry lock poisoned");
        let Some(entry) = subs.get_mut(parent) else {
            return false;
        };

        entry.child_last_seen.remove(&child.key);
        if let Some(items) = entry
            .origin
            .data
            .get_mut(batch_key)
            .and_then(Value::as_array_mut)
        {
            if let Some(item) = child.origin.batch_item(batch_key) {
                items.retain(|existing| existing != &item);
            }
        }
        true
    }

    /// Number of items left under the parent's batch field. `None` when the
    /// parent is unknown; a missing or non-array field counts as empty.
    pub fn remaining_batch_len(&self, parent: &Fingerprint, batch_key: &str) -> Option<usize> {
        let subs = self.subscriptions.lock().expect("Registry lock poisoned");
        let entry = subs.get(parent)?;
        Some(
            entry
                .origin
                .data
                .get(batch_key)
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0),
        )
    }

    /// Key of the live group entry owned by `route`, if one exists.
    pub fn find_group_by_route(&self, route: &str) -> Option<Fingerprint> {
        let subs = self.subscriptions.lock().expect("Registry lock poisoned");
        subs.values()
            .find(|entry| entry.is_group() && entry.executor.route() == route)
            .map(|entry| entry.key.clone())
    }

    /// Serializable copy of the whole table, ordered by key.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let subs = self.subscriptions.lock().expect("Registry lock poisoned");
        let mut entries: Vec<SubscriptionRecord> =
            subs.values().map(Subscription::record).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        RegistrySnapshot { entries }
    }

    /// Reinserts a persisted entry verbatim, attaching the live executor
    /// resolved for its route. Failure counts survive the round trip.
    pub fn restore_record(&self, record: SubscriptionRecord, executor: Arc<dyn Executor>) {
        let mut subs = self.subscriptions.lock().expect("Registry lock poisoned");
        subs.insert(
            record.key.clone(),
            Subscription {
                key: record.key,
                origin: record.origin,
                executor,
                refresh_interval: Duration::from_millis(record.refresh_interval_ms),
                parent: record.parent,
                child_last_seen: record.child_last_seen,
                batch_key: record.batch_key,
                error_count: record.error_count,
                is_duplicate: record.is_duplicate,
            },
        );
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.subscriptions
            .lock()
            .expect("Registry lock poisoned")
            .clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
