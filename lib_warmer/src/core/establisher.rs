//! # Subscription Establisher
//!
//! Expands a completed upstream call into the subscription traffic that
//! keeps its result warm. An individual call becomes one root subscription
//! keyed by its own fingerprint. A batched call becomes a group: one parent
//! subscription keyed by a fingerprint that excludes the per-batch payload,
//! one child subscription per sub-result, and a join-group event recording
//! the membership.
//!
//! The establisher only decides *what* to subscribe; it emits events and
//! never touches the registry itself. Its single read (is there already a
//! live group for this route?) is what makes repeated batched calls join
//! the existing parent instead of minting a new one.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use super::events::{ExecuteReport, GroupMember, JoinGroupPayload, SubscribePayload, WarmEvent};
use super::registry::Registry;

/// Errors that abort establishment of one report. The report is dropped;
/// the pipeline itself is unaffected.
#[derive(Debug, Error)]
pub enum EstablishError {
    /// A batched result arrived whose request has no value under the batch
    /// field the result named.
    #[error("batched result for route '{route}' is missing batch field '{batch_key}' in its request data")]
    BatchFieldMissing {
        /// Route of the offending executor.
        route: String,
        /// The batch field the result claimed.
        batch_key: String,
    },
}

/// Turns completed execute reports into subscribe/join-group events.
pub struct Establisher;

impl Establisher {
    /// Expands one report into the events that establish warming for it.
    ///
    /// `registry` is read to dedupe group parents by route; all writes
    /// happen later, when the returned events are applied.
    pub fn establish(
        &self,
        registry: &Registry,
        report: ExecuteReport,
    ) -> Result<Vec<WarmEvent>, EstablishError> {
        let Some(batch_key) = report.batch_key.clone() else {
            // Individual result: one root subscription for the request
            // itself.
            return Ok(vec![WarmEvent::Subscribe(SubscribePayload::root(
                report.request,
                report.executor,
                report.max_age,
            ))]);
        };

        if report.request.data.get(&batch_key).is_none() {
            return Err(EstablishError::BatchFieldMissing {
                route: report.executor.route().to_string(),
                batch_key,
            });
        }

        let mut events = Vec::with_capacity(report.sub_results.len() + 2);

        // Reuse the live group for this route when one exists; otherwise
        // mint one keyed by the fingerprint that excludes the data payload.
        let existing = registry.find_group_by_route(report.executor.route());
        let group_key = existing
            .clone()
            .unwrap_or_else(|| report.request.group_fingerprint());

        if existing.is_none() {
            let mut parent = SubscribePayload::root(
                report.request.batch_shaped(&batch_key),
                Arc::clone(&report.executor),
                report.max_age,
            );
            parent.key = Some(group_key.clone());
            parent.batch_key = Some(batch_key.clone());
            events.push(WarmEvent::Subscribe(parent));
        }

        let now = Utc::now();
        let mut members = Vec::with_capacity(report.sub_results.len());
        for sub_result in &report.sub_results {
            let child_key = sub_result.request.fingerprint();
            members.push(GroupMember {
                key: child_key.clone(),
                item: sub_result
                    .request
                    .batch_item(&batch_key)
                    .unwrap_or(Value::Null),
                seen_at: now,
            });

            let mut child = SubscribePayload::child(
                sub_result.request.clone(),
                Arc::clone(&report.executor),
                report.max_age,
                group_key.clone(),
                batch_key.clone(),
            );
            child.key = Some(child_key);
            events.push(WarmEvent::Subscribe(child));
        }

        events.push(WarmEvent::JoinGroup(JoinGroupPayload {
            parent: group_key,
            batch_key,
            members,
        }));
        Ok(events)
    }
}
