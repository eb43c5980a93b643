//! # Lifecycle Manager
//!
//! The single consumer of the warming pipeline and the only writer the
//! registry ever sees. Every event is both a policy input and a state
//! transition, applied here one at a time, in arrival order; components
//! that want something changed publish an event and let it serialize
//! through this loop.
//!
//! ## Eviction Policies:
//!
//! 1.  **Error-threshold**: a success clears the failure count; a failure
//!     increments it, and the increment that reaches the configured
//!     threshold emits exactly one unsubscribe for the key.
//! 2.  **TTL-since-last-seen**: every subscribe arms a delayed unsubscribe
//!     and cancels the previous one, so only the timer from the *last*
//!     subscribe can ever fire. A key renewed faster than the TTL lives
//!     forever; one that stops being renewed is dropped exactly one TTL
//!     after its last subscribe.
//! 3.  **Group-drained**: a subscribe carrying prior membership stops every
//!     listed child once, clearing stale entries left from group key reuse
//!     across restarts.
//! 4.  **Leave-group cleanup**: when a departed member empties its group's
//!     batch collection, the now-useless parent is unsubscribed too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::bus::EventBus;
use super::establisher::Establisher;
use super::events::{ExecuteReport, JoinGroupPayload, SubscribePayload, WarmEvent};
use super::registry::{Registry, RegistrySnapshot};
use super::runner::Runner;
use super::scheduler::Scheduler;
use crate::configs::options::WarmerOptions;
use crate::retrieve::executor::ExecutorResolver;
use crate::utils::fingerprint::Fingerprint;

/// Per-key delayed unsubscribes implementing the last-seen race. Arming a
/// key cancels whatever timer was live for it, so at most one delayed
/// unsubscribe exists per key and it always measures from the newest
/// subscribe.
struct TtlTimers {
    armed: HashMap<Fingerprint, CancellationToken>,
    bus: EventBus,
    ttl: Duration,
}

impl TtlTimers {
    fn new(bus: EventBus, ttl: Duration) -> Self {
        Self {
            armed: HashMap::new(),
            bus,
            ttl,
        }
    }

    /// Arms (or re-arms) the idle timeout for `key`. Returns `true` when a
    /// live timer was replaced, i.e. the key won its reset race.
    fn arm(&mut self, key: &Fingerprint) -> bool {
        let replaced = self.cancel(key);

        let token = CancellationToken::new();
        self.armed.insert(key.clone(), token.clone());
        let bus = self.bus.clone();
        let ttl = self.ttl;
        let key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                // If token is cancelled, the key was re-subscribed in time
                _ = token.cancelled() => {
                    log::debug!("Idle timeout reset for {}", key);
                },
                _ = sleep(ttl) => {
                    bus.publish(WarmEvent::Unsubscribe { key });
                }
            }
        });
        replaced
    }

    fn cancel(&mut self, key: &Fingerprint) -> bool {
        match self.armed.remove(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&mut self) {
        for (_, token) in self.armed.drain() {
            token.cancel();
        }
    }
}

/// # Lifecycle Manager
///
/// Owns the registry's write side, the warm-up scheduler and the TTL
/// timers, and drives all of them from the event pipeline.
pub struct LifecycleManager {
    registry: Arc<Registry>,
    bus: EventBus,
    establisher: Establisher,
    scheduler: Scheduler,
    runner: Runner,
    ttl: TtlTimers,
    options: WarmerOptions,
    shutdown: CancellationToken,
}

impl LifecycleManager {
    /// Wires a manager around a shared registry and bus. `options` are
    /// expected to be normalized.
    pub fn new(
        registry: Arc<Registry>,
        bus: EventBus,
        options: WarmerOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let scheduler = Scheduler::new(bus.clone());
        let runner = Runner::new(Arc::clone(&registry), bus.clone());
        let ttl = TtlTimers::new(bus.clone(), options.subscription_ttl());
        Self {
            registry,
            bus,
            establisher: Establisher,
            scheduler,
            runner,
            ttl,
            options,
            shutdown,
        }
    }

    /// Seeds restored state before the run loop starts.
    ///
    /// Entries go in verbatim (failure counts and linkage survive), roots
    /// get their warm-up timers back, and every key starts a fresh idle
    /// window. Records whose route has no registered executor are skipped.
    pub fn seed(&mut self, snapshot: RegistrySnapshot, resolver: &dyn ExecutorResolver) {
        let mut restored: usize = 0;
        let mut skipped: usize = 0;
        for record in snapshot.entries {
            let Some(executor) = resolver.resolve(&record.route) else {
                log::warn!(
                    "No executor registered for route '{}'; dropping subscription {}",
                    record.route,
                    record.key
                );
                skipped += 1;
                continue;
            };

            let key = record.key.clone();
            let is_root = record.parent.is_none();
            let interval = Duration::from_millis(record.refresh_interval_ms);
            let failures = record.error_count;
            self.registry.restore_record(record, executor);

            // A snapshot can be taken after the failure that reached the
            // threshold but before its eviction was applied. Replay the
            // lost eviction instead of warming an entry that already
            // earned removal; the live path only ever emits on the
            // increment that reaches the threshold.
            if failures >= self.options.unhealthy_threshold {
                log::warn!(
                    "Restored {} is already unhealthy ({} consecutive failures); unsubscribing",
                    key,
                    failures
                );
                self.bus.publish(WarmEvent::Unsubscribe { key });
                restored += 1;
                continue;
            }

            if is_root {
                self.scheduler.start(key.clone(), interval);
            }
            self.ttl.arm(&key);
            restored += 1;
        }
        log::info!(
            "Restored {} subscription(s) from snapshot ({} skipped)",
            restored,
            skipped
        );
    }

    /// Consumes the pipeline until shutdown is requested or every sender is
    /// gone, then tears all timers and state down.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<WarmEvent>) {
        log::info!(
            "Warming lifecycle started (interval {}ms, ttl {}ms, threshold {})",
            self.options.warmup_interval_ms,
            self.options.subscription_ttl_ms,
            self.options.unhealthy_threshold
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                },
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => break,
                    }
                }
            }
        }

        self.teardown();
    }

    fn handle(&mut self, event: WarmEvent) {
        log::trace!("Applying {} event", event.kind());
        match event {
            WarmEvent::Execute(report) => self.on_execute(report),
            WarmEvent::Subscribe(payload) => self.on_subscribe(payload),
            WarmEvent::JoinGroup(payload) => self.on_join(payload),
            WarmEvent::Requested { key } => self.runner.dispatch(&key),
            WarmEvent::Fulfilled { key } => self.on_fulfilled(&key),
            WarmEvent::Failed { key, reason } => self.on_failed(&key, &reason),
            WarmEvent::Unsubscribe { key } => self.on_remove(&key, true),
            WarmEvent::Stop { key } => self.on_remove(&key, false),
            WarmEvent::LeaveGroup { parent, batch_key } => self.on_leave(&parent, &batch_key),
            // Purely observational; the reset already happened when the
            // winning subscribe was applied.
            WarmEvent::TtlReset { .. } => {}
        }
    }

    /// Expands a completed call into subscription traffic. A rejected
    /// report costs only itself; the pipeline keeps going.
    fn on_execute(&mut self, report: ExecuteReport) {
        match self.establisher.establish(&self.registry, report) {
            Ok(events) => {
                for event in events {
                    self.bus.publish(event);
                }
            }
            Err(error) => {
                log::error!("Establishment failed: {}", error);
            }
        }
    }

    fn on_subscribe(&mut self, mut payload: SubscribePayload) {
        let key = payload.resolved_key();

        // Scheduler decision against the pre-event state: only roots get
        // timers, and only when the key is genuinely new. Heartbeats keep
        // the existing timer and its phase.
        if payload.parent.is_none()
            && !self.scheduler.is_scheduled(&key)
            && !self.registry.contains(&key)
        {
            let period = payload
                .max_age
                .filter(|age| !age.is_zero())
                .unwrap_or_else(|| self.options.warmup_interval());
            log::info!("Warming {} every {}ms", key, period.as_millis());
            self.scheduler.start(key.clone(), period);
        }

        // Group-drained: membership carried by the payload is from a prior
        // incarnation of this group. Stop those children and apply the entry
        // with a cleared map; live membership arrives via join-group.
        if !payload.child_last_seen.is_empty() {
            log::info!(
                "Group {} re-created; stopping {} stale member(s)",
                key,
                payload.child_last_seen.len()
            );
            for (stale, _) in payload.child_last_seen.drain() {
                self.bus.publish(WarmEvent::Stop { key: stale });
            }
        }

        if self.ttl.arm(&key) {
            self.bus.publish(WarmEvent::TtlReset { key: key.clone() });
        }

        if self.registry.apply_subscribe(payload, self.options.warmup_interval()) {
            log::debug!("Heartbeat for {}", key);
        }
    }

    fn on_join(&mut self, payload: JoinGroupPayload) {
        let parent = payload.parent.clone();
        if !self.registry.apply_join(&payload) {
            log::debug!("Join for unknown group {}; dropping", parent);
            return;
        }

        // Joining is the group-shaped heartbeat: demand for a member is
        // demand for the group, so the parent's idle window restarts.
        if self.ttl.arm(&parent) {
            self.bus.publish(WarmEvent::TtlReset { key: parent });
        }
    }

    fn on_fulfilled(&mut self, key: &Fingerprint) {
        if self.registry.record_success(key) {
            log::debug!("Warmed {}", key);
        }
    }

    fn on_failed(&mut self, key: &Fingerprint, reason: &str) {
        // A completion for an already-removed key is a no-op.
        let Some(count) = self.registry.record_failure(key) else {
            return;
        };

        log::warn!(
            "Warm-up failed for {} ({} consecutive): {}",
            key,
            count,
            reason
        );

        // Emit only on the increment that reaches the threshold; failures
        // already queued behind the eviction must not emit again.
        if count == self.options.unhealthy_threshold {
            log::warn!("Unhealthy threshold reached for {}; unsubscribing", key);
            self.bus.publish(WarmEvent::Unsubscribe { key: key.clone() });
        }
    }

    fn on_remove(&mut self, key: &Fingerprint, prune_group: bool) {
        self.scheduler.cancel(key);
        self.ttl.cancel(key);

        let Some(removed) = self.registry.remove(key) else {
            return;
        };
        log::info!("Warming stopped for {}", key);

        if !prune_group {
            return;
        }
        if let (Some(parent), Some(batch_key)) = (removed.parent.clone(), removed.batch_key.clone())
        {
            if self.registry.prune_member(&parent, &batch_key, &removed) {
                self.bus.publish(WarmEvent::LeaveGroup { parent, batch_key });
            }
        }
    }

    fn on_leave(&mut self, parent: &Fingerprint, batch_key: &str) {
        match self.registry.remaining_batch_len(parent, batch_key) {
            None => {
                log::debug!("Leave for unknown group {}; ignoring", parent);
            }
            Some(0) => {
                log::info!("Group {} drained; tearing it down", parent);
                self.bus
                    .publish(WarmEvent::Unsubscribe { key: parent.clone() });
            }
            Some(remaining) => {
                log::debug!("Group {} still has {} member(s)", parent, remaining);
            }
        }
    }

    fn teardown(&mut self) {
        self.scheduler.cancel_all();
        self.ttl.cancel_all();
        self.registry.clear();
        log::info!("Warming lifecycle stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::executor::{
        CacheMode, ExecuteOutcome, Executor, ExecutorFn, WarmRequest,
    };
    use serde_json::json;
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;
    use tokio::time::{advance, timeout};

    struct Harness {
        bus: EventBus,
        registry: Arc<Registry>,
        tap: broadcast::Receiver<WarmEvent>,
        shutdown: CancellationToken,
        handle: JoinHandle<()>,
    }

    fn start(options: WarmerOptions) -> Harness {
        let options = options.normalized();
        let (bus, receiver) = EventBus::new(256);
        let tap = bus.observe();
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();
        let manager = LifecycleManager::new(
            Arc::clone(&registry),
            bus.clone(),
            options,
            shutdown.clone(),
        );
        let handle = tokio::spawn(manager.run(receiver));
        Harness {
            bus,
            registry,
            tap,
            shutdown,
            handle,
        }
    }

    fn quiet_options() -> WarmerOptions {
        // Hour-scale periods keep background timers out of short tests.
        WarmerOptions {
            warmup_interval_ms: 3_600_000,
            unhealthy_threshold: 3,
            subscription_ttl_ms: 3_600_000,
            event_tap_capacity: 256,
        }
    }

    fn ok_executor(route: &str) -> Arc<dyn Executor> {
        ExecutorFn::arc(route.to_string(), |_request, _cache: CacheMode| async {
            Ok(ExecuteOutcome::new(json!({"ok": true})))
        })
    }

    fn failing_executor(route: &str) -> Arc<dyn Executor> {
        ExecutorFn::arc(route.to_string(), |_request, _cache: CacheMode| async {
            let result: anyhow::Result<ExecuteOutcome> = Err(anyhow::anyhow!("upstream down"));
            result
        })
    }

    fn root_subscribe(symbol: &str, executor: Arc<dyn Executor>) -> (Fingerprint, WarmEvent) {
        let payload = SubscribePayload::root(
            WarmRequest::new("markets/quote", json!({ "symbol": symbol })),
            executor,
            None,
        );
        (payload.resolved_key(), WarmEvent::Subscribe(payload))
    }

    /// Collects everything currently observable on the tap, yielding to the
    /// consumer until the engine goes quiet.
    async fn drain(tap: &mut broadcast::Receiver<WarmEvent>) -> Vec<WarmEvent> {
        let mut seen = Vec::new();
        loop {
            match timeout(Duration::from_millis(1), tap.recv()).await {
                Ok(Ok(event)) => seen.push(event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                _ => break,
            }
        }
        seen
    }

    fn count_kind(events: &[WarmEvent], kind: &str) -> usize {
        events.iter().filter(|event| event.kind() == kind).count()
    }

    #[tokio::test(start_paused = true)]
    async fn subscribing_establishes_warms_and_registers() {
        let mut harness = start(quiet_options());
        let (key, subscribe) = root_subscribe("BTC", ok_executor("markets/quote"));

        harness.bus.publish(subscribe);
        let events = drain(&mut harness.tap).await;

        // 1. The entry exists and its first warm-up already ran.
        assert!(harness.registry.contains(&key));
        assert_eq!(count_kind(&events, "requested"), 1);
        assert_eq!(count_kind(&events, "fulfilled"), 1);
        assert_eq!(count_kind(&events, "unsubscribe"), 0);

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_evicts_exactly_one_window_after_the_last_subscribe() {
        let mut harness = start(WarmerOptions {
            subscription_ttl_ms: 10_000,
            ..quiet_options()
        });
        let (key, subscribe) = root_subscribe("BTC", ok_executor("markets/quote"));

        harness.bus.publish(subscribe.clone());
        drain(&mut harness.tap).await;

        // 1. Not evicted before the window elapses.
        advance(Duration::from_millis(8_000)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "unsubscribe"), 0);

        // 2. A heartbeat resets the race and says so.
        harness.bus.publish(subscribe);
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "timeout-reset"), 1);

        // 3. The old timer is dead: nothing fires at the original deadline.
        advance(Duration::from_millis(8_000)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "unsubscribe"), 0);
        assert!(harness.registry.contains(&key));

        // 4. One TTL after the heartbeat the key is dropped, exactly once.
        advance(Duration::from_millis(2_500)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "unsubscribe"), 1);
        assert!(!harness.registry.contains(&key));

        advance(Duration::from_millis(30_000)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "unsubscribe"), 0);

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_the_failure_threshold_unsubscribes_once() {
        let mut harness = start(WarmerOptions {
            warmup_interval_ms: 1_000,
            unhealthy_threshold: 2,
            ..quiet_options()
        });
        let (key, subscribe) = root_subscribe("BTC", failing_executor("markets/quote"));

        // 1. First tick fails at t≈0.
        harness.bus.publish(subscribe);
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "failed"), 1);
        assert_eq!(count_kind(&events, "unsubscribe"), 0);
        assert_eq!(harness.registry.get(&key).unwrap().error_count, 1);

        // 2. Second consecutive failure reaches the threshold.
        advance(Duration::from_millis(1_000)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "failed"), 1);
        assert_eq!(count_kind(&events, "unsubscribe"), 1);
        assert!(!harness.registry.contains(&key));

        // 3. The timer is gone: no further ticks, no second unsubscribe.
        advance(Duration::from_millis(5_000)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "requested"), 0);
        assert_eq!(count_kind(&events, "unsubscribe"), 0);

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_queued_past_the_threshold_do_not_emit_again() {
        let mut harness = start(WarmerOptions {
            unhealthy_threshold: 2,
            ..quiet_options()
        });
        let (key, subscribe) = root_subscribe("BTC", ok_executor("markets/quote"));
        harness.bus.publish(subscribe);
        drain(&mut harness.tap).await;

        // Three failures land in the pipeline before the eviction they
        // trigger is processed.
        for _ in 0..3 {
            harness.bus.publish(WarmEvent::Failed {
                key: key.clone(),
                reason: "upstream down".to_string(),
            });
        }

        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "unsubscribe"), 1);
        assert!(!harness.registry.contains(&key));

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn a_success_resets_the_failure_streak() {
        let mut harness = start(WarmerOptions {
            unhealthy_threshold: 3,
            ..quiet_options()
        });
        let (key, subscribe) = root_subscribe("BTC", ok_executor("markets/quote"));
        harness.bus.publish(subscribe);
        drain(&mut harness.tap).await;

        for _ in 0..2 {
            harness.bus.publish(WarmEvent::Failed {
                key: key.clone(),
                reason: "upstream down".to_string(),
            });
        }
        harness.bus.publish(WarmEvent::Fulfilled { key: key.clone() });
        harness.bus.publish(WarmEvent::Failed {
            key: key.clone(),
            reason: "upstream down".to_string(),
        });
        let events = drain(&mut harness.tap).await;

        // Two failures, a success, one failure: streak is 1, not 3.
        assert_eq!(count_kind(&events, "unsubscribe"), 0);
        assert_eq!(harness.registry.get(&key).unwrap().error_count, 1);

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    fn batched_execute(symbols: &[&str]) -> WarmEvent {
        let request = WarmRequest::new("markets/quotes", json!({ "symbols": symbols }));
        let mut outcome = ExecuteOutcome::new(json!({"ok": true})).with_batch_key("symbols");
        for (index, symbol) in symbols.iter().enumerate() {
            outcome = outcome.with_sub_result(
                WarmRequest::new("markets/quotes", json!({ "symbols": [symbol] })),
                index,
            );
        }
        WarmEvent::Execute(ExecuteReport::from_outcome(
            request,
            ok_executor("markets/quotes"),
            &outcome,
        ))
    }

    fn child_key(symbol: &str) -> Fingerprint {
        WarmRequest::new("markets/quotes", json!({ "symbols": [symbol] })).fingerprint()
    }

    #[tokio::test(start_paused = true)]
    async fn draining_a_group_tears_the_parent_down_once() {
        let mut harness = start(quiet_options());
        let group_key =
            WarmRequest::new("markets/quotes", json!({"symbols": ["BTC", "ETH"]}))
                .group_fingerprint();

        // 1. One batched call creates parent plus two children.
        harness.bus.publish(batched_execute(&["BTC", "ETH"]));
        drain(&mut harness.tap).await;
        assert_eq!(harness.registry.len(), 3);
        assert!(harness.registry.get(&group_key).unwrap().is_group());

        // 2. The first member leaves; the group still has ETH and survives.
        harness.bus.publish(WarmEvent::Unsubscribe {
            key: child_key("BTC"),
        });
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "leave-group"), 1);
        assert!(harness.registry.contains(&group_key));
        assert_eq!(
            harness
                .registry
                .remaining_batch_len(&group_key, "symbols"),
            Some(1)
        );

        // 3. The last member leaves; the drained parent goes with it.
        harness.bus.publish(WarmEvent::Unsubscribe {
            key: child_key("ETH"),
        });
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "leave-group"), 1);
        assert_eq!(count_kind(&events, "unsubscribe"), 2);
        assert!(harness.registry.is_empty());

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn administrative_stop_leaves_the_group_alone() {
        let mut harness = start(quiet_options());
        let group_key =
            WarmRequest::new("markets/quotes", json!({"symbols": ["BTC", "ETH"]}))
                .group_fingerprint();

        harness.bus.publish(batched_execute(&["BTC", "ETH"]));
        drain(&mut harness.tap).await;

        // A stop removes the child entry but prunes nothing.
        harness.bus.publish(WarmEvent::Stop {
            key: child_key("BTC"),
        });
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "leave-group"), 0);
        assert!(!harness.registry.contains(&child_key("BTC")));
        assert_eq!(
            harness
                .registry
                .remaining_batch_len(&group_key, "symbols"),
            Some(2)
        );

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn joining_renews_the_groups_idle_window() {
        let mut harness = start(WarmerOptions {
            subscription_ttl_ms: 10_000,
            ..quiet_options()
        });
        let group_key = WarmRequest::new("markets/quotes", json!({"symbols": ["BTC"]}))
            .group_fingerprint();

        harness.bus.publish(batched_execute(&["BTC"]));
        drain(&mut harness.tap).await;
        assert!(harness.registry.contains(&group_key));

        // 1. Fresh demand 8s in renews parent and child alike.
        advance(Duration::from_millis(8_000)).await;
        harness.bus.publish(batched_execute(&["BTC"]));
        let events = drain(&mut harness.tap).await;
        assert!(count_kind(&events, "timeout-reset") >= 2);

        // 2. Past the original deadline the group is still alive.
        advance(Duration::from_millis(8_000)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "unsubscribe"), 0);
        assert!(harness.registry.contains(&group_key));

        // 3. Without further demand everything decays: child TTL fires,
        //    pruning empties the group, and the drained parent follows.
        advance(Duration::from_millis(2_500)).await;
        drain(&mut harness.tap).await;
        assert!(harness.registry.is_empty());

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recreating_a_group_stops_its_stale_members() {
        let mut harness = start(quiet_options());

        // 1. Two roots left over from a previous incarnation of the group.
        let (stale_a, subscribe_a) = root_subscribe("BTC", ok_executor("markets/quote"));
        let (stale_b, subscribe_b) = root_subscribe("ETH", ok_executor("markets/quote"));
        harness.bus.publish(subscribe_a);
        harness.bus.publish(subscribe_b);
        drain(&mut harness.tap).await;
        assert_eq!(harness.registry.len(), 2);

        // 2. The group comes back carrying their keys as prior membership.
        let mut payload = SubscribePayload::root(
            WarmRequest::new("markets/quotes", json!({"symbols": ["SOL"]})),
            ok_executor("markets/quotes"),
            None,
        );
        payload.key = Some("group-key".to_string());
        payload.batch_key = Some("symbols".to_string());
        payload
            .child_last_seen
            .insert(stale_a.clone(), chrono::Utc::now());
        payload
            .child_last_seen
            .insert(stale_b.clone(), chrono::Utc::now());
        harness.bus.publish(WarmEvent::Subscribe(payload));

        let events = drain(&mut harness.tap).await;

        // 3. Both stale members were stopped; the new group entry stands
        //    with a clean membership map.
        assert_eq!(count_kind(&events, "stop"), 2);
        assert!(!harness.registry.contains(&stale_a));
        assert!(!harness.registry.contains(&stale_b));
        let entry = harness.registry.get(&"group-key".to_string()).unwrap();
        assert!(entry.child_last_seen.is_empty());

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn late_completions_for_removed_keys_are_no_ops() {
        let harness = start(quiet_options());

        harness.bus.publish(WarmEvent::Fulfilled {
            key: "ghost".to_string(),
        });
        harness.bus.publish(WarmEvent::Failed {
            key: "ghost".to_string(),
            reason: "late".to_string(),
        });
        harness.bus.publish(WarmEvent::LeaveGroup {
            parent: "ghost-group".to_string(),
            batch_key: "symbols".to_string(),
        });

        let mut tap = harness.tap;
        let events = drain(&mut tap).await;
        assert_eq!(count_kind(&events, "unsubscribe"), 0);
        assert!(harness.registry.is_empty());

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_timers_and_clears_the_registry() {
        let mut harness = start(WarmerOptions {
            warmup_interval_ms: 1_000,
            ..quiet_options()
        });
        let (key, subscribe) = root_subscribe("BTC", ok_executor("markets/quote"));
        harness.bus.publish(subscribe);
        drain(&mut harness.tap).await;
        assert!(harness.registry.contains(&key));

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
        assert!(harness.registry.is_empty());

        // No ticks from beyond the grave.
        advance(Duration::from_millis(5_000)).await;
        let events = drain(&mut harness.tap).await;
        assert_eq!(count_kind(&events, "requested"), 0);
    }
}
