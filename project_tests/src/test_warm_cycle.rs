//! # Individual Warm Cycle Test
//!
//! Drives one subscription through its whole life against a mock upstream:
//! establishment, scheduled refreshes, failure-threshold eviction, and
//! TTL decay once demand stops.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use lib_warmer::{
    CacheMode, ExecuteOutcome, ExecutorFn, WarmEvent, WarmRequest, Warmer, WarmerOptions,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

fn setup_logging() -> Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

/// Collects everything the engine emits within the window.
async fn observe(tap: &mut broadcast::Receiver<WarmEvent>, window: Duration) -> Vec<WarmEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, tap.recv()).await {
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

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let warmer = Warmer::new(WarmerOptions {
        warmup_interval_ms: 200,
        unhealthy_threshold: 3,
        subscription_ttl_ms: 2_000,
        event_tap_capacity: 256,
    });
    let mut tap = warmer.events();

    // Mock upstream: counts calls, fails on demand.
    let calls = Arc::new(AtomicU32::new(0));
    let failing = Arc::new(AtomicBool::new(false));
    let executor = {
        let calls = Arc::clone(&calls);
        let failing = Arc::clone(&failing);
        ExecutorFn::arc("markets/quote", move |request: WarmRequest, _cache: CacheMode| {
            let calls = Arc::clone(&calls);
            let failing = Arc::clone(&failing);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if failing.load(Ordering::SeqCst) {
                    anyhow::bail!("mock upstream is down");
                }
                Ok(ExecuteOutcome::new(json!({ "echo": request.data })))
            }
        })
    };

    println!("[*] Phase 1: establishment and scheduled refreshes");
    let request = WarmRequest::new("markets/quote", json!({"symbol": "BTC"}));
    let key = warmer.report(
        request.clone(),
        Arc::clone(&executor),
        &ExecuteOutcome::new(json!({"price": 100})),
    );
    ensure!(key == request.fingerprint(), "report must return the request fingerprint");

    let events = observe(&mut tap, Duration::from_millis(700)).await;
    let requested = count_kind(&events, "requested");
    let fulfilled = count_kind(&events, "fulfilled");
    println!("[INFO] {} refreshes requested, {} fulfilled", requested, fulfilled);
    ensure!(warmer.subscription_count() == 1, "expected exactly one subscription");
    ensure!(requested >= 3, "expected the immediate tick plus periodic refreshes");
    ensure!(fulfilled >= 3, "every refresh should have been fulfilled");
    ensure!(calls.load(Ordering::SeqCst) >= 3, "the mock upstream should have been called");

    println!("[*] Phase 2: consecutive failures evict the subscription");
    failing.store(true, Ordering::SeqCst);
    let events = observe(&mut tap, Duration::from_millis(1_200)).await;
    ensure!(
        count_kind(&events, "failed") >= 3,
        "refreshes should fail while the upstream is down"
    );
    ensure!(
        count_kind(&events, "unsubscribe") == 1,
        "the threshold must evict exactly once"
    );
    ensure!(warmer.subscription_count() == 0, "the unhealthy entry should be gone");

    // An evicted key stays evicted until fresh demand arrives.
    let quiet = observe(&mut tap, Duration::from_millis(500)).await;
    ensure!(
        count_kind(&quiet, "requested") == 0,
        "no refreshes may run after eviction"
    );

    println!("[*] Phase 3: fresh demand restarts warming, idle demand decays");
    failing.store(false, Ordering::SeqCst);
    warmer.report(
        request.clone(),
        Arc::clone(&executor),
        &ExecuteOutcome::new(json!({"price": 101})),
    );
    sleep(Duration::from_millis(100)).await;
    ensure!(warmer.subscription_count() == 1, "warming should have restarted");

    // Nobody renews it; the TTL window runs out on its own.
    let events = observe(&mut tap, Duration::from_millis(2_600)).await;
    ensure!(
        count_kind(&events, "unsubscribe") == 1,
        "the idle subscription must decay exactly once"
    );
    ensure!(warmer.subscription_count() == 0, "the registry should be empty again");

    warmer.shutdown().await;
    println!("\n[SUCCESS] Warm cycle behaved as expected");
    Ok(())
}
