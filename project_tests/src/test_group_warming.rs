//! # Batched Group Warming Test
//!
//! Exercises the group path end to end: a batched result becomes one parent
//! plus per-item children, later batches join the existing group, departing
//! members shrink the batched origin, and the drained group tears itself
//! down.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use lib_warmer::{
    CacheMode, ExecuteOutcome, Executor, ExecutorFn, WarmEvent, WarmRequest, Warmer,
    WarmerOptions,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

const ROUTE: &str = "markets/quotes";

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

fn batch_executor(calls: Arc<AtomicU32>) -> Arc<dyn Executor> {
    ExecutorFn::arc(ROUTE, move |request: WarmRequest, _cache: CacheMode| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecuteOutcome::new(json!({ "quotes": request.data["symbols"] })))
        }
    })
}

/// The batched outcome the mock upstream would have produced for `symbols`.
fn batched_outcome(symbols: &[&str]) -> ExecuteOutcome {
    let mut outcome = ExecuteOutcome::new(json!({"ok": true})).with_batch_key("symbols");
    for (index, symbol) in symbols.iter().enumerate() {
        outcome = outcome.with_sub_result(
            WarmRequest::new(ROUTE, json!({ "symbols": [symbol] })),
            index,
        );
    }
    outcome
}

fn child_key(symbol: &str) -> String {
    WarmRequest::new(ROUTE, json!({ "symbols": [symbol] })).fingerprint()
}

async fn settle(tap: &mut broadcast::Receiver<WarmEvent>) -> Vec<WarmEvent> {
    let mut seen = Vec::new();
    loop {
        match timeout(Duration::from_millis(100), tap.recv()).await {
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

    // Hour-scale periods: this scenario is about membership, not timing.
    let warmer = Warmer::new(WarmerOptions {
        warmup_interval_ms: 3_600_000,
        unhealthy_threshold: 3,
        subscription_ttl_ms: 3_600_000,
        event_tap_capacity: 256,
    });
    let mut tap = warmer.events();
    let calls = Arc::new(AtomicU32::new(0));
    let executor = batch_executor(Arc::clone(&calls));

    println!("[*] Phase 1: a batched result becomes a group");
    let request = WarmRequest::new(ROUTE, json!({"symbols": ["BTC", "ETH", "SOL"]}));
    let group_key = request.group_fingerprint();
    warmer.report(
        request,
        Arc::clone(&executor),
        &batched_outcome(&["BTC", "ETH", "SOL"]),
    );
    settle(&mut tap).await;

    ensure!(
        warmer.subscription_count() == 4,
        "expected one parent plus three children, got {}",
        warmer.subscription_count()
    );
    let snapshot = warmer.snapshot();
    let parent = snapshot
        .entries
        .iter()
        .find(|record| record.key == group_key)
        .ok_or_else(|| anyhow::anyhow!("no group entry for the expected key"))?;
    ensure!(parent.child_last_seen.len() == 3, "the group should track all members");
    ensure!(
        parent.origin.data["symbols"] == json!(["BTC", "ETH", "SOL"]),
        "the group origin must stay batch-shaped"
    );
    ensure!(calls.load(Ordering::SeqCst) == 1, "only the group root is scheduled");

    println!("[*] Phase 2: a later batch joins the existing group");
    warmer.report(
        WarmRequest::new(ROUTE, json!({"symbols": "DOGE"})),
        Arc::clone(&executor),
        &batched_outcome(&["DOGE"]),
    );
    settle(&mut tap).await;

    ensure!(
        warmer.subscription_count() == 5,
        "one new child, no second parent"
    );
    let snapshot = warmer.snapshot();
    let groups = snapshot
        .entries
        .iter()
        .filter(|record| record.parent.is_none() && record.batch_key.is_some())
        .count();
    ensure!(groups == 1, "there must still be exactly one group entry");
    let parent = snapshot
        .entries
        .iter()
        .find(|record| record.key == group_key)
        .unwrap();
    ensure!(parent.child_last_seen.len() == 4, "the joiner should be a member now");
    ensure!(
        parent.origin.data["symbols"] == json!(["BTC", "ETH", "SOL", "DOGE"]),
        "the joined item must land in the batched origin"
    );

    println!("[*] Phase 3: member churn shrinks the batch");
    warmer.stop_warming(&child_key("BTC"));
    let events = settle(&mut tap).await;
    ensure!(count_kind(&events, "leave-group") == 1, "the departure must be announced");
    ensure!(
        warmer.subscription_count() == 4,
        "the group survives while members remain"
    );
    let snapshot = warmer.snapshot();
    let parent = snapshot
        .entries
        .iter()
        .find(|record| record.key == group_key)
        .unwrap();
    ensure!(
        parent.origin.data["symbols"] == json!(["ETH", "SOL", "DOGE"]),
        "the departed item must leave the batched origin"
    );

    println!("[*] Phase 4: draining the group tears the parent down");
    for symbol in ["ETH", "SOL", "DOGE"] {
        warmer.stop_warming(&child_key(symbol));
    }
    settle(&mut tap).await;
    ensure!(
        warmer.subscription_count() == 0,
        "the drained parent must go with its last member"
    );

    warmer.shutdown().await;
    println!("\n[SUCCESS] Group warming behaved as expected");
    Ok(())
}
