//! # Core Warming Engine
//!
//! This module contains the event-driven heart of the warming engine: the
//! bus every component talks over, the registry of live subscriptions, and
//! the processors that turn completed upstream calls into scheduled
//! re-executions.
//!
//! ## Purpose:
//! Everything here runs behind the [`warmer::Warmer`] facade. Hosts report
//! completed calls; the establisher translates them into subscriptions, the
//! scheduler ticks them, the runner replays them, and the lifecycle manager
//! applies every resulting event to the registry while enforcing the
//! eviction policies.
//!
//! ## Contained Modules:
//!
//! - **`bus`**: The event pipeline plus the observer tap.
//! - **`events`**: The [`events::WarmEvent`] taxonomy and its payloads.
//! - **`registry`**: The subscription table and its snapshot records.
//! - **`establisher`**: Execute-report to subscribe/join translation.
//! - **`scheduler`**: Per-key repeating warm-up timers.
//! - **`runner`**: Executor invocation on `Requested` ticks.
//! - **`lifecycle`**: The single serialized consumer and eviction policies.
//! - **`warmer`**: The host-facing facade that wires it all together.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Event pipeline and observer tap.
pub mod bus;
/// Execute-report to subscription translation.
pub mod establisher;
/// Event taxonomy and payload types.
pub mod events;
/// Serialized event consumer and eviction policies.
pub mod lifecycle;
/// Subscription table and snapshot records.
pub mod registry;
/// Executor invocation on warm-up ticks.
pub mod runner;
/// Per-key repeating warm-up timers.
pub mod scheduler;
/// Host-facing engine facade.
pub mod warmer;
