//! # Upstream Execution Module
//!
//! This module defines how the warming engine talks to the outside world:
//! the contract a host application implements so its upstream calls can be
//! replayed on a schedule.
//!
//! ## Purpose:
//! The engine never performs network I/O of its own. Instead, hosts hand it
//! executors: re-invocable wrappers around the call that originally produced
//! a piece of cached data. Everything else (scheduling, retries at the
//! subscription level, eviction) is the engine's business.
//!
//! ## Contained Modules:
//!
//! - **`executor`**: The [`executor::Executor`] trait, the request/outcome
//!   types exchanged with it, a closure adapter for hosts that don't want a
//!   named type, and the resolver used to re-attach executors to restored
//!   subscriptions.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Executor contract: replayable upstream calls and their outcomes.
pub mod executor;
