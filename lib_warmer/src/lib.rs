//! # lib_warmer
//!
//! A demand-driven cache warming engine. Hosts report the upstream calls
//! they have just completed; the engine keeps re-executing the hot ones on
//! a schedule (with the cache bypassed) so later readers hit a fresh cache
//! instead of paying upstream latency. Warming starts when demand appears,
//! renews while demand keeps arriving, and winds down on its own when the
//! demand stops, the entry turns unhealthy, or a batch group drains empty.

// Declare the modules to re-export
pub mod configs;
pub mod core;
pub mod retrieve;
pub mod utils;

// Re-export the host-facing surface
pub use configs::options::*;
pub use core::events::*;
pub use core::registry::{RegistrySnapshot, Subscription, SubscriptionRecord};
pub use core::warmer::*;
pub use retrieve::executor::*;
pub use utils::fingerprint::*;
