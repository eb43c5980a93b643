//! # Utilities Module
//!
//! This module serves as a collection point for general-purpose helpers that
//! are widely applicable across the `lib_warmer` crate.
//!
//! ## Purpose:
//! The goal is to consolidate common, reusable logic that doesn't fit into more
//! specific modules (like `core` or `retrieve`). This promotes code reuse and
//! helps maintain a cleaner structure for specialized components.
//!
//! ## Contained Modules:
//!
//! - **`fingerprint`**: Deterministic request identity. Hashes a request's
//!   semantic content into the stable keys the registry and the event bus
//!   are indexed by.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Deterministic request fingerprints used as registry keys.
pub mod fingerprint;
