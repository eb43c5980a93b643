//! # Configuration Modules
//!
//! This module aggregates the tuning knobs of the warming engine. Loading
//! them from files, flags or the environment is the host's job; here they
//! only get names, serialized shapes and defaults.

/// Recognized warming options and their defaults.
pub mod options;
