//! Validation limits enforced by [`crate::client::DirectClient`] before
//! a request ever touches the wire. See spec.md §6.

use std::time::Duration;

pub const MAX_KEY_LENGTH: usize = 250;
pub const MAX_VALUE_LENGTH: usize = 1_048_576;

/// Operations slower than this (wall clock, regardless of outcome)
/// fire `on_slow_execution` (spec.md §4.7 step 8).
pub const SLOW_EXECUTION_THRESHOLD: Duration = Duration::from_millis(50);
