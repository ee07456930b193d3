//! Lifecycle event listeners. A listener observes what a
//! [`crate::client::DirectClient`] or [`crate::cluster::ClusterClient`]
//! does without being able to affect it: every callback is wrapped in
//! `catch_unwind` so a panicking listener can never cancel an
//! operation or take down the IO worker. See spec.md §6/§9 ("listener
//! safety").

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Lifecycle events for a single [`crate::client::DirectClient`].
pub trait ClientListener: Send + Sync {
    fn on_invalid_key(&self, _key: &[u8]) {}
    fn on_invalid_value(&self, _key: &[u8]) {}
    fn on_invalid_expiry(&self, _key: &[u8], _expiry: i64) {}
    fn on_closed(&self, _host: &str) {}
    fn on_key_not_found(&self, _keys: &[Vec<u8>]) {}
    fn on_timeout(&self, _host: &str) {}
    fn on_error(&self, _message: &str) {}
    fn on_slow_execution(&self, _nanos: u64) {}
}

/// The default listener: every event is silently discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ClientListener for NoopListener {}

/// Lifecycle events for a [`crate::cluster::ClusterClient`]'s rescue
/// worker.
pub trait ClusterListener: Send + Sync {
    fn on_created(&self, _host: &str) {}
    fn on_recovered(&self, _host: &str) {}
    fn on_closed(&self, _host: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClusterListener;

impl ClusterListener for NoopClusterListener {}

/// Run `call` and swallow any panic it raises, logging it instead.
/// Every call site in `client`/`cluster` that invokes a listener method
/// goes through this so a broken listener implementation never
/// escalates into a broken client.
pub(crate) fn guarded<F: FnOnce()>(call: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(call)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        log::error!("cachewire: listener panicked, ignoring: {}", message);
    }
}
