//! Process-wide quota error callbacks.
//!
//! Eviction policies register here once at startup; every cache write that
//! fails on storage quota runs all of them, in registration order, before
//! the failure is re-raised.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

type QuotaErrorCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

static QUOTA_ERROR_CALLBACKS: Mutex<Vec<QuotaErrorCallback>> = parking_lot::const_mutex(Vec::new());

/// Register a callback to run whenever a cache write exceeds the storage quota.
pub fn register_quota_error_callback<F, Fut>(callback: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let callback: QuotaErrorCallback = Arc::new(move || callback().boxed());
    let mut callbacks = QUOTA_ERROR_CALLBACKS.lock();
    callbacks.push(callback);
    debug!(registered = callbacks.len(), "Registered quota error callback");
}

/// Number of registered callbacks.
pub fn quota_error_callback_count() -> usize {
    QUOTA_ERROR_CALLBACKS.lock().len()
}

/// Run every registered callback, one after another.
pub async fn execute_quota_error_callbacks() {
    // Snapshot so callbacks may register further callbacks.
    let callbacks: Vec<QuotaErrorCallback> = QUOTA_ERROR_CALLBACKS.lock().clone();
    info!(count = callbacks.len(), "Running quota error callbacks");
    for callback in callbacks {
        callback().await;
    }
    debug!("Finished running quota error callbacks");
}
