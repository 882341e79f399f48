//! Per-visitor admission gate: one action per second, enforced with a
//! short-lived marker key set atomically if absent. Applied uniformly to
//! the vote and chat paths.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, StoreResult};

const RATELIMIT_KEY: &str = "ratelimit:";
const WINDOW: Duration = Duration::from_secs(1);

pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// True when the caller may proceed; false while a previous action by
    /// the same visitor is still inside the window.
    pub async fn admit(&self, visitor_id: &str) -> StoreResult<bool> {
        self.store
            .put_if_absent(&format!("{RATELIMIT_KEY}{visitor_id}"), "1", WINDOW)
            .await
    }
}
