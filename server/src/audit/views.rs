//! View counter throttling.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::cache::TtlCache;

/// Suppresses repeated view-count increments by the same viewer.
#[derive(Clone)]
pub struct ViewThrottle {
    cache: Arc<dyn TtlCache>,
    window: Duration,
    sweep_threshold: usize,
}

impl ViewThrottle {
    pub fn new(cache: Arc<dyn TtlCache>, window: Duration, sweep_threshold: usize) -> Self {
        Self {
            cache,
            window,
            sweep_threshold,
        }
    }

    /// Whether this view should increment the artifact's counter.
    ///
    /// Fails open when the cache is unreachable. Stale entries are swept
    /// once the cache holds more than the threshold.
    pub async fn should_count(&self, artifact_id: Uuid, viewer_id: Uuid, now: DateTime<Utc>) -> bool {
        let key = format!("{artifact_id}:{viewer_id}");
        let fresh = match self.cache.try_acquire(&key, now, self.window).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(error = %e, artifact_id = %artifact_id, "View throttle cache unavailable");
                return true;
            }
        };

        if fresh {
            self.maybe_sweep(now).await;
        }
        fresh
    }

    /// Drop throttle entries that can no longer suppress anything.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.cache.sweep(now, self.window).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "View throttle sweep failed");
            0
        })
    }

    async fn maybe_sweep(&self, now: DateTime<Utc>) {
        match self.cache.entry_count().await {
            Ok(held) if held > self.sweep_threshold => {
                let removed = self.sweep(now).await;
                tracing::debug!(removed, held, "Swept view throttle cache");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to size view throttle cache"),
        }
    }
}
