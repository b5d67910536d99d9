//! Audit event deduplication.
//!
//! Identical events from the same principal and request arriving within the
//! window are recorded once.

use std::sync::Arc;

use chrono::Duration;

use super::cache::TtlCache;
use crate::collaborators::AuditSink;
use crate::models::AuditEvent;

/// Deduplication key: `principal:action:method:url[:resource_id]`.
#[must_use]
pub fn dedup_key(event: &AuditEvent) -> String {
    let principal = event
        .principal_id
        .map_or_else(|| "anonymous".to_string(), |id| id.to_string());
    let mut key = format!(
        "{principal}:{}:{}:{}",
        event.action,
        event.method.as_deref().unwrap_or("-"),
        event.url.as_deref().unwrap_or("-"),
    );
    if let Some(resource_id) = event.resource_id {
        key.push(':');
        key.push_str(&resource_id.to_string());
    }
    key
}

/// Suppresses duplicate audit writes.
#[derive(Clone)]
pub struct EventDeduplicator {
    cache: Arc<dyn TtlCache>,
    sink: Arc<dyn AuditSink>,
    window: Duration,
    sweep_threshold: usize,
}

impl EventDeduplicator {
    pub fn new(
        cache: Arc<dyn TtlCache>,
        sink: Arc<dyn AuditSink>,
        window: Duration,
        sweep_threshold: usize,
    ) -> Self {
        Self {
            cache,
            sink,
            window,
            sweep_threshold,
        }
    }

    /// Write the event through to the sink unless a duplicate was written
    /// within the window. Returns whether the event was stored.
    ///
    /// Cache failures fail open: the event is written rather than lost.
    pub async fn record(&self, event: &AuditEvent) -> anyhow::Result<bool> {
        let key = dedup_key(event);
        let now = event.timestamp;

        let fresh = match self.cache.try_acquire(&key, now, self.window).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(error = %e, "Audit dedup cache unavailable, recording anyway");
                true
            }
        };

        if !fresh {
            tracing::debug!(key = %key, "Suppressed duplicate audit event");
            return Ok(false);
        }

        if let Err(e) = self.sink.write(event).await {
            // Nothing was stored, so a retry must not be suppressed.
            if let Err(release_err) = self.cache.release(&key, now).await {
                tracing::warn!(error = %release_err, key = %key, "Failed to release audit dedup key");
            }
            return Err(e);
        }

        self.maybe_sweep(now).await;
        Ok(true)
    }

    async fn maybe_sweep(&self, now: chrono::DateTime<chrono::Utc>) {
        let held = match self.cache.entry_count().await {
            Ok(held) => held,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to size audit dedup cache");
                return;
            }
        };

        if held <= self.sweep_threshold {
            return;
        }

        match self.cache.sweep(now, self.window).await {
            Ok(removed) => tracing::debug!(removed, held, "Swept audit dedup cache"),
            Err(e) => tracing::warn!(error = %e, "Audit dedup cache sweep failed"),
        }
    }
}
