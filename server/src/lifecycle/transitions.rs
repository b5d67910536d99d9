//! Artifact lifecycle transitions.
//!
//! ```text
//! Active --delete--> Deleted --restore--> Active
//!                    Deleted --purge (window elapsed)--> Purged
//! ```

use chrono::{DateTime, Duration, Utc};

use crate::error::PolicyError;
use crate::models::{Artifact, LifecycleState, Principal};

/// How long a soft-deleted artifact stays restorable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreWindow {
    days: i64,
}

impl RestoreWindow {
    #[must_use]
    pub const fn days(days: i64) -> Self {
        Self { days }
    }

    #[must_use]
    pub fn duration(self) -> Duration {
        Duration::days(self.days)
    }

    /// Whether an artifact deleted at `deleted_at` can no longer be restored.
    #[must_use]
    pub fn has_elapsed(self, deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - deleted_at > self.duration()
    }

    /// Whole days remaining before purge, never negative.
    #[must_use]
    pub fn days_left(self, deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (self.days - (now - deleted_at).num_days()).max(0)
    }
}

impl Default for RestoreWindow {
    fn default() -> Self {
        Self::days(30)
    }
}

/// Validate a soft delete and produce the new state.
///
/// Only active artifacts can be deleted, and only by their owner or an admin.
/// Domain guards are checked separately by the caller.
pub fn delete_transition(
    artifact: &Artifact,
    principal: &Principal,
    now: DateTime<Utc>,
) -> Result<LifecycleState, PolicyError> {
    match artifact.lifecycle {
        LifecycleState::Active => {}
        LifecycleState::Deleted { .. } | LifecycleState::Purged => {
            return Err(PolicyError::NotFound)
        }
    }

    if !principal.owns_or_admin(artifact.owner_id) {
        return Err(PolicyError::forbidden(
            "only the owner or an admin can delete this document",
        ));
    }

    Ok(LifecycleState::Deleted {
        at: now,
        by: principal.id,
    })
}

/// Validate a restore and produce the new state.
///
/// Checks run in order: deleted state, restore window, ownership.
pub fn restore_transition(
    artifact: &Artifact,
    principal: &Principal,
    now: DateTime<Utc>,
    window: RestoreWindow,
) -> Result<LifecycleState, PolicyError> {
    let deleted_at = match artifact.lifecycle {
        LifecycleState::Deleted { at, .. } => at,
        LifecycleState::Active | LifecycleState::Purged => return Err(PolicyError::NotFound),
    };

    if window.has_elapsed(deleted_at, now) {
        return Err(PolicyError::ExpiredWindow { deleted_at });
    }

    if !principal.owns_or_admin(artifact.owner_id) {
        return Err(PolicyError::forbidden(
            "only the owner or an admin can restore this document",
        ));
    }

    Ok(LifecycleState::Active)
}

/// Whether the purge job may remove this artifact.
#[must_use]
pub fn is_purgeable(state: &LifecycleState, now: DateTime<Utc>, window: RestoreWindow) -> bool {
    match state {
        LifecycleState::Deleted { at, .. } => window.has_elapsed(*at, now),
        LifecycleState::Active | LifecycleState::Purged => false,
    }
}
