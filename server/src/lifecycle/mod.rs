//! Lifecycle Manager
//!
//! Soft delete, restore within the recovery window, and permanent purge.

pub mod guard;
pub mod purge;
pub mod transitions;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Artifact;

pub use guard::{ActiveCorrections, DeletionGuard, NoDependents};
pub use purge::purge_expired;
pub use transitions::{delete_transition, is_purgeable, restore_transition, RestoreWindow};

/// Storage key a soft-deleted artifact's file is parked under.
#[must_use]
pub fn trash_key(artifact: &Artifact) -> String {
    let file_name = artifact
        .file_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("file");
    format!("trash/{}/{file_name}", artifact.id)
}

/// Deleted artifact approaching its purge date.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiringArtifact {
    pub artifact: Artifact,
    pub days_left: i64,
}

/// Keep deleted artifacts with at most `notice_days` left before purge.
pub fn expiring_within(
    deleted: Vec<Artifact>,
    now: DateTime<Utc>,
    window: RestoreWindow,
    notice_days: i64,
) -> Vec<ExpiringArtifact> {
    let mut expiring: Vec<ExpiringArtifact> = deleted
        .into_iter()
        .filter_map(|artifact| {
            let deleted_at = artifact.lifecycle.deleted_at()?;
            let days_left = window.days_left(deleted_at, now);
            (days_left <= notice_days).then_some(ExpiringArtifact {
                artifact,
                days_left,
            })
        })
        .collect();
    expiring.sort_by_key(|e| e.days_left);
    expiring
}
