//! Purge Worker
//!
//! Permanently removes artifacts whose restore window has elapsed.
//! File removal is best-effort: failures are logged and never stop the
//! rest of the batch.

use chrono::{DateTime, Utc};

use super::transitions::{is_purgeable, RestoreWindow};
use super::trash_key;
use crate::collaborators::{ArtifactStore, FileStorage};
use crate::error::PolicyError;

/// Purge every deleted artifact older than the restore window.
///
/// For each due artifact:
/// 1. Remove the artifact record (conditional on it still being expired)
/// 2. Delete the trashed file (logged on failure)
///
/// The record goes first so a restore racing the batch never loses its file.
/// Returns the number of artifacts purged.
#[tracing::instrument(skip(store, storage))]
pub async fn purge_expired(
    store: &dyn ArtifactStore,
    storage: &dyn FileStorage,
    now: DateTime<Utc>,
    window: RestoreWindow,
) -> Result<usize, PolicyError> {
    let cutoff = now - window.duration();
    let due = store.list_deleted_before(cutoff).await?;

    if due.is_empty() {
        return Ok(0);
    }

    let mut purged = 0;
    for artifact in &due {
        if !is_purgeable(&artifact.lifecycle, now, window) {
            tracing::warn!(artifact_id = %artifact.id, "Skipping artifact still inside restore window");
            continue;
        }

        match store.purge(artifact.id, cutoff).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(artifact_id = %artifact.id, "Artifact already purged or restored, skipping");
                continue;
            }
            Err(e) => {
                tracing::error!(
                    artifact_id = %artifact.id,
                    error = %e,
                    "Failed to purge artifact record"
                );
                continue;
            }
        }
        purged += 1;

        let key = trash_key(artifact);
        if let Err(e) = storage.delete_file(&key).await {
            tracing::warn!(
                artifact_id = %artifact.id,
                storage_key = %key,
                error = %e,
                "Failed to delete file during purge"
            );
        }

        tracing::info!(artifact_id = %artifact.id, "Artifact purged");
    }

    tracing::info!(count = purged, candidates = due.len(), "Processed expired artifacts");
    Ok(purged)
}
