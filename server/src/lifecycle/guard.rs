//! Deletion guards.
//!
//! Domain rules that may veto a soft delete because undeleted dependents
//! still reference the artifact.

use std::sync::Arc;

use async_trait::async_trait;

use crate::collaborators::ArtifactStore;
use crate::error::PolicyError;
use crate::models::{Artifact, LifecycleState};

/// Caller-supplied check run before an artifact is soft-deleted.
///
/// Implementations return [`PolicyError::Conflict`] to block the deletion.
#[async_trait]
pub trait DeletionGuard: Send + Sync {
    async fn check(&self, artifact: &Artifact) -> Result<(), PolicyError>;
}

/// Guard that never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependents;

#[async_trait]
impl DeletionGuard for NoDependents {
    async fn check(&self, _artifact: &Artifact) -> Result<(), PolicyError> {
        Ok(())
    }
}

/// Blocks deletion while an undeleted correction points at the artifact.
#[derive(Clone)]
pub struct ActiveCorrections {
    store: Arc<dyn ArtifactStore>,
}

impl ActiveCorrections {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeletionGuard for ActiveCorrections {
    async fn check(&self, artifact: &Artifact) -> Result<(), PolicyError> {
        let corrections = self.store.corrections_of(artifact.id).await?;
        let blocking = corrections
            .iter()
            .filter(|c| matches!(c.lifecycle, LifecycleState::Active))
            .count();

        if blocking > 0 {
            return Err(PolicyError::conflict(format!(
                "document has {blocking} undeleted correction(s)"
            )));
        }
        Ok(())
    }
}
