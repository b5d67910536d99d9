//! External Collaborators
//!
//! Contracts the policy engine consumes. Each trait is implemented by a
//! concrete adapter (`PgStore`, `LocalFileStorage`, `JwtScopeProvider`) and
//! by in-memory fakes in the integration tests.

pub mod scope;
pub mod storage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PolicyError;
use crate::models::{Artifact, AuditEvent, Comment, Principal, Subject};
use crate::visibility::Predicate;

pub use scope::JwtScopeProvider;
pub use storage::LocalFileStorage;

/// Resolves request credentials into an authenticated principal.
#[async_trait]
pub trait ScopeProvider: Send + Sync {
    async fn resolve_principal(&self, credentials: &str) -> Result<Principal, PolicyError>;
}

/// Read access to the academic structure.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn get_subject(&self, id: Uuid) -> anyhow::Result<Option<Subject>>;

    async fn is_assigned(&self, professor_id: Uuid, subject_id: Uuid) -> anyhow::Result<bool>;

    /// Subjects taught in the given track and level.
    async fn subjects_in_scope(&self, track_id: Uuid, level_id: Uuid) -> anyhow::Result<Vec<Uuid>>;

    /// Subjects the professor holds any responsibility in.
    async fn subjects_assigned_to(&self, professor_id: Uuid) -> anyhow::Result<Vec<Uuid>>;
}

/// Uploaded file storage, addressed by storage key.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn file_exists(&self, path: &str) -> anyhow::Result<bool>;

    async fn delete_file(&self, path: &str) -> anyhow::Result<()>;

    async fn move_file(&self, src: &str, dst: &str) -> anyhow::Result<()>;
}

/// Destination of audit events that passed deduplication.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Artifact persistence.
///
/// Transition methods are conditional on the current lifecycle state and
/// report whether a row changed, so concurrent or retried calls are safe.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch an artifact in any non-purged state.
    async fn get_artifact(&self, id: Uuid) -> anyhow::Result<Option<Artifact>>;

    /// Persist a new artifact with its subject links.
    async fn insert_artifact(&self, artifact: &Artifact) -> anyhow::Result<()>;

    async fn list_artifacts(&self, predicate: &Predicate) -> anyhow::Result<Vec<Artifact>>;

    /// `Active -> Deleted`. Returns `false` if the artifact was not active.
    async fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>, by: Uuid) -> anyhow::Result<bool>;

    /// `Deleted -> Active`. Returns `false` if the artifact was not deleted.
    async fn mark_restored(&self, id: Uuid) -> anyhow::Result<bool>;

    /// `Deleted -> Purged`, removing the record, provided it was deleted
    /// strictly before `deleted_before`. Returns `false` if nothing was removed.
    async fn purge(&self, id: Uuid, deleted_before: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Deleted artifacts, optionally restricted to one owner.
    async fn list_deleted(&self, owner_id: Option<Uuid>) -> anyhow::Result<Vec<Artifact>>;

    /// Deleted artifacts whose deletion happened strictly before `cutoff`.
    async fn list_deleted_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Artifact>>;

    /// Non-purged artifacts correcting `target_id`.
    async fn corrections_of(&self, target_id: Uuid) -> anyhow::Result<Vec<Artifact>>;

    /// Link `correction_id` as the correction of `target_id`.
    /// Returns `false` if the target already has a correction.
    async fn set_correction(&self, correction_id: Uuid, target_id: Uuid) -> anyhow::Result<bool>;

    async fn increment_views(&self, id: Uuid) -> anyhow::Result<()>;
}

/// Comment persistence.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn get_comment(&self, id: Uuid) -> anyhow::Result<Option<Comment>>;

    /// Direct replies to a comment in any state, oldest first.
    async fn replies_to(&self, parent_id: Uuid) -> anyhow::Result<Vec<Comment>>;

    /// Active comments attached to an artifact, oldest first.
    async fn comments_for_artifact(&self, artifact_id: Uuid) -> anyhow::Result<Vec<Comment>>;

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()>;

    /// Mark a comment and its direct replies deleted in one atomic step.
    /// Returns the ids that changed state; empty if the comment was not active.
    async fn delete_with_replies(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        by: Uuid,
    ) -> anyhow::Result<Vec<Uuid>>;
}
