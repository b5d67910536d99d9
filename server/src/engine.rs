//! Policy Engine
//!
//! Facade over the visibility resolver, lifecycle manager, reply moderator
//! and event deduplicator. Each operation loads what it needs from the
//! injected collaborators, applies the pure policy rules and persists the
//! outcome.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{
    EventDeduplicator, MemoryTtlCache, RedisTtlCache, TtlCache, ViewThrottle, AUDIT_KEY_PREFIX,
    VIEW_KEY_PREFIX,
};
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    ArtifactStore, CommentStore, FileStorage, LocalFileStorage, SubjectDirectory,
};
use crate::comments::{self, ReplyDecision};
use crate::config::Config;
use crate::db::{self, PgStore};
use crate::error::PolicyError;
use crate::lifecycle::{self, DeletionGuard, ExpiringArtifact, RestoreWindow};
use crate::models::{Artifact, AuditEvent, Comment, CommentState, Principal, Role, Subject};
use crate::visibility::{self, AccessDecision, ListFilters, Predicate};

/// Stores and services the engine reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub comments: Arc<dyn CommentStore>,
    pub directory: Arc<dyn SubjectDirectory>,
    pub storage: Arc<dyn FileStorage>,
}

/// Tunable policy parameters.
#[derive(Debug, Clone)]
pub struct PolicySettings {
    /// Levels whose students may read capstone documents.
    pub terminal_levels: HashSet<Uuid>,
    pub restore_window: RestoreWindow,
    /// Days before purge at which deleted artifacts are reported.
    pub expiry_notice_days: i64,
}

impl PolicySettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            terminal_levels: config.terminal_level_ids.clone(),
            restore_window: RestoreWindow::days(config.restore_window_days),
            expiry_notice_days: config.expiry_notice_days,
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            terminal_levels: HashSet::new(),
            restore_window: RestoreWindow::default(),
            expiry_notice_days: 7,
        }
    }
}

/// An artifact together with its active corrections.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactWithCorrections {
    #[serde(flatten)]
    pub artifact: Artifact,
    pub corrections: Vec<Artifact>,
}

/// Access-control and lifecycle policy for the document repository.
#[derive(Clone)]
pub struct PolicyEngine {
    stores: Collaborators,
    settings: PolicySettings,
    audit: EventDeduplicator,
    views: ViewThrottle,
    clock: Arc<dyn Clock>,
}

impl PolicyEngine {
    pub fn new(
        stores: Collaborators,
        settings: PolicySettings,
        audit: EventDeduplicator,
        views: ViewThrottle,
    ) -> Self {
        Self {
            stores,
            settings,
            audit,
            views,
            clock: Arc::new(SystemClock),
        }
    }

    /// Connect to Postgres (running migrations), local file storage and,
    /// when `REDIS_URL` is set, Redis for the shared dedup and view caches.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool =
            db::create_pool(&config.database_url, config.database_max_connections).await?;
        db::run_migrations(&pool).await?;
        let store = Arc::new(PgStore::new(pool));

        let (audit_cache, view_cache): (Arc<dyn TtlCache>, Arc<dyn TtlCache>) =
            match &config.redis_url {
                Some(url) => {
                    let redis = db::create_redis_client(url).await?;
                    (
                        Arc::new(RedisTtlCache::new(redis.clone(), AUDIT_KEY_PREFIX)),
                        Arc::new(RedisTtlCache::new(redis, VIEW_KEY_PREFIX)),
                    )
                }
                None => {
                    tracing::info!("REDIS_URL not set, using in-process caches");
                    (
                        Arc::new(MemoryTtlCache::new()),
                        Arc::new(MemoryTtlCache::new()),
                    )
                }
            };

        let stores = Collaborators {
            artifacts: store.clone(),
            comments: store.clone(),
            directory: store.clone(),
            storage: Arc::new(LocalFileStorage::new(config.storage_root.clone())),
        };
        let audit = EventDeduplicator::new(
            audit_cache,
            store,
            Duration::milliseconds(config.audit_dedup_window_ms),
            config.audit_sweep_threshold,
        );
        let views = ViewThrottle::new(
            view_cache,
            Duration::seconds(config.view_throttle_secs),
            config.view_sweep_threshold,
        );

        Ok(Self::new(
            stores,
            PolicySettings::from_config(config),
            audit,
            views,
        ))
    }

    /// Replace the wall clock, e.g. with a `ManualClock` in tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    // ========================================================================
    // Visibility
    // ========================================================================

    /// Check that `principal` may read the artifact.
    ///
    /// Deleted and purged artifacts are reported as not found.
    #[tracing::instrument(
        skip(self, principal),
        fields(principal_id = %principal.id, role = principal.role.as_str())
    )]
    pub async fn check_access(
        &self,
        artifact_id: Uuid,
        principal: &Principal,
    ) -> Result<(), PolicyError> {
        self.load_visible(artifact_id, principal).await.map(|_| ())
    }

    /// Build the listing predicate for `principal`.
    pub async fn build_list_predicate(
        &self,
        filters: &ListFilters,
        principal: &Principal,
    ) -> Result<Predicate, PolicyError> {
        let eligible: HashSet<Uuid> = match principal.role {
            Role::Admin => HashSet::new(),
            Role::Professor => self
                .stores
                .directory
                .subjects_assigned_to(principal.id)
                .await?
                .into_iter()
                .collect(),
            Role::Student => match (principal.home_track_id, principal.home_level_id) {
                (Some(track), Some(level)) => self
                    .stores
                    .directory
                    .subjects_in_scope(track, level)
                    .await?
                    .into_iter()
                    .collect(),
                _ => HashSet::new(),
            },
        };

        let scope =
            visibility::scope_eligibility(principal, eligible, &self.settings.terminal_levels);
        Ok(visibility::list_predicate(filters, principal, scope))
    }

    /// Active, non-correction artifacts the principal may read.
    #[tracing::instrument(
        skip(self, principal),
        fields(principal_id = %principal.id, role = principal.role.as_str())
    )]
    pub async fn list_artifacts(
        &self,
        filters: &ListFilters,
        principal: &Principal,
    ) -> Result<Vec<Artifact>, PolicyError> {
        let predicate = self.build_list_predicate(filters, principal).await?;
        Ok(self.stores.artifacts.list_artifacts(&predicate).await?)
    }

    /// Fetch a readable artifact along with its active corrections.
    #[tracing::instrument(
        skip(self, principal),
        fields(principal_id = %principal.id, role = principal.role.as_str())
    )]
    pub async fn fetch_with_corrections(
        &self,
        artifact_id: Uuid,
        principal: &Principal,
    ) -> Result<ArtifactWithCorrections, PolicyError> {
        let artifact = self.load_visible(artifact_id, principal).await?;
        let corrections = self
            .stores
            .artifacts
            .corrections_of(artifact_id)
            .await?
            .into_iter()
            .filter(|c| c.lifecycle.is_active())
            .collect();

        Ok(ArtifactWithCorrections {
            artifact,
            corrections,
        })
    }

    /// Link an uploaded artifact as the correction of another.
    ///
    /// The caller must own (or administer) the correction and be able to
    /// read the target. A target holds at most one correction.
    #[tracing::instrument(
        skip(self, principal),
        fields(principal_id = %principal.id, role = principal.role.as_str())
    )]
    pub async fn register_correction(
        &self,
        correction_id: Uuid,
        target_id: Uuid,
        principal: &Principal,
    ) -> Result<(), PolicyError> {
        if correction_id == target_id {
            return Err(PolicyError::Validation(
                "an artifact cannot correct itself".into(),
            ));
        }

        let correction = self.load_active(correction_id).await?;
        if !principal.owns_or_admin(correction.owner_id) {
            return Err(PolicyError::forbidden(
                "only the owner or an admin can register a correction",
            ));
        }
        if correction.is_correction() {
            return Err(PolicyError::conflict(
                "document is already registered as a correction",
            ));
        }

        let target = self.load_visible(target_id, principal).await?;
        if target.is_correction() {
            return Err(PolicyError::Validation(
                "a correction cannot itself be corrected".into(),
            ));
        }

        if !self
            .stores
            .artifacts
            .set_correction(correction_id, target_id)
            .await?
        {
            return Err(PolicyError::conflict("document already has a correction"));
        }

        tracing::info!(correction_id = %correction_id, target_id = %target_id, "Correction registered");
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Soft-delete an artifact, parking its file under the trash key.
    ///
    /// Checks run in order: active state, ownership, then `guard`.
    #[tracing::instrument(skip(self, principal, guard), fields(principal_id = %principal.id, role = principal.role.as_str()))]
    pub async fn soft_delete(
        &self,
        artifact_id: Uuid,
        principal: &Principal,
        guard: &dyn DeletionGuard,
    ) -> Result<(), PolicyError> {
        let artifact = self
            .stores
            .artifacts
            .get_artifact(artifact_id)
            .await?
            .ok_or(PolicyError::NotFound)?;

        let now = self.clock.now();
        lifecycle::delete_transition(&artifact, principal, now)?;
        guard.check(&artifact).await?;

        let trash = lifecycle::trash_key(&artifact);
        let moved = self.relocate(&artifact.file_path, &trash).await?;

        let result = self
            .stores
            .artifacts
            .mark_deleted(artifact_id, now, principal.id)
            .await;

        match result {
            Ok(true) => {
                tracing::info!(artifact_id = %artifact_id, "Artifact moved to trash");
                Ok(())
            }
            Ok(false) => {
                self.roll_back(moved, &trash, &artifact.file_path).await;
                Err(PolicyError::NotFound)
            }
            Err(e) => {
                self.roll_back(moved, &trash, &artifact.file_path).await;
                Err(e.into())
            }
        }
    }

    /// Restore a soft-deleted artifact within the restore window.
    #[tracing::instrument(
        skip(self, principal),
        fields(principal_id = %principal.id, role = principal.role.as_str())
    )]
    pub async fn restore(&self, artifact_id: Uuid, principal: &Principal) -> Result<(), PolicyError> {
        let artifact = self
            .stores
            .artifacts
            .get_artifact(artifact_id)
            .await?
            .ok_or(PolicyError::NotFound)?;

        let now = self.clock.now();
        lifecycle::restore_transition(&artifact, principal, now, self.settings.restore_window)?;

        let trash = lifecycle::trash_key(&artifact);
        let moved = self.relocate(&trash, &artifact.file_path).await?;

        match self.stores.artifacts.mark_restored(artifact_id).await {
            Ok(true) => {
                tracing::info!(artifact_id = %artifact_id, "Artifact restored");
                Ok(())
            }
            Ok(false) => {
                self.roll_back(moved, &artifact.file_path, &trash).await;
                Err(PolicyError::NotFound)
            }
            Err(e) => {
                self.roll_back(moved, &artifact.file_path, &trash).await;
                Err(e.into())
            }
        }
    }

    /// Permanently remove artifacts deleted longer ago than the window.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PolicyError> {
        lifecycle::purge_expired(
            self.stores.artifacts.as_ref(),
            self.stores.storage.as_ref(),
            now,
            self.settings.restore_window,
        )
        .await
    }

    /// Deleted artifacts close to purge: all of them for admins, own
    /// uploads for everyone else. Soonest first.
    #[tracing::instrument(
        skip(self, principal),
        fields(principal_id = %principal.id, role = principal.role.as_str())
    )]
    pub async fn expiring_soon(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ExpiringArtifact>, PolicyError> {
        let owner = (!principal.is_admin()).then_some(principal.id);
        let deleted = self.stores.artifacts.list_deleted(owner).await?;

        Ok(lifecycle::expiring_within(
            deleted,
            self.clock.now(),
            self.settings.restore_window,
            self.settings.expiry_notice_days,
        ))
    }

    // ========================================================================
    // Comments
    // ========================================================================

    /// Whether `principal` may reply to the comment.
    pub async fn can_reply(
        &self,
        comment_id: Uuid,
        principal: &Principal,
    ) -> Result<ReplyDecision, PolicyError> {
        let parent = self.load_active_comment(comment_id).await?;
        let replies = self.stores.comments.replies_to(parent.id).await?;
        Ok(comments::can_reply(&parent, principal, &replies))
    }

    /// Post a top-level comment or a reply on a readable artifact.
    #[tracing::instrument(skip(self, body, principal), fields(principal_id = %principal.id, role = principal.role.as_str()))]
    pub async fn post_comment(
        &self,
        artifact_id: Uuid,
        parent_id: Option<Uuid>,
        body: &str,
        principal: &Principal,
    ) -> Result<Comment, PolicyError> {
        let body = comments::normalize_body(body)?;
        self.load_visible(artifact_id, principal).await?;

        if let Some(parent_id) = parent_id {
            let parent = self.load_active_comment(parent_id).await?;
            if parent.artifact_id != artifact_id {
                return Err(PolicyError::Validation(
                    "parent comment belongs to a different document".into(),
                ));
            }

            let replies = self.stores.comments.replies_to(parent.id).await?;
            let decision = comments::can_reply(&parent, principal, &replies);
            if !decision.allowed {
                let reason = decision.reason.unwrap_or_default();
                return Err(PolicyError::Forbidden(reason));
            }
        }

        let comment = Comment {
            id: Uuid::now_v7(),
            artifact_id,
            author_id: principal.id,
            author_role: principal.role,
            parent_id,
            body,
            created_at: self.clock.now(),
            state: CommentState::Active,
        };
        self.stores.comments.insert_comment(&comment).await?;

        Ok(comment)
    }

    /// Active comments of a readable artifact, oldest first.
    pub async fn list_comments(
        &self,
        artifact_id: Uuid,
        principal: &Principal,
    ) -> Result<Vec<Comment>, PolicyError> {
        self.load_visible(artifact_id, principal).await?;
        Ok(self
            .stores
            .comments
            .comments_for_artifact(artifact_id)
            .await?)
    }

    /// Delete a comment together with its direct replies.
    ///
    /// Returns the ids of every comment that was deleted.
    #[tracing::instrument(
        skip(self, principal),
        fields(principal_id = %principal.id, role = principal.role.as_str())
    )]
    pub async fn delete_comment(
        &self,
        comment_id: Uuid,
        principal: &Principal,
    ) -> Result<Vec<Uuid>, PolicyError> {
        let comment = self
            .stores
            .comments
            .get_comment(comment_id)
            .await?
            .ok_or(PolicyError::NotFound)?;

        let is_moderator = match principal.role {
            Role::Professor if principal.id != comment.author_id => {
                self.moderates(principal.id, comment.artifact_id).await?
            }
            Role::Student | Role::Professor | Role::Admin => false,
        };
        comments::can_delete_comment(&comment, principal, is_moderator)?;

        let deleted = self
            .stores
            .comments
            .delete_with_replies(comment_id, self.clock.now(), principal.id)
            .await?;

        if deleted.is_empty() {
            return Err(PolicyError::NotFound);
        }

        tracing::info!(
            comment_id = %comment_id,
            cascaded = deleted.len() - 1,
            "Comment deleted"
        );
        Ok(deleted)
    }

    // ========================================================================
    // Audit & views
    // ========================================================================

    /// Count a view unless the same principal viewed the artifact recently.
    /// Returns whether the counter was incremented.
    pub async fn record_view(
        &self,
        artifact_id: Uuid,
        principal: &Principal,
    ) -> Result<bool, PolicyError> {
        self.load_visible(artifact_id, principal).await?;

        if !self
            .views
            .should_count(artifact_id, principal.id, self.clock.now())
            .await
        {
            return Ok(false);
        }

        self.stores.artifacts.increment_views(artifact_id).await?;
        Ok(true)
    }

    /// Record an audit event, suppressing duplicates.
    ///
    /// Audit failures never fail the calling operation; they are logged.
    /// Returns whether the event was stored.
    pub async fn record_audit(&self, event: &AuditEvent) -> bool {
        match self.audit.record(event).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(action = %event.action, error = %e, "Failed to write audit event");
                false
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_active(&self, artifact_id: Uuid) -> Result<Artifact, PolicyError> {
        self.stores
            .artifacts
            .get_artifact(artifact_id)
            .await?
            .filter(|a| a.lifecycle.is_active())
            .ok_or(PolicyError::NotFound)
    }

    async fn load_visible(
        &self,
        artifact_id: Uuid,
        principal: &Principal,
    ) -> Result<Artifact, PolicyError> {
        let artifact = self.load_active(artifact_id).await?;
        let subjects = self.load_subjects(&artifact).await?;

        match visibility::resolve_access(
            &artifact,
            principal,
            &subjects,
            &self.settings.terminal_levels,
        ) {
            AccessDecision::Allow => Ok(artifact),
            AccessDecision::Deny(reason) => {
                tracing::debug!(artifact_id = %artifact_id, %reason, "Access denied");
                Err(PolicyError::Forbidden(reason.to_string()))
            }
        }
    }

    async fn load_subjects(&self, artifact: &Artifact) -> Result<Vec<Subject>, PolicyError> {
        let lookups = artifact
            .subject_ids
            .iter()
            .map(|id| self.stores.directory.get_subject(*id));
        let subjects = try_join_all(lookups).await?;
        Ok(subjects.into_iter().flatten().collect())
    }

    async fn load_active_comment(&self, comment_id: Uuid) -> Result<Comment, PolicyError> {
        self.stores
            .comments
            .get_comment(comment_id)
            .await?
            .filter(|c| c.state.is_active())
            .ok_or(PolicyError::NotFound)
    }

    /// Professors moderate discussions on artifacts in subjects they teach.
    async fn moderates(&self, professor_id: Uuid, artifact_id: Uuid) -> Result<bool, PolicyError> {
        let Some(artifact) = self.stores.artifacts.get_artifact(artifact_id).await? else {
            return Ok(false);
        };

        let checks = artifact
            .subject_ids
            .iter()
            .map(|id| self.stores.directory.is_assigned(professor_id, *id));
        let assigned = try_join_all(checks).await?;
        Ok(assigned.into_iter().any(|a| a))
    }

    /// Move a file if it exists. Returns whether anything was moved.
    async fn relocate(&self, src: &str, dst: &str) -> Result<bool, PolicyError> {
        if !self.stores.storage.file_exists(src).await? {
            tracing::warn!(path = %src, "Artifact file missing, skipping relocation");
            return Ok(false);
        }
        self.stores.storage.move_file(src, dst).await?;
        Ok(true)
    }

    async fn roll_back(&self, moved: bool, src: &str, dst: &str) {
        if !moved {
            return;
        }
        if let Err(e) = self.stores.storage.move_file(src, dst).await {
            tracing::error!(from = %src, to = %dst, error = %e, "Failed to roll back file move");
        }
    }
}
