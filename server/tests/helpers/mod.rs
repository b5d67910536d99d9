//! Reusable test helpers for policy engine integration tests.
//!
//! Provides [`TestWorld`], a [`PolicyEngine`] wired to in-memory
//! collaborators and a manually advanced clock, plus fixtures for subjects,
//! principals and uploads.
//!
//! ## Fault injection
//!
//! [`MemoryStorage::fail_deletes_of`], [`MemoryArtifacts::fail_transitions`]
//! and [`MemoryAuditSink::fail_next_write`] make the next calls fail so error
//! paths (best-effort purge, rollback of file moves, audit retries) can be
//! exercised without a database.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use scholia_server::audit::{EventDeduplicator, MemoryTtlCache, ViewThrottle};
use scholia_server::clock::{Clock, ManualClock};
use scholia_server::collaborators::{
    ArtifactStore, AuditSink, CommentStore, FileStorage, SubjectDirectory,
};
use scholia_server::lifecycle::RestoreWindow;
use scholia_server::models::{
    Artifact, AuditEvent, Category, Comment, CommentState, LifecycleState, Principal,
    Responsibility, Subject,
};
use scholia_server::visibility::Predicate;
use scholia_server::{Collaborators, PolicyEngine, PolicySettings};
use uuid::Uuid;

// ============================================================================
// In-memory collaborators
// ============================================================================

/// Artifact store backed by a map.
#[derive(Default)]
pub struct MemoryArtifacts {
    rows: Mutex<HashMap<Uuid, Artifact>>,
    fail_transitions: AtomicBool,
}

impl MemoryArtifacts {
    /// Make `mark_deleted` and `mark_restored` return errors.
    pub fn fail_transitions(&self, fail: bool) {
        self.fail_transitions.store(fail, Ordering::SeqCst);
    }

    /// Overwrite an artifact's lifecycle state.
    pub fn set_lifecycle(&self, id: Uuid, lifecycle: LifecycleState) {
        let mut rows = self.rows.lock().unwrap();
        rows.get_mut(&id).expect("unknown artifact").lifecycle = lifecycle;
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Artifact> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    fn check_failure(&self) -> anyhow::Result<()> {
        if self.fail_transitions.load(Ordering::SeqCst) {
            bail!("injected artifact store failure");
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn get_artifact(&self, id: Uuid) -> anyhow::Result<Option<Artifact>> {
        Ok(self.snapshot(id))
    }

    async fn insert_artifact(&self, artifact: &Artifact) -> anyhow::Result<()> {
        artifact.validate()?;
        self.rows
            .lock()
            .unwrap()
            .insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn list_artifacts(&self, predicate: &Predicate) -> anyhow::Result<Vec<Artifact>> {
        let mut found: Vec<Artifact> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| predicate.matches(a))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>, by: Uuid) -> anyhow::Result<bool> {
        self.check_failure()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(a) if a.lifecycle.is_active() => {
                a.lifecycle = LifecycleState::Deleted { at, by };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_restored(&self, id: Uuid) -> anyhow::Result<bool> {
        self.check_failure()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(a) if matches!(a.lifecycle, LifecycleState::Deleted { .. }) => {
                a.lifecycle = LifecycleState::Active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge(&self, id: Uuid, deleted_before: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let due = rows
            .get(&id)
            .and_then(|a| a.lifecycle.deleted_at())
            .is_some_and(|at| at < deleted_before);
        if due {
            rows.remove(&id);
            // Mirrors `ON DELETE SET NULL` on artifacts.correction_of
            for row in rows.values_mut() {
                if row.correction_of == Some(id) {
                    row.correction_of = None;
                }
            }
        }
        Ok(due)
    }

    async fn list_deleted(&self, owner_id: Option<Uuid>) -> anyhow::Result<Vec<Artifact>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.lifecycle.deleted_at().is_some())
            .filter(|a| owner_id.is_none_or(|owner| a.owner_id == owner))
            .cloned()
            .collect())
    }

    async fn list_deleted_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Artifact>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.lifecycle.deleted_at().is_some_and(|at| at < cutoff))
            .cloned()
            .collect())
    }

    async fn corrections_of(&self, target_id: Uuid) -> anyhow::Result<Vec<Artifact>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.correction_of == Some(target_id))
            .cloned()
            .collect())
    }

    async fn set_correction(&self, correction_id: Uuid, target_id: Uuid) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|a| a.correction_of == Some(target_id)) {
            return Ok(false);
        }
        match rows.get_mut(&correction_id) {
            Some(a) if a.correction_of.is_none() => {
                a.correction_of = Some(target_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_views(&self, id: Uuid) -> anyhow::Result<()> {
        if let Some(a) = self.rows.lock().unwrap().get_mut(&id) {
            a.view_count += 1;
        }
        Ok(())
    }
}

/// Comment store backed by a map.
#[derive(Default)]
pub struct MemoryComments {
    rows: Mutex<HashMap<Uuid, Comment>>,
}

impl MemoryComments {
    pub fn snapshot(&self, id: Uuid) -> Option<Comment> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl CommentStore for MemoryComments {
    async fn get_comment(&self, id: Uuid) -> anyhow::Result<Option<Comment>> {
        Ok(self.snapshot(id))
    }

    async fn replies_to(&self, parent_id: Uuid) -> anyhow::Result<Vec<Comment>> {
        let mut replies: Vec<Comment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.parent_id == Some(parent_id))
            .cloned()
            .collect();
        replies.sort_by_key(|c| c.created_at);
        Ok(replies)
    }

    async fn comments_for_artifact(&self, artifact_id: Uuid) -> anyhow::Result<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.artifact_id == artifact_id && c.state.is_active())
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(comment.id, comment.clone());
        Ok(())
    }

    async fn delete_with_replies(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        by: Uuid,
    ) -> anyhow::Result<Vec<Uuid>> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.get(&id).is_some_and(|c| c.state.is_active()) {
            return Ok(Vec::new());
        }

        let mut deleted = vec![id];
        deleted.extend(
            rows.values()
                .filter(|c| c.parent_id == Some(id) && c.state.is_active())
                .map(|c| c.id),
        );
        for comment_id in &deleted {
            if let Some(c) = rows.get_mut(comment_id) {
                c.state = CommentState::Deleted { at, by };
            }
        }
        Ok(deleted)
    }
}

/// Subject directory backed by a map.
#[derive(Default)]
pub struct MemoryDirectory {
    subjects: Mutex<HashMap<Uuid, Subject>>,
}

impl MemoryDirectory {
    /// Create a subject in the given track and level.
    pub fn add_subject(&self, track_id: Uuid, level_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.subjects.lock().unwrap().insert(
            id,
            Subject {
                id,
                track_id,
                level_id,
                assignments: HashSet::new(),
            },
        );
        id
    }

    pub fn assign(&self, subject_id: Uuid, professor_id: Uuid, responsibility: Responsibility) {
        self.subjects
            .lock()
            .unwrap()
            .get_mut(&subject_id)
            .expect("unknown subject")
            .assign(professor_id, responsibility)
            .expect("duplicate assignment");
    }
}

#[async_trait]
impl SubjectDirectory for MemoryDirectory {
    async fn get_subject(&self, id: Uuid) -> anyhow::Result<Option<Subject>> {
        Ok(self.subjects.lock().unwrap().get(&id).cloned())
    }

    async fn is_assigned(&self, professor_id: Uuid, subject_id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .get(&subject_id)
            .is_some_and(|s| s.is_assigned(professor_id)))
    }

    async fn subjects_in_scope(&self, track_id: Uuid, level_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.in_scope(track_id, level_id))
            .map(|s| s.id)
            .collect())
    }

    async fn subjects_assigned_to(&self, professor_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_assigned(professor_id))
            .map(|s| s.id)
            .collect())
    }
}

/// File storage tracking which keys exist.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryStorage {
    pub fn put(&self, path: &str) {
        self.files.lock().unwrap().insert(path.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains(path)
    }

    /// Make deleting `path` fail.
    pub fn fail_deletes_of(&self, path: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(path.to_string());
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn file_exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.contains(path))
    }

    async fn delete_file(&self, path: &str) -> anyhow::Result<()> {
        if self.failing_deletes.lock().unwrap().contains(path) {
            bail!("injected delete failure for {path}");
        }
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn move_file(&self, src: &str, dst: &str) -> anyhow::Result<()> {
        let mut files = self.files.lock().unwrap();
        if !files.remove(src) {
            return Err(anyhow!("no such file: {src}"));
        }
        files.insert(dst.to_string());
        Ok(())
    }
}

/// Audit sink collecting events.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    fail_next: AtomicBool,
}

impl MemoryAuditSink {
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Make the next write fail.
    pub fn fail_next_write(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, event: &AuditEvent) -> anyhow::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!("audit log unavailable");
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ============================================================================
// Test world
// ============================================================================

/// Fixed starting instant so window arithmetic is reproducible.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// A policy engine over in-memory collaborators.
pub struct TestWorld {
    pub engine: PolicyEngine,
    pub artifacts: Arc<MemoryArtifacts>,
    pub comments: Arc<MemoryComments>,
    pub directory: Arc<MemoryDirectory>,
    pub storage: Arc<MemoryStorage>,
    pub audit: Arc<MemoryAuditSink>,
    pub audit_cache: Arc<MemoryTtlCache>,
    pub view_cache: Arc<MemoryTtlCache>,
    pub clock: Arc<ManualClock>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_terminal_levels(HashSet::new())
    }

    /// Build a world where students at `terminal_levels` may read capstones.
    pub fn with_terminal_levels(terminal_levels: HashSet<Uuid>) -> Self {
        let artifacts = Arc::new(MemoryArtifacts::default());
        let comments = Arc::new(MemoryComments::default());
        let directory = Arc::new(MemoryDirectory::default());
        let storage = Arc::new(MemoryStorage::default());
        let audit = Arc::new(MemoryAuditSink::default());
        let audit_cache = Arc::new(MemoryTtlCache::new());
        let view_cache = Arc::new(MemoryTtlCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));

        let stores = Collaborators {
            artifacts: artifacts.clone(),
            comments: comments.clone(),
            directory: directory.clone(),
            storage: storage.clone(),
        };
        let settings = PolicySettings {
            terminal_levels,
            restore_window: RestoreWindow::days(30),
            expiry_notice_days: 7,
        };
        let dedup = EventDeduplicator::new(
            audit_cache.clone(),
            audit.clone(),
            Duration::milliseconds(1000),
            100,
        );
        let views = ViewThrottle::new(view_cache.clone(), Duration::seconds(5), 100);

        let engine =
            PolicyEngine::new(stores, settings, dedup, views).with_clock(clock.clone());

        Self {
            engine,
            artifacts,
            comments,
            directory,
            storage,
            audit,
            audit_cache,
            view_cache,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store an active artifact with a backing file.
    pub async fn upload(
        &self,
        owner: &Principal,
        category: Category,
        subject_ids: &[Uuid],
    ) -> Artifact {
        let id = Uuid::new_v4();
        let artifact = Artifact {
            id,
            category,
            owner_id: owner.id,
            subject_ids: subject_ids.iter().copied().collect(),
            lifecycle: LifecycleState::Active,
            correction_of: None,
            file_path: format!("uploads/{id}/notes.pdf"),
            view_count: 0,
            created_at: self.now(),
        };
        self.artifacts
            .insert_artifact(&artifact)
            .await
            .expect("failed to insert artifact");
        self.storage.put(&artifact.file_path);
        artifact
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// A student enrolled in a fresh track and level.
pub fn student_in(track_id: Uuid, level_id: Uuid) -> Principal {
    Principal::student(Uuid::new_v4(), track_id, level_id)
}

pub fn professor() -> Principal {
    Principal::professor(Uuid::new_v4())
}

pub fn admin() -> Principal {
    Principal::admin(Uuid::new_v4())
}
