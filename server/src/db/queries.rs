//! Database Queries
//!
//! Runtime queries (no compile-time `DATABASE_URL` required).
//!
//! All query functions include error context logging to aid debugging.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::error;
use uuid::Uuid;

use super::models::{ArtifactRow, AssignmentRow, CommentRow, SubjectRow};
use crate::collaborators::{ArtifactStore, AuditSink, CommentStore, SubjectDirectory};
use crate::models::{Artifact, AuditEvent, Comment, LifecycleState, Subject};
use crate::visibility::Predicate;

/// Log and return a database error with context.
///
/// This helper ensures all database errors are logged with relevant context
/// before being propagated, making production debugging easier.
macro_rules! db_error {
    ($query:expr, $($field:tt)*) => {
        |e| {
            error!(query = $query, $($field)*, error = %e, "Database query failed");
            e
        }
    };
}

/// Artifact columns with subject ids aggregated, selected from `artifacts a`.
const ARTIFACT_SELECT: &str = r"
    SELECT a.id, a.category, a.owner_id,
           COALESCE(
               (SELECT array_agg(s.subject_id) FROM artifact_subjects s WHERE s.artifact_id = a.id),
               '{}'
           ) AS subject_ids,
           a.deleted_at, a.deleted_by, a.correction_of, a.file_path, a.view_count, a.created_at
    FROM artifacts a
";

const COMMENT_SELECT: &str = r"
    SELECT id, artifact_id, author_id, author_role, parent_id, body, created_at,
           deleted_at, deleted_by
    FROM comments
";

fn into_artifacts(rows: Vec<ArtifactRow>) -> anyhow::Result<Vec<Artifact>> {
    rows.into_iter().map(Artifact::try_from).collect()
}

fn into_comments(rows: Vec<CommentRow>) -> anyhow::Result<Vec<Comment>> {
    rows.into_iter().map(Comment::try_from).collect()
}

/// Postgres-backed stores.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_artifacts(
        &self,
        query: &'static str,
        build: impl FnOnce(&mut QueryBuilder<'_, Postgres>),
    ) -> anyhow::Result<Vec<Artifact>> {
        let mut builder = QueryBuilder::new(ARTIFACT_SELECT);
        build(&mut builder);
        let rows = builder
            .build_query_as::<ArtifactRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error!(query, kind = "artifacts"))?;
        into_artifacts(rows)
    }
}

// ============================================================================
// Artifact Queries
// ============================================================================

#[async_trait]
impl ArtifactStore for PgStore {
    async fn get_artifact(&self, id: Uuid) -> anyhow::Result<Option<Artifact>> {
        let row = sqlx::query_as::<_, ArtifactRow>(&format!("{ARTIFACT_SELECT} WHERE a.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error!("get_artifact", artifact_id = %id))?;
        row.map(Artifact::try_from).transpose()
    }

    async fn insert_artifact(&self, artifact: &Artifact) -> anyhow::Result<()> {
        artifact.validate()?;

        let (deleted_at, deleted_by) = match artifact.lifecycle {
            LifecycleState::Deleted { at, by } => (Some(at), Some(by)),
            LifecycleState::Active | LifecycleState::Purged => (None, None),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO artifacts
                (id, category, owner_id, deleted_at, deleted_by, correction_of,
                 file_path, view_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(artifact.id)
        .bind(artifact.category)
        .bind(artifact.owner_id)
        .bind(deleted_at)
        .bind(deleted_by)
        .bind(artifact.correction_of)
        .bind(&artifact.file_path)
        .bind(artifact.view_count)
        .bind(artifact.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error!("insert_artifact", artifact_id = %artifact.id))?;

        let subject_ids: Vec<Uuid> = artifact.subject_ids.iter().copied().collect();
        sqlx::query(
            r"
            INSERT INTO artifact_subjects (artifact_id, subject_id)
            SELECT $1, UNNEST($2::uuid[])
            ",
        )
        .bind(artifact.id)
        .bind(&subject_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_error!("insert_artifact_subjects", artifact_id = %artifact.id))?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_artifacts(&self, predicate: &Predicate) -> anyhow::Result<Vec<Artifact>> {
        self.fetch_artifacts("list_artifacts", |builder| {
            builder.push(" WHERE ");
            predicate.push_sql(builder);
            builder.push(" ORDER BY a.created_at DESC, a.id");
        })
        .await
    }

    async fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>, by: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE artifacts SET deleted_at = $2, deleted_by = $3
            WHERE id = $1 AND deleted_at IS NULL
            ",
        )
        .bind(id)
        .bind(at)
        .bind(by)
        .execute(&self.pool)
        .await
        .map_err(db_error!("mark_deleted", artifact_id = %id))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_restored(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE artifacts SET deleted_at = NULL, deleted_by = NULL
            WHERE id = $1 AND deleted_at IS NOT NULL
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error!("mark_restored", artifact_id = %id))?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge(&self, id: Uuid, deleted_before: DateTime<Utc>) -> anyhow::Result<bool> {
        // Subject links and comments go with the row (ON DELETE CASCADE).
        let result = sqlx::query(
            r"
            DELETE FROM artifacts
            WHERE id = $1 AND deleted_at IS NOT NULL AND deleted_at < $2
            ",
        )
        .bind(id)
        .bind(deleted_before)
        .execute(&self.pool)
        .await
        .map_err(db_error!("purge_artifact", artifact_id = %id))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_deleted(&self, owner_id: Option<Uuid>) -> anyhow::Result<Vec<Artifact>> {
        self.fetch_artifacts("list_deleted", |builder| {
            builder.push(" WHERE a.deleted_at IS NOT NULL");
            if let Some(owner_id) = owner_id {
                builder.push(" AND a.owner_id = ").push_bind(owner_id);
            }
            builder.push(" ORDER BY a.deleted_at ASC");
        })
        .await
    }

    async fn list_deleted_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Artifact>> {
        self.fetch_artifacts("list_deleted_before", |builder| {
            builder
                .push(" WHERE a.deleted_at IS NOT NULL AND a.deleted_at < ")
                .push_bind(cutoff)
                .push(" ORDER BY a.deleted_at ASC");
        })
        .await
    }

    async fn corrections_of(&self, target_id: Uuid) -> anyhow::Result<Vec<Artifact>> {
        self.fetch_artifacts("corrections_of", |builder| {
            builder
                .push(" WHERE a.correction_of = ")
                .push_bind(target_id)
                .push(" ORDER BY a.created_at ASC");
        })
        .await
    }

    async fn set_correction(&self, correction_id: Uuid, target_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE artifacts SET correction_of = $2
            WHERE id = $1 AND correction_of IS NULL
            ",
        )
        .bind(correction_id)
        .bind(target_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            // One correction per target, enforced by a unique partial index.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => {
                error!(
                    query = "set_correction",
                    correction_id = %correction_id,
                    target_id = %target_id,
                    error = %e,
                    "Database query failed"
                );
                Err(e.into())
            }
        }
    }

    async fn increment_views(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE artifacts SET view_count = view_count + 1 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error!("increment_views", artifact_id = %id))?;
        Ok(())
    }
}

// ============================================================================
// Comment Queries
// ============================================================================

#[async_trait]
impl CommentStore for PgStore {
    async fn get_comment(&self, id: Uuid) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(&format!("{COMMENT_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error!("get_comment", comment_id = %id))?;
        row.map(Comment::try_from).transpose()
    }

    async fn replies_to(&self, parent_id: Uuid) -> anyhow::Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            "{COMMENT_SELECT} WHERE parent_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error!("replies_to", parent_id = %parent_id))?;
        into_comments(rows)
    }

    async fn comments_for_artifact(&self, artifact_id: Uuid) -> anyhow::Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            "{COMMENT_SELECT} WHERE artifact_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(artifact_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error!("comments_for_artifact", artifact_id = %artifact_id))?;
        into_comments(rows)
    }

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()> {
        sqlx::query(
            r"
            INSERT INTO comments (id, artifact_id, author_id, author_role, parent_id, body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(comment.id)
        .bind(comment.artifact_id)
        .bind(comment.author_id)
        .bind(comment.author_role)
        .bind(comment.parent_id)
        .bind(&comment.body)
        .bind(comment.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error!("insert_comment", comment_id = %comment.id))?;
        Ok(())
    }

    async fn delete_with_replies(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        by: Uuid,
    ) -> anyhow::Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let root: Option<Uuid> = sqlx::query_scalar(
            r"
            UPDATE comments SET deleted_at = $2, deleted_by = $3
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id
            ",
        )
        .bind(id)
        .bind(at)
        .bind(by)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error!("delete_comment", comment_id = %id))?;

        let Some(root) = root else {
            tx.rollback().await?;
            return Ok(Vec::new());
        };

        // Direct replies only; deeper descendants stay active.
        let replies: Vec<Uuid> = sqlx::query_scalar(
            r"
            UPDATE comments SET deleted_at = $2, deleted_by = $3
            WHERE parent_id = $1 AND deleted_at IS NULL
            RETURNING id
            ",
        )
        .bind(id)
        .bind(at)
        .bind(by)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error!("delete_comment_replies", comment_id = %id))?;

        tx.commit().await?;

        let mut deleted = Vec::with_capacity(replies.len() + 1);
        deleted.push(root);
        deleted.extend(replies);
        Ok(deleted)
    }
}

// ============================================================================
// Subject Queries
// ============================================================================

#[async_trait]
impl SubjectDirectory for PgStore {
    async fn get_subject(&self, id: Uuid) -> anyhow::Result<Option<Subject>> {
        let Some(row) = sqlx::query_as::<_, SubjectRow>(
            "SELECT id, track_id, level_id FROM subjects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error!("get_subject", subject_id = %id))?
        else {
            return Ok(None);
        };

        let assignments = sqlx::query_as::<_, AssignmentRow>(
            "SELECT professor_id, responsibility FROM subject_assignments WHERE subject_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error!("get_subject_assignments", subject_id = %id))?;

        Ok(Some(row.into_subject(assignments)))
    }

    async fn is_assigned(&self, professor_id: Uuid, subject_id: Uuid) -> anyhow::Result<bool> {
        let assigned: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1 FROM subject_assignments
                WHERE professor_id = $1 AND subject_id = $2
            )
            ",
        )
        .bind(professor_id)
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error!("is_assigned", professor_id = %professor_id, subject_id = %subject_id))?;
        Ok(assigned)
    }

    async fn subjects_in_scope(&self, track_id: Uuid, level_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar("SELECT id FROM subjects WHERE track_id = $1 AND level_id = $2")
            .bind(track_id)
            .bind(level_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error!("subjects_in_scope", track_id = %track_id, level_id = %level_id))?;
        Ok(ids)
    }

    async fn subjects_assigned_to(&self, professor_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT subject_id FROM subject_assignments WHERE professor_id = $1",
        )
        .bind(professor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error!("subjects_assigned_to", professor_id = %professor_id))?;
        Ok(ids)
    }
}

// ============================================================================
// Audit Queries
// ============================================================================

#[async_trait]
impl AuditSink for PgStore {
    async fn write(&self, event: &AuditEvent) -> anyhow::Result<()> {
        sqlx::query(
            r"
            INSERT INTO audit_log
                (id, principal_id, action, resource, resource_id, method, url, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(Uuid::now_v7())
        .bind(event.principal_id)
        .bind(&event.action)
        .bind(&event.resource)
        .bind(event.resource_id)
        .bind(&event.method)
        .bind(&event.url)
        .bind(&event.ip_address)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_error!("write_audit_event", action = %event.action))?;
        Ok(())
    }
}
