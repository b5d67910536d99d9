//! Database Models
//!
//! Row types as stored in Postgres. Lifecycle columns are folded into the
//! domain sum types on conversion; rows with contradictory columns are
//! rejected instead of guessed at.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{
    Artifact, Assignment, Category, Comment, CommentState, LifecycleState, Responsibility, Role,
    Subject,
};

/// Artifact row with its subject ids aggregated.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub id: Uuid,
    pub category: Category,
    pub owner_id: Uuid,
    pub subject_ids: Vec<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub correction_of: Option<Uuid>,
    pub file_path: String,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = anyhow::Error;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let lifecycle = match deletion_marker(row.id, row.deleted_at, row.deleted_by)? {
            Some((at, by)) => LifecycleState::Deleted { at, by },
            None => LifecycleState::Active,
        };

        Ok(Self {
            id: row.id,
            category: row.category,
            owner_id: row.owner_id,
            subject_ids: row.subject_ids.into_iter().collect(),
            lifecycle,
            correction_of: row.correction_of,
            file_path: row.file_path,
            view_count: row.view_count,
            created_at: row.created_at,
        })
    }
}

/// Comment row.
#[derive(Debug, Clone, FromRow)]
pub struct CommentRow {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub author_id: Uuid,
    pub author_role: Role,
    pub parent_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

impl TryFrom<CommentRow> for Comment {
    type Error = anyhow::Error;

    fn try_from(row: CommentRow) -> Result<Self, Self::Error> {
        let state = match deletion_marker(row.id, row.deleted_at, row.deleted_by)? {
            Some((at, by)) => CommentState::Deleted { at, by },
            None => CommentState::Active,
        };

        Ok(Self {
            id: row.id,
            artifact_id: row.artifact_id,
            author_id: row.author_id,
            author_role: row.author_role,
            parent_id: row.parent_id,
            body: row.body,
            created_at: row.created_at,
            state,
        })
    }
}

/// Subject row.
#[derive(Debug, Clone, FromRow)]
pub struct SubjectRow {
    pub id: Uuid,
    pub track_id: Uuid,
    pub level_id: Uuid,
}

/// Professor assignment row.
#[derive(Debug, Clone, FromRow)]
pub struct AssignmentRow {
    pub professor_id: Uuid,
    pub responsibility: Responsibility,
}

impl SubjectRow {
    pub fn into_subject(self, assignments: Vec<AssignmentRow>) -> Subject {
        Subject {
            id: self.id,
            track_id: self.track_id,
            level_id: self.level_id,
            assignments: assignments
                .into_iter()
                .map(|a| Assignment {
                    professor_id: a.professor_id,
                    responsibility: a.responsibility,
                })
                .collect(),
        }
    }
}

fn deletion_marker(
    id: Uuid,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
) -> anyhow::Result<Option<(DateTime<Utc>, Uuid)>> {
    match (deleted_at, deleted_by) {
        (None, None) => Ok(None),
        (Some(at), Some(by)) => Ok(Some((at, by))),
        _ => anyhow::bail!("row {id} has inconsistent deletion columns"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ArtifactRow {
        ArtifactRow {
            id: Uuid::new_v4(),
            category: Category::Lab,
            owner_id: Uuid::new_v4(),
            subject_ids: vec![Uuid::new_v4()],
            deleted_at: None,
            deleted_by: None,
            correction_of: None,
            file_path: "labs/1.pdf".into(),
            view_count: 3,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_active_row() {
        let artifact = Artifact::try_from(row()).unwrap();
        assert_eq!(artifact.lifecycle, LifecycleState::Active);
        assert_eq!(artifact.subject_ids.len(), 1);
    }

    #[test]
    fn test_deleted_row() {
        let at = Utc::now();
        let by = Uuid::new_v4();
        let artifact = Artifact::try_from(ArtifactRow {
            deleted_at: Some(at),
            deleted_by: Some(by),
            ..row()
        })
        .unwrap();
        assert_eq!(artifact.lifecycle, LifecycleState::Deleted { at, by });
    }

    #[test]
    fn test_inconsistent_row_rejected() {
        let half_deleted = ArtifactRow {
            deleted_at: Some(Utc::now()),
            ..row()
        };
        assert!(Artifact::try_from(half_deleted).is_err());
    }
}
