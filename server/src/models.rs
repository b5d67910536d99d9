//! Domain Models
//!
//! Principals, academic subjects, artifacts and comments as seen by the
//! policy engine. Storage adapters convert their rows into these types.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PolicyError;

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Professor,
    Admin,
}

impl Role {
    /// Professors and admins moderate discussions.
    #[must_use]
    pub const fn is_staff(self) -> bool {
        match self {
            Self::Student => false,
            Self::Professor | Self::Admin => true,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Professor => "professor",
            Self::Admin => "admin",
        }
    }
}

/// Authenticated caller together with its academic scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    /// Academic track a student is enrolled in.
    pub home_track_id: Option<Uuid>,
    /// Academic level (year) a student is enrolled in.
    pub home_level_id: Option<Uuid>,
}

impl Principal {
    /// Build a principal, enforcing that students carry a full home scope.
    pub fn new(
        id: Uuid,
        role: Role,
        home_track_id: Option<Uuid>,
        home_level_id: Option<Uuid>,
    ) -> Result<Self, PolicyError> {
        if role == Role::Student && (home_track_id.is_none() || home_level_id.is_none()) {
            return Err(PolicyError::Validation(
                "students must have a home track and level".into(),
            ));
        }

        Ok(Self {
            id,
            role,
            home_track_id,
            home_level_id,
        })
    }

    #[must_use]
    pub const fn student(id: Uuid, track_id: Uuid, level_id: Uuid) -> Self {
        Self {
            id,
            role: Role::Student,
            home_track_id: Some(track_id),
            home_level_id: Some(level_id),
        }
    }

    #[must_use]
    pub const fn professor(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Professor,
            home_track_id: None,
            home_level_id: None,
        }
    }

    #[must_use]
    pub const fn admin(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Admin,
            home_track_id: None,
            home_level_id: None,
        }
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Owners and admins hold mutation rights over an artifact or comment.
    #[must_use]
    pub fn owns_or_admin(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

/// Teaching responsibility a professor holds within a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subject_responsibility", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Responsibility {
    Lecture,
    Tutorial,
    Lab,
}

/// Professor assignment to a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub professor_id: Uuid,
    pub responsibility: Responsibility,
}

/// A course belonging to one track and level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub track_id: Uuid,
    pub level_id: Uuid,
    pub assignments: HashSet<Assignment>,
}

impl Subject {
    #[must_use]
    pub fn is_assigned(&self, professor_id: Uuid) -> bool {
        self.assignments
            .iter()
            .any(|a| a.professor_id == professor_id)
    }

    /// Whether this subject is taught in the given track and level.
    #[must_use]
    pub fn in_scope(&self, track_id: Uuid, level_id: Uuid) -> bool {
        self.track_id == track_id && self.level_id == level_id
    }

    /// Register a professor for a responsibility.
    ///
    /// The same professor may hold several responsibilities, but each
    /// responsibility is assigned to them at most once.
    pub fn assign(
        &mut self,
        professor_id: Uuid,
        responsibility: Responsibility,
    ) -> Result<(), PolicyError> {
        let assignment = Assignment {
            professor_id,
            responsibility,
        };
        if !self.assignments.insert(assignment) {
            return Err(PolicyError::Conflict(format!(
                "professor already assigned as {responsibility:?} in this subject"
            )));
        }
        Ok(())
    }
}

/// Document category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "artifact_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Lecture,
    Tutorial,
    Lab,
    Exam,
    Capstone,
}

impl Category {
    /// Capstone documents are not bound to subjects.
    #[must_use]
    pub const fn is_capstone(self) -> bool {
        matches!(self, Self::Capstone)
    }
}

/// Lifecycle of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Deleted { at: DateTime<Utc>, by: Uuid },
    Purged,
}

impl LifecycleState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub const fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Deleted { at, .. } => Some(*at),
            Self::Active | Self::Purged => None,
        }
    }
}

/// An uploaded academic document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub category: Category,
    pub owner_id: Uuid,
    /// Empty only for capstone documents.
    pub subject_ids: HashSet<Uuid>,
    pub lifecycle: LifecycleState,
    /// Set when this artifact corrects another one.
    pub correction_of: Option<Uuid>,
    /// Storage key of the uploaded file.
    pub file_path: String,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Check structural invariants before an artifact is persisted.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.subject_ids.is_empty() && !self.category.is_capstone() {
            return Err(PolicyError::Validation(
                "only capstone documents may omit subjects".into(),
            ));
        }
        if self.correction_of == Some(self.id) {
            return Err(PolicyError::Validation(
                "an artifact cannot correct itself".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn is_correction(&self) -> bool {
        self.correction_of.is_some()
    }
}

/// Lifecycle of a comment. Comments are never purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CommentState {
    Active,
    Deleted { at: DateTime<Utc>, by: Uuid },
}

impl CommentState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Discussion entry attached to an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub author_id: Uuid,
    pub author_role: Role,
    pub parent_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub state: CommentState,
}

/// Audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub principal_id: Option<Uuid>,
    pub action: String,
    pub resource: Option<String>,
    pub resource_id: Option<Uuid>,
    /// HTTP method of the originating request.
    pub method: Option<String>,
    /// Request path of the originating request.
    pub url: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(principal_id: Option<Uuid>, action: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            principal_id,
            action: action.into(),
            resource: None,
            resource_id: None,
            method: None,
            url: None,
            ip_address: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>, resource_id: Option<Uuid>) -> Self {
        self.resource = Some(resource.into());
        self.resource_id = resource_id;
        self
    }

    #[must_use]
    pub fn with_request(mut self, method: impl Into<String>, url: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_requires_home_scope() {
        let id = Uuid::new_v4();
        let result = Principal::new(id, Role::Student, Some(Uuid::new_v4()), None);
        assert!(matches!(result, Err(PolicyError::Validation(_))));

        let ok = Principal::new(id, Role::Student, Some(Uuid::new_v4()), Some(Uuid::new_v4()));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_staff_need_no_scope() {
        assert!(Principal::new(Uuid::new_v4(), Role::Professor, None, None).is_ok());
        assert!(Principal::new(Uuid::new_v4(), Role::Admin, None, None).is_ok());
    }

    #[test]
    fn test_role_label_matches_wire_name() {
        for role in [Role::Student, Role::Professor, Role::Admin] {
            assert_eq!(serde_json::to_value(role).unwrap(), role.as_str());
        }
    }

    #[test]
    fn test_duplicate_assignment_conflicts() {
        let professor = Uuid::new_v4();
        let mut subject = Subject {
            id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            level_id: Uuid::new_v4(),
            assignments: HashSet::new(),
        };

        subject.assign(professor, Responsibility::Lecture).unwrap();
        subject.assign(professor, Responsibility::Lab).unwrap();
        let again = subject.assign(professor, Responsibility::Lecture);

        assert!(matches!(again, Err(PolicyError::Conflict(_))));
        assert!(subject.is_assigned(professor));
    }

    #[test]
    fn test_non_capstone_requires_subjects() {
        let artifact = Artifact {
            id: Uuid::new_v4(),
            category: Category::Lecture,
            owner_id: Uuid::new_v4(),
            subject_ids: HashSet::new(),
            lifecycle: LifecycleState::Active,
            correction_of: None,
            file_path: "lectures/intro.pdf".into(),
            view_count: 0,
            created_at: Utc::now(),
        };
        assert!(artifact.validate().is_err());

        let capstone = Artifact {
            category: Category::Capstone,
            ..artifact
        };
        assert!(capstone.validate().is_ok());
    }
}
