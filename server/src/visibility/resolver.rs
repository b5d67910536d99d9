//! Access resolution.
//!
//! Decides whether a principal may read a single artifact, and builds the
//! equivalent scope predicate for listings.

use std::collections::HashSet;

use uuid::Uuid;

use super::predicate::Predicate;
use crate::models::{Artifact, Category, Principal, Role, Subject};

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Why an access check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Capstone documents are limited to final-year students.
    NotTerminalLevel,
    /// Professor teaches none of the artifact's subjects.
    NotAssigned,
    /// None of the artifact's subjects belong to the student's track and level.
    OutOfScope,
    /// Student principal without a home track or level.
    MissingScope,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotTerminalLevel => write!(f, "capstone documents require a final-year level"),
            Self::NotAssigned => write!(f, "professor is not assigned to this subject"),
            Self::OutOfScope => write!(f, "document is outside your track and level"),
            Self::MissingScope => write!(f, "student has no academic scope"),
        }
    }
}

/// Decide read access to an artifact.
///
/// `subjects` are the artifact's subjects as resolved from the directory.
///
/// Resolution order:
/// 1. Admins see everything
/// 2. Owners see their own uploads
/// 3. Capstone: professors, and students at a terminal level
/// 4. Otherwise: assigned professors, and students whose track and level
///    match one of the artifact's subjects
pub fn resolve_access(
    artifact: &Artifact,
    principal: &Principal,
    subjects: &[Subject],
    terminal_levels: &HashSet<Uuid>,
) -> AccessDecision {
    if principal.is_admin() || principal.id == artifact.owner_id {
        return AccessDecision::Allow;
    }

    let attached: Vec<&Subject> = subjects
        .iter()
        .filter(|s| artifact.subject_ids.contains(&s.id))
        .collect();

    match (principal.role, artifact.category) {
        (Role::Admin, _) | (Role::Professor, Category::Capstone) => AccessDecision::Allow,
        (Role::Student, Category::Capstone) => match principal.home_level_id {
            Some(level) if terminal_levels.contains(&level) => AccessDecision::Allow,
            Some(_) => AccessDecision::Deny(DenyReason::NotTerminalLevel),
            None => AccessDecision::Deny(DenyReason::MissingScope),
        },
        (Role::Professor, _) => {
            if attached.iter().any(|s| s.is_assigned(principal.id)) {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::NotAssigned)
            }
        }
        (Role::Student, _) => {
            let (Some(track), Some(level)) = (principal.home_track_id, principal.home_level_id)
            else {
                return AccessDecision::Deny(DenyReason::MissingScope);
            };
            if attached.iter().any(|s| s.in_scope(track, level)) {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::OutOfScope)
            }
        }
    }
}

/// Scope-based eligibility as a predicate, mirroring rules 3 and 4 of
/// [`resolve_access`] without the owner and admin shortcuts.
///
/// `eligible_subjects` are the subjects the principal can see through:
/// assigned subjects for professors, subjects in the home track and level
/// for students. Ignored for admins.
pub fn scope_eligibility(
    principal: &Principal,
    eligible_subjects: HashSet<Uuid>,
    terminal_levels: &HashSet<Uuid>,
) -> Predicate {
    let capstone = || Predicate::Category(Category::Capstone);
    let by_subject = |subjects| {
        Predicate::and([
            Predicate::not(capstone()),
            Predicate::AnySubject(subjects),
        ])
    };

    match principal.role {
        Role::Admin => Predicate::True,
        Role::Professor => Predicate::or([capstone(), by_subject(eligible_subjects)]),
        Role::Student => {
            let terminal = principal
                .home_level_id
                .is_some_and(|level| terminal_levels.contains(&level));
            Predicate::or([
                Predicate::and([capstone(), Predicate::when(terminal)]),
                by_subject(eligible_subjects),
            ])
        }
    }
}
