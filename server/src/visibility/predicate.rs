//! Artifact list predicates.
//!
//! A small boolean expression over artifacts. Built once per request,
//! evaluated in memory with [`Predicate::matches`] or rendered into a SQL
//! `WHERE` fragment with [`Predicate::push_sql`].

use std::collections::HashSet;

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::{Artifact, Category};

/// Boolean expression over artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    True,
    False,
    /// Artifact uploaded by the given principal.
    Owner(Uuid),
    Category(Category),
    /// Artifact attached to at least one of the given subjects.
    AnySubject(HashSet<Uuid>),
    /// Artifact in the `Active` lifecycle state.
    Active,
    /// Artifact is not a correction of another artifact.
    NotCorrection,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Conjunction. Nested conjunctions are flattened, `True` operands are
    /// dropped and any `False` operand collapses the whole expression.
    #[must_use]
    pub fn and(parts: impl IntoIterator<Item = Self>) -> Self {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Self::True => {}
                Self::False => return Self::False,
                Self::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::True,
            1 => flat.remove(0),
            _ => Self::And(flat),
        }
    }

    /// Disjunction, simplified the same way as [`Predicate::and`].
    #[must_use]
    pub fn or(parts: impl IntoIterator<Item = Self>) -> Self {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Self::False => {}
                Self::True => return Self::True,
                Self::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::False,
            1 => flat.remove(0),
            _ => Self::Or(flat),
        }
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Self) -> Self {
        match inner {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// `True` when `cond` holds, `False` otherwise.
    #[must_use]
    pub const fn when(cond: bool) -> Self {
        if cond {
            Self::True
        } else {
            Self::False
        }
    }

    /// Evaluate against a single artifact.
    #[must_use]
    pub fn matches(&self, artifact: &Artifact) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::Owner(id) => artifact.owner_id == *id,
            Self::Category(category) => artifact.category == *category,
            Self::AnySubject(subjects) => !artifact.subject_ids.is_disjoint(subjects),
            Self::Active => artifact.lifecycle.is_active(),
            Self::NotCorrection => !artifact.is_correction(),
            Self::And(parts) => parts.iter().all(|p| p.matches(artifact)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(artifact)),
            Self::Not(inner) => !inner.matches(artifact),
        }
    }

    /// Append this predicate as SQL against the `artifacts a` relation.
    pub fn push_sql(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::True => {
                builder.push("TRUE");
            }
            Self::False => {
                builder.push("FALSE");
            }
            Self::Owner(id) => {
                builder.push("a.owner_id = ").push_bind(*id);
            }
            Self::Category(category) => {
                builder.push("a.category = ").push_bind(*category);
            }
            Self::AnySubject(subjects) if subjects.is_empty() => {
                builder.push("FALSE");
            }
            Self::AnySubject(subjects) => {
                let ids: Vec<Uuid> = subjects.iter().copied().collect();
                builder
                    .push(
                        "EXISTS (SELECT 1 FROM artifact_subjects s \
                         WHERE s.artifact_id = a.id AND s.subject_id = ANY(",
                    )
                    .push_bind(ids)
                    .push("))");
            }
            Self::Active => {
                builder.push("a.deleted_at IS NULL");
            }
            Self::NotCorrection => {
                builder.push("a.correction_of IS NULL");
            }
            Self::And(parts) => push_joined(builder, parts, " AND ", "TRUE"),
            Self::Or(parts) => push_joined(builder, parts, " OR ", "FALSE"),
            Self::Not(inner) => {
                builder.push("NOT (");
                inner.push_sql(builder);
                builder.push(")");
            }
        }
    }
}

fn push_joined(
    builder: &mut QueryBuilder<'_, Postgres>,
    parts: &[Predicate],
    separator: &str,
    empty: &str,
) {
    if parts.is_empty() {
        builder.push(empty);
        return;
    }
    builder.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            builder.push(separator);
        }
        part.push_sql(builder);
    }
    builder.push(")");
}
