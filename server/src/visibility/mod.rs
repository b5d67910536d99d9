//! Visibility Resolver
//!
//! Read eligibility for single artifacts and the predicates used to filter
//! artifact listings.

pub mod predicate;
pub mod resolver;

use serde::Deserialize;
use uuid::Uuid;

use crate::models::{Category, Principal};

pub use predicate::Predicate;
pub use resolver::{resolve_access, scope_eligibility, AccessDecision, DenyReason};

/// Filters supplied by the caller of a listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilters {
    pub category: Option<Category>,
    pub subject_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

impl ListFilters {
    fn to_predicate(&self) -> Predicate {
        Predicate::and([
            self.category.map_or(Predicate::True, Predicate::Category),
            self.subject_id.map_or(Predicate::True, |id| {
                Predicate::AnySubject(std::iter::once(id).collect())
            }),
            self.owner_id.map_or(Predicate::True, Predicate::Owner),
        ])
    }
}

/// Assemble the full listing predicate:
/// `filters AND active AND not-a-correction AND (owner OR admin OR scope)`.
pub fn list_predicate(filters: &ListFilters, principal: &Principal, scope: Predicate) -> Predicate {
    Predicate::and([
        filters.to_predicate(),
        Predicate::Active,
        Predicate::NotCorrection,
        Predicate::or([
            Predicate::Owner(principal.id),
            Predicate::when(principal.is_admin()),
            scope,
        ]),
    ])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_admin_predicate_ignores_scope() {
        let admin = Principal::admin(Uuid::new_v4());
        let predicate = list_predicate(&ListFilters::default(), &admin, Predicate::False);
        assert_eq!(
            predicate,
            Predicate::And(vec![Predicate::Active, Predicate::NotCorrection])
        );
    }

    #[test]
    fn test_filters_are_conjoined() {
        let professor = Principal::professor(Uuid::new_v4());
        let subject = Uuid::new_v4();
        let filters = ListFilters {
            category: Some(Category::Exam),
            subject_id: Some(subject),
            owner_id: None,
        };
        let scope = Predicate::AnySubject(HashSet::from([subject]));

        let predicate = list_predicate(&filters, &professor, scope.clone());
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::Category(Category::Exam),
                Predicate::AnySubject(HashSet::from([subject])),
                Predicate::Active,
                Predicate::NotCorrection,
                Predicate::Or(vec![Predicate::Owner(professor.id), scope]),
            ])
        );
    }
}
