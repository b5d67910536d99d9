//! Reply discipline and comment deletion rights.

use serde::Serialize;

use crate::error::PolicyError;
use crate::models::{Comment, Principal, Role};

pub const STUDENT_TO_STUDENT: &str = "students may only reply to professor/admin comments";
pub const AWAITING_STAFF: &str = "must wait for a professor/admin response";

/// Whether a principal may reply to a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReplyDecision {
    #[must_use]
    pub const fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn denied(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Decide whether `principal` may reply to `parent`.
///
/// `replies` are the direct replies to `parent`; deleted ones are ignored.
///
/// Staff may always reply. Students may only answer staff comments, and
/// after replying once must wait until a staff reply is posted after
/// their latest one.
pub fn can_reply(parent: &Comment, principal: &Principal, replies: &[Comment]) -> ReplyDecision {
    match principal.role {
        Role::Professor | Role::Admin => return ReplyDecision::allowed(),
        Role::Student => {}
    }

    if !parent.author_role.is_staff() {
        return ReplyDecision::denied(STUDENT_TO_STUDENT);
    }

    let active: Vec<&Comment> = replies.iter().filter(|r| r.state.is_active()).collect();

    let Some(last_own) = active
        .iter()
        .filter(|r| r.author_id == principal.id)
        .map(|r| r.created_at)
        .max()
    else {
        return ReplyDecision::allowed();
    };

    let answered = active.iter().any(|r| r.author_role.is_staff() && r.created_at > last_own);
    if answered {
        ReplyDecision::allowed()
    } else {
        ReplyDecision::denied(AWAITING_STAFF)
    }
}

/// Check that `principal` may delete `comment`.
///
/// Authors and admins may delete; so may professors moderating the
/// artifact, i.e. assigned to one of its subjects.
pub fn can_delete_comment(
    comment: &Comment,
    principal: &Principal,
    is_moderator: bool,
) -> Result<(), PolicyError> {
    if !comment.state.is_active() {
        return Err(PolicyError::NotFound);
    }

    let allowed = match principal.role {
        Role::Admin => true,
        Role::Professor => principal.id == comment.author_id || is_moderator,
        Role::Student => principal.id == comment.author_id,
    };

    if allowed {
        Ok(())
    } else {
        Err(PolicyError::forbidden(
            "only the author or a moderator can delete this comment",
        ))
    }
}
