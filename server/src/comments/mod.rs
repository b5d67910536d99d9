//! Reply Moderator
//!
//! Escalation discipline for threaded discussions on artifacts. Deleting a
//! comment cascades to its direct replies only; deeper replies stay active.

pub mod moderator;

use crate::error::PolicyError;

pub use moderator::{can_delete_comment, can_reply, ReplyDecision};

/// Maximum comment body length in characters.
pub const MAX_BODY_CHARS: usize = 4000;

/// Trim and check a comment body.
pub fn normalize_body(body: &str) -> Result<String, PolicyError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(PolicyError::Validation("comment body is empty".into()));
    }
    if trimmed.chars().count() > MAX_BODY_CHARS {
        return Err(PolicyError::Validation(format!(
            "comment body exceeds {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}
