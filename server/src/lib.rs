//! Scholia Policy Engine
//!
//! Access control and lifecycle policy for an academic document repository:
//! who may read which documents, soft delete with a restore window, reply
//! discipline in document discussions, and audit deduplication.

pub mod audit;
pub mod clock;
pub mod collaborators;
pub mod comments;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod visibility;

pub use engine::{Collaborators, PolicyEngine, PolicySettings};
pub use error::PolicyError;
