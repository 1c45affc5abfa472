//! Reorganize the uncommitted changes of a git repository into a sequence of
//! commits.
//!
//! [`session::SessionController`] is the entry point: it loads a session,
//! exposes the hunk and draft read model, edits drafts, asks a
//! [`ai::GenerationGateway`] for groupings and messages, and finalizes the
//! plan into real commits.

pub mod ai;
pub mod compose;
pub mod config;
pub mod error;
pub mod git;
pub mod session;
