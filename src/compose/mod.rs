mod drafts;
mod finalize;
mod hunks;
mod patch;
mod safety;

#[cfg(test)]
pub(crate) mod testing;

pub use drafts::{DraftCommit, DraftPlan, INITIAL_DRAFT_ID};
pub use finalize::{
    FinalizeEngine, FinalizeOutcome, FinalizeReport, FinalizeRequest, FinalizeStage,
    DEFAULT_STASH_PREFIX,
};
pub use hunks::{index_hunks, Hunk, HunkMapEntry, HunkOrigin, HunkSet};
pub use patch::build_commit_patch;
pub use safety::{capture, validate, SafetySnapshot, ValidationReport};
