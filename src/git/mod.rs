mod backend;
mod cli;
mod diff;

pub use backend::{
    BranchInfo, CommitInfo, CommitPatch, DiffScope, GitBackend, RepositoryResolver, StashEntry,
};
pub use cli::{get_repo_root_in, GitCli, GitCliResolver};
pub use diff::{parse_diff, DiffFile, DiffHunk, DiffLine, FileStatus, LineType};
