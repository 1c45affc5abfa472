use thiserror::Error;

/// Everything that can stop a composer operation
#[derive(Debug, Error)]
pub enum ComposerError {
    /// Session could not be bootstrapped
    #[error("{0}")]
    Loading(String),

    /// Repository drifted since the session's snapshot was captured
    #[error("Repository changed since the composer opened:\n{}", .errors.join("\n"))]
    SafetyValidation { errors: Vec<String> },

    /// Building patches or creating commits failed; the branch is untouched
    #[error("Failed to create commits: {0}")]
    PatchCreation(String),

    /// Saving or restoring the composer stash failed
    #[error("Stash error: {message}")]
    StashConflict {
        message: String,
        /// Stash entry holding the user's leftover changes, if one was made
        stash: Option<String>,
    },

    /// Moving the branch tip failed
    #[error("Failed to reset branch: {0}")]
    ResetFailed(String),

    #[error("Repository is no longer available")]
    RepositoryUnavailable,

    #[error("A commit operation is already in progress")]
    Busy,

    #[error("No composer session is open")]
    NoSession,

    #[error("{0}")]
    Assignment(String),

    #[error("No hunks are assigned to any commit")]
    EmptyPlan,

    #[error(transparent)]
    Git(#[from] anyhow::Error),
}

impl ComposerError {
    /// Whether the repository was left exactly as the session found it
    /// (besides unreachable commit objects)
    pub fn repository_unchanged(&self) -> bool {
        !matches!(self, ComposerError::StashConflict { .. } | ComposerError::Git(_))
    }
}

pub type Result<T, E = ComposerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_error_lists_every_violation() {
        let err = ComposerError::SafetyValidation {
            errors: vec!["HEAD moved".to_string(), "Branch changed".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("HEAD moved"));
        assert!(text.contains("Branch changed"));
    }

    #[test]
    fn stash_conflict_is_not_a_clean_failure() {
        let err = ComposerError::StashConflict {
            message: "apply failed".to_string(),
            stash: Some("stash@{0}".to_string()),
        };
        assert!(!err.repository_unchanged());
        assert!(ComposerError::PatchCreation("x".into()).repository_unchanged());
    }
}
