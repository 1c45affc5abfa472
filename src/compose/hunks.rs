//! Hunk indexing: turns the staged and unstaged diff texts of a session into
//! one flat, 1-based index space that drafts refer to.

use crate::git::{parse_diff, DiffFile, DiffScope};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a hunk's change currently lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HunkOrigin {
    Staged,
    Unstaged,
    /// Change taken from an existing commit
    Commit(String),
}

impl HunkOrigin {
    /// The diff scope the hunk was read from, if it came from the working copy
    pub fn scope(&self) -> Option<DiffScope> {
        match self {
            HunkOrigin::Staged => Some(DiffScope::Staged),
            HunkOrigin::Unstaged => Some(DiffScope::Unstaged),
            HunkOrigin::Commit(_) => None,
        }
    }
}

impl From<DiffScope> for HunkOrigin {
    fn from(scope: DiffScope) -> Self {
        match scope {
            DiffScope::Staged => HunkOrigin::Staged,
            DiffScope::Unstaged => HunkOrigin::Unstaged,
        }
    }
}

/// Hunk header used for rename-only hunks
pub const RENAME_HUNK_HEADER: &str = "rename";

/// One indivisible fragment of a diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hunk {
    /// Unique 1-based index within the session
    pub index: usize,
    pub file_name: String,
    /// Header block of the file section (`diff --git` through `+++`)
    pub diff_header: String,
    /// `@@ ... @@` line, `rename` for rename hunks, empty for hunk-less changes
    pub hunk_header: String,
    /// Patch body lines, or a rename description for rename hunks
    pub content: String,
    pub additions: usize,
    pub deletions: usize,
    pub origin: HunkOrigin,
    #[serde(default)]
    pub is_rename: bool,
    #[serde(default)]
    pub original_file_name: Option<String>,
}

/// Index -> hunk header pairing shipped instead of full hunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HunkMapEntry {
    pub index: usize,
    pub hunk_header: String,
}

/// Indexed hunks of one session load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HunkSet {
    pub hunks: Vec<Hunk>,
    pub hunk_map: Vec<HunkMapEntry>,
    /// SHA-256 over both diff texts; changes whenever the index space may
    pub digest: String,
}

impl HunkSet {
    pub fn get(&self, index: usize) -> Option<&Hunk> {
        // Indices are contiguous from 1
        self.hunks
            .get(index.wrapping_sub(1))
            .filter(|h| h.index == index)
            .or_else(|| self.hunks.iter().find(|h| h.index == index))
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.hunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.hunks.iter().map(|h| h.index).collect()
    }

    pub fn indices_from(&self, origin: &HunkOrigin) -> Vec<usize> {
        self.hunks
            .iter()
            .filter(|h| &h.origin == origin)
            .map(|h| h.index)
            .collect()
    }
}

/// Compute the digest identifying a pair of diff texts
pub fn compute_diff_hash(staged: Option<&str>, unstaged: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    for part in [staged, unstaged] {
        match part {
            Some(text) => {
                hasher.update(b"1");
                hasher.update((text.len() as u64).to_le_bytes());
                hasher.update(text.as_bytes());
            }
            None => hasher.update(b"0"),
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Index staged then unstaged hunks, 1-based, in file then hunk order
pub fn index_hunks(staged: Option<&str>, unstaged: Option<&str>) -> HunkSet {
    let mut hunks = Vec::new();
    for (scope, text) in [(DiffScope::Staged, staged), (DiffScope::Unstaged, unstaged)] {
        let Some(text) = text else { continue };
        for file in parse_diff(text) {
            push_file_hunks(&mut hunks, &file, HunkOrigin::from(scope));
        }
    }

    let hunk_map = hunks
        .iter()
        .map(|h| HunkMapEntry {
            index: h.index,
            hunk_header: h.hunk_header.clone(),
        })
        .collect();

    HunkSet {
        hunks,
        hunk_map,
        digest: compute_diff_hash(staged, unstaged),
    }
}

fn push_file_hunks(hunks: &mut Vec<Hunk>, file: &DiffFile, origin: HunkOrigin) {
    let diff_header = file.header_text();
    let original_file_name = match &file.status {
        crate::git::FileStatus::Renamed(old) => Some(old.clone()),
        _ => None,
    };

    if file.hunks.is_empty() {
        // Whole-file change without @@ blocks: rename, mode change, binary
        let (hunk_header, content, is_rename) = match &original_file_name {
            Some(old) if file.raw_body.is_empty() => (
                RENAME_HUNK_HEADER.to_string(),
                format!("Renamed from {} to {}", old, file.path),
                true,
            ),
            _ => {
                let mut body = file.raw_body.join("\n");
                if !body.is_empty() {
                    body.push('\n');
                }
                (String::new(), body, false)
            }
        };
        hunks.push(Hunk {
            index: hunks.len() + 1,
            file_name: file.path.clone(),
            diff_header,
            hunk_header,
            content,
            additions: 0,
            deletions: 0,
            origin,
            is_rename,
            original_file_name,
        });
        return;
    }

    for hunk in &file.hunks {
        hunks.push(Hunk {
            index: hunks.len() + 1,
            file_name: file.path.clone(),
            diff_header: diff_header.clone(),
            hunk_header: hunk.header.clone(),
            content: hunk.body_text(),
            additions: hunk.additions(),
            deletions: hunk.deletions(),
            origin: origin.clone(),
            is_rename: false,
            original_file_name: original_file_name.clone(),
        });
    }
}
