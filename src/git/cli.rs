use super::backend::{
    BranchInfo, CommitInfo, CommitPatch, DiffScope, GitBackend, RepositoryResolver, StashEntry,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// `GitBackend` that shells out to the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

// ── Repo Info ──

/// Get the repository root directory for a specific path
pub fn get_repo_root_in(dir: &Path) -> Result<PathBuf> {
    let output = StdCommand::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .with_context(|| format!("Failed to run git in '{}'", dir.display()))?;

    if !output.status.success() {
        anyhow::bail!("Not a git repository: {}", dir.display());
    }

    Ok(PathBuf::from(
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
    ))
}

impl GitCli {
    /// Open the repository containing `dir`
    pub fn discover(dir: &Path) -> Result<Self> {
        Ok(Self {
            root: get_repo_root_in(dir)?,
        })
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        self.run_git_with(args, None, None).await
    }

    /// Run git in the repo root, optionally against another index file and
    /// with `stdin` piped in. Fails with git's stderr on a non-zero exit.
    async fn run_git_with(
        &self,
        args: &[&str],
        index_file: Option<&Path>,
        stdin: Option<&str>,
    ) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.root)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(index) = index_file {
            cmd.env("GIT_INDEX_FILE", index);
        }

        debug!(cmd = %args.join(" "), "git");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                // Dropping the pipe closes git's stdin
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Like `run_git` but maps a failed exit to `None` (for lookups)
    async fn try_git(&self, args: &[&str]) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

#[async_trait]
impl GitBackend for GitCli {
    fn path(&self) -> &Path {
        &self.root
    }

    // ── Diff ──

    async fn get_diff(&self, scope: DiffScope) -> Result<Option<String>> {
        let mut args = vec![
            "diff",
            "--no-color",
            "--no-ext-diff",
            "--binary",
            "--find-renames",
            "--unified=3",
        ];
        if scope == DiffScope::Staged {
            args.push("--cached");
        }

        let stdout = self
            .run_git(&args)
            .await
            .with_context(|| format!("Failed to read {} diff", scope.label()))?;

        if stdout.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(stdout))
        }
    }

    // ── Refs ──

    async fn get_commit(&self, reference: &str) -> Result<Option<CommitInfo>> {
        let spec = format!("{reference}^{{commit}}");
        let Some(sha) = self.try_git(&["rev-parse", "--verify", "--quiet", &spec]).await? else {
            return Ok(None);
        };
        let message = self.run_git(&["log", "-1", "--format=%B", &sha]).await?;
        Ok(Some(CommitInfo {
            sha,
            message: message.trim_end().to_string(),
        }))
    }

    async fn get_current_branch(&self) -> Result<Option<BranchInfo>> {
        let Some(name) = self
            .try_git(&["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await?
        else {
            return Ok(None);
        };
        let full_ref = format!("refs/heads/{name}");
        let Some(sha) = self
            .try_git(&["rev-parse", "--verify", "--quiet", &full_ref])
            .await?
        else {
            // Unborn branch
            return Ok(None);
        };
        Ok(Some(BranchInfo { name, sha }))
    }

    async fn get_worktree_name(&self) -> Result<String> {
        let git_dir = self.run_git(&["rev-parse", "--absolute-git-dir"]).await?;
        Ok(git_dir.trim().to_string())
    }

    // ── Commits ──

    async fn create_unreachable_commits_from_patches(
        &self,
        base_sha: &str,
        patches: &[CommitPatch],
    ) -> Result<Vec<String>> {
        // Build trees in a throwaway index so the real index is never touched
        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        let index = scratch.path().join("index");

        self.run_git_with(&["read-tree", base_sha], Some(&index), None)
            .await
            .with_context(|| format!("Failed to read tree of {base_sha}"))?;

        let mut parent = base_sha.to_string();
        let mut shas = Vec::with_capacity(patches.len());
        for (i, commit) in patches.iter().enumerate() {
            for patch in &commit.patches {
                self.run_git_with(
                    &["apply", "--cached", "--whitespace=nowarn", "-"],
                    Some(&index),
                    Some(patch),
                )
                .await
                .with_context(|| format!("Failed to apply patch for commit {}", i + 1))?;
            }

            let tree = self.run_git_with(&["write-tree"], Some(&index), None).await?;
            let tree = tree.trim().to_string();
            let sha = self
                .run_git_with(
                    &["commit-tree", &tree, "-p", &parent, "-F", "-"],
                    Some(&index),
                    Some(&commit.message),
                )
                .await
                .with_context(|| format!("Failed to create commit {}", i + 1))?;
            let sha = sha.trim().to_string();

            debug!(%sha, %parent, "created unreachable commit");
            parent = sha.clone();
            shas.push(sha);
        }

        Ok(shas)
    }

    // ── Stash ──

    async fn save_stash(
        &self,
        message: &str,
        pathspecs: Option<&[String]>,
        include_untracked: bool,
    ) -> Result<()> {
        let mut args = vec!["stash", "push"];
        if include_untracked {
            args.push("--include-untracked");
        }
        args.extend(["-m", message]);
        if let Some(paths) = pathspecs {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.run_git(&args).await.context("Failed to stash changes")?;
        Ok(())
    }

    async fn get_stash(&self) -> Result<Vec<StashEntry>> {
        let stdout = self
            .run_git(&["stash", "list", "--format=%gd%x00%H%x00%gs"])
            .await
            .context("Failed to list stashes")?;
        Ok(parse_stash_list(&stdout))
    }

    async fn apply_stash(&self, name: &str, delete_after: bool) -> Result<()> {
        self.run_git(&["stash", "apply", name])
            .await
            .with_context(|| format!("Failed to apply {name}"))?;
        if delete_after {
            self.run_git(&["stash", "drop", name])
                .await
                .with_context(|| format!("Failed to drop {name}"))?;
        }
        Ok(())
    }

    async fn reset(&self, sha: &str, hard: bool) -> Result<()> {
        let mode = if hard { "--hard" } else { "--mixed" };
        self.run_git(&["reset", mode, sha])
            .await
            .with_context(|| format!("Failed to reset to {sha}"))?;
        Ok(())
    }
}

/// Parse `stash list --format=%gd%x00%H%x00%gs` output
fn parse_stash_list(stdout: &str) -> Vec<StashEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\0');
            let name = parts.next().filter(|s| !s.is_empty())?;
            let sha = parts.next()?;
            let subject = parts.next().unwrap_or_default();
            Some(StashEntry {
                name: name.to_string(),
                sha: sha.to_string(),
                message: strip_stash_prefix(subject).to_string(),
            })
        })
        .collect()
}

/// "On main: msg" -> "msg"; "WIP on main: abc subject" is kept as is
fn strip_stash_prefix(subject: &str) -> &str {
    if subject.starts_with("On ") {
        if let Some((_, rest)) = subject.split_once(": ") {
            return rest;
        }
    }
    subject
}

// ── Resolver ──

/// Opens `GitCli` backends, rooted at the working directory by default
#[derive(Debug, Clone, Default)]
pub struct GitCliResolver {
    pub default_dir: Option<PathBuf>,
}

impl RepositoryResolver for GitCliResolver {
    fn open(&self, path: &Path) -> Option<Arc<dyn GitBackend>> {
        if !path.exists() {
            return None;
        }
        GitCli::discover(path)
            .ok()
            .map(|cli| Arc::new(cli) as Arc<dyn GitBackend>)
    }

    fn default_path(&self) -> Option<PathBuf> {
        let dir = match &self.default_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().ok()?,
        };
        get_repo_root_in(&dir).ok()
    }
}
