//! Source snapshot provider abstraction.
//!
//! A [`SnapshotProvider`] materializes repository content and computes
//! commit-to-commit change sets. Every pass that needs files on disk
//! acquires a [`Workspace`]: a temporary directory exclusively owned by the
//! pass and removed when the workspace is dropped, whichever way the pass
//! exits.
//!
//! # Lifecycle
//!
//! ```text
//! open ──▶ materialize_full / diff / fetch_file ──▶ release (or drop)
//! ```
//!
//! [`resolve_latest_commit`](SnapshotProvider::resolve_latest_commit) is
//! the lightweight probe used before any workspace is opened.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tempfile::TempDir;

use repo_index_sync_core::{ChangeSet, Resource, Result, SyncError};

/// Where a repository lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub uri: String,
    pub branch: String,
    /// Opaque secret-store key; `None` means public access.
    pub credentials_ref: Option<String>,
}

impl From<&Resource> for SourceLocation {
    fn from(resource: &Resource) -> Self {
        Self {
            uri: resource.uri.clone(),
            branch: resource.branch.clone(),
            credentials_ref: resource.credentials_ref.clone(),
        }
    }
}

/// Scoped working directory of one sync pass.
///
/// Owns a [`TempDir`]: dropping the workspace deletes the directory.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    location: SourceLocation,
}

impl Workspace {
    /// Create a fresh workspace under `base` (system temp dir when `None`).
    pub fn create(base: Option<&Path>, location: SourceLocation) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ris-workspace-");
        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir, location })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Delete the directory now, reporting I/O errors instead of
    /// swallowing them as `Drop` does.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// A fully materialized tree.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Directory holding the checked-out tree.
    pub root: PathBuf,
    /// Commit the tree was exported at.
    pub commit: String,
    /// Relative, `/`-separated file paths, sorted.
    pub files: Vec<String>,
}

#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Acquire a workspace for `location`, checking that the repository is
    /// reachable with its credentials.
    async fn open(&self, location: &SourceLocation) -> Result<Workspace>;

    /// Export the full tree at the head of the workspace's branch. Only
    /// regular files are listed; symlinks and submodules are not.
    async fn materialize_full(&self, workspace: &Workspace) -> Result<Snapshot>;

    /// Head commit of the branch, without exporting anything.
    async fn resolve_latest_commit(&self, location: &SourceLocation) -> Result<String>;

    /// Paths added/modified and deleted between two commits. A path that
    /// is not a regular file at `to` is reported as deleted, never added.
    async fn diff(&self, workspace: &Workspace, from: &str, to: &str) -> Result<ChangeSet>;

    /// Content of one path at `commit`.
    async fn fetch_file(&self, workspace: &Workspace, commit: &str, path: &str)
        -> Result<Vec<u8>>;

    /// Release the workspace. Dropping it has the same effect; this variant
    /// logs cleanup failures.
    fn release(&self, workspace: Workspace) {
        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove workspace");
        }
    }
}

/// Include/exclude glob filter over relative paths. `.git/**` is always
/// excluded.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> anyhow::Result<Self> {
        let mut excludes = vec![".git/**".to_string(), "**/.git/**".to_string()];
        excludes.extend(exclude_globs.iter().cloned());
        Ok(Self {
            include: build_globset(include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    /// Filter accepting every path outside `.git`.
    pub fn allow_all() -> Self {
        Self::new(&["**/*".to_string()], &[]).unwrap_or_else(|_| Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
        })
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        !self.exclude.is_match(relative_path) && self.include.is_match(relative_path)
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Reject paths that would escape the workspace when joined onto it.
pub fn checked_relative(path: &str) -> Result<&str> {
    let escapes = path.starts_with('/')
        || path.split('/').any(|segment| segment == "..")
        || path.is_empty();
    if escapes {
        return Err(SyncError::NotFound(format!("invalid repository path '{}'", path)));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> SourceLocation {
        SourceLocation {
            uri: "https://example.com/r.git".into(),
            branch: "main".into(),
            credentials_ref: None,
        }
    }

    #[test]
    fn workspace_removed_on_drop() {
        let ws = Workspace::create(None, location()).unwrap();
        let path = ws.path().to_path_buf();
        std::fs::write(path.join("f.txt"), "x").unwrap();
        assert!(path.exists());
        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn workspace_removed_on_error_path() {
        fn failing_pass(base: &Path) -> Result<PathBuf> {
            let ws = Workspace::create(Some(base), location())?;
            let path = ws.path().to_path_buf();
            Err(SyncError::Network(path.display().to_string()))
        }
        let base = tempfile::TempDir::new().unwrap();
        let err = failing_pass(base.path()).unwrap_err();
        let SyncError::Network(path) = err else {
            panic!("unexpected error");
        };
        assert!(!Path::new(&path).exists());
    }

    #[test]
    fn path_filter_excludes_git_dir() {
        let filter = PathFilter::new(&["**/*".to_string()], &["**/*.png".to_string()]).unwrap();
        assert!(filter.matches("src/main.rs"));
        assert!(filter.matches("README.md"));
        assert!(!filter.matches(".git/config"));
        assert!(!filter.matches("docs/logo.png"));
        assert!(PathFilter::allow_all().matches("a/b/c.yaml"));
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(checked_relative("src/a.rs").is_ok());
        assert!(checked_relative("../etc/passwd").is_err());
        assert!(checked_relative("/abs").is_err());
        assert!(checked_relative("").is_err());
    }
}
