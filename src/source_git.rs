//! Git-backed [`SnapshotProvider`].
//!
//! Shells out to the `git` CLI for cloning and ref resolution. Diffs of
//! GitHub remotes go through the compare API so an incremental pass usually
//! never clones; other remotes, and GitHub comparisons too large to be listed
//! in full, use a bare clone inside the workspace.
//!
//! Only regular files are part of a snapshot. Symlinks and submodules are
//! skipped by the full export and dropped from every change set, so both
//! passes agree on which paths are tracked.
//!
//! Credentials are resolved through the [`SecretStore`] for every call and
//! handed to git as an `http.extraHeader` via `GIT_CONFIG_*` environment
//! variables, never on the command line or in a remote URL.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use walkdir::WalkDir;

use repo_index_sync_core::{ChangeSet, Result, SyncError};

use crate::config::SourceConfig;
use crate::secrets::{Credentials, SecretStore};
use crate::source::{checked_relative, Snapshot, SnapshotProvider, SourceLocation, Workspace};

const TREE_DIR: &str = "tree";
const BARE_DIR: &str = "repo.git";
const FETCHED_DIR: &str = "fetched";
/// The compare endpoint lists at most this many files for a comparison.
const COMPARE_FILE_LIMIT: usize = 300;

pub struct GitSourceProvider {
    secrets: Arc<dyn SecretStore>,
    github_api_url: reqwest::Url,
    workspace_dir: Option<std::path::PathBuf>,
    timeout: Duration,
    http: reqwest::Client,
}

impl GitSourceProvider {
    pub fn new(config: &SourceConfig, secrets: Arc<dyn SecretStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("repo-index-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let github_api_url = reqwest::Url::parse(&config.github_api_url)
            .map_err(|e| anyhow::anyhow!("invalid github_api_url '{}': {}", config.github_api_url, e))?;
        if github_api_url.cannot_be_a_base() {
            anyhow::bail!("invalid github_api_url '{}'", config.github_api_url);
        }
        Ok(Self {
            secrets,
            github_api_url,
            workspace_dir: config.workspace_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            http,
        })
    }

    async fn credentials(&self, location: &SourceLocation) -> Result<Option<Credentials>> {
        match &location.credentials_ref {
            Some(reference) => Ok(Some(self.secrets.resolve(reference).await?)),
            None => Ok(None),
        }
    }

    async fn git(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
        location: &SourceLocation,
    ) -> Result<Vec<u8>> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        if let Some(creds) = self.credentials(location).await? {
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", auth_header(&creds));
        }

        let verb = args
            .iter()
            .copied()
            .find(|a| !a.starts_with('-') && !a.contains('='))
            .unwrap_or("git");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| SyncError::Network(format!("git {} timed out for {}", verb, location.uri)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(git_failure(&stderr, &location.uri));
        }
        Ok(output.stdout)
    }

    /// Bare clone of the branch inside the workspace, created on first use.
    async fn ensure_bare(&self, workspace: &Workspace) -> Result<std::path::PathBuf> {
        let bare = workspace.path().join(BARE_DIR);
        if bare.join("HEAD").exists() {
            return Ok(bare);
        }
        let location = workspace.location();
        let bare_str = bare.to_string_lossy().to_string();
        self.git(
            &[
                "clone",
                "--quiet",
                "--bare",
                "--single-branch",
                "--branch",
                &location.branch,
                &location.uri,
                &bare_str,
            ],
            None,
            location,
        )
        .await?;
        Ok(bare)
    }

    async fn github_get(
        &self,
        url: &str,
        accept: &str,
        location: &SourceLocation,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.get(url).header("Accept", accept);
        if let Some(creds) = self.credentials(location).await? {
            request = request.basic_auth(&creds.username, Some(&creds.token));
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("GET {}: {}", url, e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(github_status_error(status.as_u16(), &location.uri, &body))
    }

    /// Change set from the compare API, or `None` when GitHub cannot list
    /// it completely and the caller has to diff a clone instead.
    async fn github_diff(
        &self,
        repo: &GithubRepo,
        location: &SourceLocation,
        from: &str,
        to: &str,
    ) -> Result<Option<ChangeSet>> {
        let range = format!("{}...{}", from, to);
        let mut url = api_url(
            &self.github_api_url,
            ["repos", repo.owner.as_str(), repo.name.as_str(), "compare", range.as_str()],
        );
        // per_page applies to the commit list; files only come on page 1.
        url.query_pairs_mut().append_pair("per_page", "1");
        let body: CompareResponse = self
            .github_get(url.as_str(), "application/vnd.github+json", location)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("invalid compare response: {}", e)))?;
        if !compare_is_complete(body.files.len()) {
            return Ok(None);
        }

        let mut changes = ChangeSet::default();
        apply_compare_files(&body.files, &mut changes);
        if changes.added.is_empty() {
            return Ok(Some(changes));
        }

        // The compare listing carries no file modes; the target tree does.
        let mut url = api_url(
            &self.github_api_url,
            ["repos", repo.owner.as_str(), repo.name.as_str(), "git", "trees", to],
        );
        url.query_pairs_mut().append_pair("recursive", "1");
        let tree: TreeResponse = self
            .github_get(url.as_str(), "application/vnd.github+json", location)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("invalid tree response: {}", e)))?;
        if tree.truncated {
            return Ok(None);
        }
        retain_regular_files(&mut changes, &tree.tree);
        Ok(Some(changes))
    }

    async fn local_diff(&self, workspace: &Workspace, from: &str, to: &str) -> Result<ChangeSet> {
        let bare = self.ensure_bare(workspace).await?;
        let out = self
            .git(
                &[
                    "-c",
                    "core.quotePath=false",
                    "diff",
                    "--raw",
                    "-z",
                    "--no-renames",
                    from,
                    to,
                ],
                Some(&bare),
                workspace.location(),
            )
            .await?;
        Ok(parse_raw_diff(&out))
    }
}

#[async_trait]
impl SnapshotProvider for GitSourceProvider {
    async fn open(&self, location: &SourceLocation) -> Result<Workspace> {
        // Fails fast on bad credentials or a missing branch before any
        // directory is created.
        self.resolve_latest_commit(location).await?;
        let workspace = Workspace::create(self.workspace_dir.as_deref(), location.clone())?;
        tracing::debug!(
            uri = %location.uri,
            workspace = %workspace.path().display(),
            repo = %short_hash(&location.uri),
            "opened workspace"
        );
        Ok(workspace)
    }

    async fn materialize_full(&self, workspace: &Workspace) -> Result<Snapshot> {
        let location = workspace.location();
        let tree = workspace.path().join(TREE_DIR);
        let tree_str = tree.to_string_lossy().to_string();
        self.git(
            &[
                "clone",
                "--quiet",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                &location.branch,
                &location.uri,
                &tree_str,
            ],
            None,
            location,
        )
        .await?;

        let head = self.git(&["rev-parse", "HEAD"], Some(&tree), location).await?;
        let commit = String::from_utf8_lossy(&head).trim().to_string();

        let mut files = Vec::new();
        for entry in WalkDir::new(&tree).into_iter().filter_entry(|e| e.file_name() != ".git") {
            let entry = entry.map_err(|e| SyncError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&tree).unwrap_or(entry.path());
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
        files.sort();

        tracing::info!(uri = %location.uri, commit = %commit, files = files.len(), "materialized tree");
        Ok(Snapshot {
            root: tree,
            commit,
            files,
        })
    }

    async fn resolve_latest_commit(&self, location: &SourceLocation) -> Result<String> {
        let head_ref = format!("refs/heads/{}", location.branch);
        let out = self
            .git(&["ls-remote", &location.uri, &head_ref], None, location)
            .await?;
        parse_ls_remote(&String::from_utf8_lossy(&out), &head_ref).ok_or_else(|| {
            SyncError::NotFound(format!("branch '{}' in {}", location.branch, location.uri))
        })
    }

    async fn diff(&self, workspace: &Workspace, from: &str, to: &str) -> Result<ChangeSet> {
        let location = workspace.location();
        let changes = match parse_github_repo(&location.uri) {
            Some(repo) => match self.github_diff(&repo, location, from, to).await? {
                Some(changes) => changes,
                None => {
                    tracing::warn!(
                        uri = %location.uri,
                        from,
                        to,
                        "GitHub cannot list the full comparison, diffing a clone"
                    );
                    self.local_diff(workspace, from, to).await?
                }
            },
            None => self.local_diff(workspace, from, to).await?,
        };
        tracing::info!(
            uri = %location.uri,
            from,
            to,
            added = changes.added.len(),
            deleted = changes.deleted.len(),
            "computed change set"
        );
        Ok(changes)
    }

    async fn fetch_file(&self, workspace: &Workspace, commit: &str, path: &str) -> Result<Vec<u8>> {
        let path = checked_relative(path)?;
        let location = workspace.location();
        let bytes = match parse_github_repo(&location.uri) {
            Some(repo) => {
                let url = contents_url(&self.github_api_url, &repo, path, commit);
                let response = self
                    .github_get(url.as_str(), "application/vnd.github.raw", location)
                    .await?;
                response
                    .bytes()
                    .await
                    .map_err(|e| SyncError::Network(format!("GET {}: {}", url, e)))?
                    .to_vec()
            }
            None => {
                let bare = self.ensure_bare(workspace).await?;
                let spec = format!("{}:{}", commit, path);
                self.git(&["show", &spec], Some(&bare), location).await?
            }
        };

        let target = workspace.path().join(FETCHED_DIR).join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        Ok(bytes)
    }
}

fn auth_header(creds: &Credentials) -> String {
    let raw = format!("{}:{}", creds.username, creds.token);
    format!(
        "Authorization: Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw)
    )
}

/// Map git's stderr onto the error taxonomy.
fn git_failure(stderr: &str, uri: &str) -> SyncError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("permission denied")
        || lower.contains("403")
    {
        SyncError::auth(uri, message)
    } else if lower.contains("repository not found")
        || lower.contains("not found in upstream")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("remote branch")
        || lower.contains("does not exist")
        || lower.contains("exists on disk, but not in")
    {
        SyncError::NotFound(format!("{}: {}", uri, message))
    } else {
        SyncError::Network(format!("{}: {}", uri, message))
    }
}

fn github_status_error(status: u16, uri: &str, body: &str) -> SyncError {
    match status {
        401 | 403 => SyncError::auth(uri, format!("GitHub API {}: {}", status, body)),
        404 | 422 => SyncError::NotFound(format!("{}: GitHub API {}", uri, status)),
        _ => SyncError::Network(format!("{}: GitHub API {}: {}", uri, status, body)),
    }
}

fn parse_ls_remote(output: &str, head_ref: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let sha = parts.next()?;
        (parts.next()? == head_ref).then(|| sha.to_string())
    })
}

fn is_regular_mode(mode: &str) -> bool {
    matches!(mode, "100644" | "100755" | "100664")
}

/// `git diff --raw -z` output: a `:<old mode> <new mode> <old sha> <new sha>
/// <status>` header, then the path (two for renames and copies), all
/// NUL-terminated. A path whose new mode is not a regular file (deleted,
/// symlink, submodule) goes to `deleted`, every other one to `added`.
fn parse_raw_diff(output: &[u8]) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut fields = output
        .split(|b| *b == 0)
        .filter(|f| !f.is_empty())
        .map(|f| String::from_utf8_lossy(f).into_owned());

    while let Some(header) = fields.next() {
        let Some(header) = header.strip_prefix(':') else {
            continue;
        };
        let parts: Vec<&str> = header.split_whitespace().collect();
        let [_, new_mode, _, _, status] = parts.as_slice() else {
            continue;
        };
        let Some(mut path) = fields.next() else {
            break;
        };
        if status.starts_with('R') || status.starts_with('C') {
            let Some(new_path) = fields.next() else {
                break;
            };
            if status.starts_with('R') {
                changes.deleted.insert(path);
            }
            path = new_path;
        }
        if is_regular_mode(new_mode) {
            changes.added.insert(path);
        } else {
            changes.deleted.insert(path);
        }
    }
    changes
}

#[derive(Debug, PartialEq, Eq)]
struct GithubRepo {
    owner: String,
    name: String,
}

fn parse_github_repo(uri: &str) -> Option<GithubRepo> {
    let rest = uri
        .strip_prefix("https://github.com/")
        .or_else(|| uri.strip_prefix("http://github.com/"))
        .or_else(|| uri.strip_prefix("git@github.com:"))
        .or_else(|| uri.strip_prefix("ssh://git@github.com/"))?;
    let rest = rest.trim_end_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let mut parts = rest.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    if parts.next().is_some() {
        return None;
    }
    Some(GithubRepo {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
struct CompareFile {
    filename: String,
    status: String,
    #[serde(default)]
    previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    mode: String,
    #[serde(rename = "type")]
    kind: String,
}

/// GitHub lists at most [`COMPARE_FILE_LIMIT`] files; a listing that long
/// may be cut off.
fn compare_is_complete(listed: usize) -> bool {
    listed < COMPARE_FILE_LIMIT
}

/// Move added paths that are not regular files in `tree` to `deleted`.
fn retain_regular_files(changes: &mut ChangeSet, tree: &[TreeEntry]) {
    let regular: HashSet<&str> = tree
        .iter()
        .filter(|e| e.kind == "blob" && is_regular_mode(&e.mode))
        .map(|e| e.path.as_str())
        .collect();
    let dropped: Vec<String> = changes
        .added
        .iter()
        .filter(|p| !regular.contains(p.as_str()))
        .cloned()
        .collect();
    for path in dropped {
        changes.added.remove(&path);
        changes.deleted.insert(path);
    }
}

/// `base` with `segments` appended, each percent-encoded on its own.
fn api_url<'a>(base: &reqwest::Url, segments: impl IntoIterator<Item = &'a str>) -> reqwest::Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn contents_url(base: &reqwest::Url, repo: &GithubRepo, path: &str, commit: &str) -> reqwest::Url {
    let prefix = ["repos", repo.owner.as_str(), repo.name.as_str(), "contents"];
    let mut url = api_url(base, prefix.into_iter().chain(path.split('/')));
    url.query_pairs_mut().append_pair("ref", commit);
    url
}

fn apply_compare_files(files: &[CompareFile], changes: &mut ChangeSet) {
    for file in files {
        match file.status.as_str() {
            "removed" => {
                changes.deleted.insert(file.filename.clone());
            }
            "renamed" => {
                if let Some(previous) = &file.previous_filename {
                    changes.deleted.insert(previous.clone());
                }
                changes.added.insert(file.filename.clone());
            }
            _ => {
                changes.added.insert(file.filename.clone());
            }
        }
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}
