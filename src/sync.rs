//! Sync orchestration.
//!
//! [`SyncOrchestrator`] drives one resource from its stored baseline to the
//! head of its branch:
//!
//! ```text
//! Uninitialized ──▶ FullSyncInProgress ──▶ Synced ──▶ IncrementalSyncInProgress ──▶ Synced
//!                          │                                   │
//!                          └──────────▶ Failed ◀───────────────┘
//! ```
//!
//! A failed resource re-enters the full pass when it never recorded a
//! commit, and the incremental pass otherwise. `last_commit_hash` only
//! moves after every file operation of a pass succeeded, so a retry
//! recomputes the same change set from the same baseline.
//!
//! Every membership change fans out to the file's category index and to
//! the aggregate index ([`IndexSet::targets`]). Writes to one provider
//! index are serialized through a per-index lock, since several resources
//! of a project share the same four indexes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use repo_index_sync_core::classify;
use repo_index_sync_core::index_set::{check_invariants, IndexSet, MembershipView};
use repo_index_sync_core::provider::{ContentStore, IndexProvider, Purpose, Upload};
use repo_index_sync_core::state::StateStore;
use repo_index_sync_core::{
    FileMetadata, IndexRecord, Project, Resource, Result, SyncError, SyncState, TrackedFile,
};

use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::source::{PathFilter, SnapshotProvider, SourceLocation, Workspace};

/// Which pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Full,
    Incremental,
    /// Incremental pass that found the branch at the stored commit.
    UpToDate,
}

/// Outcome of one successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub resource_id: i64,
    pub kind: SyncKind,
    pub commit: String,
    /// Files uploaded and added to their indexes.
    pub added: u64,
    /// Of `added`, files that replaced an existing record.
    pub replaced: u64,
    /// Tracked files removed.
    pub removed: u64,
}

impl SyncReport {
    fn new(resource_id: i64, kind: SyncKind, commit: &str) -> Self {
        Self {
            resource_id,
            kind,
            commit: commit.to_string(),
            added: 0,
            replaced: 0,
            removed: 0,
        }
    }
}

/// A resource whose pass failed during a project refresh.
#[derive(Debug)]
pub struct ResourceFailure {
    pub resource_id: i64,
    pub error: SyncError,
}

/// Outcome of [`SyncOrchestrator::sync_project`].
#[derive(Debug, Default)]
pub struct ProjectSyncReport {
    pub synced: Vec<SyncReport>,
    pub failed: Vec<ResourceFailure>,
}

impl ProjectSyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SyncOrchestrator {
    source: Arc<dyn SnapshotProvider>,
    content: Arc<dyn ContentStore>,
    indexes: Arc<dyn IndexProvider>,
    state: Arc<dyn StateStore>,
    filter: PathFilter,
    index_name_prefix: String,
    progress: Box<dyn SyncProgressReporter>,
    active: Mutex<HashSet<i64>>,
    index_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Marks a resource as having a pass in this process; released on drop.
struct ActivePass<'a> {
    active: &'a Mutex<HashSet<i64>>,
    resource_id: i64,
}

impl Drop for ActivePass<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.resource_id);
    }
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn SnapshotProvider>,
        content: Arc<dyn ContentStore>,
        indexes: Arc<dyn IndexProvider>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            source,
            content,
            indexes,
            state,
            filter: PathFilter::allow_all(),
            index_name_prefix: String::new(),
            progress: Box::new(NoProgress),
            active: Mutex::new(HashSet::new()),
            index_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_name_prefix = prefix.into();
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    // ---------------------------------------------------------------
    // Projects and resources
    // ---------------------------------------------------------------

    /// Persist a project and create its four indexes.
    pub async fn create_project(&self, name: &str, description: &str) -> Result<(Project, IndexSet)> {
        let project = self.state.create_project(name, description).await?;
        let set = self.ensure_indexes(project.id).await?;
        tracing::info!(project = project.id, name, "created project");
        Ok((project, set))
    }

    /// Register a repository. The resource starts `Uninitialized`; nothing
    /// is fetched until the first sync.
    pub async fn register_resource(
        &self,
        project_id: i64,
        uri: &str,
        branch: &str,
        credentials_ref: Option<&str>,
    ) -> Result<Resource> {
        let resource = self
            .state
            .create_resource(project_id, uri, branch, credentials_ref)
            .await?;
        tracing::info!(project = project_id, resource = resource.id, uri, branch, "registered resource");
        Ok(resource)
    }

    /// Provider indexes of a project in binding order (code, markup,
    /// config, all).
    pub async fn project_indexes(&self, project_id: i64) -> Result<Vec<IndexRecord>> {
        self.require_project(project_id).await?;
        let set = self.load_indexes(project_id).await?;
        Ok(set.ordered().into_iter().cloned().collect())
    }

    /// Remove every tracked file of a resource from the indexes and the
    /// content store, then delete the resource. Safe to re-run after a
    /// partial failure.
    pub async fn remove_resource(&self, resource_id: i64) -> Result<u64> {
        let resource = self.require_resource(resource_id).await?;
        let _pass = self.begin(resource_id)?;
        let set = self.load_indexes(resource.project_id).await?;

        let mut removed = 0;
        for tracked in self.state.list_tracked_files(resource_id).await? {
            self.remove_tracked(&set, &tracked).await?;
            removed += 1;
        }
        self.state.delete_resource(resource_id).await?;
        tracing::info!(resource = resource_id, removed, "removed resource");
        Ok(removed)
    }

    // ---------------------------------------------------------------
    // Sync passes
    // ---------------------------------------------------------------

    /// Run the pass the resource is due for: full without a baseline,
    /// incremental otherwise.
    pub async fn sync_resource(&self, resource_id: i64) -> Result<SyncReport> {
        let resource = self.require_resource(resource_id).await?;
        let _pass = self.begin(resource_id)?;

        if resource.sync_state.is_in_progress() {
            tracing::warn!(
                resource = resource_id,
                state = %resource.sync_state,
                "previous pass did not finish, treating as failed"
            );
        }

        let (running, result) = if resource.has_baseline() {
            self.state
                .set_sync_state(resource_id, SyncState::IncrementalSyncInProgress)
                .await?;
            (SyncState::IncrementalSyncInProgress, self.run_incremental(&resource).await)
        } else {
            self.state
                .set_sync_state(resource_id, SyncState::FullSyncInProgress)
                .await?;
            (SyncState::FullSyncInProgress, self.run_full(&resource).await)
        };

        match result {
            Ok(report) => {
                self.state.set_sync_state(resource_id, SyncState::Synced).await?;
                tracing::info!(
                    resource = resource_id,
                    kind = ?report.kind,
                    commit = %report.commit,
                    added = report.added,
                    removed = report.removed,
                    "sync complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    resource = resource_id,
                    from = %running,
                    kind = e.kind(),
                    error = %e,
                    "sync failed"
                );
                if let Err(state_err) = self.state.set_sync_state(resource_id, SyncState::Failed).await {
                    tracing::warn!(resource = resource_id, error = %state_err, "could not record failure");
                }
                Err(e)
            }
        }
    }

    /// Sync every resource of a project concurrently. Failures are
    /// collected per resource and never stop the other passes.
    pub async fn sync_project(self: &Arc<Self>, project_id: i64) -> Result<ProjectSyncReport> {
        self.require_project(project_id).await?;
        // Indexes first, so concurrent first passes do not race to create them.
        self.ensure_indexes(project_id).await?;

        let mut tasks = tokio::task::JoinSet::new();
        for resource in self.state.list_resources(project_id).await? {
            let this = Arc::clone(self);
            tasks.spawn(async move { (resource.id, this.sync_resource(resource.id).await) });
        }

        let mut report = ProjectSyncReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(sync))) => report.synced.push(sync),
                Ok((resource_id, Err(error))) => report.failed.push(ResourceFailure { resource_id, error }),
                Err(e) => {
                    return Err(SyncError::Consistency(format!("sync task panicked: {}", e)));
                }
            }
        }
        report.synced.sort_by_key(|r| r.resource_id);
        report.failed.sort_by_key(|f| f.resource_id);
        Ok(report)
    }

    async fn run_full(&self, resource: &Resource) -> Result<SyncReport> {
        let location = SourceLocation::from(resource);
        self.progress.report(SyncProgressEvent::Materializing {
            resource_id: resource.id,
        });
        let workspace = self.source.open(&location).await?;
        let result = self.full_pass(resource, &workspace).await;
        self.source.release(workspace);
        result
    }

    async fn full_pass(&self, resource: &Resource, workspace: &Workspace) -> Result<SyncReport> {
        let snapshot = self.source.materialize_full(workspace).await?;
        let set = self.ensure_indexes(resource.project_id).await?;

        let files: Vec<&String> = snapshot
            .files
            .iter()
            .filter(|path| self.filter.matches(path))
            .collect();
        let wanted: BTreeSet<&str> = files.iter().map(|p| p.as_str()).collect();

        // Records left by an earlier failed attempt for paths that are gone.
        let stale: Vec<TrackedFile> = self
            .state
            .list_tracked_files(resource.id)
            .await?
            .into_iter()
            .filter(|f| !wanted.contains(f.path.as_str()))
            .collect();

        let total = (stale.len() + files.len()) as u64;
        let mut report = SyncReport::new(resource.id, SyncKind::Full, &snapshot.commit);
        let mut done = 0;

        for tracked in &stale {
            self.remove_tracked(&set, tracked).await?;
            report.removed += 1;
            done += 1;
            self.report_applying(resource.id, done, total);
        }

        for path in files {
            let bytes = tokio::fs::read(snapshot.root.join(path)).await?;
            if self.apply_addition(&set, resource.id, path, &bytes).await? {
                report.replaced += 1;
            }
            report.added += 1;
            done += 1;
            self.report_applying(resource.id, done, total);
        }

        self.state.set_last_commit(resource.id, &snapshot.commit).await?;
        Ok(report)
    }

    async fn run_incremental(&self, resource: &Resource) -> Result<SyncReport> {
        let baseline = resource.last_commit_hash.as_deref().ok_or_else(|| {
            SyncError::Consistency(format!("resource {} has no baseline commit", resource.id))
        })?;
        let location = SourceLocation::from(resource);

        let latest = self.source.resolve_latest_commit(&location).await?;
        if latest == baseline {
            tracing::debug!(resource = resource.id, commit = %latest, "already up to date");
            return Ok(SyncReport::new(resource.id, SyncKind::UpToDate, &latest));
        }

        self.progress.report(SyncProgressEvent::Diffing {
            resource_id: resource.id,
        });
        let workspace = self.source.open(&location).await?;
        let result = self
            .incremental_pass(resource, &workspace, baseline, &latest)
            .await;
        self.source.release(workspace);
        result
    }

    async fn incremental_pass(
        &self,
        resource: &Resource,
        workspace: &Workspace,
        baseline: &str,
        latest: &str,
    ) -> Result<SyncReport> {
        let changes = self.source.diff(workspace, baseline, latest).await?;
        let set = self.load_indexes(resource.project_id).await?;

        let added: Vec<&String> = changes
            .added
            .iter()
            .filter(|path| self.filter.matches(path))
            .collect();
        let total = (changes.deleted.len() + added.len()) as u64;
        let mut report = SyncReport::new(resource.id, SyncKind::Incremental, latest);
        let mut done = 0;

        // Deletions first: a rename never holds both paths at once.
        for path in &changes.deleted {
            if self.apply_deletion(&set, resource.id, path).await? {
                report.removed += 1;
            }
            done += 1;
            self.report_applying(resource.id, done, total);
        }

        for path in added {
            let bytes = self.source.fetch_file(workspace, latest, path).await?;
            if self.apply_addition(&set, resource.id, path, &bytes).await? {
                report.replaced += 1;
            }
            report.added += 1;
            done += 1;
            self.report_applying(resource.id, done, total);
        }

        self.state.set_last_commit(resource.id, latest).await?;
        Ok(report)
    }

    // ---------------------------------------------------------------
    // File operations
    // ---------------------------------------------------------------

    /// Remove the tracked file at `path`. Returns `false` when nothing was
    /// tracked there, which is how a replayed deletion completes.
    async fn apply_deletion(&self, set: &IndexSet, resource_id: i64, path: &str) -> Result<bool> {
        match self.state.get_tracked_file(resource_id, path).await? {
            Some(tracked) => {
                self.remove_tracked(set, &tracked).await?;
                Ok(true)
            }
            None => {
                tracing::debug!(resource = resource_id, path, "deleted path not tracked, skipping");
                Ok(false)
            }
        }
    }

    /// Upload `bytes` as the new content of `path` and add it to its
    /// indexes. An existing record for the path is removed first; returns
    /// whether one was.
    async fn apply_addition(
        &self,
        set: &IndexSet,
        resource_id: i64,
        path: &str,
        bytes: &[u8],
    ) -> Result<bool> {
        let previous = self.state.get_tracked_file(resource_id, path).await?;
        if let Some(old) = &previous {
            self.remove_tracked(set, old).await?;
        }

        let metadata = classify::describe(path, bytes);
        let targets = set.targets(metadata.category)?;
        let upload = Upload {
            file_name: classify::upload_name(&metadata.name),
            relative_path: path,
            bytes,
            purpose: Purpose::Assistants,
            resource_id,
        };
        let content_id = self.content.upload(&upload).await?;

        // Recorded before the index writes so a replay finds and cleans up
        // the blob if one of them fails.
        self.state
            .upsert_tracked_file(&metadata.tracked(resource_id, &content_id))
            .await?;
        for index in targets {
            self.add_membership(index, &content_id, &metadata).await?;
        }

        tracing::debug!(
            resource = resource_id,
            path,
            content_id = %content_id,
            category = %metadata.category,
            "added file"
        );
        Ok(previous.is_some())
    }

    async fn remove_tracked(&self, set: &IndexSet, tracked: &TrackedFile) -> Result<()> {
        for index in set.targets(tracked.category)? {
            self.remove_membership(index, &tracked.content_id).await?;
        }
        self.content.delete(&tracked.content_id).await?;
        self.state
            .delete_tracked_file(tracked.resource_id, &tracked.path)
            .await?;
        tracing::debug!(
            resource = tracked.resource_id,
            path = %tracked.path,
            content_id = %tracked.content_id,
            "removed file"
        );
        Ok(())
    }

    async fn add_membership(
        &self,
        index: &IndexRecord,
        content_id: &str,
        metadata: &FileMetadata,
    ) -> Result<()> {
        let lock = self.index_lock(&index.provider_index_id);
        let _held = lock.lock().await;
        self.indexes
            .add_member(&index.provider_index_id, content_id, metadata)
            .await?;
        self.state.add_index_member(index.id, content_id).await
    }

    async fn remove_membership(&self, index: &IndexRecord, content_id: &str) -> Result<()> {
        let lock = self.index_lock(&index.provider_index_id);
        let _held = lock.lock().await;
        self.indexes
            .remove_member(&index.provider_index_id, content_id)
            .await?;
        self.state.remove_index_member(index.id, content_id).await
    }

    // ---------------------------------------------------------------
    // Consistency
    // ---------------------------------------------------------------

    /// Check the union and partition invariants of a project. Any
    /// violation is returned as [`SyncError::Consistency`]; nothing is
    /// repaired.
    pub async fn check_project(&self, project_id: i64) -> Result<MembershipView> {
        self.require_project(project_id).await?;
        for resource in self.state.list_resources(project_id).await? {
            if self.is_active(resource.id) {
                return Err(SyncError::SyncInProgress(resource.id));
            }
        }

        let view = self.membership_view(project_id).await?;
        let files = self.state.list_project_files(project_id).await?;
        let violations = check_invariants(&view, &files);
        if violations.is_empty() {
            return Ok(view);
        }

        for violation in &violations {
            tracing::warn!(project = project_id, %violation, "invariant violated");
        }
        let listed: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
        Err(SyncError::Consistency(format!(
            "project {}: {} violation(s): {}",
            project_id,
            violations.len(),
            listed.join("; ")
        )))
    }

    /// Members of each index of the project, as recorded in state.
    pub async fn membership_view(&self, project_id: i64) -> Result<MembershipView> {
        let set = self.load_indexes(project_id).await?;
        let mut view = MembershipView::new();
        for record in set.ordered() {
            let members = self.state.list_index_members(record.id).await?;
            view.insert_all(record.category, members);
        }
        Ok(view)
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    /// Create the project's missing indexes in binding order and return the
    /// complete set. Existing indexes are reused.
    async fn ensure_indexes(&self, project_id: i64) -> Result<IndexSet> {
        let mut set = self.load_indexes(project_id).await?;
        for category in set.missing() {
            let name = format!("{}{}", self.index_name_prefix, category.index_name());
            let provider_id = self
                .indexes
                .create_index(&name, &category.index_description())
                .await?;
            let record = self
                .state
                .insert_index(project_id, category, &name, &provider_id)
                .await?;
            tracing::info!(project = project_id, %category, index = %provider_id, "created index");
            set.insert(record);
        }
        Ok(set)
    }

    async fn load_indexes(&self, project_id: i64) -> Result<IndexSet> {
        let records = self.state.list_indexes(project_id).await?;
        IndexSet::from_records(project_id, records)
    }

    async fn require_project(&self, project_id: i64) -> Result<Project> {
        self.state
            .get_project(project_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("project {}", project_id)))
    }

    async fn require_resource(&self, resource_id: i64) -> Result<Resource> {
        self.state
            .get_resource(resource_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("resource {}", resource_id)))
    }

    fn begin(&self, resource_id: i64) -> Result<ActivePass<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(resource_id) {
            return Err(SyncError::SyncInProgress(resource_id));
        }
        Ok(ActivePass {
            active: &self.active,
            resource_id,
        })
    }

    fn is_active(&self, resource_id: i64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&resource_id)
    }

    fn index_lock(&self, provider_index_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.index_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(provider_index_id.to_string()).or_default())
    }

    fn report_applying(&self, resource_id: i64, n: u64, total: u64) {
        self.progress.report(SyncProgressEvent::Applying {
            resource_id,
            n,
            total,
        });
    }
}
