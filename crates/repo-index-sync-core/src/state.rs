//! Persisted state abstraction.
//!
//! The [`StateStore`] trait covers every read and write the sync engine
//! makes against durable state: projects, resources, tracked files, index
//! records and the per-index membership view. Implementations must be
//! `Send + Sync`; each method is its own unit of durability, there is no
//! transaction spanning calls.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create_project`](StateStore::create_project) | Persist a project |
//! | [`create_resource`](StateStore::create_resource) | Register a repository |
//! | [`set_sync_state`](StateStore::set_sync_state) | Record a state transition |
//! | [`set_last_commit`](StateStore::set_last_commit) | Advance the sync baseline |
//! | [`upsert_tracked_file`](StateStore::upsert_tracked_file) | Write/replace a file record |
//! | [`insert_index`](StateStore::insert_index) | Record a created provider index |
//! | [`add_index_member`](StateStore::add_index_member) | Mirror a membership write |

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Category, IndexRecord, Project, Resource, SyncState, TrackedFile};

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn create_project(&self, name: &str, description: &str) -> Result<Project>;

    async fn get_project(&self, id: i64) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Register a resource in [`SyncState::Uninitialized`].
    async fn create_resource(
        &self,
        project_id: i64,
        uri: &str,
        branch: &str,
        credentials_ref: Option<&str>,
    ) -> Result<Resource>;

    async fn get_resource(&self, id: i64) -> Result<Option<Resource>>;

    async fn list_resources(&self, project_id: i64) -> Result<Vec<Resource>>;

    async fn set_sync_state(&self, resource_id: i64, state: SyncState) -> Result<()>;

    async fn set_last_commit(&self, resource_id: i64, commit: &str) -> Result<()>;

    /// Delete the resource row. Tracked files must already be gone.
    async fn delete_resource(&self, resource_id: i64) -> Result<()>;

    async fn get_tracked_file(&self, resource_id: i64, path: &str)
        -> Result<Option<TrackedFile>>;

    async fn list_tracked_files(&self, resource_id: i64) -> Result<Vec<TrackedFile>>;

    /// Tracked files of every resource of the project.
    async fn list_project_files(&self, project_id: i64) -> Result<Vec<TrackedFile>>;

    /// Insert or replace the record for `(resource_id, path)`.
    async fn upsert_tracked_file(&self, file: &TrackedFile) -> Result<()>;

    /// Drop the record; absent records are not an error.
    async fn delete_tracked_file(&self, resource_id: i64, path: &str) -> Result<()>;

    async fn list_indexes(&self, project_id: i64) -> Result<Vec<IndexRecord>>;

    async fn insert_index(
        &self,
        project_id: i64,
        category: Category,
        name: &str,
        provider_index_id: &str,
    ) -> Result<IndexRecord>;

    /// Idempotent.
    async fn add_index_member(&self, index_id: i64, content_id: &str) -> Result<()>;

    /// Idempotent.
    async fn remove_index_member(&self, index_id: i64, content_id: &str) -> Result<()>;

    async fn list_index_members(&self, index_id: i64) -> Result<BTreeSet<String>>;
}
