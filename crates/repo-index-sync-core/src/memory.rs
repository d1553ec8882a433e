//! In-memory collaborators for testing and embedding.
//!
//! [`InMemoryContentStore`] and [`InMemoryIndexProvider`] record every call
//! they receive so tests can assert on call sequences (index creation
//! order, zero calls on a no-op pass). [`InMemoryStateStore`] mirrors the
//! SQLite schema constraints: one tracked file per `(resource, path)` and
//! one index per `(project, category)`.
//!
//! All state lives behind `std::sync::Mutex`; no lock is held across an
//! await point.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, SyncError};
use crate::models::{Category, FileMetadata, IndexRecord, Project, Resource, SyncState, TrackedFile};
use crate::provider::{ContentStore, IndexProvider, Upload};
use crate::state::StateStore;

/// A call observed by an in-memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Upload { path: String },
    Delete { content_id: String },
    CreateIndex { name: String },
    AddMember { index_id: String, content_id: String },
    RemoveMember { index_id: String, content_id: String },
}

/// A blob held by [`InMemoryContentStore`].
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub file_name: String,
    pub relative_path: String,
    pub bytes: Vec<u8>,
    pub resource_id: i64,
}

#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, content_id: &str) -> Option<StoredBlob> {
        self.blobs.lock().unwrap().get(content_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn upload(&self, upload: &Upload<'_>) -> Result<String> {
        let content_id = format!("file-{}", uuid::Uuid::new_v4().simple());
        self.calls.lock().unwrap().push(ProviderCall::Upload {
            path: upload.relative_path.to_string(),
        });
        self.blobs.lock().unwrap().insert(
            content_id.clone(),
            StoredBlob {
                file_name: upload.file_name.clone(),
                relative_path: upload.relative_path.to_string(),
                bytes: upload.bytes.to_vec(),
                resource_id: upload.resource_id,
            },
        );
        Ok(content_id)
    }

    async fn delete(&self, content_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(ProviderCall::Delete {
            content_id: content_id.to_string(),
        });
        self.blobs.lock().unwrap().remove(content_id);
        Ok(())
    }
}

struct MemIndex {
    name: String,
    description: String,
    members: BTreeMap<String, FileMetadata>,
}

#[derive(Default)]
pub struct InMemoryIndexProvider {
    indexes: Mutex<BTreeMap<String, MemIndex>>,
    created: Mutex<Vec<String>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl InMemoryIndexProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Member content ids of an index; empty for unknown ids.
    pub fn members(&self, index_id: &str) -> BTreeSet<String> {
        self.indexes
            .lock()
            .unwrap()
            .get(index_id)
            .map(|ix| ix.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn metadata(&self, index_id: &str, content_id: &str) -> Option<FileMetadata> {
        self.indexes
            .lock()
            .unwrap()
            .get(index_id)
            .and_then(|ix| ix.members.get(content_id).cloned())
    }

    /// `(name, description)` of an index.
    pub fn describe(&self, index_id: &str) -> Option<(String, String)> {
        self.indexes
            .lock()
            .unwrap()
            .get(index_id)
            .map(|ix| (ix.name.clone(), ix.description.clone()))
    }

    /// Index ids in creation order.
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl IndexProvider for InMemoryIndexProvider {
    async fn create_index(&self, name: &str, description: &str) -> Result<String> {
        let mut created = self.created.lock().unwrap();
        let index_id = format!("vs_{}", created.len() + 1);
        created.push(index_id.clone());
        self.calls.lock().unwrap().push(ProviderCall::CreateIndex {
            name: name.to_string(),
        });
        self.indexes.lock().unwrap().insert(
            index_id.clone(),
            MemIndex {
                name: name.to_string(),
                description: description.to_string(),
                members: BTreeMap::new(),
            },
        );
        Ok(index_id)
    }

    async fn add_member(
        &self,
        index_id: &str,
        content_id: &str,
        metadata: &FileMetadata,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(ProviderCall::AddMember {
            index_id: index_id.to_string(),
            content_id: content_id.to_string(),
        });
        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes
            .get_mut(index_id)
            .ok_or_else(|| SyncError::NotFound(format!("index {}", index_id)))?;
        index
            .members
            .insert(content_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn remove_member(&self, index_id: &str, content_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(ProviderCall::RemoveMember {
            index_id: index_id.to_string(),
            content_id: content_id.to_string(),
        });
        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes
            .get_mut(index_id)
            .ok_or_else(|| SyncError::NotFound(format!("index {}", index_id)))?;
        index.members.remove(content_id);
        Ok(())
    }
}

#[derive(Default)]
struct StateInner {
    projects: BTreeMap<i64, Project>,
    resources: BTreeMap<i64, Resource>,
    files: BTreeMap<(i64, String), TrackedFile>,
    indexes: BTreeMap<i64, IndexRecord>,
    members: BTreeMap<i64, BTreeSet<String>>,
    next_id: i64,
}

impl StateInner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn resource_mut(&mut self, id: i64) -> Result<&mut Resource> {
        self.resources
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("resource {}", id)))
    }
}

/// In-memory [`StateStore`].
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<StateInner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_project(&self, name: &str, description: &str) -> Result<Project> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        let project = Project {
            id,
            name: name.to_string(),
            description: description.to_string(),
        };
        inner.projects.insert(id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        Ok(self.inner.lock().unwrap().projects.get(&id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.inner.lock().unwrap().projects.values().cloned().collect())
    }

    async fn create_resource(
        &self,
        project_id: i64,
        uri: &str,
        branch: &str,
        credentials_ref: Option<&str>,
    ) -> Result<Resource> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.projects.contains_key(&project_id) {
            return Err(SyncError::NotFound(format!("project {}", project_id)));
        }
        let id = inner.next_id();
        let resource = Resource {
            id,
            project_id,
            uri: uri.to_string(),
            branch: branch.to_string(),
            last_commit_hash: None,
            credentials_ref: credentials_ref.map(str::to_string),
            sync_state: SyncState::Uninitialized,
            updated_at: Utc::now(),
        };
        inner.resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn get_resource(&self, id: i64) -> Result<Option<Resource>> {
        Ok(self.inner.lock().unwrap().resources.get(&id).cloned())
    }

    async fn list_resources(&self, project_id: i64) -> Result<Vec<Resource>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .resources
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn set_sync_state(&self, resource_id: i64, state: SyncState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let resource = inner.resource_mut(resource_id)?;
        resource.sync_state = state;
        resource.updated_at = Utc::now();
        Ok(())
    }

    async fn set_last_commit(&self, resource_id: i64, commit: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let resource = inner.resource_mut(resource_id)?;
        resource.last_commit_hash = Some(commit.to_string());
        resource.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_resource(&self, resource_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.files.keys().any(|(rid, _)| *rid == resource_id) {
            return Err(SyncError::Storage(format!(
                "resource {} still has tracked files",
                resource_id
            )));
        }
        inner.resources.remove(&resource_id);
        Ok(())
    }

    async fn get_tracked_file(
        &self,
        resource_id: i64,
        path: &str,
    ) -> Result<Option<TrackedFile>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .files
            .get(&(resource_id, path.to_string()))
            .cloned())
    }

    async fn list_tracked_files(&self, resource_id: i64) -> Result<Vec<TrackedFile>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .files
            .values()
            .filter(|f| f.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn list_project_files(&self, project_id: i64) -> Result<Vec<TrackedFile>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .files
            .values()
            .filter(|f| {
                inner
                    .resources
                    .get(&f.resource_id)
                    .is_some_and(|r| r.project_id == project_id)
            })
            .cloned()
            .collect())
    }

    async fn upsert_tracked_file(&self, file: &TrackedFile) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert((file.resource_id, file.path.clone()), file.clone());
        Ok(())
    }

    async fn delete_tracked_file(&self, resource_id: i64, path: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .files
            .remove(&(resource_id, path.to_string()));
        Ok(())
    }

    async fn list_indexes(&self, project_id: i64) -> Result<Vec<IndexRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .indexes
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_index(
        &self,
        project_id: i64,
        category: Category,
        name: &str,
        provider_index_id: &str,
    ) -> Result<IndexRecord> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .indexes
            .values()
            .any(|r| r.project_id == project_id && r.category == category)
        {
            return Err(SyncError::Storage(format!(
                "project {} already has a {} index",
                project_id, category
            )));
        }
        let id = inner.next_id();
        let record = IndexRecord {
            id,
            project_id,
            category,
            name: name.to_string(),
            provider_index_id: provider_index_id.to_string(),
        };
        inner.indexes.insert(id, record.clone());
        Ok(record)
    }

    async fn add_index_member(&self, index_id: i64, content_id: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .members
            .entry(index_id)
            .or_default()
            .insert(content_id.to_string());
        Ok(())
    }

    async fn remove_index_member(&self, index_id: i64, content_id: &str) -> Result<()> {
        if let Some(members) = self.inner.lock().unwrap().members.get_mut(&index_id) {
            members.remove(content_id);
        }
        Ok(())
    }

    async fn list_index_members(&self, index_id: i64) -> Result<BTreeSet<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .members
            .get(&index_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::describe;
    use crate::provider::Purpose;

    #[tokio::test]
    async fn remove_absent_member_is_noop() {
        let provider = InMemoryIndexProvider::new();
        let id = provider.create_index("vsCode", "code").await.unwrap();
        provider.remove_member(&id, "file-missing").await.unwrap();
        assert!(provider.members(&id).is_empty());
    }

    #[tokio::test]
    async fn add_to_unknown_index_fails() {
        let provider = InMemoryIndexProvider::new();
        let meta = describe("a.rs", b"fn main() {}");
        let err = provider.add_member("vs_404", "file-1", &meta).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn uploads_never_deduplicate() {
        let store = InMemoryContentStore::new();
        let upload = Upload {
            file_name: "a.md".into(),
            relative_path: "docs/a.md",
            bytes: b"# A",
            purpose: Purpose::Assistants,
            resource_id: 1,
        };
        let first = store.upload(&upload).await.unwrap();
        let second = store.upload(&upload).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.len(), 2);

        store.delete(&first).await.unwrap();
        store.delete(&first).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn state_store_enforces_one_index_per_category() {
        let state = InMemoryStateStore::new();
        let project = state.create_project("p", "").await.unwrap();
        state
            .insert_index(project.id, Category::Code, "vsCode", "vs_1")
            .await
            .unwrap();
        let err = state
            .insert_index(project.id, Category::Code, "vsCode", "vs_2")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
    }

    #[tokio::test]
    async fn tracked_file_upsert_replaces() {
        let state = InMemoryStateStore::new();
        let project = state.create_project("p", "").await.unwrap();
        let resource = state
            .create_resource(project.id, "https://example.com/r.git", "main", None)
            .await
            .unwrap();
        assert_eq!(resource.sync_state, SyncState::Uninitialized);

        let meta = describe("src/a.rs", b"x");
        state
            .upsert_tracked_file(&meta.tracked(resource.id, "file-1"))
            .await
            .unwrap();
        state
            .upsert_tracked_file(&meta.tracked(resource.id, "file-2"))
            .await
            .unwrap();
        let files = state.list_tracked_files(resource.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content_id, "file-2");

        let err = state.delete_resource(resource.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        state.delete_tracked_file(resource.id, "src/a.rs").await.unwrap();
        state.delete_resource(resource.id).await.unwrap();
        assert!(state.get_resource(resource.id).await.unwrap().is_none());
    }
}
