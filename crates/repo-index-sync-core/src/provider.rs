//! External collaborator contracts: the content store holding uploaded
//! blobs and the index provider hosting the semantic indexes.
//!
//! Both are consumed by the sync engine and implemented by the HTTP client
//! in the root crate and by [`crate::memory`] for tests.
//!
//! Removal semantics are part of the contract: removing a member that is
//! not in the index, or deleting a blob that no longer exists, succeeds.
//! Replaying a partially applied pass depends on it.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::FileMetadata;

/// Upload purpose tag understood by the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Assistants,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Assistants => "assistants",
        }
    }
}

/// One blob to upload.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    /// Name the blob is stored under (see [`crate::classify::upload_name`]).
    pub file_name: String,
    /// Path relative to the repository root.
    pub relative_path: &'a str,
    pub bytes: &'a [u8],
    pub purpose: Purpose,
    pub resource_id: i64,
}

/// Durable blob storage keyed by opaque content id.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store the bytes and return a fresh content id. Never deduplicates:
    /// uploading the same bytes twice yields two ids.
    async fn upload(&self, upload: &Upload<'_>) -> Result<String>;

    /// Delete a blob. Deleting an unknown id is a no-op.
    async fn delete(&self, content_id: &str) -> Result<()>;
}

/// Host of named semantic indexes keyed by opaque index id.
#[async_trait]
pub trait IndexProvider: Send + Sync {
    /// Create an index and return its provider id.
    async fn create_index(&self, name: &str, description: &str) -> Result<String>;

    /// Attach a content id to an index, with presentation metadata.
    async fn add_member(
        &self,
        index_id: &str,
        content_id: &str,
        metadata: &FileMetadata,
    ) -> Result<()>;

    /// Detach a content id. Absent members are not an error.
    async fn remove_member(&self, index_id: &str, content_id: &str) -> Result<()>;
}
