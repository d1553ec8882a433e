//! Core data models used throughout repo-index-sync.
//!
//! These types describe the tracked repositories, the files indexed from
//! them, the per-project indexes and the change sets that flow through a
//! sync pass.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification bucket of a tracked file.
///
/// `All` is the aggregate bucket: it only names the aggregate index and is
/// never returned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Code,
    Markup,
    Config,
    All,
}

impl Category {
    /// Categories a file can be classified into.
    pub const CLASSIFIED: [Category; 3] = [Category::Code, Category::Markup, Category::Config];

    /// Index creation and binding order. Downstream consumers bind indexes
    /// positionally and treat the first one as primary.
    pub const INDEX_ORDER: [Category; 4] = [
        Category::Code,
        Category::Markup,
        Category::Config,
        Category::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Code => "code",
            Category::Markup => "markup",
            Category::Config => "config",
            Category::All => "all",
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Category::All)
    }

    /// Provider-side index name, e.g. `vsCode`.
    pub fn index_name(&self) -> &'static str {
        match self {
            Category::Code => "vsCode",
            Category::Markup => "vsMarkup",
            Category::Config => "vsConfig",
            Category::All => "vsAll",
        }
    }

    pub fn index_description(&self) -> String {
        match self {
            Category::All => "contain all the files in the project.".to_string(),
            other => format!("contain the {} files in the project.", other.as_str()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Category::Code),
            "markup" => Ok(Category::Markup),
            "config" => Ok(Category::Config),
            "all" => Ok(Category::All),
            other => Err(format!("unknown category: '{}'", other)),
        }
    }
}

/// Lifecycle of a resource with respect to sync passes.
///
/// ```text
/// Uninitialized ─▶ FullSyncInProgress ─▶ Synced ◀─▶ IncrementalSyncInProgress
///                          │                                  │
///                          └────────────▶ Failed ◀────────────┘
/// ```
///
/// `Failed` is not terminal: the next sync re-enters the full pass if the
/// resource never reached `Synced`, otherwise the incremental one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Uninitialized,
    FullSyncInProgress,
    Synced,
    IncrementalSyncInProgress,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::FullSyncInProgress => "full_sync_in_progress",
            SyncState::Synced => "synced",
            SyncState::IncrementalSyncInProgress => "incremental_sync_in_progress",
            SyncState::Failed => "failed",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            SyncState::FullSyncInProgress | SyncState::IncrementalSyncInProgress
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(SyncState::Uninitialized),
            "full_sync_in_progress" => Ok(SyncState::FullSyncInProgress),
            "synced" => Ok(SyncState::Synced),
            "incremental_sync_in_progress" => Ok(SyncState::IncrementalSyncInProgress),
            "failed" => Ok(SyncState::Failed),
            other => Err(format!("unknown sync state: '{}'", other)),
        }
    }
}

/// A project owning resources and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A tracked external repository.
///
/// `credentials_ref` is an opaque key resolved through a secret store at
/// the point of use; plaintext credentials never live on this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub id: i64,
    pub project_id: i64,
    pub uri: String,
    pub branch: String,
    /// Set only when a pass completes successfully.
    pub last_commit_hash: Option<String>,
    pub credentials_ref: Option<String>,
    pub sync_state: SyncState,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Whether the resource ever completed a pass.
    pub fn has_baseline(&self) -> bool {
        self.last_commit_hash.is_some()
    }
}

/// Indexed state of one file. At most one per `(resource_id, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedFile {
    pub resource_id: i64,
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub content_id: String,
    pub category: Category,
    pub extension: String,
    pub mime_type: String,
    pub line_count: u64,
}

/// One provider index of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexRecord {
    pub id: i64,
    pub project_id: i64,
    pub category: Category,
    pub name: String,
    pub provider_index_id: String,
}

/// Paths touched between two commits. Ephemeral, never persisted.
///
/// `added` carries both created and modified paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.deleted.len()
    }
}

/// Metadata attached to every index member.
///
/// Consumed downstream for presentation; the engine only writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub name: String,
    pub path: String,
    pub extension: String,
    pub mime_type: String,
    pub line_count: u64,
    pub category: Category,
}

impl FileMetadata {
    /// Attribute map in the wire shape the index provider stores.
    pub fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("name".into(), self.name.clone().into());
        map.insert("path".into(), self.path.clone().into());
        map.insert("extension".into(), self.extension.clone().into());
        map.insert("mime-type".into(), self.mime_type.clone().into());
        map.insert("nbLines".into(), self.line_count.to_string().into());
        map.insert("type".into(), self.category.as_str().into());
        map
    }

    pub fn tracked(&self, resource_id: i64, content_id: &str) -> TrackedFile {
        TrackedFile {
            resource_id,
            path: self.path.clone(),
            content_id: content_id.to_string(),
            category: self.category,
            extension: self.extension.clone(),
            mime_type: self.mime_type.clone(),
            line_count: self.line_count,
        }
    }
}
