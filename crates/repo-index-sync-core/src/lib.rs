//! # repo-index-sync core
//!
//! Runtime-free logic shared by the sync engine: data models, the file
//! classifier, the error taxonomy, collaborator traits for the content
//! store, index provider and persisted state, the per-project index set
//! and the invariant checks that run at quiescent points.
//!
//! This crate contains no tokio, sqlx, process spawning or HTTP. The
//! [`memory`] module provides in-memory collaborators for tests and
//! embedding in other hosts.

pub mod classify;
pub mod error;
pub mod index_set;
pub mod memory;
pub mod models;
pub mod provider;
pub mod state;

pub use error::{Result, SyncError};
pub use models::{Category, ChangeSet, FileMetadata, IndexRecord, Project, Resource, SyncState, TrackedFile};
