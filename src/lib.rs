//! # repo-index-sync
//!
//! Keeps a project's semantic search indexes synchronized with the Git
//! repositories registered against it.
//!
//! Every file of a repository is classified as code, markup or config,
//! uploaded to a content store and added to its category index and to the
//! aggregate `all` index. The first pass exports the whole tree; later
//! passes diff the stored commit against the branch head and apply only
//! the deletions and additions in between.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ Git source   │──▶│ SyncOrchestrator │──▶│ Content store +  │
//! │ clone / diff │   │ classify, fan out│   │ index provider   │
//! └──────────────┘   └────────┬─────────┘   └──────────────────┘
//!                             │
//!                             ▼
//!                      ┌────────────┐
//!                      │   SQLite   │
//!                      │ state store│
//!                      └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_state`] | SQLite-backed persisted state |
//! | [`secrets`] | Credential reference resolution |
//! | [`source`] | Snapshot provider trait and scoped workspaces |
//! | [`source_git`] | Git/GitHub snapshot provider |
//! | [`openai`] | HTTP content store and index provider |
//! | [`sync`] | The sync state machine |
//! | [`progress`] | Progress reporting on stderr |
//! | [`status`] | Status overview |
//! | [`commands`] | CLI command implementations |
//!
//! Models, classification, the error taxonomy, collaborator traits and the
//! invariant checks live in the `repo-index-sync-core` crate.

pub mod commands;
pub mod config;
pub mod db;
pub mod migrate;
pub mod openai;
pub mod progress;
pub mod secrets;
pub mod source;
pub mod source_git;
pub mod sqlite_state;
pub mod status;
pub mod sync;
