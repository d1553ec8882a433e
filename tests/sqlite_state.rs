//! SQLite-backed state store against a temporary database.

use std::path::PathBuf;

use tempfile::TempDir;

use repo_index_sync::config::Config;
use repo_index_sync::sqlite_state::SqliteStateStore;
use repo_index_sync::{db, migrate};
use repo_index_sync_core::state::StateStore;
use repo_index_sync_core::{Category, SyncError, SyncState, TrackedFile};

async fn store() -> (TempDir, SqliteStateStore) {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_db(tmp.path().join("data/ris.sqlite"));
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    (tmp, SqliteStateStore::new(pool))
}

fn tracked(resource_id: i64, path: &str, content_id: &str, category: Category) -> TrackedFile {
    TrackedFile {
        resource_id,
        path: path.to_string(),
        content_id: content_id.to_string(),
        category,
        extension: "rs".to_string(),
        mime_type: "text/x-rust".to_string(),
        line_count: 10,
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_db(PathBuf::from(tmp.path()).join("nested/dir/ris.sqlite"));
    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();
    assert!(config.db.path.exists());
}

#[tokio::test]
async fn resource_lifecycle() {
    let (_tmp, state) = store().await;
    let project = state.create_project("widgets", "all widgets").await.unwrap();
    let resource = state
        .create_resource(project.id, "https://github.com/acme/widgets", "main", Some("acme-ci"))
        .await
        .unwrap();
    assert_eq!(resource.sync_state, SyncState::Uninitialized);
    assert!(resource.last_commit_hash.is_none());

    state
        .set_sync_state(resource.id, SyncState::FullSyncInProgress)
        .await
        .unwrap();
    state.set_last_commit(resource.id, "abc123").await.unwrap();
    state.set_sync_state(resource.id, SyncState::Synced).await.unwrap();

    let loaded = state.get_resource(resource.id).await.unwrap().unwrap();
    assert_eq!(loaded.sync_state, SyncState::Synced);
    assert_eq!(loaded.last_commit_hash.as_deref(), Some("abc123"));
    assert_eq!(loaded.credentials_ref.as_deref(), Some("acme-ci"));
    assert_eq!(state.list_resources(project.id).await.unwrap().len(), 1);

    state.delete_resource(resource.id).await.unwrap();
    assert!(state.get_resource(resource.id).await.unwrap().is_none());
}

#[tokio::test]
async fn missing_rows_are_not_found() {
    let (_tmp, state) = store().await;
    let err = state.create_resource(42, "u", "main", None).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    let err = state.set_sync_state(42, SyncState::Failed).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    let err = state.set_last_commit(42, "c").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn tracked_files_upsert_by_path() {
    let (_tmp, state) = store().await;
    let project = state.create_project("p", "").await.unwrap();
    let resource = state
        .create_resource(project.id, "u", "main", None)
        .await
        .unwrap();

    state
        .upsert_tracked_file(&tracked(resource.id, "src/a.rs", "file-1", Category::Code))
        .await
        .unwrap();
    state
        .upsert_tracked_file(&tracked(resource.id, "src/a.rs", "file-2", Category::Code))
        .await
        .unwrap();

    let files = state.list_tracked_files(resource.id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].content_id, "file-2");
    assert_eq!(files[0].line_count, 10);
    assert_eq!(state.list_project_files(project.id).await.unwrap().len(), 1);

    // A resource with tracked files cannot be deleted.
    assert!(state.delete_resource(resource.id).await.is_err());

    state.delete_tracked_file(resource.id, "src/a.rs").await.unwrap();
    state.delete_tracked_file(resource.id, "src/a.rs").await.unwrap();
    assert!(state
        .get_tracked_file(resource.id, "src/a.rs")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn one_index_per_category_and_idempotent_members() {
    let (_tmp, state) = store().await;
    let project = state.create_project("p", "").await.unwrap();
    let code = state
        .insert_index(project.id, Category::Code, "vsCode", "vs_a")
        .await
        .unwrap();
    let dup = state
        .insert_index(project.id, Category::Code, "vsCode", "vs_b")
        .await;
    assert!(matches!(dup, Err(SyncError::Storage(_))));

    state.add_index_member(code.id, "file-1").await.unwrap();
    state.add_index_member(code.id, "file-1").await.unwrap();
    state.add_index_member(code.id, "file-2").await.unwrap();
    state.remove_index_member(code.id, "file-2").await.unwrap();
    state.remove_index_member(code.id, "file-404").await.unwrap();

    let members = state.list_index_members(code.id).await.unwrap();
    assert_eq!(members.into_iter().collect::<Vec<_>>(), vec!["file-1".to_string()]);

    let indexes = state.list_indexes(project.id).await.unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].provider_index_id, "vs_a");
    assert_eq!(indexes[0].category, Category::Code);
}
