//! Git snapshot provider against local repositories, end to end through
//! the orchestrator with SQLite state and in-memory providers.
//!
//! Skipped when no `git` executable is on PATH.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use repo_index_sync::config::{Config, SourceConfig};
use repo_index_sync::secrets::StaticSecretStore;
use repo_index_sync::source::{SnapshotProvider, SourceLocation};
use repo_index_sync::source_git::GitSourceProvider;
use repo_index_sync::sqlite_state::SqliteStateStore;
use repo_index_sync::sync::{SyncKind, SyncOrchestrator};
use repo_index_sync::{db, migrate};
use repo_index_sync_core::memory::{InMemoryContentStore, InMemoryIndexProvider};
use repo_index_sync_core::state::StateStore;
use repo_index_sync_core::{Category, SyncError};

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository on branch `main` with one commit.
fn init_repo(files: &[(&str, &str)]) -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    git(dir, &["init", "--quiet"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    write_files(dir, files);
    commit_all(dir, "initial");
    let uri = format!("file://{}", dir.display());
    (tmp, uri)
}

fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let target = dir.join(path);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, content).unwrap();
    }
}

fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

fn location(uri: &str) -> SourceLocation {
    SourceLocation {
        uri: uri.to_string(),
        branch: "main".to_string(),
        credentials_ref: None,
    }
}

fn provider(workspace_root: &Path) -> GitSourceProvider {
    let config = SourceConfig {
        workspace_dir: Some(workspace_root.to_path_buf()),
        ..SourceConfig::default()
    };
    GitSourceProvider::new(&config, Arc::new(StaticSecretStore::new())).unwrap()
}

#[tokio::test]
async fn materializes_and_diffs_local_repository() {
    if !git_available() {
        return;
    }
    let (repo, uri) = init_repo(&[("a.java", "class A {}\n"), ("b.md", "# b\n")]);
    let c1 = git(repo.path(), &["rev-parse", "HEAD"]);
    let work = TempDir::new().unwrap();
    let source = provider(work.path());

    assert_eq!(source.resolve_latest_commit(&location(&uri)).await.unwrap(), c1);

    let ws = source.open(&location(&uri)).await.unwrap();
    let ws_path = ws.path().to_path_buf();
    let snapshot = source.materialize_full(&ws).await.unwrap();
    assert_eq!(snapshot.commit, c1);
    assert_eq!(snapshot.files, vec!["a.java".to_string(), "b.md".to_string()]);
    source.release(ws);
    assert!(!ws_path.exists());

    std::fs::remove_file(repo.path().join("a.java")).unwrap();
    write_files(repo.path(), &[("c.yaml", "k: v\n")]);
    let c2 = commit_all(repo.path(), "second");

    let ws = source.open(&location(&uri)).await.unwrap();
    let changes = source.diff(&ws, &c1, &c2).await.unwrap();
    assert_eq!(changes.deleted.iter().collect::<Vec<_>>(), vec!["a.java"]);
    assert_eq!(changes.added.iter().collect::<Vec<_>>(), vec!["c.yaml"]);

    let bytes = source.fetch_file(&ws, &c2, "c.yaml").await.unwrap();
    assert_eq!(bytes, b"k: v\n");
    let missing = source.fetch_file(&ws, &c2, "a.java").await.unwrap_err();
    assert!(matches!(missing, SyncError::NotFound(_)));
}

#[tokio::test]
async fn missing_repository_and_branch_are_not_found() {
    if !git_available() {
        return;
    }
    let work = TempDir::new().unwrap();
    let source = provider(work.path());

    let (_repo, uri) = init_repo(&[("a.rs", "fn main() {}\n")]);
    let mut wrong_branch = location(&uri);
    wrong_branch.branch = "does-not-exist".to_string();
    let err = source.resolve_latest_commit(&wrong_branch).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "{:?}", err);

    let gone = format!("file://{}/nope", work.path().display());
    let err = source.open(&location(&gone)).await.unwrap_err();
    assert!(!matches!(err, SyncError::Authentication { .. }), "{:?}", err);

    // No workspace is left behind by a failed open.
    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unknown_credentials_fail_as_authentication() {
    if !git_available() {
        return;
    }
    let work = TempDir::new().unwrap();
    let source = provider(work.path());
    let (_repo, uri) = init_repo(&[("a.rs", "fn main() {}\n")]);
    let mut loc = location(&uri);
    loc.credentials_ref = Some("unknown".to_string());
    let err = source.open(&loc).await.unwrap_err();
    assert!(matches!(err, SyncError::Authentication { .. }));
}

#[tokio::test]
async fn full_then_incremental_sync_with_sqlite_state() {
    if !git_available() {
        return;
    }
    let (repo, uri) = init_repo(&[
        ("src/Main.java", "class Main {}\n"),
        ("README.md", "# widgets\n"),
        ("config/app.yaml", "port: 80\n"),
    ]);

    let tmp = TempDir::new().unwrap();
    let config = Config::with_db(tmp.path().join("ris.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let state = Arc::new(SqliteStateStore::new(pool));
    let content = Arc::new(InMemoryContentStore::new());
    let indexes = Arc::new(InMemoryIndexProvider::new());
    let work = TempDir::new().unwrap();
    let engine = SyncOrchestrator::new(
        Arc::new(provider(work.path())),
        content.clone(),
        indexes.clone(),
        state.clone(),
    );

    let (project, _) = engine.create_project("widgets", "").await.unwrap();
    let resource = engine
        .register_resource(project.id, &uri, "main", None)
        .await
        .unwrap();

    let report = engine.sync_resource(resource.id).await.unwrap();
    assert_eq!(report.kind, SyncKind::Full);
    assert_eq!(report.added, 3);
    engine.check_project(project.id).await.unwrap();

    let report = engine.sync_resource(resource.id).await.unwrap();
    assert_eq!(report.kind, SyncKind::UpToDate);

    std::fs::rename(
        repo.path().join("src/Main.java"),
        repo.path().join("src/App.java"),
    )
    .unwrap();
    write_files(repo.path(), &[("README.md", "# widgets\n\nnow with docs\n")]);
    let head = commit_all(repo.path(), "rename and edit");

    let report = engine.sync_resource(resource.id).await.unwrap();
    assert_eq!(report.kind, SyncKind::Incremental);
    assert_eq!(report.commit, head);
    assert_eq!(report.removed, 1);
    assert_eq!(report.added, 2);
    assert_eq!(report.replaced, 1);

    let view = engine.check_project(project.id).await.unwrap();
    assert_eq!(view.count(Category::All), 3);
    assert_eq!(view.count(Category::Code), 1);
    assert_eq!(content.len(), 3);

    let paths: Vec<String> = state
        .list_tracked_files(resource.id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect();
    assert_eq!(paths, vec!["README.md", "config/app.yaml", "src/App.java"]);

    // Every workspace was cleaned up.
    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
}

struct Engine {
    _db: TempDir,
    work: TempDir,
    state: Arc<SqliteStateStore>,
    engine: SyncOrchestrator,
}

async fn engine() -> Engine {
    let db = TempDir::new().unwrap();
    let config = Config::with_db(db.path().join("ris.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let state = Arc::new(SqliteStateStore::new(pool));
    let work = TempDir::new().unwrap();
    let engine = SyncOrchestrator::new(
        Arc::new(provider(work.path())),
        Arc::new(InMemoryContentStore::new()),
        Arc::new(InMemoryIndexProvider::new()),
        state.clone(),
    );
    Engine {
        _db: db,
        work,
        state,
        engine,
    }
}

async fn tracked_paths(state: &SqliteStateStore, resource_id: i64) -> Vec<String> {
    state
        .list_tracked_files(resource_id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect()
}

#[tokio::test]
async fn non_ascii_paths_sync_incrementally() {
    if !git_available() {
        return;
    }
    let (repo, uri) = init_repo(&[("déjà.md", "# avant\n"), ("b.rs", "fn b() {}\n"), ("x y.md", "x\n")]);
    let e = engine().await;
    let (project, _) = e.engine.create_project("accents", "").await.unwrap();
    let resource = e
        .engine
        .register_resource(project.id, &uri, "main", None)
        .await
        .unwrap();
    e.engine.sync_resource(resource.id).await.unwrap();

    write_files(repo.path(), &[("déjà.md", "# après\n"), ("naïve/überall.yaml", "k: v\n")]);
    std::fs::remove_file(repo.path().join("x y.md")).unwrap();
    let head = commit_all(repo.path(), "accents");

    let report = e.engine.sync_resource(resource.id).await.unwrap();
    assert_eq!(report.kind, SyncKind::Incremental);
    assert_eq!(report.commit, head);
    assert_eq!(report.added, 2);
    assert_eq!(report.replaced, 1);
    assert_eq!(report.removed, 1);

    assert_eq!(
        tracked_paths(&e.state, resource.id).await,
        vec!["b.rs", "déjà.md", "naïve/überall.yaml"]
    );
    let view = e.engine.check_project(project.id).await.unwrap();
    assert_eq!(view.count(Category::All), 3);
    assert_eq!(std::fs::read_dir(e.work.path()).unwrap().count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_skipped_by_both_passes() {
    use std::os::unix::fs::symlink;

    if !git_available() {
        return;
    }
    let (repo, uri) = init_repo(&[("b.md", "# b\n"), ("c.md", "# c\n"), ("was-file.md", "# w\n")]);
    symlink("b.md", repo.path().join("link.md")).unwrap();
    commit_all(repo.path(), "link");

    let e = engine().await;
    let (project, _) = e.engine.create_project("links", "").await.unwrap();
    let resource = e
        .engine
        .register_resource(project.id, &uri, "main", None)
        .await
        .unwrap();
    e.engine.sync_resource(resource.id).await.unwrap();
    assert_eq!(
        tracked_paths(&e.state, resource.id).await,
        vec!["b.md", "c.md", "was-file.md"]
    );

    // Retarget the link, add a new one and turn a file into a link.
    std::fs::remove_file(repo.path().join("link.md")).unwrap();
    symlink("c.md", repo.path().join("link.md")).unwrap();
    symlink("b.md", repo.path().join("other-link.md")).unwrap();
    std::fs::remove_file(repo.path().join("was-file.md")).unwrap();
    symlink("c.md", repo.path().join("was-file.md")).unwrap();
    commit_all(repo.path(), "links");

    let report = e.engine.sync_resource(resource.id).await.unwrap();
    assert_eq!(report.kind, SyncKind::Incremental);
    assert_eq!(report.added, 0);
    assert_eq!(report.removed, 1);
    assert_eq!(tracked_paths(&e.state, resource.id).await, vec!["b.md", "c.md"]);
    e.engine.check_project(project.id).await.unwrap();
}
