//! CLI command implementations.
//!
//! Each `run_*` function opens the database, wires the configured
//! collaborators into a [`SyncOrchestrator`] and prints a short report on
//! stdout. Logs and progress go to stderr.

use std::sync::Arc;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use repo_index_sync_core::index_set::IndexSet;
use repo_index_sync_core::state::StateStore;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::openai::OpenAiProvider;
use crate::progress::ProgressMode;
use crate::secrets::EnvSecretStore;
use crate::source::PathFilter;
use crate::source_git::GitSourceProvider;
use crate::sqlite_state::SqliteStateStore;
use crate::sync::{SyncOrchestrator, SyncReport};

/// Open database plus a wired orchestrator.
pub struct App {
    pool: SqlitePool,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl App {
    pub async fn open(config: &Config, progress: ProgressMode) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let state = Arc::new(SqliteStateStore::new(pool.clone()));
        let secrets = Arc::new(EnvSecretStore::new(config.secrets.env_prefix.clone()));
        let source = Arc::new(GitSourceProvider::new(&config.source, secrets)?);
        let provider = Arc::new(OpenAiProvider::new(&config.provider)?);
        let filter = PathFilter::new(&config.source.include_globs, &config.source.exclude_globs)?;

        let orchestrator = SyncOrchestrator::new(source, provider.clone(), provider, state)
            .with_filter(filter)
            .with_index_prefix(config.provider.index_name_prefix.clone())
            .with_progress(progress.reporter());

        Ok(Self {
            pool,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

pub async fn run_project_create(config: &Config, name: &str, description: &str) -> Result<()> {
    let app = App::open(config, ProgressMode::Off).await?;
    let (project, indexes) = app.orchestrator.create_project(name, description).await?;

    println!("project {} created: {}", project.id, project.name);
    for record in indexes.ordered() {
        println!("  {:<8} {:<20} {}", record.category.as_str(), record.name, record.provider_index_id);
    }
    println!("ok");

    app.close().await;
    Ok(())
}

pub async fn run_project_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let state = SqliteStateStore::new(pool.clone());

    let projects = state.list_projects().await?;
    if projects.is_empty() {
        println!("No projects.");
    }
    for project in projects {
        let resources = state.list_resources(project.id).await?;
        println!(
            "{:>4}  {:<32} {} repositor{}",
            project.id,
            project.name,
            resources.len(),
            if resources.len() == 1 { "y" } else { "ies" }
        );
    }

    pool.close().await;
    Ok(())
}

/// Print provider index ids in binding order, one per line, for
/// downstream assistant configuration.
pub async fn run_project_indexes(config: &Config, project_id: i64, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let state = SqliteStateStore::new(pool.clone());

    if state.get_project(project_id).await?.is_none() {
        bail!("project {} not found", project_id);
    }
    let set = IndexSet::from_records(project_id, state.list_indexes(project_id).await?)?;
    let records = set.ordered();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in records {
            println!("{}\t{}\t{}", record.category, record.name, record.provider_index_id);
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_repo_add(
    config: &Config,
    project_id: i64,
    uri: &str,
    branch: &str,
    credentials_ref: Option<&str>,
    no_sync: bool,
    progress: ProgressMode,
) -> Result<()> {
    let app = App::open(config, progress).await?;
    let resource = app
        .orchestrator
        .register_resource(project_id, uri, branch, credentials_ref)
        .await?;
    println!("resource {} registered: {} ({})", resource.id, resource.uri, resource.branch);

    if !no_sync {
        let report = app.orchestrator.sync_resource(resource.id).await;
        let report = match report {
            Ok(r) => r,
            Err(e) => {
                app.close().await;
                return Err(e.into());
            }
        };
        print_report(&report);
    }
    println!("ok");

    app.close().await;
    Ok(())
}

pub async fn run_repo_remove(config: &Config, resource_id: i64) -> Result<()> {
    let app = App::open(config, ProgressMode::Off).await?;
    let removed = app.orchestrator.remove_resource(resource_id).await?;
    println!("resource {} removed ({} files)", resource_id, removed);
    println!("ok");
    app.close().await;
    Ok(())
}

/// What `ris sync` targets.
#[derive(Debug, Clone, Copy)]
pub enum SyncTarget {
    Resource(i64),
    Project(i64),
}

pub async fn run_sync(config: &Config, target: SyncTarget, progress: ProgressMode) -> Result<()> {
    let app = App::open(config, progress).await?;

    let outcome = match target {
        SyncTarget::Resource(id) => app.orchestrator.sync_resource(id).await.map(|report| {
            print_report(&report);
        }),
        SyncTarget::Project(id) => {
            let result = app.orchestrator.sync_project(id).await;
            match result {
                Ok(project) => {
                    for report in &project.synced {
                        print_report(report);
                    }
                    for failure in &project.failed {
                        println!("sync resource {}", failure.resource_id);
                        println!("  failed ({}): {}", failure.error.kind(), failure.error);
                    }
                    let failed = project.failed.len();
                    let total = failed + project.synced.len();
                    app.close().await;
                    if failed > 0 {
                        bail!("{} of {} resources failed to sync", failed, total);
                    }
                    println!("ok");
                    return Ok(());
                }
                Err(e) => Err(e),
            }
        }
    };

    app.close().await;
    outcome?;
    println!("ok");
    Ok(())
}

pub async fn run_check(config: &Config, project_id: i64) -> Result<()> {
    let app = App::open(config, ProgressMode::Off).await?;
    let result = app.orchestrator.check_project(project_id).await;
    app.close().await;

    let view = result?;
    println!("project {} consistent", project_id);
    for category in repo_index_sync_core::Category::INDEX_ORDER {
        println!("  {:<8} {} members", category.as_str(), view.count(category));
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    let kind = match report.kind {
        crate::sync::SyncKind::Full => "full",
        crate::sync::SyncKind::Incremental => "incremental",
        crate::sync::SyncKind::UpToDate => "up to date",
    };
    println!("sync resource {}", report.resource_id);
    println!("  pass: {}", kind);
    println!("  commit: {}", report.commit);
    println!("  added: {}", report.added);
    println!("  replaced: {}", report.replaced);
    println!("  removed: {}", report.removed);
}
