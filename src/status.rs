//! Sync status overview.
//!
//! Summarizes every project: its resources (uri, branch, state, last
//! synced commit, tracked files) and the member count of each index. Used
//! by `ris status` to confirm that passes are landing.

use anyhow::Result;
use serde::Serialize;

use repo_index_sync_core::state::StateStore;
use repo_index_sync_core::{Category, Project, Resource};

use crate::config::Config;
use crate::db;
use crate::sqlite_state::SqliteStateStore;

#[derive(Debug, Serialize)]
pub struct ResourceStatus {
    #[serde(flatten)]
    pub resource: Resource,
    pub tracked_files: usize,
}

#[derive(Debug, Serialize)]
pub struct IndexStatus {
    pub category: Category,
    pub name: String,
    pub provider_index_id: String,
    pub members: usize,
}

#[derive(Debug, Serialize)]
pub struct ProjectStatus {
    #[serde(flatten)]
    pub project: Project,
    pub resources: Vec<ResourceStatus>,
    pub indexes: Vec<IndexStatus>,
}

/// Collect the status of every project.
pub async fn collect(state: &dyn StateStore) -> repo_index_sync_core::Result<Vec<ProjectStatus>> {
    let mut out = Vec::new();
    for project in state.list_projects().await? {
        let mut resources = Vec::new();
        for resource in state.list_resources(project.id).await? {
            let tracked_files = state.list_tracked_files(resource.id).await?.len();
            resources.push(ResourceStatus {
                resource,
                tracked_files,
            });
        }

        let mut records = state.list_indexes(project.id).await?;
        records.sort_by_key(|r| Category::INDEX_ORDER.iter().position(|c| *c == r.category));
        let mut indexes = Vec::new();
        for record in records {
            let members = state.list_index_members(record.id).await?.len();
            indexes.push(IndexStatus {
                category: record.category,
                name: record.name,
                provider_index_id: record.provider_index_id,
                members,
            });
        }

        out.push(ProjectStatus {
            project,
            resources,
            indexes,
        });
    }
    Ok(out)
}

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let state = SqliteStateStore::new(pool.clone());
    let projects = collect(&state).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        pool.close().await;
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("repo-index-sync status");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Projects:    {}", projects.len());

    for p in &projects {
        println!();
        println!("  Project {}: {}", p.project.id, p.project.name);
        if p.resources.is_empty() {
            println!("    (no repositories)");
        } else {
            println!(
                "    {:>4}  {:<40} {:<12} {:<28} {:>6}   {}",
                "ID", "URI", "BRANCH", "STATE", "FILES", "COMMIT"
            );
            println!("    {}", "-".repeat(108));
            for r in &p.resources {
                let commit = r
                    .resource
                    .last_commit_hash
                    .as_deref()
                    .map(|c| c.chars().take(12).collect::<String>())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "    {:>4}  {:<40} {:<12} {:<28} {:>6}   {} ({})",
                    r.resource.id,
                    r.resource.uri,
                    r.resource.branch,
                    r.resource.sync_state.as_str(),
                    r.tracked_files,
                    commit,
                    format_ts_relative(r.resource.updated_at.timestamp())
                );
            }
        }

        if !p.indexes.is_empty() {
            println!();
            for i in &p.indexes {
                println!(
                    "    {:<8} {:<20} {:<36} {:>6} members",
                    i.category.as_str(),
                    i.name,
                    i.provider_index_id,
                    i.members
                );
            }
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
