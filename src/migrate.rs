//! Database schema migrations. Every statement is idempotent, so
//! `ris init` can run any number of times.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // credentials_ref is an opaque secret-store key, never a secret.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            uri TEXT NOT NULL,
            branch TEXT NOT NULL,
            last_commit_hash TEXT,
            credentials_ref TEXT,
            sync_state TEXT NOT NULL DEFAULT 'uninitialized',
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracked_files (
            resource_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            content_id TEXT NOT NULL,
            category TEXT NOT NULL,
            extension TEXT NOT NULL DEFAULT '',
            mime_type TEXT NOT NULL DEFAULT 'text/plain',
            line_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (resource_id, path),
            FOREIGN KEY (resource_id) REFERENCES resources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            provider_index_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(project_id, category),
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_members (
            index_id INTEGER NOT NULL,
            content_id TEXT NOT NULL,
            PRIMARY KEY (index_id, content_id),
            FOREIGN KEY (index_id) REFERENCES indexes(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_resources_project ON resources(project_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracked_files_content ON tracked_files(content_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
