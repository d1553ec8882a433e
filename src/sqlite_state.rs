//! SQLite-backed [`StateStore`] implementation.
//!
//! Maps each `StateStore` operation onto the schema created by
//! [`crate::migrate`]. Every method is a single statement (or a short
//! read), so a crash between two calls leaves each row individually
//! consistent; cross-call atomicity is not provided.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use repo_index_sync_core::state::StateStore;
use repo_index_sync_core::{
    Category, IndexRecord, Project, Resource, Result, SyncError, SyncState, TrackedFile,
};

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn storage(e: sqlx::Error) -> SyncError {
    SyncError::Storage(e.to_string())
}

fn resource_from_row(row: &SqliteRow) -> Result<Resource> {
    let state: String = row.try_get("sync_state").map_err(storage)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(storage)?;
    Ok(Resource {
        id: row.try_get("id").map_err(storage)?,
        project_id: row.try_get("project_id").map_err(storage)?,
        uri: row.try_get("uri").map_err(storage)?,
        branch: row.try_get("branch").map_err(storage)?,
        last_commit_hash: row.try_get("last_commit_hash").map_err(storage)?,
        credentials_ref: row.try_get("credentials_ref").map_err(storage)?,
        sync_state: state.parse().map_err(SyncError::Storage)?,
        updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
    })
}

fn file_from_row(row: &SqliteRow) -> Result<TrackedFile> {
    let category: String = row.try_get("category").map_err(storage)?;
    let line_count: i64 = row.try_get("line_count").map_err(storage)?;
    Ok(TrackedFile {
        resource_id: row.try_get("resource_id").map_err(storage)?,
        path: row.try_get("path").map_err(storage)?,
        content_id: row.try_get("content_id").map_err(storage)?,
        category: category.parse().map_err(SyncError::Storage)?,
        extension: row.try_get("extension").map_err(storage)?,
        mime_type: row.try_get("mime_type").map_err(storage)?,
        line_count: line_count.max(0) as u64,
    })
}

fn index_from_row(row: &SqliteRow) -> Result<IndexRecord> {
    let category: String = row.try_get("category").map_err(storage)?;
    Ok(IndexRecord {
        id: row.try_get("id").map_err(storage)?,
        project_id: row.try_get("project_id").map_err(storage)?,
        category: category.parse().map_err(SyncError::Storage)?,
        name: row.try_get("name").map_err(storage)?,
        provider_index_id: row.try_get("provider_index_id").map_err(storage)?,
    })
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    Ok(Project {
        id: row.try_get("id").map_err(storage)?,
        name: row.try_get("name").map_err(storage)?,
        description: row.try_get("description").map_err(storage)?,
    })
}

const RESOURCE_COLUMNS: &str =
    "id, project_id, uri, branch, last_commit_hash, credentials_ref, sync_state, updated_at";

const FILE_COLUMNS: &str =
    "resource_id, path, content_id, category, extension, mime_type, line_count";

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_project(&self, name: &str, description: &str) -> Result<Project> {
        let id = sqlx::query(
            "INSERT INTO projects (name, description, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        Ok(Project {
            id,
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, description FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT id, name, description FROM projects ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(project_from_row).collect()
    }

    async fn create_resource(
        &self,
        project_id: i64,
        uri: &str,
        branch: &str,
        credentials_ref: Option<&str>,
    ) -> Result<Resource> {
        if self.get_project(project_id).await?.is_none() {
            return Err(SyncError::NotFound(format!("project {}", project_id)));
        }
        let now = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO resources (project_id, uri, branch, credentials_ref, sync_state, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(uri)
        .bind(branch)
        .bind(credentials_ref)
        .bind(SyncState::Uninitialized.as_str())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        Ok(Resource {
            id,
            project_id,
            uri: uri.to_string(),
            branch: branch.to_string(),
            last_commit_hash: None,
            credentials_ref: credentials_ref.map(str::to_string),
            sync_state: SyncState::Uninitialized,
            updated_at: DateTime::from_timestamp(now.timestamp(), 0).unwrap_or_default(),
        })
    }

    async fn get_resource(&self, id: i64) -> Result<Option<Resource>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM resources WHERE id = ?",
            RESOURCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(resource_from_row).transpose()
    }

    async fn list_resources(&self, project_id: i64) -> Result<Vec<Resource>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM resources WHERE project_id = ? ORDER BY id",
            RESOURCE_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(resource_from_row).collect()
    }

    async fn set_sync_state(&self, resource_id: i64, state: SyncState) -> Result<()> {
        let result = sqlx::query("UPDATE resources SET sync_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(Utc::now().timestamp())
            .bind(resource_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("resource {}", resource_id)));
        }
        Ok(())
    }

    async fn set_last_commit(&self, resource_id: i64, commit: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE resources SET last_commit_hash = ?, updated_at = ? WHERE id = ?")
                .bind(commit)
                .bind(Utc::now().timestamp())
                .bind(resource_id)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("resource {}", resource_id)));
        }
        Ok(())
    }

    async fn delete_resource(&self, resource_id: i64) -> Result<()> {
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tracked_files WHERE resource_id = ?")
                .bind(resource_id)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;
        if remaining > 0 {
            return Err(SyncError::Storage(format!(
                "resource {} still has {} tracked files",
                resource_id, remaining
            )));
        }
        sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(resource_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn get_tracked_file(
        &self,
        resource_id: i64,
        path: &str,
    ) -> Result<Option<TrackedFile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tracked_files WHERE resource_id = ? AND path = ?",
            FILE_COLUMNS
        ))
        .bind(resource_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn list_tracked_files(&self, resource_id: i64) -> Result<Vec<TrackedFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tracked_files WHERE resource_id = ? ORDER BY path",
            FILE_COLUMNS
        ))
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(file_from_row).collect()
    }

    async fn list_project_files(&self, project_id: i64) -> Result<Vec<TrackedFile>> {
        let rows = sqlx::query(
            r#"
            SELECT f.resource_id, f.path, f.content_id, f.category, f.extension,
                   f.mime_type, f.line_count
            FROM tracked_files f
            JOIN resources r ON r.id = f.resource_id
            WHERE r.project_id = ?
            ORDER BY f.resource_id, f.path
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(file_from_row).collect()
    }

    async fn upsert_tracked_file(&self, file: &TrackedFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracked_files (resource_id, path, content_id, category, extension, mime_type, line_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_id, path) DO UPDATE SET
                content_id = excluded.content_id,
                category = excluded.category,
                extension = excluded.extension,
                mime_type = excluded.mime_type,
                line_count = excluded.line_count
            "#,
        )
        .bind(file.resource_id)
        .bind(&file.path)
        .bind(&file.content_id)
        .bind(file.category.as_str())
        .bind(&file.extension)
        .bind(&file.mime_type)
        .bind(file.line_count as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn delete_tracked_file(&self, resource_id: i64, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM tracked_files WHERE resource_id = ? AND path = ?")
            .bind(resource_id)
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn list_indexes(&self, project_id: i64) -> Result<Vec<IndexRecord>> {
        let rows = sqlx::query(
            "SELECT id, project_id, category, name, provider_index_id FROM indexes WHERE project_id = ? ORDER BY id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(index_from_row).collect()
    }

    async fn insert_index(
        &self,
        project_id: i64,
        category: Category,
        name: &str,
        provider_index_id: &str,
    ) -> Result<IndexRecord> {
        let id = sqlx::query(
            r#"
            INSERT INTO indexes (project_id, category, name, provider_index_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(category.as_str())
        .bind(name)
        .bind(provider_index_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        Ok(IndexRecord {
            id,
            project_id,
            category,
            name: name.to_string(),
            provider_index_id: provider_index_id.to_string(),
        })
    }

    async fn add_index_member(&self, index_id: i64, content_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO index_members (index_id, content_id) VALUES (?, ?)")
            .bind(index_id)
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn remove_index_member(&self, index_id: i64, content_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_members WHERE index_id = ? AND content_id = ?")
            .bind(index_id)
            .bind(content_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn list_index_members(&self, index_id: i64) -> Result<BTreeSet<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT content_id FROM index_members WHERE index_id = ?")
                .bind(index_id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;
        Ok(ids.into_iter().collect())
    }
}
