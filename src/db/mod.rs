use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{Job, JobStatus, KnowledgeSnippet};
use crate::types::AppResult;

pub use memory::*;
pub use operations::*;

pub mod memory;
pub mod operations;

/// Persistence for advisory jobs. `finish` is the only mutation after
/// creation and succeeds at most once per job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Move a pending job to a terminal status. Jobs that are already
    /// terminal are rejected with `AppError::InvalidTransition`; the stored
    /// record is left untouched. `metadata` is merged into the existing bag.
    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<String>,
        metadata: serde_json::Value,
    ) -> AppResult<Job>;

    /// Newest first.
    async fn list_for_user(&self, user_id: &str, limit: i64) -> AppResult<Vec<Job>>;
}

/// Read-only lookup into the knowledge base.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Snippets whose tag set intersects `tags`, at most `limit` of them.
    async fn find_snippets(&self, tags: &[String], limit: usize) -> AppResult<Vec<KnowledgeSnippet>>;
}

pub async fn create_pool(config: &DatabaseConfig, url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(url)
        .await?;

    // Test connection
    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    Ok(pool)
}

/// Merge `patch` into `base` (object keys only; anything else replaces).
pub(crate) fn merge_metadata(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base.as_object_mut(), patch) {
        (Some(target), serde_json::Value::Object(source)) => {
            for (key, value) in source {
                target.insert(key, value);
            }
        }
        (_, serde_json::Value::Null) => {}
        (_, other) => *base = other,
    }
}
