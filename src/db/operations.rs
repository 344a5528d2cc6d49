use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{JobStore, KnowledgeStore};
use crate::models::{Job, JobStatus, KnowledgeSnippet};
use crate::types::{AppError, AppResult};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    user_id: Option<String>,
    question: Option<String>,
    image_ref: Option<String>,
    room_id: Option<String>,
    status: String,
    result: Option<String>,
    metadata: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> AppResult<Self> {
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| AppError::Internal(format!("unknown job status '{}'", row.status)))?;

        Ok(Job {
            id: row.id,
            user_id: row.user_id,
            question: row.question,
            image_ref: row.image_ref,
            room_id: row.room_id,
            status,
            result: row.result,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const JOB_COLUMNS: &str =
    "id, user_id, question, image_ref, room_id, status, result, metadata, created_at, updated_at";

/// Postgres-backed job records
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO advisory_jobs (id, user_id, question, image_ref, room_id, status, result, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(&job.user_id)
        .bind(&job.question)
        .bind(&job.image_ref)
        .bind(&job.room_id)
        .bind(job.status.as_str())
        .bind(&job.result)
        .bind(&job.metadata)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM advisory_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<String>,
        metadata: serde_json::Value,
    ) -> AppResult<Job> {
        if !status.is_terminal() {
            return Err(AppError::InvalidTransition(format!("job {id} cannot move back to {status}")));
        }

        let patch = if metadata.is_object() { metadata } else { serde_json::json!({}) };

        // Guarded on status so only the first terminal write lands
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE advisory_jobs
            SET status = $2, result = $3, metadata = metadata || $4, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(&result)
        .bind(&patch)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => match self.get(id).await? {
                Some(existing) => Err(AppError::InvalidTransition(format!(
                    "job {id} is already {}",
                    existing.status
                ))),
                None => Err(AppError::NotFound(format!("job {id}"))),
            },
        }
    }

    async fn list_for_user(&self, user_id: &str, limit: i64) -> AppResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM advisory_jobs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

/// Postgres-backed knowledge snippets (tags stored lower-case in a TEXT[])
#[derive(Clone)]
pub struct PgKnowledgeStore {
    pool: PgPool,
}

impl PgKnowledgeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeStore for PgKnowledgeStore {
    async fn find_snippets(&self, tags: &[String], limit: usize) -> AppResult<Vec<KnowledgeSnippet>> {
        if tags.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let snippets = sqlx::query_as::<_, KnowledgeSnippet>(
            r#"
            SELECT title, body, tags
            FROM knowledge_snippets
            WHERE tags && $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(tags)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(snippets)
    }
}
