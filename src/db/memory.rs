// In-memory stores, used when no DATABASE_URL is configured and in tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{merge_metadata, JobStore, KnowledgeStore};
use crate::models::{Job, JobStatus, KnowledgeSnippet};
use crate::types::{AppError, AppResult};

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&job.id) {
            return Err(AppError::InvalidRequest(format!("job {} already exists", job.id)));
        }
        guard.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Job>> {
        let guard = self.inner.read().await;
        Ok(guard.get(&id).cloned())
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

        let mut guard = self.inner.write().await;
        let job = guard
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;

        if job.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!("job {id} is already {}", job.status)));
        }

        job.status = status;
        job.result = result;
        merge_metadata(&mut job.metadata, metadata);
        job.updated_at = chrono::Utc::now();

        Ok(job.clone())
    }

    async fn list_for_user(&self, user_id: &str, limit: i64) -> AppResult<Vec<Job>> {
        let guard = self.inner.read().await;
        let mut jobs: Vec<Job> = guard
            .values()
            .filter(|job| job.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }
}

#[derive(Clone, Default)]
pub struct MemoryKnowledgeStore {
    snippets: Arc<RwLock<Vec<KnowledgeSnippet>>>,
}

impl MemoryKnowledgeStore {
    pub fn with_snippets(snippets: Vec<KnowledgeSnippet>) -> Self {
        Self {
            snippets: Arc::new(RwLock::new(snippets)),
        }
    }

    /// A small starter knowledge base for running without a database.
    pub fn seeded() -> Self {
        Self::with_snippets(default_snippets())
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn find_snippets(&self, tags: &[String], limit: usize) -> AppResult<Vec<KnowledgeSnippet>> {
        let guard = self.snippets.read().await;
        let matches = guard
            .iter()
            .filter(|snippet| {
                snippet
                    .tags
                    .iter()
                    .any(|tag| tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(matches)
    }
}

fn snippet(title: &str, body: &str, tags: &[&str]) -> KnowledgeSnippet {
    KnowledgeSnippet {
        title: title.to_string(),
        body: body.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn default_snippets() -> Vec<KnowledgeSnippet> {
    vec![
        snippet(
            "Tomato transplanting",
            "Transplant tomato seedlings 4-6 weeks after sowing, once night temperatures stay above 10°C.",
            &["tomato", "tomatoes", "transplant", "seedling"],
        ),
        snippet(
            "Late blight management",
            "Remove infected leaves, avoid overhead irrigation and apply a protectant fungicide before wet spells.",
            &["blight", "tomato", "potato", "fungicide"],
        ),
        snippet(
            "Wheat irrigation",
            "Critical irrigation stages for wheat are crown root initiation, tillering, flowering and grain filling.",
            &["wheat", "irrigation", "water"],
        ),
        snippet(
            "Soil testing",
            "Test soil every 2-3 seasons; apply fertilizer according to the soil health card recommendations.",
            &["soil", "fertilizer", "nutrient", "npk"],
        ),
        snippet(
            "Integrated pest management",
            "Combine pheromone traps, resistant varieties and need-based spraying to keep pests below economic thresholds.",
            &["pest", "pests", "insect", "ipm"],
        ),
    ]
}
