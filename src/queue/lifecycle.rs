// Job lifecycle: pending -> answered | error, one terminal write per job

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::JobStore;
use crate::models::{Job, JobStatus, NewJob};
use crate::types::{AppError, AppResult};

/// Stored as the result of a job that ended in `error`.
pub const FAILURE_MESSAGE: &str =
    "We could not prepare an answer for this request. Please try again or contact your local agricultural extension officer.";

pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
}

impl JobLifecycle {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, new_job: NewJob) -> AppResult<Job> {
        let job = Job::pending(new_job);
        self.store.insert(&job).await?;
        info!(job_id = %job.id, room = ?job.room_id, "Job created");
        Ok(job)
    }

    pub async fn complete(&self, id: Uuid, result: String, metadata: serde_json::Value) -> AppResult<Job> {
        if result.trim().is_empty() {
            return Err(AppError::InvalidRequest(format!("job {id} cannot be answered with an empty result")));
        }
        let job = self.store.finish(id, JobStatus::Answered, Some(result), metadata).await?;
        info!(job_id = %id, "Job answered");
        Ok(job)
    }

    pub async fn fail(&self, id: Uuid, reason: &str) -> AppResult<Job> {
        let metadata = serde_json::json!({ "error": reason });
        let job = self
            .store
            .finish(id, JobStatus::Error, Some(FAILURE_MESSAGE.to_string()), metadata)
            .await?;
        warn!(job_id = %id, reason, "Job failed");
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))
    }

    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> AppResult<Vec<Job>> {
        self.store.list_for_user(user_id, limit).await
    }
}
