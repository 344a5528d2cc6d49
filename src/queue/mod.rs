//! Job Queue
//!
//! Front door for submissions: validates input, creates the pending job and
//! hands it to a background worker. Callers get the job id immediately.

pub mod lifecycle;
pub mod workers;

pub use lifecycle::{JobLifecycle, FAILURE_MESSAGE};
pub use workers::{AdvisoryWorker, PipelineRunner};

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::agents::Submission;
use crate::models::{Job, NewJob};
use crate::types::{AppError, AppResult};

pub const MAX_QUESTION_CHARS: usize = 4000;
pub const HISTORY_LIMIT: i64 = 50;

pub struct JobQueue {
    lifecycle: Arc<JobLifecycle>,
    worker: Arc<AdvisoryWorker>,
}

impl JobQueue {
    pub fn new(lifecycle: Arc<JobLifecycle>, worker: Arc<AdvisoryWorker>) -> Self {
        Self { lifecycle, worker }
    }

    pub async fn submit_question(
        &self,
        question: &str,
        user_id: Option<String>,
        room_id: Option<String>,
    ) -> AppResult<Job> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidRequest("question must not be empty".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(AppError::InvalidRequest(format!(
                "question is longer than {MAX_QUESTION_CHARS} characters"
            )));
        }

        let job = self
            .lifecycle
            .create(NewJob {
                user_id: non_blank(user_id),
                question: Some(question.to_string()),
                image_ref: None,
                room_id: non_blank(room_id),
                metadata: serde_json::json!({ "kind": "question" }),
            })
            .await?;

        self.worker.spawn(
            job.clone(),
            Submission::Question {
                question: question.to_string(),
            },
        );
        Ok(job)
    }

    /// The image bytes are kept only for the lifetime of the worker; the job
    /// records a content hash.
    pub async fn submit_photo(
        &self,
        image: Vec<u8>,
        content_type: Option<String>,
        note: Option<String>,
        user_id: Option<String>,
        room_id: Option<String>,
    ) -> AppResult<Job> {
        if image.is_empty() {
            return Err(AppError::InvalidRequest("image must not be empty".to_string()));
        }

        let image_ref = format!("sha256:{}", hex::encode(Sha256::digest(&image)));
        let note = non_blank(note);
        info!(image_ref = %image_ref, size = image.len(), "Photo received");

        let job = self
            .lifecycle
            .create(NewJob {
                user_id: non_blank(user_id),
                question: note.clone(),
                image_ref: Some(image_ref),
                room_id: non_blank(room_id),
                metadata: serde_json::json!({
                    "kind": "photo",
                    "content_type": content_type,
                    "image_size": image.len(),
                }),
            })
            .await?;

        self.worker.spawn(
            job.clone(),
            Submission::Photo {
                image,
                media_type: content_type,
                note,
            },
        );
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> AppResult<Job> {
        self.lifecycle.get(id).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> AppResult<Vec<Job>> {
        self.lifecycle.list_for_user(user_id, HISTORY_LIMIT).await
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AdvisoryAgent, AdvisoryPipeline};
    use crate::config::PipelineConfig;
    use crate::db::{MemoryJobStore, MemoryKnowledgeStore};
    use crate::llm::provider::ProviderSet;
    use crate::models::JobStatus;
    use crate::realtime::{RoomHub, EVENT_RESULT, EVENT_TYPING};
    use std::time::Duration;

    fn queue_with_hub() -> (JobQueue, Arc<RoomHub>) {
        let lifecycle = Arc::new(JobLifecycle::new(Arc::new(MemoryJobStore::new())));
        let pipeline = Arc::new(AdvisoryPipeline::new(
            &ProviderSet::unavailable(),
            Arc::new(MemoryKnowledgeStore::seeded()),
            &PipelineConfig::default(),
        ));
        let hub = Arc::new(RoomHub::new());
        let worker = Arc::new(AdvisoryWorker::new(
            lifecycle.clone(),
            pipeline,
            hub.clone(),
            Duration::from_secs(5),
        ));
        (JobQueue::new(lifecycle, worker), hub)
    }

    async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> Job {
        for _ in 0..200 {
            let job = queue.get_job(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never left pending");
    }

    #[tokio::test]
    async fn test_question_without_providers_is_answered_with_referral() {
        let (queue, _hub) = queue_with_hub();
        let job = queue
            .submit_question("What is the best time to plant tomatoes?", Some("u1".to_string()), None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let done = wait_for_terminal(&queue, job.id).await;
        assert_eq!(done.status, JobStatus::Answered);
        assert_eq!(done.result.as_deref(), Some(AdvisoryAgent::generic_answer()));
        assert_eq!(done.metadata["kind"], "question");
        assert_eq!(done.metadata["synthetic"], true);
    }

    #[tokio::test]
    async fn test_two_connections_get_identical_result() {
        let (queue, hub) = queue_with_hub();
        let (a, mut rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.join(a, "village-42").await;
        hub.join(b, "village-42").await;

        let job = queue
            .submit_question("Aphids on my mustard crop", None, Some("village-42".to_string()))
            .await
            .unwrap();

        let mut results = Vec::new();
        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap().event, EVENT_TYPING);
            let result = rx.recv().await.unwrap();
            assert_eq!(result.event, EVENT_RESULT);
            assert_eq!(result.payload["job_id"], job.id.to_string());
            assert!(rx.try_recv().is_err());
            results.push(result.payload);
        }
        assert_eq!(results[0], results[1]);
    }

    #[tokio::test]
    async fn test_photo_is_hashed_not_stored() {
        let (queue, _hub) = queue_with_hub();
        let image = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];
        let job = queue
            .submit_photo(image.clone(), Some("image/png".to_string()), Some("  ".to_string()), None, None)
            .await
            .unwrap();

        let expected = format!("sha256:{}", hex::encode(Sha256::digest(&image)));
        assert_eq!(job.image_ref.as_deref(), Some(expected.as_str()));
        assert!(job.question.is_none());

        let done = wait_for_terminal(&queue, job.id).await;
        assert_eq!(done.status, JobStatus::Answered);
        assert_eq!(done.metadata["capability"], "vision");
        assert_eq!(done.metadata["content_type"], "image/png");
    }

    #[tokio::test]
    async fn test_invalid_submissions_are_rejected() {
        let (queue, _hub) = queue_with_hub();
        assert!(matches!(
            queue.submit_question("   ", None, None).await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            queue.submit_question(&"a".repeat(MAX_QUESTION_CHARS + 1), None, None).await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            queue.submit_photo(Vec::new(), None, None, None, None).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_questions_are_independent_jobs() {
        let (queue, _hub) = queue_with_hub();
        let first = queue.submit_question("Will it rain?", Some("u".to_string()), None).await.unwrap();
        let second = queue.submit_question("Will it rain?", Some("u".to_string()), None).await.unwrap();
        assert_ne!(first.id, second.id);

        wait_for_terminal(&queue, first.id).await;
        wait_for_terminal(&queue, second.id).await;
        assert_eq!(queue.list_for_user("u").await.unwrap().len(), 2);
    }
}
