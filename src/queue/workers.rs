// Background generation worker
//
// Each job runs on its own supervised task: typing event, pipeline under the
// job deadline, one terminal write, one result event. A failed write does
// not stop the result event.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::{AdvisoryPipeline, PipelineOutcome, Submission};
use crate::models::{Job, JobStatus};
use crate::queue::lifecycle::{JobLifecycle, FAILURE_MESSAGE};
use crate::realtime::{DeliveryChannel, EVENT_RESULT, EVENT_TYPING};

/// Whatever turns a submission into a finished report.
#[async_trait]
pub trait PipelineRunner: Send + Sync + 'static {
    async fn run(&self, submission: &Submission) -> PipelineOutcome;
}

#[async_trait]
impl PipelineRunner for AdvisoryPipeline {
    async fn run(&self, submission: &Submission) -> PipelineOutcome {
        AdvisoryPipeline::run(self, submission).await
    }
}

pub struct AdvisoryWorker {
    lifecycle: Arc<JobLifecycle>,
    pipeline: Arc<dyn PipelineRunner>,
    delivery: Arc<dyn DeliveryChannel>,
    deadline: Duration,
}

impl AdvisoryWorker {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        pipeline: Arc<dyn PipelineRunner>,
        delivery: Arc<dyn DeliveryChannel>,
        deadline: Duration,
    ) -> Self {
        Self {
            lifecycle,
            pipeline,
            delivery,
            deadline,
        }
    }

    /// Start generation for a pending job. Nobody needs to await the handle:
    /// a panic anywhere in processing still ends the job in `error`.
    pub fn spawn(self: &Arc<Self>, job: Job, submission: Submission) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = job.id;
            let room = job.room_id.clone();
            if AssertUnwindSafe(worker.process(job, submission)).catch_unwind().await.is_err() {
                error!(job_id = %job_id, "Worker panicked outside the pipeline");
                worker.finish_failed(job_id, room.as_deref(), "worker panicked").await;
            }
        })
    }

    pub async fn process(&self, job: Job, submission: Submission) {
        let job_id = job.id;
        let room = job.room_id.as_deref();
        info!(job_id = %job_id, room = ?room, "Generation started");

        if let Some(room) = room {
            self.delivery.publish(room, EVENT_TYPING, json!({ "job_id": job_id })).await;
        }

        match self.generate(submission).await {
            Ok(outcome) => self.finish_answered(job_id, room, outcome).await,
            Err(reason) => self.finish_failed(job_id, room, &reason).await,
        }
    }

    async fn generate(&self, submission: Submission) -> Result<PipelineOutcome, String> {
        let pipeline = Arc::clone(&self.pipeline);
        let generation = tokio::spawn(async move { pipeline.run(&submission).await });
        let abort = generation.abort_handle();

        match tokio::time::timeout(self.deadline, generation).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) if e.is_panic() => Err("generation panicked".to_string()),
            Ok(Err(e)) => Err(format!("generation aborted: {e}")),
            Err(_) => {
                abort.abort();
                Err(format!("deadline of {}s exceeded", self.deadline.as_secs_f64()))
            }
        }
    }

    async fn finish_answered(&self, job_id: Uuid, room: Option<&str>, outcome: PipelineOutcome) {
        let metadata = outcome.metadata();
        let report = outcome.report.text;

        if let Err(e) = self.lifecycle.complete(job_id, report.clone(), metadata.clone()).await {
            error!(job_id = %job_id, error = %e, "Failed to persist answered job");
        }

        if let Some(room) = room {
            let payload = json!({
                "job_id": job_id,
                "status": JobStatus::Answered,
                "result": report,
                "metadata": metadata,
            });
            self.delivery.publish(room, EVENT_RESULT, payload).await;
        }
    }

    async fn finish_failed(&self, job_id: Uuid, room: Option<&str>, reason: &str) {
        warn!(job_id = %job_id, reason, "Generation failed");

        if let Err(e) = self.lifecycle.fail(job_id, reason).await {
            error!(job_id = %job_id, error = %e, "Failed to persist failed job");
        }

        if let Some(room) = room {
            let payload = json!({
                "job_id": job_id,
                "status": JobStatus::Error,
                "result": FAILURE_MESSAGE,
                "error": reason,
            });
            self.delivery.publish(room, EVENT_RESULT, payload).await;
        }
    }
}
