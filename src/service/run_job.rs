use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{INFRA_FAILURE_STATUS, OUTPUT_PARSE_FAILURE_STATUS};
use crate::dispatch::{HandlerError, JobHandler};
use crate::ledger::{JobRepository, LedgerError};
use crate::model::{Job, JobError};
use crate::observability::Metrics;
use crate::runner::{Runner, image_tag};
use crate::storage::ArchiveReader;

#[derive(Debug, Error)]
pub enum RunJobError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Illegal transition, e.g. a redelivered job that already ran
    #[error(transparent)]
    Rejected(JobError),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("cancelled before the job finished")]
    Cancelled,
}

impl RunJobError {
    /// Storage trouble and cancellation may succeed on redelivery; domain
    /// errors and missing jobs never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunJobError::Ledger(_) | RunJobError::Cancelled)
    }
}

impl From<LedgerError> for RunJobError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::JobNotFound(id) => RunJobError::JobNotFound(id),
            LedgerError::Rejected(err) => RunJobError::Rejected(err),
            other => RunJobError::Ledger(other),
        }
    }
}

/// Executes one dispatched job: `Pending → Running`, build and run in the
/// sandbox, `Running → Finished`. Each transition is its own ledger update,
/// so `Running` is durable before the sandbox starts.
pub struct RunJobHandler<R> {
    jobs: Arc<R>,
    archives: Arc<dyn ArchiveReader>,
    runner: Arc<dyn Runner>,
    metrics: Arc<Metrics>,
    image_prefix: String,
    cleanup_images: bool,
}

impl<R: JobRepository> RunJobHandler<R> {
    pub fn new(
        jobs: Arc<R>,
        archives: Arc<dyn ArchiveReader>,
        runner: Arc<dyn Runner>,
        metrics: Arc<Metrics>,
        image_prefix: impl Into<String>,
        cleanup_images: bool,
    ) -> Self {
        Self {
            jobs,
            archives,
            runner,
            metrics,
            image_prefix: image_prefix.into(),
            cleanup_images,
        }
    }

    pub async fn run_job(&self, job_id: &str, cancel: CancellationToken) -> Result<Job, RunJobError> {
        self.jobs.update_job(job_id, |job| job.run()).await?;
        self.metrics.job_started();
        info!(job_id, "Job started");

        // Fresh read: the ledger is authoritative, not the value from the update
        let job = self
            .jobs
            .job(job_id)
            .await?
            .ok_or_else(|| RunJobError::JobNotFound(job_id.to_string()))?;
        let image = image_tag(&self.image_prefix, job.blueprint_id());

        let (exit_status, output) = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(job_id, image, "Execution abandoned, job left running");
                return Err(RunJobError::Cancelled);
            }
            outcome = self.execute(&job, &image) => outcome,
        };

        let finished = match self
            .jobs
            .update_job(job_id, |job| job.finish(exit_status, &output))
            .await
        {
            Ok(job) => job,
            Err(LedgerError::Rejected(JobError::OutputParse(parse))) => {
                warn!(job_id, error = %parse, "Output does not match schema, recording failure");
                let message = format!("{parse}\n{output}");
                self.jobs
                    .update_job(job_id, |job| {
                        job.finish(OUTPUT_PARSE_FAILURE_STATUS, &message)
                    })
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        match finished.result() {
            Some(result) if result.is_success() => self.metrics.job_succeeded(),
            _ => self.metrics.job_failed(),
        }
        info!(job_id, exit_status, "Job finished");
        Ok(finished)
    }

    /// Build and run. Infrastructure failures become a synthetic exit status
    /// with the error text as output, so the job still reaches `Finished`.
    async fn execute(&self, job: &Job, image: &str) -> (i64, String) {
        let archive = match self.archives.read(job.archive_id()).await {
            Ok(archive) => archive,
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "Archive unavailable");
                return (INFRA_FAILURE_STATUS, format!("archive unavailable: {e}"));
            }
        };

        if let Err(e) = self.runner.build(archive, image).await {
            warn!(job_id = %job.id(), image, error = %e, "Image build failed");
            return (INFRA_FAILURE_STATUS, e.to_string());
        }

        let result = self.runner.run(image, job.input()).await;

        if self.cleanup_images
            && let Err(e) = self.runner.cleanup(image).await
        {
            warn!(image, error = %e, "Image cleanup failed");
        }

        match result {
            Ok(output) => (output.exit_status, output.output),
            Err(e) => {
                warn!(job_id = %job.id(), image, error = %e, "Sandbox failed");
                (INFRA_FAILURE_STATUS, e.to_string())
            }
        }
    }
}

#[async_trait]
impl<R: JobRepository + 'static> JobHandler for RunJobHandler<R> {
    async fn handle(&self, job_id: &str, cancel: CancellationToken) -> Result<(), HandlerError> {
        match self.run_job(job_id, cancel).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => Err(HandlerError::Retryable(e.to_string())),
            Err(e) => {
                error!(job_id, error = %e, "Job run rejected");
                Err(HandlerError::Fatal(e.to_string()))
            }
        }
    }
}
