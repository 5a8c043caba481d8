use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::dispatch::JobPublisher;
use crate::ledger::{BlueprintRepository, JobRepository, LedgerError};
use crate::messaging::MessagingError;
use crate::model::{InvalidInput, Job};
use crate::observability::Metrics;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Missing, soft-deleted, or private to someone else
    #[error("blueprint not found: {0}")]
    BlueprintNotFound(String),

    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to dispatch job: {0}")]
    Dispatch(#[from] MessagingError),
}

/// Creates pending jobs and hands their IDs to dispatch
pub struct JobSubmitter<S> {
    store: Arc<S>,
    publisher: JobPublisher,
    metrics: Arc<Metrics>,
}

impl<S> JobSubmitter<S>
where
    S: JobRepository + BlueprintRepository,
{
    pub fn new(store: Arc<S>, publisher: JobPublisher, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            publisher,
            metrics,
        }
    }

    /// Assemble a job from raw positional input, persist it, then publish
    /// its ID. The job is durable before any consumer can see the ID.
    pub async fn submit<T: AsRef<str>>(
        &self,
        requester_id: &str,
        blueprint_id: &str,
        raw_input: &[T],
    ) -> Result<Job, SubmitError> {
        let blueprint = self
            .store
            .blueprint(blueprint_id)
            .await?
            .filter(|blueprint| blueprint.is_available_for(requester_id))
            .ok_or_else(|| SubmitError::BlueprintNotFound(blueprint_id.to_string()))?;

        let input = blueprint.typed_input(raw_input)?;
        let job = blueprint.assemble_job(requester_id, input)?;

        self.store.save_job(&job).await?;
        self.publisher.publish(job.id()).await?;
        self.metrics.job_submitted();

        info!(
            job_id = %job.id(),
            blueprint_id,
            owner_id = requester_id,
            "Job submitted"
        );
        Ok(job)
    }
}
