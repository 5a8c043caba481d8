//! Job dispatch over the message substrate
//!
//! Only job IDs travel through the topic. Consumers always re-read the job
//! from the ledger, so a stale message can never carry stale state.

pub mod listener;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::messaging::{MessagingError, Publisher};

pub use listener::JobListener;

/// Topic carrying IDs of freshly created jobs
pub const JOBS_TOPIC: &str = "jobs.pending";

/// Handler errors decide how the delivery is settled
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Nacked; the message comes back after the redelivery backoff
    #[error("retryable handler error: {0}")]
    Retryable(String),
    /// Acked and logged; redelivery would fail the same way
    #[error("fatal handler error: {0}")]
    Fatal(String),
}

/// Callback invoked once per delivered job ID
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_id: &str, cancel: CancellationToken) -> Result<(), HandlerError>;
}

/// Publishes job IDs on [`JOBS_TOPIC`]
#[derive(Clone)]
pub struct JobPublisher {
    publisher: Arc<dyn Publisher>,
}

impl JobPublisher {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    pub async fn publish(&self, job_id: &str) -> Result<u64, MessagingError> {
        let seq = self
            .publisher
            .publish(JOBS_TOPIC, job_id.as_bytes().to_vec())
            .await?;
        debug!(job_id, seq, topic = JOBS_TOPIC, "Job published");
        Ok(seq)
    }

    pub async fn health(&self) -> bool {
        self.publisher.health().await
    }
}
