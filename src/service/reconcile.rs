//! Lease expiry for jobs abandoned in `Running`.
//!
//! A worker that dies mid-run leaves its job `Running` forever; its message
//! was already settled or will be rejected on redelivery. The sweeper closes
//! such jobs through the ordinary `Running → Finished` edge.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::INFRA_FAILURE_STATUS;
use crate::ledger::{FjallStore, JobRepository, LedgerError};
use crate::model::JobError;
use crate::observability::Metrics;

const LAST_SWEEP_KEY: &str = "last_sweep_at";

pub struct Sweeper {
    store: Arc<FjallStore>,
    stuck_after: Duration,
    interval: Duration,
    metrics: Arc<Metrics>,
}

impl Sweeper {
    pub fn new(
        store: Arc<FjallStore>,
        stuck_after: Duration,
        interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            stuck_after,
            interval,
            metrics,
        }
    }

    /// Finish every job running longer than `stuck_after`. Returns how many
    /// were expired.
    pub async fn sweep_once(&self) -> Result<usize, LedgerError> {
        let stuck_after = chrono::Duration::from_std(self.stuck_after)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(stuck_after)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let message = format!(
            "lease expired: job still running after {}s",
            self.stuck_after.as_secs()
        );

        let mut expired = 0;
        for job in self.store.running_since(cutoff)? {
            match self
                .store
                .update_job(job.id(), |job| job.finish(INFRA_FAILURE_STATUS, &message))
                .await
            {
                Ok(_) => {
                    expired += 1;
                    self.metrics.job_failed();
                    warn!(job_id = %job.id(), "Expired stuck job");
                }
                // Finished by its worker between the scan and the update
                Err(LedgerError::Rejected(JobError::InvalidStateChange { .. })) => {
                    debug!(job_id = %job.id(), "Job finished before expiry");
                }
                Err(e) => return Err(e),
            }
        }

        self.store.set_meta(LAST_SWEEP_KEY, &Utc::now().to_rfc3339())?;
        Ok(expired)
    }

    /// Sweep every `interval` until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            stuck_after_secs = self.stuck_after.as_secs(),
            "Sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "Sweep expired stuck jobs"),
                        Err(e) => warn!(error = %e, "Sweep failed"),
                    }
                }
            }
        }

        info!("Sweeper stopped");
    }
}
