use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{HandlerError, JOBS_TOPIC, JobHandler};
use crate::messaging::{Delivery, MessagingError, Subscriber};

/// Long-lived consumer of [`JOBS_TOPIC`]
///
/// Each delivery runs in its own task, at most `max_inflight` at a time. The
/// handler itself runs in a nested task so a panic is observed as a
/// `JoinError` and turned into a nack instead of losing the message.
pub struct JobListener {
    subscriber: Arc<dyn Subscriber>,
    max_inflight: usize,
}

impl JobListener {
    pub fn new(subscriber: Arc<dyn Subscriber>, max_inflight: usize) -> Self {
        Self {
            subscriber,
            max_inflight: max_inflight.max(1),
        }
    }

    /// Consume until `cancel` fires, then drain in-flight handlers.
    ///
    /// Handlers receive a child of `cancel`, so shutdown also reaches work
    /// that is still executing.
    pub async fn run<H>(&self, cancel: CancellationToken, handler: Arc<H>) -> Result<(), MessagingError>
    where
        H: JobHandler + 'static,
    {
        let mut subscription = self.subscriber.subscribe(JOBS_TOPIC).await?;
        let semaphore = Arc::new(Semaphore::new(self.max_inflight));
        let mut tasks = JoinSet::new();

        info!(
            topic = JOBS_TOPIC,
            max_inflight = self.max_inflight,
            "Job listener started"
        );

        loop {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Delivery task aborted");
                }
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = subscription.next() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        warn!(topic = JOBS_TOPIC, "Subscription closed by substrate");
                        break;
                    }
                },
            };

            tasks.spawn(process(
                delivery,
                handler.clone(),
                cancel.child_token(),
                permit,
            ));
        }

        // Buffered deliveries never reached a handler; leave them for replay
        // without spending one of their attempts.
        subscription.close();
        let mut returned = 0usize;
        while let Some(delivery) = subscription.next().await {
            delivery.disarm();
            returned += 1;
        }

        info!(
            in_flight = tasks.len(),
            returned, "Job listener stopping, draining in-flight jobs"
        );

        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Delivery task aborted");
            }
        }

        info!(topic = JOBS_TOPIC, "Job listener stopped");
        Ok(())
    }
}

async fn process<H>(
    delivery: Delivery,
    handler: Arc<H>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) where
    H: JobHandler + 'static,
{
    let seq = delivery.seq();
    let attempt = delivery.attempt();

    let job_id = match std::str::from_utf8(delivery.payload()) {
        Ok(job_id) => job_id.to_string(),
        Err(e) => {
            error!(seq, error = %e, "Discarding delivery with non UTF-8 job id");
            settle_ack(delivery).await;
            return;
        }
    };

    debug!(seq, job_id, attempt, "Handling delivery");

    let outcome = {
        let job_id = job_id.clone();
        tokio::spawn(async move { handler.handle(&job_id, cancel).await }).await
    };

    match outcome {
        Ok(Ok(())) => {
            debug!(seq, job_id, "Delivery handled");
            settle_ack(delivery).await;
        }
        Ok(Err(HandlerError::Fatal(reason))) => {
            error!(seq, job_id, attempt, reason, "Job handler failed permanently");
            settle_ack(delivery).await;
        }
        Ok(Err(HandlerError::Retryable(reason))) => {
            warn!(seq, job_id, attempt, reason, "Job handler failed, will retry");
            settle_nack(delivery, &reason).await;
        }
        Err(e) => {
            error!(seq, job_id, attempt, error = %e, "Job handler panicked");
            settle_nack(delivery, "handler panicked").await;
        }
    }
}

async fn settle_ack(delivery: Delivery) {
    let seq = delivery.seq();
    if let Err(e) = delivery.ack().await {
        warn!(seq, error = %e, "Failed to ack delivery");
    }
}

async fn settle_nack(delivery: Delivery, reason: &str) {
    let seq = delivery.seq();
    if let Err(e) = delivery.nack(reason).await {
        warn!(seq, error = %e, "Failed to nack delivery");
    }
}
