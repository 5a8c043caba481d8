//! Message streaming abstraction
//!
//! Substrate-agnostic publish/subscribe contract with at-least-once delivery.
//! Every [`Delivery`] must be settled with [`Delivery::ack`] or
//! [`Delivery::nack`]; a delivery dropped unsettled is nacked on its way out.
//! The in-process implementation lives in [`crate::queue`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Settle failed for seq={seq}: {reason}")]
    SettleFailed { seq: u64, reason: String },
}

pub type Result<T> = std::result::Result<T, MessagingError>;

/// Message producer
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish message to topic, returning its sequence number
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<u64>;

    /// Health check
    async fn health(&self) -> bool;
}

/// Message consumer
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// Settlement callback for a delivery, implemented by the substrate
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, seq: u64) -> Result<()>;

    async fn nack(&self, seq: u64, reason: &str) -> Result<()>;

    /// Take back an unsettled delivery as is, without counting an attempt.
    /// The message becomes eligible for replay to the next subscriber.
    fn release(&self, seq: u64);
}

/// One delivery of a published message
pub struct Delivery {
    seq: u64,
    topic: String,
    payload: Vec<u8>,
    attempt: u32,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(
        seq: u64,
        topic: impl Into<String>,
        payload: Vec<u8>,
        attempt: u32,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            seq,
            topic: topic.into(),
            payload,
            attempt,
            acker: Some(acker),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 1 for the first delivery, incremented after every nack
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub async fn ack(mut self) -> Result<()> {
        match self.acker.take() {
            Some(acker) => acker.ack(self.seq).await,
            None => Ok(()),
        }
    }

    pub async fn nack(mut self, reason: &str) -> Result<()> {
        match self.acker.take() {
            Some(acker) => acker.nack(self.seq, reason).await,
            None => Ok(()),
        }
    }

    /// Give up the delivery without settling it. The message stays with the
    /// substrate and is handed out again on the next replay.
    pub(crate) fn disarm(mut self) {
        if let Some(acker) = self.acker.take() {
            acker.release(self.seq);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("seq", &self.seq)
            .field("topic", &self.topic)
            .field("size", &self.payload.len())
            .field("attempt", &self.attempt)
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let Some(acker) = self.acker.take() else {
            return;
        };
        let seq = self.seq;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = acker.nack(seq, "dropped without settlement").await {
                        tracing::warn!(seq, error = %err, "Failed to nack dropped delivery");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(seq, "Delivery dropped outside runtime; left for replay");
            }
        }
    }
}

/// Stream of deliveries for one topic
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::Receiver<Delivery>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next delivery, or `None` once the substrate has shut down
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Stop accepting deliveries; buffered ones can still be drained
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Acknowledger for Recorder {
        async fn ack(&self, seq: u64) -> Result<()> {
            self.events.lock().unwrap().push(format!("ack:{seq}"));
            Ok(())
        }

        async fn nack(&self, seq: u64, reason: &str) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("nack:{seq}:{reason}"));
            Ok(())
        }

        fn release(&self, seq: u64) {
            self.events.lock().unwrap().push(format!("release:{seq}"));
        }
    }

    #[tokio::test]
    async fn test_ack_and_nack_settle_once() {
        let recorder = Arc::new(Recorder::default());

        Delivery::new(1, "t", b"a".to_vec(), 1, recorder.clone())
            .ack()
            .await
            .unwrap();
        Delivery::new(2, "t", b"b".to_vec(), 1, recorder.clone())
            .nack("boom")
            .await
            .unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["ack:1", "nack:2:boom"]);
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_nacked() {
        let recorder = Arc::new(Recorder::default());
        drop(Delivery::new(7, "t", vec![], 1, recorder.clone()));

        for _ in 0..50 {
            if !recorder.events.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["nack:7:dropped without settlement"]);
    }

    #[tokio::test]
    async fn test_disarm_releases_without_settling() {
        let recorder = Arc::new(Recorder::default());
        Delivery::new(9, "t", vec![], 1, recorder.clone()).disarm();
        tokio::task::yield_now().await;

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["release:9"]);
    }
}
