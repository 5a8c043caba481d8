use crate::messaging::{
    Acknowledger, Delivery, MessagingError, Publisher, Subscriber, Subscription,
};
use crate::observability::Metrics;
use crate::queue::store::{FjallQueue, QueuedMessage};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Delivery policy for the broker
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Bounded capacity of every subscriber channel
    pub channel_size: usize,
    /// Deliveries before a message is dead-lettered
    pub max_delivery_attempts: u32,
    /// Delay before a nacked message is handed out again
    pub redelivery_backoff: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            channel_size: 100,
            max_delivery_attempts: 5,
            redelivery_backoff: Duration::from_millis(1000),
        }
    }
}

/// Broker distributes persisted messages to in-process subscribers
///
/// Architecture:
/// 1. Publisher calls `broker.publish(topic, payload)`
/// 2. Broker persists the message to FjallQueue (atomic, get seq)
/// 3. Broker sends a Delivery to one subscriber of the topic (round-robin)
/// 4. Backpressure via bounded channels (default: 100 per subscriber)
/// 5. The subscriber acks (message removed) or nacks (redelivered after a
///    backoff, dead-lettered once attempts run out)
///
/// A message is "claimed" while a subscriber holds it. `subscribe` replays
/// every unclaimed message of its topic still in the queue, which is how
/// messages left behind by a crash or handed back by a stopping subscriber
/// get delivered again.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    queue: Arc<FjallQueue>,
    settings: BrokerSettings,
    metrics: Arc<Metrics>,
    topics: Mutex<HashMap<String, TopicChannels>>,
    claimed: Mutex<HashSet<u64>>,
}

#[derive(Default)]
struct TopicChannels {
    senders: Vec<mpsc::Sender<Delivery>>,
    next: usize,
}

impl TopicChannels {
    fn next_sender(&mut self) -> Option<mpsc::Sender<Delivery>> {
        self.senders.retain(|sender| !sender.is_closed());
        if self.senders.is_empty() {
            return None;
        }
        let idx = self.next % self.senders.len();
        self.next = self.next.wrapping_add(1);
        Some(self.senders[idx].clone())
    }
}

/// Settles deliveries back into the broker that produced them
struct BrokerAcker(Arc<BrokerInner>);

impl Broker {
    pub fn new(queue: Arc<FjallQueue>, settings: BrokerSettings, metrics: Arc<Metrics>) -> Self {
        info!(
            channel_size = settings.channel_size,
            max_delivery_attempts = settings.max_delivery_attempts,
            "Creating Broker"
        );

        Self {
            inner: Arc::new(BrokerInner {
                queue,
                settings,
                metrics,
                topics: Mutex::new(HashMap::new()),
                claimed: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn queue(&self) -> &Arc<FjallQueue> {
        &self.inner.queue
    }

    /// Number of live subscribers for `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock_topics()
            .get(topic)
            .map(|channels| channels.senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl BrokerInner {
    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, TopicChannels>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, seq: u64) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seq)
    }

    fn release(&self, seq: u64) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&seq);
    }

    /// Hand a claimed message to a live subscriber of its topic. With no
    /// subscriber left the claim is dropped and the message waits for replay.
    async fn deliver(self: &Arc<Self>, seq: u64, message: QueuedMessage) {
        let topic = message.topic.clone();
        let acker: Arc<dyn Acknowledger> = Arc::new(BrokerAcker(self.clone()));
        let mut delivery = Delivery::new(
            seq,
            message.topic,
            message.payload,
            message.attempts + 1,
            acker,
        );

        loop {
            let sender = {
                let mut topics = self.lock_topics();
                match topics.get_mut(&topic).and_then(TopicChannels::next_sender) {
                    Some(sender) => sender,
                    None => {
                        // Released under the topics lock so a concurrent
                        // subscribe either sees the claim gone or was seen here.
                        delivery.disarm();
                        debug!(seq, topic, "No live subscriber, message left for replay");
                        return;
                    }
                }
            };

            match sender.send(delivery).await {
                Ok(()) => {
                    debug!(seq, topic, "Message delivered");
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    debug!(seq, topic, "Subscriber channel closed, trying next");
                    delivery = returned;
                }
            }
        }
    }
}

#[async_trait]
impl Publisher for Broker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<u64, MessagingError> {
        let seq = self
            .inner
            .queue
            .enqueue(topic, &payload)
            .map_err(|e| MessagingError::PublishFailed(e.to_string()))?;

        debug!(seq, topic, "Message persisted to queue");

        self.inner.claim(seq);
        let message = match self.inner.queue.get(seq) {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.inner.release(seq);
                return Err(MessagingError::PublishFailed(format!("seq={seq} vanished")));
            }
            Err(e) => {
                self.inner.release(seq);
                return Err(MessagingError::PublishFailed(e.to_string()));
            }
        };
        self.inner.deliver(seq, message).await;

        Ok(seq)
    }

    async fn health(&self) -> bool {
        self.inner.queue.health_check().is_ok()
    }
}

#[async_trait]
impl Subscriber for Broker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, MessagingError> {
        let (tx, rx) = mpsc::channel(self.inner.settings.channel_size);
        {
            let mut topics = self.inner.lock_topics();
            topics.entry(topic.to_string()).or_default().senders.push(tx);
        }

        let pending = self
            .inner
            .queue
            .pending(topic)
            .map_err(|e| MessagingError::SubscribeFailed(e.to_string()))?;

        let replay: Vec<(u64, QueuedMessage)> = pending
            .into_iter()
            .filter(|(seq, _)| self.inner.claim(*seq))
            .collect();

        info!(topic, replayed = replay.len(), "Subscriber registered");

        if !replay.is_empty() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                for (seq, message) in replay {
                    inner.deliver(seq, message).await;
                }
            });
        }

        Ok(Subscription::new(topic, rx))
    }
}

#[async_trait]
impl Acknowledger for BrokerAcker {
    async fn ack(&self, seq: u64) -> Result<(), MessagingError> {
        let result = self.0.queue.ack(seq);
        self.0.release(seq);
        result.map_err(|e| MessagingError::SettleFailed {
            seq,
            reason: e.to_string(),
        })
    }

    fn release(&self, seq: u64) {
        self.0.release(seq);
        debug!(seq, "Delivery returned unsettled");
    }

    async fn nack(&self, seq: u64, reason: &str) -> Result<(), MessagingError> {
        let inner = &self.0;
        let settle_failed = |e: crate::queue::store::QueueError| MessagingError::SettleFailed {
            seq,
            reason: e.to_string(),
        };

        let attempts = match inner.queue.record_attempt(seq) {
            Ok(attempts) => attempts,
            Err(e) => {
                inner.release(seq);
                return Err(settle_failed(e));
            }
        };

        if attempts >= inner.settings.max_delivery_attempts {
            let result = inner.queue.move_to_dlq(seq, reason);
            inner.release(seq);
            inner.metrics.delivery_dead_lettered();
            error!(seq, attempts, reason, "Message dead-lettered");
            return result.map_err(settle_failed);
        }

        inner.metrics.delivery_retried();
        warn!(seq, attempts, reason, "Message nacked, scheduling redelivery");

        let inner = inner.clone();
        let backoff = inner.settings.redelivery_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            match inner.queue.get(seq) {
                Ok(Some(message)) => inner.deliver(seq, message).await,
                Ok(None) => inner.release(seq),
                Err(e) => {
                    inner.release(seq);
                    warn!(seq, error = %e, "Failed to reload message for redelivery");
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_broker(temp_dir: &TempDir, max_attempts: u32) -> Broker {
        let queue = Arc::new(FjallQueue::open(temp_dir.path()).unwrap());
        let settings = BrokerSettings {
            channel_size: 10,
            max_delivery_attempts: max_attempts,
            redelivery_backoff: Duration::from_millis(10),
        };
        Broker::new(queue, settings, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_publish_and_ack() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 3);
        let mut subscription = broker.subscribe("jobs").await.unwrap();

        let seq = broker.publish("jobs", b"job1".to_vec()).await.unwrap();
        assert_eq!(seq, 0);

        let delivery = subscription.next().await.unwrap();
        assert_eq!(delivery.seq(), 0);
        assert_eq!(delivery.payload(), b"job1");
        assert_eq!(delivery.attempt(), 1);

        delivery.ack().await.unwrap();
        assert!(broker.queue().get(seq).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_robin_distribution() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 3);
        let mut subs = vec![
            broker.subscribe("jobs").await.unwrap(),
            broker.subscribe("jobs").await.unwrap(),
            broker.subscribe("jobs").await.unwrap(),
        ];
        assert_eq!(broker.subscriber_count("jobs"), 3);

        for i in 0..6 {
            broker
                .publish("jobs", format!("job{i}").into_bytes())
                .await
                .unwrap();
        }

        // Subscriber 0 gets 0, 3; subscriber 1 gets 1, 4; subscriber 2 gets 2, 5
        for (idx, sub) in subs.iter_mut().enumerate() {
            let first = sub.next().await.unwrap();
            let second = sub.next().await.unwrap();
            assert_eq!(first.seq(), idx as u64);
            assert_eq!(second.seq(), (idx + 3) as u64);
            first.ack().await.unwrap();
            second.ack().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 3);
        let mut a = broker.subscribe("a").await.unwrap();

        broker.publish("b", b"other".to_vec()).await.unwrap();
        broker.publish("a", b"mine".to_vec()).await.unwrap();

        let delivery = a.next().await.unwrap();
        assert_eq!(delivery.payload(), b"mine");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_next_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 3);
        let mut subscription = broker.subscribe("jobs").await.unwrap();

        broker.publish("jobs", b"job1".to_vec()).await.unwrap();

        let first = subscription.next().await.unwrap();
        assert_eq!(first.attempt(), 1);
        first.nack("transient").await.unwrap();

        let second = subscription.next().await.unwrap();
        assert_eq!(second.seq(), 0);
        assert_eq!(second.attempt(), 2);
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dead_lettered() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 2);
        let mut subscription = broker.subscribe("jobs").await.unwrap();

        let seq = broker.publish("jobs", b"poison".to_vec()).await.unwrap();

        subscription.next().await.unwrap().nack("one").await.unwrap();
        subscription.next().await.unwrap().nack("two").await.unwrap();

        assert!(broker.queue().get(seq).unwrap().is_none());
        let entry = broker.queue().get_dlq(seq).unwrap().unwrap();
        assert_eq!(entry.reason, "two");
        assert_eq!(entry.message.attempts, 2);
    }

    #[tokio::test]
    async fn test_persistence_before_distribution() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 3);

        // No subscriber yet: message must stay in the queue
        let seq = broker.publish("jobs", b"job1".to_vec()).await.unwrap();
        assert!(broker.queue().get(seq).unwrap().is_some());

        // A late subscriber gets it through replay
        let mut subscription = broker.subscribe("jobs").await.unwrap();
        let delivery = subscription.next().await.unwrap();
        assert_eq!(delivery.seq(), seq);
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_replay_after_restart() {
        let temp_dir = TempDir::new().unwrap();

        {
            let broker = create_test_broker(&temp_dir, 3);
            let mut subscription = broker.subscribe("jobs").await.unwrap();
            broker.publish("jobs", b"job1".to_vec()).await.unwrap();
            let delivery = subscription.next().await.unwrap();
            // Simulate a crash: the delivery is never settled
            delivery.disarm();
            broker.queue().flush().unwrap();
        }

        let broker = create_test_broker(&temp_dir, 3);
        let mut subscription = broker.subscribe("jobs").await.unwrap();
        let delivery = subscription.next().await.unwrap();
        assert_eq!(delivery.payload(), b"job1");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_disarmed_delivery_is_replayed_to_next_subscriber() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 3);
        let mut first = broker.subscribe("jobs").await.unwrap();
        let seq = broker.publish("jobs", b"job1".to_vec()).await.unwrap();

        first.close();
        first.next().await.unwrap().disarm();

        let mut second = broker.subscribe("jobs").await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(1), second.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.seq(), seq);
        // Returned unsettled, so no attempt was spent
        assert_eq!(delivery.attempt(), 1);
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_claimed_message_is_not_replayed_to_second_subscriber() {
        let temp_dir = TempDir::new().unwrap();
        let broker = create_test_broker(&temp_dir, 3);
        let mut first = broker.subscribe("jobs").await.unwrap();
        broker.publish("jobs", b"job1".to_vec()).await.unwrap();
        let held = first.next().await.unwrap();

        let mut second = broker.subscribe("jobs").await.unwrap();
        let nothing = tokio::time::timeout(Duration::from_millis(50), second.next()).await;
        assert!(nothing.is_err());

        held.ack().await.unwrap();
    }
}
