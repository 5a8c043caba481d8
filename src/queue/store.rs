use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message not found: seq={0}")]
    MessageNotFound(u64),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A message waiting for acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Failed delivery attempts so far
    pub attempts: u32,
    pub enqueued_at_ms: u64,
}

/// A message that exhausted its delivery attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message: QueuedMessage,
    pub reason: String,
    pub failed_at_ms: u64,
}

/// FjallQueue persists published messages until they are acknowledged
///
/// Architecture:
/// - `messages` partition: u64 (big-endian) → QueuedMessage (JSON)
/// - `metadata` partition: "next_seq" → u64 (atomic counter)
/// - `dlq` partition: u64 (big-endian) → DeadLetter (JSON)
///
/// A message is written here before any subscriber sees it and stays until
/// it is acked or dead-lettered, so whatever is left after a crash is exactly
/// the set of messages that still need a delivery.
pub struct FjallQueue {
    keyspace: Keyspace,
    messages: PartitionHandle,
    metadata: PartitionHandle,
    dlq: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a new FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| decode_seq(&bytes))
            .unwrap_or(0);

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            messages,
            metadata,
            dlq,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Persist a message and return its sequence number
    ///
    /// The message and the advanced counter are committed in one batch.
    pub fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let message = QueuedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            attempts: 0,
            enqueued_at_ms: now_ms(),
        };
        let value = serde_json::to_vec(&message)?;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.messages, seq.to_be_bytes(), value);
        batch.insert(&self.metadata, b"next_seq", (seq + 1).to_be_bytes());
        batch.commit()?;

        debug!(seq, topic, size = payload.len(), "Message enqueued");

        Ok(seq)
    }

    /// Retrieve an unacknowledged message by sequence number
    pub fn get(&self, seq: u64) -> Result<Option<QueuedMessage>> {
        match self.messages.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Drop a delivered message. Acking an unknown sequence is a no-op.
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.messages.remove(seq.to_be_bytes())?;
        debug!(seq, "Message acked");
        Ok(())
    }

    /// Count one failed delivery and return the new total
    pub fn record_attempt(&self, seq: u64) -> Result<u32> {
        let mut message = self.get(seq)?.ok_or(QueueError::MessageNotFound(seq))?;
        message.attempts += 1;
        self.messages
            .insert(seq.to_be_bytes(), serde_json::to_vec(&message)?)?;
        Ok(message.attempts)
    }

    /// Move a message to the Dead Letter Queue (DLQ)
    ///
    /// Called when a message exhausts its delivery attempts.
    pub fn move_to_dlq(&self, seq: u64, reason: &str) -> Result<()> {
        let message = self.get(seq)?.ok_or(QueueError::MessageNotFound(seq))?;
        let attempts = message.attempts;

        let entry = DeadLetter {
            message,
            reason: reason.to_string(),
            failed_at_ms: now_ms(),
        };

        let mut batch = self.keyspace.batch();
        batch.insert(&self.dlq, seq.to_be_bytes(), serde_json::to_vec(&entry)?);
        batch.remove(&self.messages, seq.to_be_bytes());
        batch.commit()?;

        info!(seq, attempts, "Message moved to DLQ");

        Ok(())
    }

    /// Get a message from the DLQ by sequence number
    pub fn get_dlq(&self, seq: u64) -> Result<Option<DeadLetter>> {
        match self.dlq.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List DLQ entries (for debugging/inspection)
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetter)>> {
        let mut results = Vec::new();

        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            results.push((decode_seq(&key), serde_json::from_slice(&value)?));
        }

        Ok(results)
    }

    /// Unacknowledged messages of `topic`, oldest first
    pub fn pending(&self, topic: &str) -> Result<Vec<(u64, QueuedMessage)>> {
        let mut results = Vec::new();

        for item in self.messages.iter() {
            let (key, value) = item?;
            let message: QueuedMessage = serde_json::from_slice(&value)?;
            if message.topic == topic {
                results.push((decode_seq(&key), message));
            }
        }

        Ok(results)
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify database is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"next_seq")?;
        Ok(())
    }
}

fn decode_seq(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().unwrap_or([0u8; 8]))
}

/// Get current Unix timestamp in milliseconds
fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
