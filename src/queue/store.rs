use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Dead letter encode error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message not found: {queue}#{seq}")]
    MessageNotFound { queue: String, seq: u64 },

    #[error("Invalid message key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A message that was rejected by its consumer and parked for inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub queue: String,
    pub seq: u64,
    pub payload: Vec<u8>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// FjallQueue persists broker messages until they are acknowledged
///
/// Layout:
/// - `messages` partition: `{queue}:{seq:020}` → raw payload
/// - `metadata` partition: `next_seq` → u64 (big-endian)
/// - `dead_letters` partition: `{queue}:{seq:020}` → DeadLetter (JSON)
///
/// Sequence numbers are global across queues, so a `(queue, seq)` pair is
/// unique for the lifetime of the store, including across reopens.
pub struct FjallQueue {
    keyspace: Keyspace,
    messages: PartitionHandle,
    metadata: PartitionHandle,
    dead_letters: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let dead_letters =
            keyspace.open_partition("dead_letters", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(current_seq, "FjallQueue opened");

        Ok(Self {
            keyspace,
            messages,
            metadata,
            dead_letters,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Persist a message for `queue` and return its sequence number
    ///
    /// The message and the advanced counter are written in one batch, so a
    /// crash never leaves a message behind a stale counter.
    pub fn enqueue(&self, queue: &str, payload: &[u8]) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let mut batch = self.keyspace.batch();
        batch.insert(&self.messages, encode_message_key(queue, seq), payload);
        batch.insert(&self.metadata, "next_seq", (seq + 1).to_be_bytes().to_vec());
        batch.commit()?;

        debug!(queue, seq, size = payload.len(), "Message persisted");

        Ok(seq)
    }

    /// Retrieve a persisted message by queue and sequence number
    pub fn get(&self, queue: &str, seq: u64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .messages
            .get(encode_message_key(queue, seq))?
            .map(|bytes| bytes.to_vec()))
    }

    /// Drop an acknowledged message
    pub fn ack(&self, queue: &str, seq: u64) -> Result<()> {
        self.messages.remove(encode_message_key(queue, seq))?;
        debug!(queue, seq, "Message acknowledged");
        Ok(())
    }

    /// All unacknowledged messages of `queue`, oldest first
    pub fn pending(&self, queue: &str) -> Result<Vec<(u64, Vec<u8>)>> {
        let mut results = Vec::new();

        for item in self.messages.prefix(encode_queue_prefix(queue)) {
            let (key, value) = item?;
            let seq = decode_message_seq(&key)?;
            results.push((seq, value.to_vec()));
        }

        Ok(results)
    }

    /// Number of unacknowledged messages in `queue`
    pub fn depth(&self, queue: &str) -> Result<usize> {
        let mut count = 0;
        for item in self.messages.prefix(encode_queue_prefix(queue)) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Move a message to the dead letter partition
    ///
    /// Called for payloads that can never be processed (undecodable, rejected
    /// without requeue).
    pub fn move_to_dead_letter(&self, queue: &str, seq: u64, reason: String) -> Result<()> {
        let key = encode_message_key(queue, seq);
        let payload = self
            .messages
            .get(&key)?
            .ok_or_else(|| QueueError::MessageNotFound {
                queue: queue.to_string(),
                seq,
            })?;

        let entry = DeadLetter {
            queue: queue.to_string(),
            seq,
            payload: payload.to_vec(),
            reason,
            failed_at: Utc::now(),
        };

        let mut batch = self.keyspace.batch();
        batch.insert(&self.dead_letters, key.clone(), serde_json::to_vec(&entry)?);
        batch.remove(&self.messages, key);
        batch.commit()?;

        info!(queue, seq, reason = %entry.reason, "Message moved to dead letters");

        Ok(())
    }

    /// List dead letters of `queue` (for debugging/inspection)
    pub fn dead_letters(&self, queue: &str, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut results = Vec::new();

        for item in self.dead_letters.prefix(encode_queue_prefix(queue)).take(limit) {
            let (_, value) = item?;
            results.push(serde_json::from_slice(&value)?);
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

fn encode_queue_prefix(queue: &str) -> Vec<u8> {
    format!("{}:", queue).into_bytes()
}

fn encode_message_key(queue: &str, seq: u64) -> Vec<u8> {
    format!("{}:{:020}", queue, seq).into_bytes()
}

fn decode_message_seq(key: &[u8]) -> Result<u64> {
    let invalid = || QueueError::InvalidKey(String::from_utf8_lossy(key).into_owned());
    let key = std::str::from_utf8(key).map_err(|_| invalid())?;
    let (_, seq) = key.rsplit_once(':').ok_or_else(invalid)?;
    seq.parse().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_enqueue_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue("input", b"hello").unwrap();
        assert_eq!(seq, 0);

        let retrieved = queue.get("input", seq).unwrap().unwrap();
        assert_eq!(retrieved, b"hello");
        assert!(queue.get("success", seq).unwrap().is_none());
    }

    #[test]
    fn test_sequence_is_shared_across_queues() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        assert_eq!(queue.enqueue("input", b"a").unwrap(), 0);
        assert_eq!(queue.enqueue("success", b"b").unwrap(), 1);
        assert_eq!(queue.enqueue("input", b"c").unwrap(), 2);

        let pending: Vec<u64> = queue.pending("input").unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(pending, vec![0, 2]);
        assert_eq!(queue.depth("success").unwrap(), 1);
    }

    #[test]
    fn test_ack_removes_message() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue("input", b"payload").unwrap();
        queue.ack("input", seq).unwrap();

        assert!(queue.get("input", seq).unwrap().is_none());
        assert_eq!(queue.depth("input").unwrap(), 0);
    }

    #[test]
    fn test_move_to_dead_letter() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue("error", b"garbage").unwrap();
        queue
            .move_to_dead_letter("error", seq, "decode failed".to_string())
            .unwrap();

        assert_eq!(queue.depth("error").unwrap(), 0);
        let letters = queue.dead_letters("error", 10).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].seq, seq);
        assert_eq!(letters[0].payload, b"garbage");
        assert_eq!(letters[0].reason, "decode failed");
    }

    #[test]
    fn test_dead_letter_missing_message() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let result = queue.move_to_dead_letter("input", 42, "nope".to_string());
        assert!(matches!(result, Err(QueueError::MessageNotFound { seq: 42, .. })));
    }

    #[test]
    fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();

        {
            let queue = FjallQueue::open(temp_dir.path()).unwrap();
            queue.enqueue("input", b"first").unwrap();
            queue.flush().unwrap();
        }

        let queue = FjallQueue::open(temp_dir.path()).unwrap();
        assert_eq!(queue.current_seq(), 1);

        let seq = queue.enqueue("input", b"second").unwrap();
        assert_eq!(seq, 1);

        let pending = queue.pending("input").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].1, b"first");
    }

    #[test]
    fn test_decode_message_seq() {
        assert_eq!(decode_message_seq(b"input:00000000000000000042").unwrap(), 42);
        assert!(decode_message_seq(b"no-separator").is_err());
    }
}
