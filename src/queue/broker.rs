use crate::queue::store::{DeadLetter, FjallQueue, QueueError};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("prefetch count must be at least 1")]
    InvalidPrefetch,

    #[error("queue store error: {0}")]
    Store(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Clone, Debug)]
struct Envelope {
    seq: u64,
    payload: Bytes,
    redelivered: bool,
    abandoned: u32,
}

struct QueueState {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

struct BrokerInner {
    store: Arc<FjallQueue>,
    queues: HashMap<String, QueueState>,
    shutdown: CancellationToken,
}

/// Broker routes messages between the front-end and download workers
///
/// Architecture:
/// 1. `publish(queue, payload)` persists the message to FjallQueue (get seq)
/// 2. The envelope is pushed onto the queue's in-memory channel
/// 3. Consumers opened from a [`Channel`] compete for envelopes
/// 4. A [`Delivery`] stays in the store until it is acked; nacked or dropped
///    deliveries go back to the queue with `redelivered = true`
///
/// Admission control lives on the channel: `set_qos(n)` caps the number of
/// unacknowledged deliveries a channel may hold, so excess messages stay
/// queued instead of piling onto a busy worker.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Declare `queues` on top of `store` and recover unacknowledged messages
    ///
    /// Every message still present in the store was never acked, so it is
    /// handed out again flagged as a redelivery.
    pub fn open(store: Arc<FjallQueue>, queues: &[&str]) -> Result<Self> {
        let mut declared = HashMap::with_capacity(queues.len());

        for &name in queues {
            let (tx, rx) = mpsc::unbounded_channel();

            let pending = store.pending(name)?;
            if !pending.is_empty() {
                info!(queue = name, count = pending.len(), "Recovering unacknowledged messages");
            }
            for (seq, payload) in pending {
                let _ = tx.send(Envelope {
                    seq,
                    payload: Bytes::from(payload),
                    redelivered: true,
                    abandoned: 0,
                });
            }

            declared.insert(
                name.to_string(),
                QueueState {
                    tx,
                    rx: Arc::new(Mutex::new(rx)),
                },
            );
            debug!(queue = name, "Queue declared");
        }

        info!(queues = ?queues, "Broker ready");

        Ok(Self {
            inner: Arc::new(BrokerInner {
                store,
                queues: declared,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Persist and route a message, returning its sequence number
    pub fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<u64> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let state = self.queue(queue)?;
        let seq = self.inner.store.enqueue(queue, &payload)?;

        state
            .tx
            .send(Envelope {
                seq,
                payload: Bytes::from(payload),
                redelivered: false,
                abandoned: 0,
            })
            .map_err(|_| BrokerError::Closed)?;

        debug!(queue, seq, "Message published");
        Ok(seq)
    }

    /// Open a new channel; channels die with the broker
    pub fn channel(&self) -> Channel {
        Channel {
            broker: self.clone(),
            permits: None,
            prefetch: None,
            token: self.inner.shutdown.child_token(),
        }
    }

    /// Close the broker: publishing fails and every consumer stream ends
    pub fn close(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Closing broker");
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Messages of `queue` that were published but not yet acknowledged
    pub fn depth(&self, queue: &str) -> Result<usize> {
        self.queue(queue)?;
        Ok(self.inner.store.depth(queue)?)
    }

    pub fn dead_letters(&self, queue: &str, limit: usize) -> Result<Vec<DeadLetter>> {
        self.queue(queue)?;
        Ok(self.inner.store.dead_letters(queue, limit)?)
    }

    /// Flush the underlying store
    pub fn flush(&self) -> Result<()> {
        Ok(self.inner.store.flush()?)
    }

    pub fn health_check(&self) -> bool {
        !self.is_closed() && self.inner.store.health_check().is_ok()
    }

    fn queue(&self, name: &str) -> Result<&QueueState> {
        self.inner
            .queues
            .get(name)
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    fn requeue(&self, queue: &str, seq: u64, payload: Bytes, abandoned: u32) {
        match self.queue(queue) {
            Ok(state) => {
                let _ = state.tx.send(Envelope {
                    seq,
                    payload,
                    redelivered: true,
                    abandoned,
                });
                debug!(queue, seq, "Message requeued");
            }
            Err(e) => warn!(queue, seq, error = %e, "Cannot requeue message"),
        }
    }
}

/// A lightweight session on the broker carrying its own flow control
pub struct Channel {
    broker: Broker,
    permits: Option<Arc<Semaphore>>,
    prefetch: Option<u16>,
    token: CancellationToken,
}

impl Channel {
    /// Limit the number of unacknowledged deliveries on this channel
    ///
    /// Applies to consumers opened after the call.
    pub fn set_qos(&mut self, prefetch_count: u16) -> Result<()> {
        if prefetch_count == 0 {
            return Err(BrokerError::InvalidPrefetch);
        }

        self.prefetch = Some(prefetch_count);
        self.permits = Some(Arc::new(Semaphore::new(usize::from(prefetch_count))));
        debug!(prefetch_count, "Channel QoS set");
        Ok(())
    }

    pub fn prefetch(&self) -> Option<u16> {
        self.prefetch
    }

    /// Number of deliveries this channel may still receive before it must ack
    pub fn available_slots(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }

    /// Start consuming `queue`
    pub fn consume(&self, queue: &str) -> Result<Consumer> {
        if self.token.is_cancelled() {
            return Err(if self.broker.is_closed() {
                BrokerError::Closed
            } else {
                BrokerError::ChannelClosed
            });
        }

        let state = self.broker.queue(queue)?;

        Ok(Consumer {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            rx: state.rx.clone(),
            permits: self.permits.clone(),
            token: self.token.clone(),
        })
    }

    /// Close the channel; its consumers stop receiving
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Stream of deliveries from one queue
pub struct Consumer {
    broker: Broker,
    queue: String,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
    permits: Option<Arc<Semaphore>>,
    token: CancellationToken,
}

impl Consumer {
    /// Wait for the next delivery
    ///
    /// Blocks while the channel's prefetch window is full. Returns `None` once
    /// the channel or broker is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        let permit = match &self.permits {
            Some(permits) => {
                let permits = permits.clone();
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return None,
                    permit = permits.acquire_owned() => Some(permit.ok()?),
                }
            }
            None => None,
        };

        let rx = self.rx.clone();
        let envelope = tokio::select! {
            biased;
            _ = self.token.cancelled() => return None,
            envelope = async move { rx.lock().await.recv().await } => envelope?,
        };

        Some(Delivery {
            broker: self.broker.clone(),
            queue: self.queue.clone(),
            seq: envelope.seq,
            payload: envelope.payload,
            redelivered: envelope.redelivered,
            abandoned: envelope.abandoned,
            permit,
            settled: false,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// A message handed to a consumer, holding one prefetch slot until settled
///
/// Dropping an unsettled delivery puts the message back on its queue.
pub struct Delivery {
    broker: Broker,
    queue: String,
    seq: u64,
    payload: Bytes,
    redelivered: bool,
    abandoned: u32,
    permit: Option<OwnedSemaphorePermit>,
    settled: bool,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// True if the message was handed out before and never acknowledged
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Times this message was dropped unsettled since the broker opened
    ///
    /// Explicit `nack(true)` does not count.
    pub fn abandoned(&self) -> u32 {
        self.abandoned
    }

    /// Acknowledge: the message is removed and its slot released
    ///
    /// If the store rejects the removal the delivery stays unsettled and is
    /// requeued when dropped.
    pub fn ack(mut self) -> Result<()> {
        self.broker.inner.store.ack(&self.queue, self.seq)?;
        self.settled = true;
        Ok(())
    }

    /// Negative acknowledgement; without requeue the message is dead-lettered
    pub fn nack(self, requeue: bool) -> Result<()> {
        if requeue {
            let mut delivery = self;
            delivery.settled = true;
            delivery.broker.requeue(
                &delivery.queue,
                delivery.seq,
                delivery.payload.clone(),
                delivery.abandoned,
            );
            Ok(())
        } else {
            self.dead_letter("rejected by consumer")
        }
    }

    /// Park the message in the dead letter partition with a reason
    pub fn dead_letter(mut self, reason: impl Into<String>) -> Result<()> {
        self.broker
            .inner
            .store
            .move_to_dead_letter(&self.queue, self.seq, reason.into())?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            debug!(queue = %self.queue, seq = self.seq, "Unsettled delivery dropped");
            self.broker.requeue(
                &self.queue,
                self.seq,
                self.payload.clone(),
                self.abandoned.saturating_add(1),
            );
        }
        self.permit.take();
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("seq", &self.seq)
            .field("size", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}
