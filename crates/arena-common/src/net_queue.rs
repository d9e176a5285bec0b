// net_queue.rs - bounded queues between the tick loop and network I/O
//
// Inbound player input is enqueued by the I/O side and drained at the start
// of the next tick; encoded outbound frames are enqueued by the tick loop
// and written to sockets by the I/O side. Neither side ever blocks the other.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

/// Default queue capacity - handles typical burst traffic without excessive memory use.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Maximum queue capacity - absolute limit to prevent memory exhaustion.
pub const MAX_QUEUE_CAPACITY: usize = 4096;

/// An item stamped with the time it entered the queue.
#[derive(Clone, Debug)]
pub struct Queued<T> {
    pub item: T,
    /// sys_milliseconds at enqueue time
    pub timestamp: u64,
}

/// Bounded multi-producer queue.
pub struct PacketQueue<T> {
    sender: Sender<Queued<T>>,
    receiver: Receiver<Queued<T>>,
}

impl<T> PacketQueue<T> {
    /// Capacity is clamped to `1..=MAX_QUEUE_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.clamp(1, MAX_QUEUE_CAPACITY));
        Self { sender, receiver }
    }

    /// Get a clone of the sender handle.
    pub fn sender(&self) -> PacketQueueSender<T> {
        PacketQueueSender {
            sender: self.sender.clone(),
        }
    }

    /// Get a clone of the receiver handle (for a consumer thread).
    pub fn receiver(&self) -> Receiver<Queued<T>> {
        self.receiver.clone()
    }

    /// Try to receive without blocking.
    pub fn try_recv(&self) -> Option<Queued<T>> {
        self.receiver.try_recv().ok()
    }

    /// Everything currently queued, oldest first, without blocking.
    pub fn drain(&self) -> Vec<Queued<T>> {
        self.receiver.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

impl<T> Default for PacketQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Sender handle for a packet queue.
pub struct PacketQueueSender<T> {
    sender: Sender<Queued<T>>,
}

impl<T> Clone for PacketQueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> PacketQueueSender<T> {
    /// Try to send without blocking.
    ///
    /// Returns `true` if sent, `false` if the queue is full (item dropped)
    /// or the receiving side is gone.
    pub fn try_send(&self, item: T, timestamp: u64) -> bool {
        match self.sender.try_send(Queued { item, timestamp }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("queue full, item dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
