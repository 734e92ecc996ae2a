//! A single named FIFO queue.
//!
//! Queues wrap a tokio mpsc channel. The receiving half sits behind an async
//! mutex so that several consumers can share one queue; each message is still
//! delivered to exactly one of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

enum QueueSender<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

enum QueueReceiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> QueueReceiver<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<T> {
        match self {
            QueueReceiver::Bounded(rx) => rx.try_recv().ok(),
            QueueReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Typed queue registered on the bus.
pub(crate) struct Queue<T> {
    tx: QueueSender<T>,
    rx: Mutex<QueueReceiver<T>>,
    /// Messages sent but not yet received
    pending: AtomicUsize,
    capacity: Option<usize>,
}

impl<T: Send + 'static> Queue<T> {
    /// Create an unbounded queue (`None`) or a queue holding at most `capacity` messages.
    ///
    /// `capacity` must be above zero; the bus validates it before calling this.
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(size) => {
                let (tx, rx) = mpsc::channel(size);
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
        };
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Enqueue a message, suspending while a bounded queue is full.
    ///
    /// Returns the message back when the channel is closed. Cancelling a
    /// suspended send leaves the queue untouched.
    pub(crate) async fn send(&self, message: T) -> Result<(), T> {
        match &self.tx {
            QueueSender::Bounded(tx) => {
                let Ok(permit) = tx.reserve().await else {
                    return Err(message);
                };
                self.pending.fetch_add(1, Ordering::SeqCst);
                permit.send(message);
                Ok(())
            }
            QueueSender::Unbounded(tx) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                tx.send(message).map_err(|e| {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    e.0
                })
            }
        }
    }

    /// Dequeue the oldest message, suspending until one is available.
    pub(crate) async fn receive(&self) -> Option<T> {
        let message = self.rx.lock().await.recv().await;
        if message.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }

    /// Dequeue the oldest message if one is immediately available.
    ///
    /// Returns `None` when the queue is empty or another consumer is waiting on it.
    pub(crate) fn try_receive(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        let message = rx.try_recv();
        if message.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
