//! Bounded per-subscription queue with a chosen overflow policy.
//!
//! Generalizes the audio-bus drop-oldest/blocking-send split to any IU
//! payload: audio-rate streams drop the newest chunk on overflow (and count
//! it), control streams block the producer until space frees up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Overflow behavior for a bounded subscription queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Drop the new item and count it. Appropriate for audio-rate streams.
    DropOldest,
    /// Block the producer until space is available. Required for control
    /// streams (dispatch requests, state edges) so they are never lost.
    Blocking,
}

/// Producer half of a bounded subscription queue.
#[derive(Clone)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    policy: Backpressure,
    dropped: Arc<AtomicU64>,
}

impl<T: Send + 'static> QueueSender<T> {
    pub fn new(tx: mpsc::Sender<T>, policy: Backpressure) -> Self {
        Self {
            tx,
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue `item` according to this queue's backpressure policy.
    ///
    /// For [`Backpressure::DropOldest`] this never blocks: on a full queue
    /// the new item is dropped and the drop counter incremented. For
    /// [`Backpressure::Blocking`] this awaits until space is available, so
    /// it never drops.
    pub async fn send(&self, item: T) -> bool {
        match self.policy {
            Backpressure::DropOldest => match self.tx.try_send(item) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped % 10 == 1 {
                        tracing::warn!(dropped, "queue full, dropping IU");
                    }
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("queue closed");
                    false
                }
            },
            Backpressure::Blocking => match self.tx.send(item).await {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("queue closed");
                    false
                }
            },
        }
    }

    /// Synchronous counterpart to [`QueueSender::send`] for callers on a
    /// plain OS thread that never entered a tokio runtime (calling this from
    /// inside an async task panics). Honors the same backpressure policy.
    pub fn blocking_send(&self, item: T) -> bool {
        match self.policy {
            Backpressure::DropOldest => match self.tx.try_send(item) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped % 10 == 1 {
                        tracing::warn!(dropped, "queue full, dropping IU");
                    }
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("queue closed");
                    false
                }
            },
            Backpressure::Blocking => match self.tx.blocking_send(item) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("queue closed");
                    false
                }
            },
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> Backpressure {
        self.policy
    }
}

/// Consumer half of a bounded subscription queue.
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Synchronous counterpart to [`QueueReceiver::recv`]; blocks the
    /// current OS thread until an item arrives or every sender drops.
    /// Panics if called from inside an actively-entered tokio runtime.
    pub fn blocking_recv(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;

    #[tokio::test]
    async fn drop_oldest_counts_overflow_without_blocking() {
        let (tx, _rx) = channel::<u32>(2, Backpressure::DropOldest);
        assert!(tx.send(1).await);
        assert!(tx.send(2).await);
        assert!(!tx.send(3).await);
        assert_eq!(tx.dropped(), 1);
    }

    #[tokio::test]
    async fn blocking_queue_delivers_every_item() {
        let (tx, mut rx) = channel::<u32>(1, Backpressure::Blocking);
        tx.send(1).await;
        let tx2 = tx.clone();
        let handle = tokio::spawn(async move {
            tx2.send(2).await;
        });
        assert_eq!(rx.recv().await, Some(1));
        handle.await.unwrap();
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn recv_returns_items_in_order() {
        let (tx, mut rx) = channel::<u32>(8, Backpressure::DropOldest);
        for i in 0..5 {
            tx.send(i).await;
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await, Some(i));
        }
    }
}
