//! Bounded batch queue connecting two adjacent stages
//!
//! A thin layer over a crossbeam channel: the queue owns both ends so any
//! number of workers on either side can share it through an `Arc`. Closing
//! is explicit because the owned sender keeps the channel connected.

use crossbeam_channel::{bounded, select, unbounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::error::QueueError;
use super::types::Batch;

/// How often a blocked `put` re-checks whether the queue was closed
const CLOSE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Multi-producer/multi-consumer FIFO of batches
#[derive(Debug)]
pub struct BoundedQueue<T> {
    sender: Sender<Batch<T>>,
    receiver: Receiver<Batch<T>>,
    capacity: Option<usize>,
    closed: AtomicBool,
}

impl<T> BoundedQueue<T> {
    /// Queue holding at most `capacity` batches. Producers block when full.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity: Some(capacity),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue without a capacity limit
    pub fn unbounded() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            capacity: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Push a batch, blocking while the queue is full.
    pub fn put(&self, batch: Batch<T>) -> Result<(), QueueError> {
        let mut batch = batch;
        loop {
            if self.is_closed() {
                return Err(QueueError::Closed);
            }
            match self.sender.send_timeout(batch, CLOSE_CHECK_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => batch = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueError::Closed),
            }
        }
    }

    /// Wait up to `timeout` for a batch. `None` means nothing arrived; a
    /// zero timeout polls without blocking.
    pub fn get(&self, timeout: Duration) -> Option<Batch<T>> {
        if timeout.is_zero() {
            return self.receiver.try_recv().ok();
        }
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Like [`get`](Self::get), but also returns `None` as soon as `wake`
    /// fires or disconnects.
    pub fn get_or_wake(&self, timeout: Duration, wake: &Receiver<()>) -> Option<Batch<T>> {
        select! {
            recv(self.receiver) -> msg => msg.ok(),
            recv(wake) -> _ => None,
            default(timeout) => None,
        }
    }

    /// Approximate number of queued batches
    pub fn size(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Tear the queue down. Pending and future `put` calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::bounded(4);
        queue.put(Batch::new(0, vec![1, 2])).unwrap();
        queue.put(Batch::new(1, vec![3])).unwrap();
        assert_eq!(queue.size(), 2);

        let first = queue.get(Duration::from_millis(10)).unwrap();
        let second = queue.get(Duration::from_millis(10)).unwrap();
        assert_eq!(first.items, vec![1, 2]);
        assert_eq!(second.items, vec![3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_get_times_out_with_none() {
        let queue: BoundedQueue<u8> = BoundedQueue::bounded(1);
        let started = Instant::now();
        assert!(queue.get(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert!(queue.get(Duration::ZERO).is_none());
    }

    #[test]
    fn test_put_on_closed_queue_fails() {
        let queue = BoundedQueue::unbounded();
        queue.close();
        assert_eq!(queue.put(Batch::new(0, vec!["x"])), Err(QueueError::Closed));
    }

    #[test]
    fn test_blocked_put_fails_when_closed() {
        let queue = Arc::new(BoundedQueue::bounded(1));
        queue.put(Batch::new(0, vec![0])).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put(Batch::new(1, vec![1])))
        };

        thread::sleep(Duration::from_millis(30));
        queue.close();
        assert_eq!(producer.join().unwrap(), Err(QueueError::Closed));
    }

    #[test]
    fn test_put_wakes_blocked_get() {
        let queue = Arc::new(BoundedQueue::bounded(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.put(Batch::new(7, vec!["late"])).unwrap();
        let batch = consumer.join().unwrap().unwrap();
        assert_eq!(batch.id, 7);
    }

    #[test]
    fn test_wake_signal_interrupts_get() {
        let queue: BoundedQueue<u8> = BoundedQueue::bounded(1);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(0);
        drop(wake_tx);

        let started = Instant::now();
        assert!(queue.get_or_wake(Duration::from_secs(5), &wake_rx).is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_capacity_reporting() {
        assert_eq!(BoundedQueue::<u8>::bounded(3).capacity(), Some(3));
        assert_eq!(BoundedQueue::<u8>::unbounded().capacity(), None);
    }
}
