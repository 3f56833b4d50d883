//! Multi-consumer broadcast queue with rolling-timeout reads
//!
//! Items are appended to a shared singly linked log. Every [`Subscription`]
//! owns a cursor into that log, so each subscriber sees every item added
//! after it subscribed, in `add` order, independently of the others. Nodes
//! that no cursor can reach any more are freed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One item in the log together with its position and arrival time
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub sequence: u64,
    pub item: T,
    pub arrived: Instant,
}

struct Link<T> {
    entry: Entry<T>,
    next: Arc<Node<T>>,
}

struct Node<T> {
    link: OnceLock<Link<T>>,
}

impl<T> Node<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            link: OnceLock::new(),
        })
    }
}

impl<T> Drop for Node<T> {
    // Unlink iteratively so a long unread backlog cannot overflow the stack
    fn drop(&mut self) {
        let mut link = self.link.take();
        while let Some(Link { next, .. }) = link {
            match Arc::try_unwrap(next) {
                Ok(mut node) => link = node.link.take(),
                Err(_) => break,
            }
        }
    }
}

struct Tail<T> {
    node: Arc<Node<T>>,
    next_sequence: u64,
}

struct Shared<T> {
    tail: Mutex<Tail<T>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Append-only fan-out queue
pub struct BroadcastQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BroadcastQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> Default for BroadcastQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> BroadcastQueue<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tail: Mutex::new(Tail {
                    node: Node::empty(),
                    next_sequence: 0,
                }),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Append an item and wake every waiting reader. Never waits on readers.
    pub fn add(&self, item: T) {
        if self.is_closed() {
            tracing::trace!("Dropping item added to closed queue");
            return;
        }

        {
            let mut tail = self.shared.tail.lock();
            let next = Node::empty();
            let entry = Entry {
                sequence: tail.next_sequence,
                item,
                arrived: Instant::now(),
            };
            if tail
                .node
                .link
                .set(Link {
                    entry,
                    next: next.clone(),
                })
                .is_err()
            {
                // Tail nodes are only linked under this lock
                unreachable!("queue tail already linked");
            }
            tail.node = next;
            tail.next_sequence += 1;
        }

        self.shared.notify.notify_waiters();
    }

    /// Open a cursor positioned at the current end of the log
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            node: self.shared.tail.lock().node.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Number of items ever added
    pub fn len(&self) -> u64 {
        self.shared.tail.lock().next_sequence
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting items and release every waiting reader
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Independent read cursor into a [`BroadcastQueue`]
pub struct Subscription<T> {
    node: Arc<Node<T>>,
    shared: Arc<Shared<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Next item, waiting at most `timeout` for one to arrive
    pub async fn next(&mut self, timeout: Duration) -> Option<T> {
        self.next_entry(timeout).await.map(|entry| entry.item)
    }

    /// Like [`Subscription::next`] but keeps the sequence number and arrival time
    pub async fn next_entry(&mut self, timeout: Duration) -> Option<Entry<T>> {
        let deadline = Instant::now() + timeout;
        let shared = self.shared.clone();

        loop {
            // Register for wake-ups before checking so an add in between is not missed
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.advance() {
                return Some(entry);
            }
            if self.is_closed() {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Next item if one is already available
    pub fn try_next(&mut self) -> Option<T> {
        self.advance().map(|entry| entry.item)
    }

    /// True once the queue is closed; buffered items can still be drained
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Lazy stream ending after `timeout` of silence
    pub fn into_stream(mut self, timeout: Duration) -> impl Stream<Item = T>
    where
        T: Send + Sync + 'static,
    {
        async_stream::stream! {
            while let Some(item) = self.next(timeout).await {
                yield item;
            }
        }
    }

    fn advance(&mut self) -> Option<Entry<T>> {
        let link = self.node.link.get()?;
        let entry = link.entry.clone();
        let next = link.next.clone();
        self.node = next;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    const WINDOW: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let queue = BroadcastQueue::new();
        let mut first = queue.subscribe();
        let mut second = queue.subscribe();

        for i in 0..10 {
            queue.add(i);
        }

        let mut a = Vec::new();
        while let Some(i) = first.next(WINDOW).await {
            a.push(i);
        }
        let b: Vec<i32> = second.into_stream(WINDOW).collect().await;

        assert_eq!(a, (0..10).collect::<Vec<_>>());
        assert_eq!(b, a);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_items() {
        let queue = BroadcastQueue::new();
        queue.add("early");
        let mut sub = queue.subscribe();
        queue.add("late");

        assert_eq!(sub.next(WINDOW).await, Some("late"));
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn test_sequence_numbers() {
        let queue = BroadcastQueue::new();
        let mut sub = queue.subscribe();
        queue.add('a');
        queue.add('b');

        assert_eq!(sub.next_entry(WINDOW).await.unwrap().sequence, 0);
        assert_eq!(sub.next_entry(WINDOW).await.unwrap().sequence, 1);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_when_nothing_added() {
        let queue: BroadcastQueue<u8> = BroadcastQueue::new();
        let mut sub = queue.subscribe();

        let start = Instant::now();
        assert_eq!(sub.next(Duration::from_secs(2)).await, None);
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_rolling() {
        let queue = BroadcastQueue::new();
        let sub = queue.subscribe();
        let writer = queue.clone();

        tokio::spawn(async move {
            for i in 0..5 {
                tokio::time::sleep(Duration::from_millis(80)).await;
                writer.add(i);
            }
        });

        // Each gap (80 ms) is shorter than the window (100 ms) so every item
        // arrives even though the total span exceeds a single window.
        let start = Instant::now();
        let items: Vec<i32> = sub.into_stream(WINDOW).collect().await;
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_reader_woken_by_add() {
        let queue = BroadcastQueue::new();
        let mut sub = queue.subscribe();
        let writer = queue.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.add(7u8);
            writer.add(8u8);
        });

        let start = Instant::now();
        let entry = sub.next_entry(Duration::from_secs(10)).await.unwrap();
        assert_eq!((entry.sequence, entry.item), (0, 7));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(sub.next(WINDOW).await, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_waiting_reader() {
        let queue: BroadcastQueue<u8> = BroadcastQueue::new();
        let mut sub = queue.subscribe();
        let closer = queue.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close();
        });

        let start = Instant::now();
        assert_eq!(sub.next(Duration::from_secs(60)).await, None);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(sub.is_closed());
    }

    #[tokio::test]
    async fn test_backlog_drains_after_close() {
        let queue = BroadcastQueue::new();
        let mut sub = queue.subscribe();
        queue.add(1);
        queue.close();
        queue.add(2);

        assert_eq!(sub.next(WINDOW).await, Some(1));
        assert_eq!(sub.next(WINDOW).await, None);
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() {
        let queue = BroadcastQueue::new();
        let readers: Vec<_> = (0..4).map(|_| queue.subscribe()).collect();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        queue.add(w * 100 + i);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let mut seen = Vec::new();
        for reader in readers {
            let items: Vec<i32> = reader.into_stream(WINDOW).collect().await;
            assert_eq!(items.len(), 100);
            seen.push(items);
        }
        // Every subscriber observes the same order
        assert!(seen.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn test_long_backlog_drops_without_overflow() {
        let queue = BroadcastQueue::new();
        let sub = queue.subscribe();
        for i in 0..200_000u32 {
            queue.add(i);
        }
        drop(queue);
        drop(sub);
    }
}
