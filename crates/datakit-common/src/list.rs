//! Thread-safe list with fire-and-forget writes
//!
//! `ConcurrentList` guards a `Vec` with a single mutex and additionally
//! accepts fire-and-forget mutations through a bounded queue drained by one
//! background task. `flush` is the explicit join point for queued writes;
//! `clear` flushes first (bounded by a timeout) and then empties the list.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Default capacity of the fire-and-forget queue
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Queued fire-and-forget mutation
enum ListOp<T> {
    Push(T),
    Insert(usize, T),
}

/// Thread-safe list with optional fire-and-forget writes
///
/// All synchronous operations take the list lock directly. The `*_forget`
/// variants enqueue the mutation instead and return immediately; a single
/// background task applies them in enqueue order. Must be created inside a
/// Tokio runtime.
pub struct ConcurrentList<T> {
    items: Arc<Mutex<Vec<T>>>,
    tx: mpsc::Sender<ListOp<T>>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    shutdown: CancellationToken,
}

impl<T: Send + 'static> ConcurrentList<T> {
    /// Create a new list with the default queue capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a new list with a custom fire-and-forget queue capacity
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self::with_token(queue_capacity, CancellationToken::new())
    }

    /// Create a new list whose background task stops when `token` is cancelled
    pub fn with_token(queue_capacity: usize, token: CancellationToken) -> Self {
        let items = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        Self::spawn_drain_task(
            Arc::clone(&items),
            rx,
            Arc::clone(&pending),
            Arc::clone(&drained),
            token.clone(),
        );

        Self {
            items,
            tx,
            pending,
            drained,
            shutdown: token,
        }
    }

    fn spawn_drain_task(
        items: Arc<Mutex<Vec<T>>>,
        mut rx: mpsc::Receiver<ListOp<T>>,
        pending: Arc<AtomicUsize>,
        drained: Arc<Notify>,
        shutdown: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        // Stop accepting new writes, then apply whatever was
                        // already queued so nothing is lost to this race.
                        rx.close();
                        tracing::debug!(
                            buffered = pending.load(Ordering::Acquire),
                            "ConcurrentList drain task cancelled"
                        );
                        while let Some(op) = rx.recv().await {
                            Self::apply(&items, op);
                            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                                drained.notify_waiters();
                            }
                        }
                        break;
                    }
                    op = rx.recv() => match op {
                        Some(op) => {
                            Self::apply(&items, op);
                            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                                drained.notify_waiters();
                            }
                        }
                        None => break,
                    }
                }
            }
        });
    }

    fn apply(items: &Mutex<Vec<T>>, op: ListOp<T>) {
        let mut guard = items.lock();
        match op {
            ListOp::Push(item) => guard.push(item),
            ListOp::Insert(index, item) => {
                // Out-of-range indexes clamp to the tail.
                let index = index.min(guard.len());
                guard.insert(index, item);
            }
        }
    }

    /// Append an item, blocking on the list lock
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Insert an item at `index` (clamped to the list length)
    pub fn insert(&self, index: usize, item: T) {
        Self::apply(&self.items, ListOp::Insert(index, item));
    }

    /// Append an item without waiting for the list lock
    ///
    /// The write is queued for the background task. If the queue is full or
    /// the task has stopped, the write is applied inline instead so it is
    /// never silently dropped.
    pub fn push_forget(&self, item: T) {
        self.enqueue(ListOp::Push(item));
    }

    /// Insert an item at `index` without waiting for the list lock
    pub fn insert_forget(&self, index: usize, item: T) {
        self.enqueue(ListOp::Insert(index, item));
    }

    fn enqueue(&self, op: ListOp<T>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.tx.try_send(op) {
            // Queue full or drain task gone: apply inline.
            let op = match err {
                mpsc::error::TrySendError::Full(op) => op,
                mpsc::error::TrySendError::Closed(op) => op,
            };
            Self::apply(&self.items, op);
            if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.drained.notify_waiters();
            }
        }
    }

    /// Wait until all queued fire-and-forget writes have been applied
    ///
    /// Returns `true` if the queue drained within `timeout`, `false` if the
    /// timeout elapsed with writes still in flight.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending.load(Ordering::Acquire) == 0;
            }
        }
    }

    /// Remove all items, first draining queued writes (bounded by `timeout`)
    ///
    /// In-flight writes applied within `timeout` are cleared along with the
    /// rest; once the timeout elapses the clear proceeds regardless. Returns
    /// whether the queue fully drained first.
    pub async fn clear(&self, timeout: Duration) -> bool {
        let drained = self.flush(timeout).await;
        self.items.lock().clear();
        drained
    }

    /// Remove and return the item at `index`, if present
    ///
    /// Does not wait for queued fire-and-forget writes; call `flush` first
    /// when those must be visible.
    pub fn remove_at(&self, index: usize) -> Option<T> {
        let mut guard = self.items.lock();
        if index < guard.len() {
            Some(guard.remove(index))
        } else {
            None
        }
    }

    /// Number of items currently applied to the list
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the list is currently empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Number of fire-and-forget writes not yet applied
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop the background drain task
    ///
    /// After shutdown the `*_forget` variants apply their writes inline.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<T: Send + Clone + 'static> ConcurrentList<T> {
    /// Clone of the item at `index`, if present
    pub fn get(&self, index: usize) -> Option<T> {
        self.items.lock().get(index).cloned()
    }

    /// Clone of the full list contents
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T: Send + PartialEq + 'static> ConcurrentList<T> {
    /// Whether the list currently contains `item`
    pub fn contains(&self, item: &T) -> bool {
        self.items.lock().contains(item)
    }
}

// Clones are handles onto the same list, queue, and drain task.
impl<T> Clone for ConcurrentList<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            drained: Arc::clone(&self.drained),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T: Send + 'static> Default for ConcurrentList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_get() {
        let list = ConcurrentList::new();
        list.push(1);
        list.push(2);
        list.push(3);

        assert_eq!(list.len(), 3);
        assert_eq!(list.get(0), Some(1));
        assert_eq!(list.get(2), Some(3));
        assert_eq!(list.get(3), None);
    }

    #[tokio::test]
    async fn test_insert_clamps_index() {
        let list = ConcurrentList::new();
        list.push("a");
        list.insert(100, "b");

        assert_eq!(list.snapshot(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_push_forget_then_flush() {
        let list = ConcurrentList::new();
        for i in 0..50 {
            list.push_forget(i);
        }

        assert!(list.flush(Duration::from_secs(5)).await);
        assert_eq!(list.len(), 50);
        assert_eq!(list.pending(), 0);
    }

    #[tokio::test]
    async fn test_forget_preserves_order() {
        let list = ConcurrentList::new();
        for i in 0..20 {
            list.push_forget(i);
        }

        assert!(list.flush(Duration::from_secs(5)).await);
        assert_eq!(list.snapshot(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_clear_after_forget_never_deadlocks() {
        let list = ConcurrentList::new();
        for i in 0..100 {
            list.push_forget(i);
        }

        // Either the queued writes land before the clear or the timeout
        // elapses; both paths must complete.
        let completed = tokio::time::timeout(
            Duration::from_secs(10),
            list.clear(Duration::from_millis(500)),
        )
        .await;
        assert!(completed.is_ok());
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_clear_with_zero_timeout_proceeds() {
        let list = ConcurrentList::new();
        list.push(1);
        list.push_forget(2);

        list.clear(Duration::ZERO).await;
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_applies_inline() {
        let list = ConcurrentList::with_capacity(1);
        for i in 0..32 {
            list.push_forget(i);
        }

        assert!(list.flush(Duration::from_secs(5)).await);
        assert_eq!(list.len(), 32);
    }

    #[tokio::test]
    async fn test_remove_at() {
        let list = ConcurrentList::new();
        list.push(10);
        list.push(20);
        list.push(30);

        assert_eq!(list.remove_at(1), Some(20));
        assert_eq!(list.remove_at(5), None);
        assert_eq!(list.snapshot(), vec![10, 30]);
    }

    #[tokio::test]
    async fn test_contains() {
        let list = ConcurrentList::new();
        list.push("x".to_string());

        assert!(list.contains(&"x".to_string()));
        assert!(!list.contains(&"y".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_degrades_to_inline() {
        let list = ConcurrentList::new();
        list.shutdown();
        assert!(list.is_shut_down());

        // Give the drain task a moment to observe cancellation.
        tokio::time::sleep(Duration::from_millis(50)).await;

        list.push_forget(7);
        assert!(list.flush(Duration::from_secs(1)).await);
        assert!(list.contains(&7));
    }

    #[tokio::test]
    async fn test_queued_writes_survive_shutdown() {
        let list = ConcurrentList::new();
        for i in 0..64 {
            list.push_forget(i);
        }
        list.shutdown();

        // Writes accepted before cancellation must still land.
        assert!(list.flush(Duration::from_secs(1)).await);
        assert_eq!(list.len(), 64);
        assert_eq!(list.pending(), 0);
    }

    #[tokio::test]
    async fn test_external_token_cancellation() {
        let token = CancellationToken::new();
        let list: ConcurrentList<i32> = ConcurrentList::with_token(8, token.clone());

        token.cancel();
        assert!(list.is_shut_down());
    }
}
