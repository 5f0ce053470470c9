//! Work queue feeding the reconcile loop.
//!
//! Each key has at most one pending request. A request due sooner than the
//! pending one replaces it; a request due later is dropped. The pending entry
//! is cleared when the key is dequeued, so a pass may requeue itself.
//! Immediate requests go straight onto an unbounded channel. Delayed requests
//! park in a spawned task until their deadline.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rabbit_converge::{ObjectKey, Scheduler};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Sending half, handed to the reconciler.
#[derive(Clone)]
pub struct QueueScheduler {
    tx: mpsc::UnboundedSender<ObjectKey>,
    pending: Arc<DashMap<ObjectKey, Instant>>,
}

/// Receiving half, owned by the reconcile loop.
pub struct WorkQueue {
    rx: mpsc::UnboundedReceiver<ObjectKey>,
    pending: Arc<DashMap<ObjectKey, Instant>>,
}

pub fn work_queue() -> (QueueScheduler, WorkQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(DashMap::new());
    (
        QueueScheduler {
            tx,
            pending: pending.clone(),
        },
        WorkQueue { rx, pending },
    )
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, key: ObjectKey, after: Option<Duration>) {
        let deadline = Instant::now() + after.unwrap_or_default();

        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= deadline {
                    debug!(object = %key, "already queued sooner");
                    return;
                }
                entry.insert(deadline);
            }
            Entry::Vacant(entry) => {
                entry.insert(deadline);
            }
        }

        let Some(delay) = after.filter(|d| !d.is_zero()) else {
            let _ = self.tx.send(key);
            return;
        };

        debug!(object = %key, delay_secs = delay.as_secs(), "requeue scheduled");
        let tx = self.tx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Superseded or already dequeued.
            let current = pending.get(&key).map(|entry| *entry.value());
            if current == Some(deadline) {
                let _ = tx.send(key);
            }
        });
    }
}

impl WorkQueue {
    /// Wait for the next key.
    pub async fn recv(&mut self) -> Option<ObjectKey> {
        let key = self.rx.recv().await?;
        self.pending.remove(&key);
        Some(key)
    }

    /// Next key if one is ready now.
    pub fn try_recv(&mut self) -> Option<ObjectKey> {
        let key = self.rx.try_recv().ok()?;
        self.pending.remove(&key);
        Some(key)
    }

    /// Requests still waiting out their delay.
    pub fn delayed(&self) -> usize {
        let now = Instant::now();
        self.pending
            .iter()
            .filter(|entry| *entry.value() > now)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rabbit_converge::ResourceKind;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::User, "default", name)
    }

    /// Let spawned requeue tasks run after the clock moves.
    async fn settle_tasks() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_immediate_requests_arrive_in_order() {
        let (scheduler, mut queue) = work_queue();
        scheduler.schedule(key("a"), None);
        scheduler.schedule(key("b"), None);

        assert_eq!(queue.try_recv(), Some(key("a")));
        assert_eq!(queue.try_recv(), Some(key("b")));
        assert_eq!(queue.try_recv(), None);
    }

    #[tokio::test]
    async fn test_immediate_duplicates_collapse_until_dequeued() {
        let (scheduler, mut queue) = work_queue();
        scheduler.schedule(key("a"), None);
        scheduler.schedule(key("a"), None);
        assert_eq!(queue.try_recv(), Some(key("a")));
        assert_eq!(queue.try_recv(), None);

        // Once dequeued, the key can be queued again.
        scheduler.schedule(key("a"), None);
        assert_eq!(queue.try_recv(), Some(key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_request_waits() {
        let (scheduler, mut queue) = work_queue();
        scheduler.schedule(key("a"), Some(Duration::from_secs(10)));
        tokio::task::yield_now().await;

        assert_eq!(queue.delayed(), 1);
        assert_eq!(queue.try_recv(), None);

        let received = queue.recv().await;
        assert_eq!(received, Some(key("a")));
        assert_eq!(queue.delayed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_delayed_requests_deliver_once() {
        let (scheduler, mut queue) = work_queue();
        for _ in 0..3 {
            scheduler.schedule(key("a"), Some(Duration::from_secs(60)));
        }
        assert_eq!(queue.delayed(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle_tasks().await;
        assert_eq!(queue.try_recv(), Some(key("a")));
        assert_eq!(queue.try_recv(), None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle_tasks().await;
        assert_eq!(queue.try_recv(), None);
        assert_eq!(queue.delayed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sooner_request_supersedes_later() {
        let (scheduler, mut queue) = work_queue();
        scheduler.schedule(key("a"), Some(Duration::from_secs(60)));
        scheduler.schedule(key("a"), Some(Duration::from_secs(10)));
        // Later than what is pending: dropped.
        scheduler.schedule(key("a"), Some(Duration::from_secs(30)));

        let started = Instant::now();
        assert_eq!(queue.recv().await, Some(key("a")));
        assert_eq!(started.elapsed(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle_tasks().await;
        assert_eq!(queue.try_recv(), None);
    }
}
