// Priority-ordered admission for remote fetches.
//
// A single scheduler instance is constructed at startup and handed to
// whatever builds the base matrix; every fetch path funnels through it so
// the concurrency bound is global. Tests substitute their own instance.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Highest priority: embeddings and layout data, so they are not starved
/// behind bulk expression-matrix fetches.
pub const PRIORITY_LAYOUT: u32 = 0;
/// Default priority for everything else.
pub const PRIORITY_DEFAULT: u32 = 10;

/// Default bound on simultaneously in-flight fetches.
pub const DEFAULT_FETCH_LIMIT: usize = 5;

struct Waiter {
    priority: u32,
    seq: u64,
    wake: oneshot::Sender<()>,
}

// Min-heap on (priority, seq): lower priority value first, FIFO within
// equal priority.
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

struct SchedulerState {
    running: usize,
    next_seq: u64,
    queue: BinaryHeap<Waiter>,
}

/// Bounds the number of concurrently in-flight fetch operations and orders
/// pending work by priority. Ready tasks are never reordered once
/// dispatched; a slot is released on both success and failure.
pub struct FetchScheduler {
    limit: usize,
    state: Mutex<SchedulerState>,
}

impl FetchScheduler {
    #[must_use]
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            state: Mutex::new(SchedulerState {
                running: 0,
                next_seq: 0,
                queue: BinaryHeap::new(),
            }),
        })
    }

    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().running
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Run `fut` once a slot is available, at the given priority.
    pub async fn run<F, T>(self: &Arc<Self>, priority: u32, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire(priority).await;
        fut.await
    }

    async fn acquire(self: &Arc<Self>, priority: u32) -> Permit {
        let rx = {
            let mut state = self.state.lock();
            if state.running < self.limit {
                state.running += 1;
                return Permit {
                    scheduler: Arc::clone(self),
                };
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(Waiter {
                priority,
                seq,
                wake: tx,
            });
            rx
        };
        // The sender is only dropped if the scheduler itself is dropped.
        let _ = rx.await;
        Permit {
            scheduler: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        // Hand the slot to the next pending waiter; skip any whose caller
        // has gone away.
        while let Some(waiter) = state.queue.pop() {
            if waiter.wake.send(()).is_ok() {
                return;
            }
        }
        state.running -= 1;
    }
}

struct Permit {
    scheduler: Arc<FetchScheduler>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.scheduler.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let scheduler = FetchScheduler::new(1);
        let order: Arc<PMutex<Vec<&'static str>>> = Arc::new(PMutex::new(Vec::new()));

        // Occupy the only slot until all three contenders are queued.
        let (hold_tx, hold_rx) = oneshot::channel::<()>();
        let s = Arc::clone(&scheduler);
        let holder = tokio::spawn(async move {
            s.run(PRIORITY_DEFAULT, async move {
                let _ = hold_rx.await;
            })
            .await;
        });

        // Wait until the holder is running.
        while scheduler.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let mut tasks = Vec::new();
        for (name, priority) in [
            ("first-10", PRIORITY_DEFAULT),
            ("emb-0", PRIORITY_LAYOUT),
            ("second-10", PRIORITY_DEFAULT),
        ] {
            let s = Arc::clone(&scheduler);
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                s.run(priority, async move {
                    order.lock().push(name);
                })
                .await;
            }));
            // Queue in submission order.
            while scheduler.pending() < tasks.len() {
                tokio::task::yield_now().await;
            }
        }

        hold_tx.send(()).unwrap();
        holder.await.unwrap();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(*order.lock(), vec!["emb-0", "first-10", "second-10"]);
    }

    #[tokio::test]
    async fn test_slot_released_on_failure() {
        let scheduler = FetchScheduler::new(2);
        let result: Result<(), &str> = scheduler.run(PRIORITY_DEFAULT, async { Err("boom") }).await;
        assert!(result.is_err());
        assert_eq!(scheduler.in_flight(), 0);

        // Queued work is not permanently blocked by the failed fetch.
        let ok: Result<u32, &str> = scheduler.run(PRIORITY_DEFAULT, async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
    }
}
