//! Bounded concurrency scheduler
//!
//! Caps concurrently running units of work. Each unit takes its queue
//! position when submitted and freed slots go to the oldest waiter. A
//! unit that waits on work it spawned gives its slot back while waiting and
//! takes one again afterwards, so nested submission cannot deadlock even with
//! a single slot.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::TestError;

tokio::task_local! {
    static SLOT: Arc<Slot>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler was shut down before the work could start")]
    ShutDown,

    #[error("Scheduled work panicked: {0}")]
    Panicked(String),

    #[error("Scheduled work was aborted")]
    Aborted,
}

/// Slots plus the queue of units waiting for one
#[derive(Debug)]
struct Pool {
    semaphore: Arc<Semaphore>,
    waiters: Mutex<VecDeque<oneshot::Sender<Permit>>>,
}

impl Pool {
    /// Take a free slot now, or join the back of the queue
    fn acquire(self: &Arc<Self>) -> Acquire {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if waiters.is_empty() {
            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                return Acquire::Ready(Permit::new(self, permit));
            }
        }
        let (sender, receiver) = oneshot::channel();
        // a closed pool drops the sender, failing the waiter
        if !self.semaphore.is_closed() {
            waiters.push_back(sender);
        }
        Acquire::Queued(receiver)
    }

    /// Hand a freed slot to the oldest live waiter, else back to the semaphore
    fn release(self: &Arc<Self>, mut permit: OwnedSemaphorePermit) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(waiter) = waiters.pop_front() {
            match waiter.send(Permit::new(self, permit)) {
                Ok(()) => return,
                Err(mut unclaimed) => match unclaimed.permit.take() {
                    Some(returned) => permit = returned,
                    None => return,
                },
            }
        }
        drop(permit);
    }

    fn close(&self) {
        self.semaphore.close();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// A held slot; dropping it passes the slot on
#[derive(Debug)]
struct Permit {
    pool: Arc<Pool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Permit {
    fn new(pool: &Arc<Pool>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool: Arc::clone(pool),
            permit: Some(permit),
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.release(permit);
        }
    }
}

enum Acquire {
    Ready(Permit),
    Queued(oneshot::Receiver<Permit>),
}

impl Acquire {
    async fn wait(self) -> Result<Permit, SchedulerError> {
        match self {
            Acquire::Ready(permit) => Ok(permit),
            Acquire::Queued(receiver) => receiver.await.map_err(|_| SchedulerError::ShutDown),
        }
    }
}

/// The slot held by a running unit
struct Slot {
    pool: Arc<Pool>,
    permit: Mutex<Option<Permit>>,
}

/// Bounded worker pool. Cloning shares the same slots.
#[derive(Clone, Debug)]
pub struct Scheduler {
    pool: Option<Arc<Pool>>,
}

impl Scheduler {
    /// At most `limit` units run at once (a limit of 0 is treated as 1)
    pub fn bounded(limit: usize) -> Self {
        Self {
            pool: Some(Arc::new(Pool {
                semaphore: Arc::new(Semaphore::new(limit.max(1))),
                waiters: Mutex::new(VecDeque::new()),
            })),
        }
    }

    /// No limit on concurrent units
    pub fn unbounded() -> Self {
        Self { pool: None }
    }

    /// Free slots right now; `None` when unbounded
    pub fn available_slots(&self) -> Option<usize> {
        self.pool
            .as_ref()
            .map(|pool| pool.semaphore.available_permits())
    }

    /// Submit a unit of work. Its place in the queue is taken here, so units
    /// start in submission order as slots free up.
    pub fn spawn<F, T>(&self, work: F) -> WorkHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let queued = self.pool.as_ref().map(|pool| (Arc::clone(pool), pool.acquire()));
        let handle = tokio::spawn(async move {
            match queued {
                Some((pool, acquire)) => {
                    let permit = acquire.wait().await?;
                    trace!("Scheduler slot acquired");
                    let slot = Arc::new(Slot {
                        pool,
                        permit: Mutex::new(Some(permit)),
                    });
                    Ok(SLOT.scope(slot, work).await)
                }
                None => Ok(work.await),
            }
        });
        WorkHandle { handle }
    }

    /// Close the pool: queued units fail with [`SchedulerError::ShutDown`]
    pub fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            debug!("Scheduler shut down");
            pool.close();
        }
    }
}

/// Handle to a submitted unit
#[derive(Debug)]
pub struct WorkHandle<T> {
    handle: JoinHandle<Result<T, SchedulerError>>,
}

impl<T> WorkHandle<T> {
    /// Wait for the unit to finish.
    ///
    /// When called from inside another scheduled unit, that unit's slot is
    /// released for the duration of the wait.
    pub async fn join(self) -> Result<T, SchedulerError> {
        let slot = SLOT.try_with(Arc::clone).ok();
        let released = slot.as_ref().and_then(|slot| {
            slot.permit
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
        });
        let reacquire = released.is_some();
        drop(released);

        let result = self.handle.await;

        if let (true, Some(slot)) = (reacquire, slot) {
            // a closed pool means shutdown; the waiting unit finishes without a slot
            if let Ok(permit) = slot.pool.acquire().wait().await {
                *slot.permit.lock().unwrap_or_else(|e| e.into_inner()) = Some(permit);
            }
        }

        match result {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => Err(SchedulerError::Panicked(
                TestError::from_panic(err.into_panic()).to_string(),
            )),
            Err(_) => Err(SchedulerError::Aborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_caps_concurrency() {
        let scheduler = Scheduler::bounded(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                scheduler.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.available_slots(), Some(2));
    }

    #[tokio::test]
    async fn test_nested_submission_with_one_slot() {
        let scheduler = Scheduler::bounded(1);
        let inner = scheduler.clone();

        let outer = scheduler.spawn(async move {
            let child = inner.spawn(async { 21 });
            child.join().await.map(|v| v * 2)
        });

        let value = tokio::time::timeout(Duration::from_secs(2), outer.join())
            .await
            .expect("nested submission deadlocked")
            .unwrap()
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiting_units_start_in_submission_order() {
        let scheduler = Scheduler::bounded(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let submitter = {
            let scheduler = scheduler.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let handles: Vec<_> = (0..6)
                    .map(|n| {
                        let order = order.clone();
                        scheduler.spawn(async move {
                            order.lock().unwrap().push(n);
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().await.unwrap();
                }
            })
        };
        submitter.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(scheduler.available_slots(), Some(1));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let scheduler = Scheduler::bounded(1);
        let blocker = scheduler.spawn(tokio::time::sleep(Duration::from_millis(50)));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let queued = scheduler.spawn(async { 1 });
        scheduler.shutdown();

        assert_eq!(queued.join().await, Err(SchedulerError::ShutDown));
        blocker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_unit() {
        let scheduler = Scheduler::unbounded();
        let handle = scheduler.spawn(async { panic!("unit failed") });
        assert_eq!(
            handle.join().await,
            Err(SchedulerError::Panicked("unit failed".to_string()))
        );
    }
}
