use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Pending delayed task for one key.
#[derive(Debug)]
struct PendingTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-key debouncer for the single-threaded event loop.
///
/// At most one task is pending per key. Scheduling a key again cancels the
/// pending task for that key, so bursts of requests collapse into one run
/// after the last request plus the delay. A task that has started running is
/// no longer pending and is never cancelled by a later `schedule`.
///
/// Tasks are spawned with [`tokio::task::spawn_local`], so the debouncer must
/// be driven from inside a [`tokio::task::LocalSet`].
#[derive(Debug)]
pub struct Debouncer<K> {
    pending: Rc<RefCell<HashMap<K, PendingTask>>>,
    generation: Cell<u64>,
}

impl<K> Debouncer<K>
where
    K: Copy + Eq + Hash + Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Rc::new(RefCell::new(HashMap::new())),
            generation: Cell::new(0),
        }
    }

    /// Schedules `task` to run after `delay`, replacing any pending task for
    /// the same key. Returns `true` if a pending task was cancelled.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + 'static,
    {
        let replaced = self.cancel(key);

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let pending = Rc::clone(&self.pending);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = pending.borrow_mut();
                if pending.get(&key).map(|task| task.generation) == Some(generation) {
                    pending.remove(&key);
                }
            }
            task.await;
        });

        self.pending
            .borrow_mut()
            .insert(key, PendingTask { generation, handle });
        tracing::trace!(
            key = ?key,
            delay_ms = delay.as_millis() as u64,
            replaced,
            "task scheduled"
        );
        replaced
    }

    /// Cancels the pending task for `key`. Returns `true` if one existed.
    pub fn cancel(&self, key: K) -> bool {
        let Some(task) = self.pending.borrow_mut().remove(&key) else {
            return false;
        };
        task.handle.abort();
        true
    }

    /// Returns `true` while a task for `key` is waiting for its delay.
    pub fn is_pending(&self, key: K) -> bool {
        self.pending.borrow().contains_key(&key)
    }

    /// Number of keys with a pending task.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl<K> Default for Debouncer<K>
where
    K: Copy + Eq + Hash + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, task) in self.pending.borrow_mut().drain() {
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    const DELAY: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn reschedule_cancels_previous_task() {
        LocalSet::new()
            .run_until(async {
                let runs = Rc::new(RefCell::new(Vec::new()));
                let debouncer = Debouncer::new();

                let first = Rc::clone(&runs);
                assert!(!debouncer.schedule(1u64, DELAY, async move {
                    first.borrow_mut().push("first");
                }));
                tokio::time::sleep(Duration::from_millis(200)).await;

                let second = Rc::clone(&runs);
                assert!(debouncer.schedule(1u64, DELAY, async move {
                    second.borrow_mut().push("second");
                }));
                assert_eq!(debouncer.pending_count(), 1);

                tokio::time::sleep(Duration::from_millis(400)).await;
                assert!(runs.borrow().is_empty());

                tokio::time::sleep(Duration::from_millis(200)).await;
                assert_eq!(*runs.borrow(), ["second"]);
                assert!(!debouncer.is_pending(1));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent_and_cancellable() {
        LocalSet::new()
            .run_until(async {
                let runs = Rc::new(RefCell::new(Vec::new()));
                let debouncer = Debouncer::new();

                for key in [1u64, 2, 3] {
                    let runs = Rc::clone(&runs);
                    debouncer.schedule(key, DELAY, async move {
                        runs.borrow_mut().push(key);
                    });
                }
                assert!(debouncer.cancel(2));
                assert!(!debouncer.cancel(2));

                tokio::time::sleep(DELAY * 2).await;
                let mut ran = runs.borrow().clone();
                ran.sort_unstable();
                assert_eq!(ran, [1, 3]);
                assert_eq!(debouncer.pending_count(), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn running_task_is_not_cancelled_by_reschedule() {
        LocalSet::new()
            .run_until(async {
                let finished = Rc::new(Cell::new(0));
                let debouncer = Debouncer::new();

                let slow = Rc::clone(&finished);
                debouncer.schedule(7u64, DELAY, async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    slow.set(slow.get() + 1);
                });

                // Fires at 500ms and is then busy until 800ms.
                tokio::time::sleep(Duration::from_millis(600)).await;
                assert!(!debouncer.is_pending(7));
                let next = Rc::clone(&finished);
                assert!(!debouncer.schedule(7u64, DELAY, async move {
                    next.set(next.get() + 1);
                }));

                tokio::time::sleep(Duration::from_millis(1000)).await;
                assert_eq!(finished.get(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_debouncer_aborts_pending_tasks() {
        LocalSet::new()
            .run_until(async {
                let ran = Rc::new(Cell::new(false));
                let debouncer = Debouncer::new();
                let flag = Rc::clone(&ran);
                debouncer.schedule(1u64, DELAY, async move { flag.set(true) });
                drop(debouncer);

                tokio::time::sleep(DELAY * 2).await;
                assert!(!ran.get());
            })
            .await;
    }
}
