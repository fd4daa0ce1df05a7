//! Worker pool fronting the database.
//!
//! Every database touch from every user worker funnels through a small set
//! of pool slots, so a reconnect stampede cannot open hundreds of
//! connections at once. A worker's tasks always hash to the same slot and
//! therefore run in submission order; the worker itself suspends on a
//! reply channel until the slot has executed its task.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use flume::Sender;
use tokio::sync::oneshot;
use tracing::debug;

use crate::adapters::sqlite::DbPool;
use crate::engine::stop::StopToken;
use crate::types::error::PostboxError;

type Job = Box<dyn FnOnce(&DbPool) + Send>;

pub struct WorkPool {
    slots: Mutex<Vec<Sender<Job>>>,
}

impl WorkPool {
    /// Spawn `workers` slot tasks, each draining its own bounded queue.
    pub fn start(db: DbPool, workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        let mut slots = Vec::with_capacity(workers);

        for slot in 0..workers {
            let (tx, rx) = flume::bounded::<Job>(queue_depth.max(1));
            let db = db.clone();
            tokio::spawn(async move {
                while let Ok(job) = rx.recv_async().await {
                    job(&db);
                }
                debug!(slot, "Work-pool slot drained");
            });
            slots.push(tx);
        }

        Self {
            slots: Mutex::new(slots),
        }
    }

    fn slot_for(&self, key: &str) -> Option<Sender<Job>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        Some(slots[(hasher.finish() as usize) % slots.len()].clone())
    }

    /// Run `task` on the slot owned by `key` and suspend until it replies.
    ///
    /// The wait is interruptible: when `stop` fires first this resolves to
    /// `Stopped` and the caller re-checks its running flag. A pool that no
    /// longer accepts work (shut down, queue gone) is a `Bridge` failure,
    /// which is fatal to the calling worker.
    pub async fn schedule<T, F>(
        &self,
        key: &str,
        stop: &StopToken,
        task: F,
    ) -> Result<T, PostboxError>
    where
        F: FnOnce(&DbPool) -> Result<T, PostboxError> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self
            .slot_for(key)
            .ok_or_else(|| PostboxError::Bridge("worker pool is shut down".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |db| {
            // the worker may have stopped waiting; a dead reply channel is fine
            let _ = reply_tx.send(task(db));
        });

        slot.send_async(job)
            .await
            .map_err(|_| PostboxError::Bridge("worker pool is not accepting tasks".to_string()))?;

        tokio::select! {
            reply = reply_rx => reply
                .map_err(|_| PostboxError::Bridge("worker pool dropped the task".to_string()))?,
            () = stop.cancelled() => Err(PostboxError::Stopped),
        }
    }

    /// Stop accepting tasks. Queued jobs still run; slot tasks exit once
    /// their queues drain.
    pub fn shutdown(&self) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_test_pool;
    use std::sync::Arc;

    fn pool_with_slots(workers: usize) -> WorkPool {
        WorkPool::start(create_test_pool(), workers, 8)
    }

    #[tokio::test]
    async fn test_schedule_returns_task_result() {
        let pool = pool_with_slots(2);
        let stop = StopToken::new();

        let value = pool.schedule("u1", &stop, |_db| Ok(41 + 1)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_schedule_propagates_task_error() {
        let pool = pool_with_slots(2);
        let stop = StopToken::new();

        let result: Result<(), _> = pool
            .schedule("u1", &stop, |_db| {
                Err(PostboxError::Store("no such table".to_string()))
            })
            .await;
        assert!(matches!(result, Err(PostboxError::Store(_))));
    }

    #[tokio::test]
    async fn test_same_key_tasks_run_in_order() {
        let pool = pool_with_slots(4);
        let stop = StopToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            pool.schedule("u1", &stop, move |_db| {
                seen.lock().unwrap().push(i);
                Ok(())
            })
            .await
            .unwrap();
        }

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks() {
        let pool = pool_with_slots(2);
        let stop = StopToken::new();

        pool.shutdown();

        let result: Result<(), _> = pool.schedule("u1", &stop, |_db| Ok(())).await;
        assert!(matches!(result, Err(PostboxError::Bridge(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_interrupts_the_wait() {
        let pool = pool_with_slots(1);
        let stop = StopToken::new();

        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let result: Result<(), _> = pool
            .schedule("u1", &stop, |_db| {
                // keep the slot busy well past the stop trigger
                std::thread::sleep(std::time::Duration::from_millis(200));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PostboxError::Stopped)));
    }
}
