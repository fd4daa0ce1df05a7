//! Daemon state: one supervisor per user, shared error counters, and the
//! dispatch table of running workers.
//!
//! The daemon is deliberately dumb about recovery: a worker performs exactly
//! one connection attempt and tears itself down on any exit; the supervisor
//! loop then spawns a fresh worker, whose own start-up backoff absorbs
//! repeated failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::imap::MailTransport;
use crate::adapters::sqlite::{users, DbPool};
use crate::config::DaemonConfig;
use crate::engine::stop::StopToken;
use crate::engine::worker::UserWorker;
use crate::services::metrics::Metrics;
use crate::services::processor::MessageProcessor;
use crate::state::pool::WorkPool;
use crate::types::error::PostboxError;

pub struct Daemon {
    pool: WorkPool,
    transport: Arc<dyn MailTransport>,
    processor: Arc<dyn MessageProcessor>,
    metrics: Metrics,
    stress_test: bool,
    /// Active worker attempt per user; entries removed on worker teardown.
    workers: Mutex<HashMap<String, StopToken>>,
    /// Per-user consecutive error counts, feeding the start-up backoff.
    errors: Mutex<HashMap<String, u32>>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    shutdown: StopToken,
}

impl Daemon {
    pub fn new(
        db: DbPool,
        config: &DaemonConfig,
        transport: Arc<dyn MailTransport>,
        processor: Arc<dyn MessageProcessor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool: WorkPool::start(db, config.pool_workers, config.pool_queue_depth),
            transport,
            processor,
            metrics: Metrics::new(config.stress_test),
            stress_test: config.stress_test,
            workers: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            supervisors: Mutex::new(Vec::new()),
            shutdown: StopToken::new(),
        })
    }

    pub fn stress_test(&self) -> bool {
        self.stress_test
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn transport(&self) -> Arc<dyn MailTransport> {
        self.transport.clone()
    }

    pub fn processor(&self) -> Arc<dyn MessageProcessor> {
        self.processor.clone()
    }

    /// Run `task` on the user's work-pool slot. All of a user's tasks
    /// serialize there; the caller suspends until the pool replies.
    pub async fn schedule<T, F>(
        &self,
        user_id: &str,
        stop: &StopToken,
        task: F,
    ) -> Result<T, PostboxError>
    where
        F: FnOnce(&DbPool) -> Result<T, PostboxError> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.schedule(user_id, stop, task).await
    }

    pub fn error_count(&self, user_id: &str) -> u32 {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn increment_error_count(&self, user_id: &str) -> u32 {
        let mut errors = self.errors.lock().unwrap_or_else(|e| e.into_inner());
        let count = errors.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Register the stop token of a starting worker attempt.
    pub(crate) fn register_worker(&self, user_id: &str, stop: StopToken) {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), stop);
    }

    /// Drop the user from the dispatch table. Called from worker teardown;
    /// idempotent because teardown runs on every exit path.
    pub fn disconnect_user(&self, user_id: &str) {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
    }

    /// Whether a worker attempt is currently registered for the user.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(user_id)
    }

    /// Ask the user's current worker attempt (if any) to stop.
    pub fn stop_user(&self, user_id: &str) {
        let stop = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned();
        if let Some(stop) = stop {
            stop.trigger();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_stopped()
    }

    /// Load every user and start a supervisor for each.
    pub async fn start(self: Arc<Self>) -> Result<(), PostboxError> {
        let user_ids = self
            .pool
            .schedule("daemon", &self.shutdown, users::list_user_ids)
            .await?;

        info!(count = user_ids.len(), "Starting user workers");
        for user_id in user_ids {
            self.clone().spawn_user(user_id);
        }
        Ok(())
    }

    /// Start supervising one user. Each attempt reloads the user record
    /// through the pool so config changes are picked up on reconnect.
    pub fn spawn_user(self: Arc<Self>, user_id: String) {
        let daemon = self.clone();
        let handle = tokio::spawn(async move {
            daemon.supervise(user_id).await;
        });
        self.supervisors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    async fn supervise(self: Arc<Self>, user_id: String) {
        loop {
            if self.is_shutting_down() {
                break;
            }

            let lookup = {
                let id = user_id.clone();
                self.schedule(&user_id, &self.shutdown, move |db| users::get_user(db, &id))
                    .await
            };

            let user = match lookup {
                Ok(Some(user)) => user,
                Ok(None) => {
                    warn!(user_id = %user_id, "User disappeared from the store, ending supervision");
                    break;
                }
                Err(PostboxError::Stopped) => break,
                Err(err) => {
                    warn!(user_id = %user_id, "Cannot load user: {}", err);
                    break;
                }
            };

            let stop = StopToken::new();
            self.register_worker(&user_id, stop.clone());
            UserWorker::new(self.clone(), user, stop).run().await;
        }
    }

    /// Stop every worker and refuse new pool tasks. Supervisors exit after
    /// their current attempt finishes teardown.
    pub async fn stop(&self) {
        info!("Daemon shutting down");
        self.shutdown.trigger();

        let stops: Vec<StopToken> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for stop in stops {
            stop.trigger();
        }

        let handles: Vec<JoinHandle<()>> = self
            .supervisors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_test_pool;
    use crate::services::processor::LogProcessor;
    use std::time::Duration;

    fn test_daemon() -> Arc<Daemon> {
        let transport = Arc::new(crate::adapters::imap::TlsTransport::new(
            Duration::from_secs(60),
        ));
        Daemon::new(
            create_test_pool(),
            &DaemonConfig::default(),
            transport,
            Arc::new(LogProcessor),
        )
    }

    #[tokio::test]
    async fn test_error_counter_starts_at_zero_and_increments() {
        let daemon = test_daemon();
        assert_eq!(daemon.error_count("u1"), 0);
        assert_eq!(daemon.increment_error_count("u1"), 1);
        assert_eq!(daemon.increment_error_count("u1"), 2);
        assert_eq!(daemon.error_count("u1"), 2);
        // other users unaffected
        assert_eq!(daemon.error_count("u2"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_user_is_idempotent() {
        let daemon = test_daemon();
        daemon.register_worker("u1", StopToken::new());
        daemon.disconnect_user("u1");
        daemon.disconnect_user("u1");
        assert!(daemon.workers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_user_triggers_registered_token() {
        let daemon = test_daemon();
        let stop = StopToken::new();
        daemon.register_worker("u1", stop.clone());

        daemon.stop_user("u1");
        assert!(stop.is_stopped());

        // unknown users are a no-op
        daemon.stop_user("u2");
    }
}
