//! Per-user worker lifecycle.
//!
//! A worker performs exactly one session attempt: backoff delay, connect,
//! authenticate, select the sync folder, validate UIDVALIDITY, then the
//! resync/IDLE loop in `engine::sync`. There is no in-place retry; any
//! failure (and any stop request) lands in `finish`, which classifies the
//! outcome and always runs teardown. The daemon spawns a fresh worker for
//! the next attempt.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::adapters::imap::{folders, FolderStatus, MailboxSession};
use crate::adapters::sqlite::users;
use crate::engine::backoff;
use crate::engine::stop::StopToken;
use crate::state::daemon::Daemon;
use crate::types::error::PostboxError;
use crate::types::user::User;

pub struct UserWorker {
    pub(crate) daemon: Arc<Daemon>,
    /// Refreshable snapshot; replaced wholesale by pool reloads.
    pub(crate) user: User,
    pub(crate) client: Option<Box<dyn MailboxSession>>,
    pub(crate) folder: Option<String>,
    /// Folder state captured at EXAMINE time.
    pub(crate) selected: Option<FolderStatus>,
    /// Server UIDVALIDITY observed for this session.
    pub(crate) uid_validity: Option<String>,
    pub(crate) stop: StopToken,
}

impl UserWorker {
    pub fn new(daemon: Arc<Daemon>, user: User, stop: StopToken) -> Self {
        Self {
            daemon,
            user,
            client: None,
            folder: None,
            selected: None,
            uid_validity: None,
            stop,
        }
    }

    pub(crate) fn running(&self) -> bool {
        !self.stop.is_stopped()
    }

    pub(crate) fn check_running(&self) -> Result<(), PostboxError> {
        if self.stop.is_stopped() {
            Err(PostboxError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Execute one attempt and tear down, whatever happens.
    pub async fn run(mut self) {
        let result = self.attempt().await;
        self.finish(result).await;
    }

    async fn attempt(&mut self) -> Result<(), PostboxError> {
        self.delay_start().await?;
        self.check_running()?;
        self.connect().await?;
        self.check_running()?;
        self.authenticate().await?;
        self.check_running()?;
        self.choose_folder().await?;
        self.check_running()?;
        self.update_uid_validity().await?;
        self.main_loop().await
    }

    /// Classify the outcome, then run the unconditional teardown path.
    async fn finish(mut self, result: Result<(), PostboxError>) {
        match &result {
            Ok(()) => {}
            // stop requests and cluster handoffs are expected outcomes
            Err(err) if err.is_silent() => {
                debug!(email = %self.user.email, "Worker stopped: {}", err);
            }
            Err(err @ PostboxError::Auth(_)) => {
                info!(email = %self.user.email, "Authentication failed: {}", err);
                self.daemon.increment_error_count(&self.user.id);
            }
            Err(err) => {
                if self.daemon.stress_test() {
                    debug!(email = %self.user.email, class = err.class(), "Worker failed: {}", err);
                } else {
                    error!(email = %self.user.email, class = err.class(), "Worker failed: {}", err);
                }
                self.daemon.metrics().error(err.class());
                self.daemon.increment_error_count(&self.user.id);
            }
        }

        // Teardown. Every branch above falls through to here, and nothing
        // below can fail.
        self.stop.trigger();
        self.daemon.disconnect_user(&self.user.id);
        if let Some(mut client) = self.client.take() {
            client.logout().await;
        }
        info!("Disconnected {}.", self.user.email);
    }

    /// Sleep off the user's error history before touching the network.
    async fn delay_start(&self) -> Result<(), PostboxError> {
        let errors = self.daemon.error_count(&self.user.id);
        let delay = backoff::reconnect_delay(errors);
        if delay.is_zero() {
            return Ok(());
        }

        self.daemon
            .metrics()
            .gauge("user_thread.delayed_start", delay.as_secs());
        info!(
            email = %self.user.email,
            delay_secs = delay.as_secs(),
            errors = errors,
            "Delaying start"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            () = self.stop.cancelled() => Err(PostboxError::Stopped),
        }
    }

    async fn connect(&mut self) -> Result<(), PostboxError> {
        let client = self
            .daemon
            .transport()
            .connect(&self.user.provider)
            .await?;
        self.client = Some(client);
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<(), PostboxError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PostboxError::Io("not connected".to_string()))?;
        client.authenticate(&self.user).await?;

        let now = Utc::now();
        let user_id = self.user.id.clone();
        self.daemon
            .schedule(&self.user.id, &self.stop, move |db| {
                users::touch_last_login(db, &user_id, now)
            })
            .await?;
        self.user.last_login_at = Some(now);

        info!(email = %self.user.email, "Authenticated");
        Ok(())
    }

    /// LIST the account and EXAMINE the best folder we know how to sync.
    async fn choose_folder(&mut self) -> Result<(), PostboxError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PostboxError::Io("not connected".to_string()))?;

        let names = client.list_folders().await?;
        let folder = folders::choose_folder(&names).ok_or_else(|| {
            PostboxError::Protocol(format!(
                "no syncable folder among the {} listed",
                names.len()
            ))
        })?;

        let status = client.examine(folder).await?;
        debug!(email = %self.user.email, folder = folder, exists = status.exists, "Selected folder");

        self.folder = Some(folder.to_string());
        self.selected = Some(status);
        Ok(())
    }

    /// Compare the server's UIDVALIDITY (from the EXAMINE we just ran)
    /// against the persisted token; on change, persist the new token and
    /// drop the cursor before any by-UID fetch can happen.
    async fn update_uid_validity(&mut self) -> Result<(), PostboxError> {
        let status = self
            .selected
            .as_ref()
            .ok_or_else(|| PostboxError::Protocol("no folder selected".to_string()))?;
        let validity = status
            .uid_validity
            .ok_or_else(|| {
                PostboxError::Protocol("server did not report UIDVALIDITY".to_string())
            })?
            .to_string();

        self.uid_validity = Some(validity.clone());

        if self.user.last_uid_validity.as_deref() != Some(validity.as_str()) {
            info!(
                email = %self.user.email,
                old = ?self.user.last_uid_validity,
                new = %validity,
                "UIDVALIDITY changed, resetting cursor"
            );

            let user_id = self.user.id.clone();
            let persisted = validity.clone();
            self.daemon
                .schedule(&self.user.id, &self.stop, move |db| {
                    users::set_uid_validity(db, &user_id, &persisted)
                })
                .await?;
            self.user.last_uid_validity = Some(validity);
            self.user.last_uid = None;
        }

        Ok(())
    }
}
