//! The resync loop: advance the UID cursor until the server has nothing
//! new, then hold the connection open in IDLE.

use chrono::{Duration, Local, Utc};
use tracing::{debug, info};

use crate::adapters::imap::MailboxEvent;
use crate::adapters::sqlite::users;
use crate::engine::worker::UserWorker;
use crate::types::error::PostboxError;

/// By-UID searches scan a fixed window above the cursor.
const UID_BATCH_SIZE: u32 = 100;

/// Day-granular SINCE searches overshoot on purpose; downstream dedupes
/// by UID, missing a message does not self-heal.
const DATE_LOOKBACK_DAYS: i64 = 2;

/// An account with no processed mail for this long gets its cursor dropped,
/// forcing the next pass onto the date search.
const STALL_THRESHOLD_HOURS: i64 = 24;

impl UserWorker {
    pub(crate) async fn main_loop(&mut self) -> Result<(), PostboxError> {
        while self.running() {
            self.verify_uid_validity().await?;
            self.jumpstart_stalled_account().await?;

            loop {
                self.check_running()?;
                if self.read_new_mail().await? == 0 {
                    break;
                }
            }

            if !self.running() {
                break;
            }
            self.wait_for_email().await?;
        }
        Ok(())
    }

    /// Reload the user record and make sure nobody rotated the cursor
    /// behind our back. Two machines can transiently own the same user
    /// during a cluster handoff; the one holding a stale UIDVALIDITY token
    /// must bow out before it fetches by UID.
    async fn verify_uid_validity(&mut self) -> Result<(), PostboxError> {
        let user_id = self.user.id.clone();
        let fresh = self
            .daemon
            .schedule(&self.user.id, &self.stop, move |db| {
                users::get_user(db, &user_id)
            })
            .await?
            .ok_or_else(|| PostboxError::UserNotFound(self.user.id.clone()))?;
        self.user = fresh;

        if self.user.last_uid_validity != self.uid_validity {
            debug!(
                email = %self.user.email,
                session = ?self.uid_validity,
                stored = ?self.user.last_uid_validity,
                "Cursor rotated by another worker"
            );
            return Err(PostboxError::UidValidityContention(self.user.id.clone()));
        }
        Ok(())
    }

    /// A cursor that has not moved in a day usually means the account got
    /// wedged somewhere above the window. Drop it; the date search picks
    /// everything recent back up and the cursor re-establishes itself.
    async fn jumpstart_stalled_account(&mut self) -> Result<(), PostboxError> {
        let Some(last_email_at) = self.user.last_email_at else {
            return Ok(());
        };
        if Utc::now() - last_email_at <= Duration::hours(STALL_THRESHOLD_HOURS) {
            return Ok(());
        }
        if self.user.last_uid.is_none() {
            return Ok(());
        }

        info!(email = %self.user.email, "No mail in over 24h, falling back to date search");

        let user_id = self.user.id.clone();
        self.daemon
            .schedule(&self.user.id, &self.stop, move |db| {
                users::clear_last_uid(db, &user_id)
            })
            .await?;
        self.user.last_uid = None;
        Ok(())
    }

    /// One search batch. Returns how many messages were read; zero means
    /// the cursor caught up with the server.
    async fn read_new_mail(&mut self) -> Result<u32, PostboxError> {
        match self.user.last_uid {
            Some(last_uid) => self.read_email_by_uid(last_uid).await,
            None => self.read_email_by_date().await,
        }
    }

    async fn read_email_by_uid(&mut self, last_uid: u32) -> Result<u32, PostboxError> {
        let lo = last_uid.saturating_add(1);
        let hi = last_uid.saturating_add(UID_BATCH_SIZE);
        let query = format!("UID {}:{}", lo, hi);

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PostboxError::Io("not connected".to_string()))?;
        let uids = client.uid_search(&query).await?;

        self.process_batch(uids).await
    }

    async fn read_email_by_date(&mut self) -> Result<u32, PostboxError> {
        let since = (Local::now() - Duration::days(DATE_LOOKBACK_DAYS)).format("%d-%b-%Y");
        let query = format!("SINCE {}", since);

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PostboxError::Io("not connected".to_string()))?;
        let uids = client.uid_search(&query).await?;

        self.process_batch(uids).await
    }

    async fn process_batch(&mut self, uids: Vec<u32>) -> Result<u32, PostboxError> {
        let mut read = 0;
        for uid in uids {
            if !self.running() {
                break;
            }
            self.process_uid(uid).await?;
            read += 1;
        }
        Ok(read)
    }

    /// Hand the message to downstream, then move the cursor past it. The
    /// in-memory snapshot advances together with the store so the next
    /// window starts above this UID.
    async fn process_uid(&mut self, uid: u32) -> Result<(), PostboxError> {
        self.daemon.processor().process(&self.user, uid).await?;

        let now = Utc::now();
        let user_id = self.user.id.clone();
        self.daemon
            .schedule(&self.user.id, &self.stop, move |db| {
                users::advance_cursor(db, &user_id, uid, now)
            })
            .await?;
        self.user.last_uid = Some(uid);
        self.user.last_email_at = Some(now);
        Ok(())
    }

    /// Park in IDLE until something happens. New mail and idle-window
    /// expiry both return to the resync pass; a BYE means the server is
    /// closing on us and the session is done.
    async fn wait_for_email(&mut self) -> Result<(), PostboxError> {
        debug!(email = %self.user.email, folder = ?self.folder, "Waiting for new mail");

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PostboxError::Io("not connected".to_string()))?;

        match client.wait_for_event(&self.stop).await? {
            MailboxEvent::NewMail | MailboxEvent::Refresh | MailboxEvent::Stopped => Ok(()),
            MailboxEvent::Bye => Err(PostboxError::Protocol(
                "server closed the connection during IDLE".to_string(),
            )),
        }
    }
}
