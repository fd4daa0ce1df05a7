//! Downstream message processing seam.

use async_trait::async_trait;
use tracing::info;

use crate::types::error::PostboxError;
use crate::types::user::User;

/// Receives every newly discovered UID, in per-user order.
///
/// Implementations must be idempotent over (user, uid): the sync engine is
/// at-least-once, and a jumpstarted account will replay recent UIDs.
/// A `Timeout` error is fatal to the calling worker.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, user: &User, uid: u32) -> Result<(), PostboxError>;
}

/// Default processor: logs the delivery and nothing else. Deployments
/// replace this with their own pipeline.
pub struct LogProcessor;

#[async_trait]
impl MessageProcessor for LogProcessor {
    async fn process(&self, user: &User, uid: u32) -> Result<(), PostboxError> {
        info!(email = %user.email, uid = uid, "New message");
        Ok(())
    }
}
