//! IMAP client capability.
//!
//! The engine only ever talks to the two traits below, so the whole state
//! machine runs against scripted sessions in tests. `connection.rs` holds
//! the real `async-imap` implementation.

pub mod connection;
pub mod folders;
pub mod response;

use async_trait::async_trait;

use crate::engine::stop::StopToken;
use crate::types::error::PostboxError;
use crate::types::user::{ProviderConfig, User};

pub use connection::TlsTransport;

/// What an IDLE wait resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxEvent {
    /// Untagged EXISTS arrived: new mail is available.
    NewMail,
    /// The idle window elapsed; re-issue after a resync pass.
    Refresh,
    /// The server announced BYE.
    Bye,
    /// The stop token fired while idling.
    Stopped,
}

/// Snapshot of the selected folder, taken from the EXAMINE untagged replies.
#[derive(Debug, Clone, Default)]
pub struct FolderStatus {
    pub exists: u32,
    /// RFC 3501 requires UIDVALIDITY on SELECT/EXAMINE; `None` means the
    /// server is broken enough that we refuse to sync by UID.
    pub uid_validity: Option<u32>,
}

/// Opens connections for a provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn connect(
        &self,
        provider: &ProviderConfig,
    ) -> Result<Box<dyn MailboxSession>, PostboxError>;
}

/// The narrow slice of IMAP the sync engine needs.
///
/// Implementations classify failures into `Auth` / `Protocol` / `Io` /
/// `Timeout` before returning them; the worker branches on the class, not
/// on provider-specific details.
#[async_trait]
pub trait MailboxSession: Send + Sync {
    /// LOGIN or XOAUTH2, per the user's provider config.
    async fn authenticate(&mut self, user: &User) -> Result<(), PostboxError>;

    /// `LIST "" "*"`, folder names only.
    async fn list_folders(&mut self) -> Result<Vec<String>, PostboxError>;

    /// Read-only select. The returned status carries the server's
    /// UIDVALIDITY for the folder.
    async fn examine(&mut self, folder: &str) -> Result<FolderStatus, PostboxError>;

    /// `UID SEARCH <query>`; results sorted ascending.
    async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>, PostboxError>;

    /// Enter IDLE and block until new mail, BYE, idle-window expiry, or the
    /// stop token. Untagged responses other than EXISTS/BYE keep the IDLE
    /// open.
    async fn wait_for_event(&mut self, stop: &StopToken) -> Result<MailboxEvent, PostboxError>;

    /// Best-effort LOGOUT + drop. Never fails, safe on a dead connection.
    async fn logout(&mut self);
}
