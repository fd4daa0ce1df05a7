//! async-imap implementation of the mailbox capability.
//!
//! An IMAP session is generic over its stream type; we produce either a
//! TLS-encrypted TCP stream or a plain one, and erase the difference
//! behind `Box<dyn MailboxSession>`.

use std::fmt::Debug;
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::response::classify_untagged;
use super::{FolderStatus, MailTransport, MailboxEvent, MailboxSession};
use crate::engine::stop::StopToken;
use crate::types::error::PostboxError;
use crate::types::user::{AuthMethod, User};

/// Stream bound async-imap needs, spelled once.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Debug + Send + Sync + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Debug + Send + Sync + 'static> ImapStream for T {}

/// Classify an async-imap failure for the state machine.
fn classify_imap_error(err: async_imap::error::Error) -> PostboxError {
    match err {
        async_imap::error::Error::Io(e) => PostboxError::Io(e.to_string()),
        async_imap::error::Error::ConnectionLost => {
            PostboxError::Io("connection lost".to_string())
        }
        other => PostboxError::Protocol(other.to_string()),
    }
}

/// Login failures are credential-class unless the socket itself died:
/// NO/BAD replies, a BYE greeting, and rejected SASL all mean the account
/// cannot be used as configured.
fn classify_login_error(err: async_imap::error::Error) -> PostboxError {
    match err {
        async_imap::error::Error::Io(e) => PostboxError::Io(e.to_string()),
        other => PostboxError::Auth(other.to_string()),
    }
}

/// XOAUTH2 SASL payload; async-imap handles the base64 framing.
struct XOAuth2 {
    user: String,
    access_token: String,
}

impl async_imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

/// Transport that opens TCP (+TLS when configured) connections.
pub struct TlsTransport {
    idle_timeout: Duration,
}

impl TlsTransport {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }
}

#[async_trait]
impl MailTransport for TlsTransport {
    async fn connect(
        &self,
        provider: &crate::types::user::ProviderConfig,
    ) -> Result<Box<dyn MailboxSession>, PostboxError> {
        info!(host = %provider.host, port = provider.port, tls = provider.tls, "Connecting to IMAP server");

        let tcp = TcpStream::connect((provider.host.as_str(), provider.port))
            .await
            .map_err(|e| PostboxError::Io(format!("TCP connect failed: {}", e)))?;

        if provider.tls {
            let tls = async_native_tls::TlsConnector::new();
            let stream = tls
                .connect(&provider.host, tcp)
                .await
                .map_err(|e| PostboxError::Io(format!("TLS handshake failed: {}", e)))?;
            Ok(Box::new(ImapMailbox::new(
                async_imap::Client::new(stream),
                self.idle_timeout,
            )))
        } else {
            Ok(Box::new(ImapMailbox::new(
                async_imap::Client::new(tcp),
                self.idle_timeout,
            )))
        }
    }
}

/// Login consumes the async-imap client and hands back a session, so the
/// connection moves through explicit states. `Closed` doubles as the
/// in-flight placeholder while IDLE temporarily owns the session.
enum SessionState<S: ImapStream> {
    Connected(async_imap::Client<S>),
    Authenticated(async_imap::Session<S>),
    Closed,
}

pub struct ImapMailbox<S: ImapStream> {
    state: SessionState<S>,
    idle_timeout: Duration,
}

impl<S: ImapStream> ImapMailbox<S> {
    fn new(client: async_imap::Client<S>, idle_timeout: Duration) -> Self {
        Self {
            state: SessionState::Connected(client),
            idle_timeout,
        }
    }

    fn session(&mut self) -> Result<&mut async_imap::Session<S>, PostboxError> {
        match &mut self.state {
            SessionState::Authenticated(session) => Ok(session),
            SessionState::Connected(_) => Err(PostboxError::Protocol(
                "session used before authentication".to_string(),
            )),
            SessionState::Closed => Err(PostboxError::Io("connection closed".to_string())),
        }
    }
}

#[async_trait]
impl<S: ImapStream> MailboxSession for ImapMailbox<S> {
    async fn authenticate(&mut self, user: &User) -> Result<(), PostboxError> {
        let client = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Connected(client) => client,
            other => {
                self.state = other;
                return Err(PostboxError::Protocol(
                    "authenticate on an already-used connection".to_string(),
                ));
            }
        };

        let login = match &user.provider.auth {
            AuthMethod::Password { password, .. } => {
                client.login(user.login_name(), password).await
            }
            AuthMethod::XOAuth2 { access_token, .. } => {
                let auth = XOAuth2 {
                    user: user.login_name().to_string(),
                    access_token: access_token.clone(),
                };
                client.authenticate("XOAUTH2", auth).await
            }
        };

        match login {
            Ok(session) => {
                self.state = SessionState::Authenticated(session);
                Ok(())
            }
            Err((err, _client)) => Err(classify_login_error(err)),
        }
    }

    async fn list_folders(&mut self) -> Result<Vec<String>, PostboxError> {
        let session = self.session()?;
        let names: Vec<_> = session
            .list(None, Some("*"))
            .await
            .map_err(classify_imap_error)?
            .try_collect()
            .await
            .map_err(classify_imap_error)?;

        Ok(names.iter().map(|n| n.name().to_string()).collect())
    }

    async fn examine(&mut self, folder: &str) -> Result<FolderStatus, PostboxError> {
        let session = self.session()?;
        let mailbox = session.examine(folder).await.map_err(classify_imap_error)?;

        Ok(FolderStatus {
            exists: mailbox.exists,
            uid_validity: mailbox.uid_validity,
        })
    }

    async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>, PostboxError> {
        let session = self.session()?;
        let uid_set = session
            .uid_search(query)
            .await
            .map_err(classify_imap_error)?;

        // UID SEARCH results come back as a set; the engine wants them oldest first
        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn wait_for_event(&mut self, stop: &StopToken) -> Result<MailboxEvent, PostboxError> {
        if stop.is_stopped() {
            return Ok(MailboxEvent::Stopped);
        }

        let session = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Authenticated(session) => session,
            other => {
                self.state = other;
                return Err(PostboxError::Protocol(
                    "IDLE before authentication".to_string(),
                ));
            }
        };

        let mut handle = session.idle();
        handle.init().await.map_err(classify_imap_error)?;

        let event = loop {
            let (idle_wait, interrupt) = handle.wait_with_timeout(self.idle_timeout);
            let outcome = tokio::select! {
                res = idle_wait => Some(res),
                () = stop.cancelled() => None,
            };
            drop(interrupt);

            match outcome {
                None => break MailboxEvent::Stopped,
                Some(Ok(IdleResponse::Timeout)) => break MailboxEvent::Refresh,
                Some(Ok(IdleResponse::ManualInterrupt)) => break MailboxEvent::Stopped,
                Some(Ok(IdleResponse::NewData(data))) => {
                    match classify_untagged(data.parsed()) {
                        Some(event) => break event,
                        // EXPUNGE, RECENT, flag chatter: stay in IDLE
                        None => continue,
                    }
                }
                Some(Err(err)) => return Err(classify_imap_error(err)),
            }
        };

        match handle.done().await {
            Ok(session) => {
                self.state = SessionState::Authenticated(session);
                Ok(event)
            }
            // A dead connection while stopping is not worth reporting
            Err(_) if stop.is_stopped() => Ok(MailboxEvent::Stopped),
            Err(err) => Err(classify_imap_error(err)),
        }
    }

    async fn logout(&mut self) {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Authenticated(mut session) => {
                if let Err(err) = session.logout().await {
                    debug!("LOGOUT on teardown failed: {}", err);
                }
            }
            // never authenticated or already torn down; dropping closes the socket
            SessionState::Connected(_) | SessionState::Closed => {}
        }
    }
}
