//! Scripted collaborators for exercising the worker state machine without
//! a server: a canned IMAP session, a recording processor, and a harness
//! that wires both into a real daemon + store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::imap::{
    FolderStatus, MailTransport, MailboxEvent, MailboxSession,
};
use crate::adapters::sqlite::{create_test_pool, initialize_schema, users, DbPool};
use crate::config::DaemonConfig;
use crate::engine::stop::StopToken;
use crate::services::processor::MessageProcessor;
use crate::state::daemon::Daemon;
use crate::types::error::PostboxError;
use crate::types::user::{AuthMethod, ProviderConfig, User};

/// Records every processed (user, uid) pair; optionally fails one UID.
#[derive(Default)]
pub struct RecordingProcessor {
    pub processed: Mutex<Vec<(String, u32)>>,
    pub fail_on: Mutex<Option<(u32, PostboxError)>>,
}

impl RecordingProcessor {
    pub fn uids(&self) -> Vec<u32> {
        self.processed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, uid)| *uid)
            .collect()
    }
}

#[async_trait]
impl MessageProcessor for RecordingProcessor {
    async fn process(&self, user: &User, uid: u32) -> Result<(), PostboxError> {
        if let Some((bad_uid, err)) = self.fail_on.lock().unwrap().clone() {
            if bad_uid == uid {
                return Err(err);
            }
        }
        self.processed
            .lock()
            .unwrap()
            .push((user.id.clone(), uid));
        Ok(())
    }
}

/// Everything a scripted session observed, shared with the test body.
#[derive(Default)]
pub struct SessionCalls {
    pub auth_attempts: AtomicU32,
    pub examined: Mutex<Vec<String>>,
    pub search_queries: Mutex<Vec<String>>,
    pub idle_entries: AtomicU32,
    pub logouts: AtomicU32,
}

impl SessionCalls {
    pub fn queries(&self) -> Vec<String> {
        self.search_queries.lock().unwrap().clone()
    }
}

/// Canned behavior for one session attempt.
pub struct SessionScript {
    pub auth_error: Option<PostboxError>,
    pub folders: Vec<String>,
    pub uid_validity: Option<u32>,
    /// Successive `uid_search` results; exhausted -> empty batch.
    pub searches: VecDeque<Vec<u32>>,
    /// Successive `wait_for_event` results; exhausted -> trigger the stop
    /// token and report `Stopped`, ending the attempt.
    pub idle_events: VecDeque<MailboxEvent>,
}

impl Default for SessionScript {
    fn default() -> Self {
        Self {
            auth_error: None,
            folders: vec!["INBOX".to_string()],
            uid_validity: Some(42),
            searches: VecDeque::new(),
            idle_events: VecDeque::new(),
        }
    }
}

pub struct ScriptedSession {
    script: SessionScript,
    calls: Arc<SessionCalls>,
}

#[async_trait]
impl MailboxSession for ScriptedSession {
    async fn authenticate(&mut self, _user: &User) -> Result<(), PostboxError> {
        self.calls.auth_attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.auth_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_folders(&mut self) -> Result<Vec<String>, PostboxError> {
        Ok(self.script.folders.clone())
    }

    async fn examine(&mut self, folder: &str) -> Result<FolderStatus, PostboxError> {
        self.calls.examined.lock().unwrap().push(folder.to_string());
        Ok(FolderStatus {
            exists: 0,
            uid_validity: self.script.uid_validity,
        })
    }

    async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>, PostboxError> {
        self.calls
            .search_queries
            .lock()
            .unwrap()
            .push(query.to_string());
        Ok(self.script.searches.pop_front().unwrap_or_default())
    }

    async fn wait_for_event(&mut self, stop: &StopToken) -> Result<MailboxEvent, PostboxError> {
        self.calls.idle_entries.fetch_add(1, Ordering::SeqCst);
        match self.script.idle_events.pop_front() {
            Some(MailboxEvent::Stopped) | None => {
                stop.trigger();
                Ok(MailboxEvent::Stopped)
            }
            Some(event) => Ok(event),
        }
    }

    async fn logout(&mut self) {
        self.calls.logouts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one scripted session per connect; empty -> connect refused.
pub struct ScriptedTransport {
    sessions: Mutex<VecDeque<ScriptedSession>>,
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn connect(
        &self,
        _provider: &ProviderConfig,
    ) -> Result<Box<dyn MailboxSession>, PostboxError> {
        match self.sessions.lock().unwrap().pop_front() {
            Some(session) => Ok(Box::new(session)),
            None => Err(PostboxError::Io("connection refused".to_string())),
        }
    }
}

pub fn test_provider() -> ProviderConfig {
    ProviderConfig {
        host: "imap.example.com".to_string(),
        port: 993,
        tls: true,
        auth: AuthMethod::Password {
            user: "u1@example.com".to_string(),
            password: "hunter2".to_string(),
        },
    }
}

pub fn test_user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        provider: test_provider(),
        last_uid: None,
        last_uid_validity: None,
        last_email_at: None,
        last_login_at: None,
    }
}

/// Fully wired test fixture around one scripted session attempt.
pub struct Harness {
    pub db: DbPool,
    pub daemon: Arc<Daemon>,
    pub processor: Arc<RecordingProcessor>,
    pub calls: Arc<SessionCalls>,
}

impl Harness {
    /// Seed the store with `stored`, script one session, build the daemon.
    pub fn new(stored: &User, script: SessionScript) -> Self {
        let calls = Arc::new(SessionCalls::default());
        let session = ScriptedSession {
            script,
            calls: calls.clone(),
        };
        Self::build(stored, calls, VecDeque::from([session]))
    }

    /// A harness whose transport refuses every connect.
    pub fn refusing_connections(stored: &User) -> Self {
        Self::build(stored, Arc::new(SessionCalls::default()), VecDeque::new())
    }

    fn build(stored: &User, calls: Arc<SessionCalls>, sessions: VecDeque<ScriptedSession>) -> Self {
        let db = create_test_pool();
        initialize_schema(&db.get().unwrap()).unwrap();
        users::upsert_user(&db, stored).unwrap();

        let transport = Arc::new(ScriptedTransport {
            sessions: Mutex::new(sessions),
        });
        let processor = Arc::new(RecordingProcessor::default());
        let daemon = Daemon::new(
            db.clone(),
            &DaemonConfig::default(),
            transport,
            processor.clone(),
        );

        Self {
            db,
            daemon,
            processor,
            calls,
        }
    }

    /// Run one worker attempt for `snapshot` to completion.
    pub async fn run_worker(&self, snapshot: User) -> StopToken {
        let stop = StopToken::new();
        self.daemon.register_worker(&snapshot.id, stop.clone());
        let worker =
            crate::engine::worker::UserWorker::new(self.daemon.clone(), snapshot, stop.clone());
        tokio::time::timeout(Duration::from_secs(5), worker.run())
            .await
            .expect("worker attempt should finish");
        stop
    }

    pub fn stored_user(&self, id: &str) -> User {
        users::get_user(&self.db, id).unwrap().unwrap()
    }
}
