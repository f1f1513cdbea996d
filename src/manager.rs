//! Session ownership and lifecycle.
//!
//! [`ConnectionManager`] owns the only connection to the server. It connects,
//! authenticates, hands the session to a [`MailboxWatcher`] and then waits for
//! new-mail notifications until the session ends or fails. Progress is published
//! in two ways:
//!
//! - [`LifecycleEvent`]s on an unbounded channel (`Ready`, `Mail`, `Error`, `End`)
//! - the current [`SessionState`] on a watch channel
//!
//! # Example
//!
//! ```no_run
//! use mail_ingest::{
//!     AttachmentStore, ConnectionManager, LifecycleEvent, MailboxWatcher, MessageFetcher,
//!     WatcherConfig,
//! };
//!
//! # async fn example() -> mail_ingest::Result<()> {
//! let config = WatcherConfig::from_env()?;
//! let fetcher = MessageFetcher::new(AttachmentStore::new(&config.attachments_dir));
//! let watcher = MailboxWatcher::new(&config.mailbox, config.search.clone(), fetcher);
//!
//! let mut lifecycle = ConnectionManager::spawn(config, watcher);
//! while let Some(event) = lifecycle.next_event().await {
//!     if let LifecycleEvent::Error(e) = event {
//!         eprintln!("session failed: {e}");
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::WatcherConfig;
use crate::connection::{self, TransportConfig};
use crate::error::{Error, Result};
use crate::session::{self, AuthConfig, ImapMailbox, MailboxEvent, MailboxSession};
use crate::sink::AttachmentSink;
use crate::watcher::MailboxWatcher;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Where the session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not connected yet.
    Disconnected,
    /// Connecting and authenticating.
    Connecting,
    /// Authenticated, running the startup batch.
    Ready,
    /// Waiting for new mail.
    Idle,
    /// Processing a batch after a notification.
    Fetching,
    /// The server closed the session in an orderly way.
    Ended,
    /// The session hit an escalated error.
    Failed,
}

impl SessionState {
    /// Returns `true` once the session can make no further progress.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }
}

/// Events published over the life of a session.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// Connected and authenticated.
    Ready,
    /// The server reported `count` new messages.
    Mail {
        /// Number of new messages.
        count: u32,
    },
    /// The session failed. No further events follow; an `End` is not implied.
    Error(Error),
    /// The server closed the session in an orderly way.
    End,
}

/// Receiving side of a session: its events, its state and, when spawned, its task.
#[derive(Debug)]
pub struct Lifecycle {
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<SessionState>>,
}

impl Lifecycle {
    /// Waits for the next event. Returns `None` once the session is gone and every
    /// event has been read.
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.events.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<LifecycleEvent> {
        self.events.try_recv().ok()
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits for a spawned session to finish and returns its final state.
    ///
    /// Returns the current state immediately if the session was not spawned.
    pub async fn join(&mut self) -> SessionState {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "Session task did not complete");
                    SessionState::Failed
                }
            },
            None => self.state(),
        }
    }

    /// Stops a spawned session without logging out.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Owns the connection and drives the session through its lifecycle.
#[derive(Debug)]
pub struct ConnectionManager {
    config: WatcherConfig,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    state: watch::Sender<SessionState>,
}

impl ConnectionManager {
    /// Creates a manager and the [`Lifecycle`] handle observing it.
    #[must_use]
    pub fn new(config: WatcherConfig) -> (Self, Lifecycle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let manager = Self {
            config,
            events: events_tx,
            state: state_tx,
        };
        let lifecycle = Lifecycle {
            events: events_rx,
            state: state_rx,
            task: None,
        };

        (manager, lifecycle)
    }

    /// Runs a session for `config` on its own task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<K>(config: WatcherConfig, watcher: MailboxWatcher<K>) -> Lifecycle
    where
        K: AttachmentSink + 'static,
    {
        let (manager, mut lifecycle) = Self::new(config);
        lifecycle.task = Some(tokio::spawn(manager.run(watcher)));
        lifecycle
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Connects, runs the session to completion and returns its final state.
    ///
    /// Escalated errors are published as [`LifecycleEvent::Error`].
    #[instrument(
        name = "ConnectionManager::run",
        skip_all,
        fields(user = %self.config.user(), imap_host = %self.config.host)
    )]
    pub async fn run<K: AttachmentSink>(self, watcher: MailboxWatcher<K>) -> SessionState {
        let outcome = match self.connect().await {
            Ok(mut session) => {
                self.emit(LifecycleEvent::Ready);
                self.drive(&mut session, &watcher).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => SessionState::Ended,
            Err(e) => {
                self.fail(e);
                SessionState::Failed
            }
        }
    }

    /// Opens the transport and authenticates.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, TLS handshake or login fails or times out.
    #[instrument(name = "ConnectionManager::connect", skip_all)]
    pub async fn connect(&self) -> Result<ImapMailbox> {
        self.set_state(SessionState::Connecting);

        let config = &self.config;
        let target_addr = config.server_address();
        let timeouts = &config.timeouts;

        let transport = TransportConfig {
            host: &config.host,
            target_addr: &target_addr,
            tls: config.tls,
            accept_invalid_certs: config.accept_invalid_certs,
        };

        let stream = tokio::time::timeout(timeouts.connect, connection::establish(&transport))
            .await
            .map_err(|_| Error::ConnectTimeout {
                target: target_addr.clone(),
                timeout: timeouts.connect,
            })??;

        debug!("Transport established");

        let auth = AuthConfig {
            user: config.user(),
            password: config.password(),
        };

        let session = tokio::time::timeout(timeouts.auth, session::authenticate(stream, &auth))
            .await
            .map_err(|_| Error::AuthTimeout {
                user: config.user().to_string(),
                timeout: timeouts.auth,
            })??;

        info!("Connected and authenticated");

        Ok(ImapMailbox::new(session, config))
    }

    /// Runs the startup batch, then processes notifications until the session ends.
    ///
    /// Publishes `Mail` for every notification and `End` when the server closes the
    /// session. Does not publish `Ready` or `Error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be opened or the session breaks.
    #[instrument(name = "ConnectionManager::drive", skip_all)]
    pub async fn drive<S, K>(&self, session: &mut S, watcher: &MailboxWatcher<K>) -> Result<()>
    where
        S: MailboxSession,
        K: AttachmentSink,
    {
        self.set_state(SessionState::Ready);
        let report = watcher.on_ready(session).await?;
        debug!(?report, "Startup batch done");

        loop {
            self.set_state(SessionState::Idle);

            match session.wait_for_mail().await? {
                MailboxEvent::NewMail { count } => {
                    self.emit(LifecycleEvent::Mail { count });
                    self.set_state(SessionState::Fetching);
                    let report = watcher.on_mail(session, count).await;
                    debug!(?report, "Notification batch done");
                }
                MailboxEvent::KeepaliveElapsed => {
                    debug!("Re-entering IDLE");
                }
                MailboxEvent::Closed => {
                    info!("Server closed the session");
                    if let Err(e) = session.logout().await {
                        debug!(error = %e, "Logout after close failed");
                    }
                    self.set_state(SessionState::Ended);
                    self.emit(LifecycleEvent::End);
                    return Ok(());
                }
            }
        }
    }

    fn fail(&self, e: Error) {
        error!(error = %e, category = %e.category(), retryable = e.is_retryable(), "Session failed");
        self.set_state(SessionState::Failed);
        self.emit(LifecycleEvent::Error(e));
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: LifecycleEvent) {
        // Nobody listening is not an error; the session keeps running.
        let _ = self.events.send(event);
    }
}
