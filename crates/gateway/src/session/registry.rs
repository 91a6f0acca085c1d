//! Session registry mapping browser clients to their remote session.
//!
//! The registry is the only long-lived owner of sessions. Each client id maps
//! to zero or one session; opening a new one tears the old one down first.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::mpsc;

use super::remote::{RemoteSession, SessionOptions};
use super::{ClientId, SessionEvent};
use crate::ssh::{Connector, Credentials};

/// Upper bound on waiting for sessions to close during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Thread-safe client to session map.
pub struct SessionRegistry<C: Connector> {
    connector: Arc<C>,
    options: SessionOptions,
    sessions: DashMap<ClientId, RemoteSession>,
}

impl<C: Connector> SessionRegistry<C> {
    pub fn new(connector: C, options: SessionOptions) -> Self {
        Self {
            connector: Arc::new(connector),
            options,
            sessions: DashMap::new(),
        }
    }

    /// Start a new session for `client_id`, replacing any existing one.
    ///
    /// The session is registered immediately, before it is ready. When two
    /// opens race for the same client, whichever entry is displaced is torn
    /// down, so exactly one session survives.
    pub fn open(
        &self,
        client_id: &str,
        credentials: Credentials,
    ) -> (RemoteSession, mpsc::Receiver<SessionEvent>) {
        if let Some((_, previous)) = self.sessions.remove(client_id) {
            tracing::info!(
                client_id = %client_id,
                session_id = %previous.id(),
                "Replacing existing session"
            );
            previous.disconnect();
        }

        let (session, events) =
            RemoteSession::spawn(Arc::clone(&self.connector), credentials, self.options.clone());

        if let Some(displaced) = self
            .sessions
            .insert(client_id.to_string(), session.clone())
        {
            tracing::debug!(
                client_id = %client_id,
                session_id = %displaced.id(),
                "Concurrent open displaced a session"
            );
            displaced.disconnect();
        }

        (session, events)
    }

    /// Current session of `client_id`, if any.
    pub fn get(&self, client_id: &str) -> Option<RemoteSession> {
        self.sessions
            .get(client_id)
            .map(|entry| entry.value().clone())
    }

    /// Disconnect and forget the session of `client_id`. No-op when absent.
    pub fn close(&self, client_id: &str) {
        if let Some((_, session)) = self.sessions.remove(client_id) {
            tracing::info!(
                client_id = %client_id,
                session_id = %session.id(),
                "Closing session"
            );
            session.disconnect();
        }
    }

    /// Forget the entry only if it still holds `session_id`.
    ///
    /// Used when a session closes on its own, so a late close never evicts
    /// the session that replaced it.
    pub fn remove_if_current(&self, client_id: &str, session_id: &str) -> bool {
        self.sessions
            .remove_if(client_id, |_, session| session.id() == session_id)
            .is_some()
    }

    /// Disconnect every session and clear the registry.
    ///
    /// Waits a bounded time for the sessions to reach `Closed`.
    pub async fn shutdown(&self) {
        let mut closing = Vec::new();
        self.sessions.retain(|_, session| {
            session.disconnect();
            closing.push(session.clone());
            false
        });

        if closing.is_empty() {
            return;
        }
        tracing::info!(count = closing.len(), "Disconnecting all sessions");

        let all_closed = join_all(closing.iter().map(|session| session.closed()));
        if tokio::time::timeout(SHUTDOWN_GRACE, all_closed).await.is_err() {
            tracing::warn!("Timed out waiting for sessions to close");
        }
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
