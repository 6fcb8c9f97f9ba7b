use std::{collections::VecDeque, time::Duration};

use tokio::sync::Mutex;

use super::ServerSession;
use crate::bson::Document;

/// How long the server keeps an idle session alive.
const LOGICAL_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug)]
pub(crate) struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Self {
            pool: Default::default(),
        }
    }

    /// Checks out a server session from the pool. Before doing so, it first clears out all the
    /// expired sessions. If there are no sessions left in the pool after clearing expired ones
    /// out, a new session will be created.
    pub(crate) async fn check_out(&self) -> ServerSession {
        let mut pool = self.pool.lock().await;
        while let Some(session) = pool.pop_front() {
            if session.is_about_to_expire(LOGICAL_SESSION_TIMEOUT) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks in a server session to the pool. If it is about to expire or is dirty, it will be
    /// discarded.
    ///
    /// This method will also clear out any expired session from the back of the pool.
    pub(crate) async fn check_in(&self, session: ServerSession) {
        let mut pool = self.pool.lock().await;
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_about_to_expire(LOGICAL_SESSION_TIMEOUT) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.dirty && !session.is_about_to_expire(LOGICAL_SESSION_TIMEOUT) {
            pool.push_front(session);
        }
    }

    /// Empties the pool, returning the ids of the sessions it held.
    pub(crate) async fn drain(&self) -> Vec<Document> {
        self.pool
            .lock()
            .await
            .drain(..)
            .map(|session| session.id)
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, id: &Document) -> bool {
        self.pool.lock().await.iter().any(|s| &s.id == id)
    }
}
