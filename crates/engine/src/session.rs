//! In-process session registry.
//!
//! Each session holds its [`ConversationState`] behind its own async mutex,
//! so turns of one session run one at a time while different sessions run
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::orchestrator::Engine;
use crate::state::ConversationState;
use crate::turn::{CancelToken, EventSink, TurnError, TurnResult};

/// Maximum number of live sessions; the least recently used is evicted.
const MAX_SESSIONS: usize = 1_000;

struct SessionEntry {
    state: Arc<Mutex<ConversationState>>,
    last_used: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh session id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// The state cell for `session_id`, created on first use.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<ConversationState>> {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_used = Utc::now();
            return entry.state.clone();
        }

        if sessions.len() >= MAX_SESSIONS {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                debug!(session = %id, "Evicting idle session");
                sessions.remove(&id);
            }
        }

        let state = Arc::new(Mutex::new(ConversationState::new(session_id)));
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                state: state.clone(),
                last_used: Utc::now(),
            },
        );
        state
    }

    /// A copy of the session's current state, if it exists.
    pub async fn snapshot(&self, session_id: &str) -> Option<ConversationState> {
        let cell = self.sessions.read().await.get(session_id).map(|e| e.state.clone())?;
        let state = cell.lock().await;
        Some(state.clone())
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Run one turn on `session_id`, waiting for any turn already running
    /// on the same session.
    pub async fn run_turn(
        &self,
        engine: &Engine,
        session_id: &str,
        question: &str,
        events: EventSink,
        cancel: &CancelToken,
    ) -> Result<TurnResult, TurnError> {
        let cell = self.get_or_create(session_id).await;
        let mut state = cell.lock().await;
        engine.run_turn(&mut state, question, events, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_created_once() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("a").await;
        let again = registry.get_or_create("a").await;
        assert!(Arc::ptr_eq(&a, &again));
        registry.get_or_create("b").await;
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn snapshot_sees_committed_state() {
        let registry = SessionRegistry::new();
        assert!(registry.snapshot("a").await.is_none());

        let cell = registry.get_or_create("a").await;
        cell.lock().await.summary = Some("resumen".into());
        let snap = registry.snapshot("a").await.unwrap();
        assert_eq!(snap.session_id, "a");
        assert_eq!(snap.summary.as_deref(), Some("resumen"));
    }

    #[tokio::test]
    async fn remove_forgets_session() {
        let registry = SessionRegistry::new();
        registry.get_or_create("a").await;
        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
        assert!(registry.is_empty().await);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(SessionRegistry::new_id(), SessionRegistry::new_id());
    }
}
