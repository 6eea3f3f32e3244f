//! Short-term conversational state, keyed by session id. An explicit store
//! with one async lock per session: updates for the same conversation are
//! serialized, different conversations never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use cloudpilot_core::{Provider, ResolvedIntent, Timeframe};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionContext {
    pub session_id: String,
    pub last_provider: Option<Provider>,
    pub last_timeframe: Option<Timeframe>,
    pub last_resource_id: Option<String>,
    /// Most recent resolved intents, oldest first, bounded by the store's
    /// history limit.
    pub history: Vec<ResolvedIntent>,
}

impl SessionContext {
    pub fn is_empty(&self) -> bool {
        self.last_provider.is_none()
            && self.last_timeframe.is_none()
            && self.last_resource_id.is_none()
            && self.history.is_empty()
    }
}

struct SessionEntry {
    context: SessionContext,
    last_update: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionEntry>>>>,
    idle_timeout: Duration,
    history_limit: usize,
}

impl SessionStore {
    pub fn new(idle_timeout_secs: u64, history_limit: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout: Duration::seconds(idle_timeout_secs as i64),
            history_limit: history_limit.max(1),
        }
    }

    /// Immutable view of a session's context, creating an empty one on first
    /// use.
    pub async fn snapshot(&self, session_id: &str) -> SessionContext {
        let entry = self.entry(session_id).await;
        let guard = entry.lock().await;
        guard.context.clone()
    }

    /// Appends a successfully resolved intent and refreshes the `last_*`
    /// fields from its parameters.
    pub async fn record(&self, session_id: &str, intent: &ResolvedIntent) {
        self.record_at(session_id, intent, Utc::now()).await;
    }

    pub(crate) async fn record_at(
        &self,
        session_id: &str,
        intent: &ResolvedIntent,
        now: DateTime<Utc>,
    ) {
        let entry = self.entry(session_id).await;
        let mut guard = entry.lock().await;

        guard.context.last_provider = Some(intent.provider);
        if let Some(timeframe) = intent.timeframe() {
            guard.context.last_timeframe = Some(timeframe);
        }
        if let Some(resource_id) = intent.param("resource_id") {
            guard.context.last_resource_id = Some(resource_id.to_string());
        }

        guard.context.history.push(intent.clone());
        let overflow = guard.context.history.len().saturating_sub(self.history_limit);
        if overflow > 0 {
            guard.context.history.drain(..overflow);
        }

        guard.last_update = now;
    }

    /// Removes sessions whose last update is older than the idle timeout.
    /// Returns the number of evicted sessions.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut expired = Vec::new();

        for (session_id, entry) in sessions.iter() {
            let guard = entry.lock().await;
            if now - guard.last_update > self.idle_timeout {
                expired.push(session_id.clone());
            }
        }

        for session_id in &expired {
            sessions.remove(session_id);
        }

        expired.len()
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn entry(&self, session_id: &str) -> Arc<Mutex<SessionEntry>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SessionEntry {
                    context: SessionContext {
                        session_id: session_id.to_string(),
                        ..SessionContext::default()
                    },
                    last_update: Utc::now(),
                }))
            })
            .clone()
    }
}
