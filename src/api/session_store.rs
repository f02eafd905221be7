//! In-memory session store (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::session::Session;

/// A conversation plus the credential supplied for it.
pub struct ChatSession {
    pub session: Session,
    /// Lives only in process memory; never serialized.
    pub api_key: Option<String>,
}

impl ChatSession {
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Store a key. Blank input clears it.
    pub fn set_api_key(&mut self, key: &str) {
        let key = key.trim();
        self.api_key = if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        };
    }
}

pub type SharedSession = Arc<Mutex<ChatSession>>;

struct StoredSession {
    session: SharedSession,
    last_active: Instant,
}

/// Sessions idle for longer than `idle_ttl` are evicted, key included.
#[derive(Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, StoredSession>>>,
    idle_ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }

    pub async fn create(&self, greeting: &str) -> SharedSession {
        let session = Session::new(greeting);
        let id = session.id;
        let shared = Arc::new(Mutex::new(ChatSession {
            session,
            api_key: None,
        }));
        self.sessions.write().await.insert(
            id,
            StoredSession {
                session: shared.clone(),
                last_active: Instant::now(),
            },
        );
        tracing::debug!(session_id = %id, "Session created");
        shared
    }

    /// Look up a session and mark it active.
    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions.get_mut(&id)?;
        stored.last_active = Instant::now();
        Some(stored.session.clone())
    }

    /// Mark a session active without handing it out.
    pub async fn touch(&self, id: Uuid) {
        if let Some(stored) = self.sessions.write().await.get_mut(&id) {
            stored.last_active = Instant::now();
        }
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// Drop sessions idle for at least `idle_ttl`. A session whose lock is
    /// held has a run in flight and is kept. Returns how many were dropped.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| {
            stored.last_active.elapsed() < self.idle_ttl || stored.session.try_lock().is_err()
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Run `evict_idle` every `every` on a background task.
    pub fn spawn_eviction(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                store.evict_idle().await;
            }
        })
    }
}
