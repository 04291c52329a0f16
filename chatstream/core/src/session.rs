//! Session Management
//!
//! Conversation sessions and the cache that keeps recently used ones hot.
//!
//! # Design Philosophy
//!
//! The persistent store owns sessions. [`SessionCache`] holds
//! non-authoritative copies in a [`RecencyCache`] so the orchestrator can
//! resolve the active session without a store round trip on every turn.
//!
//! - Store I/O never happens while the cache lock is held
//! - Writes go through the cache first, then to the store
//! - A session that exists nowhere is created in the cache and reaches the
//!   store on its first save

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheStats, RecencyCache};
use crate::messages::SessionId;

/// Display name given to sessions created on demand
pub const DEFAULT_SESSION_NAME: &str = "New chat";

/// Free-form session metadata
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    /// Model used for the most recent turn
    pub default_model: Option<String>,
    /// Unsent composer text
    pub last_draft: Option<String>,
    /// Short text shown in session lists
    pub preview: Option<String>,
    /// Anything else a surface wants to remember
    pub extra: HashMap<String, String>,
}

/// A conversation session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntity {
    /// Unique session ID
    pub id: SessionId,
    /// Display name
    pub name: String,
    /// When the session was created (Unix timestamp ms)
    pub created_at: u64,
    /// When the session last changed (Unix timestamp ms)
    pub updated_at: u64,
    /// Pinned to the top of lists
    pub pinned: bool,
    /// Hidden from the default list
    pub archived: bool,
    /// Session metadata
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl SessionEntity {
    /// Create a session named [`DEFAULT_SESSION_NAME`]
    pub fn new(id: SessionId) -> Self {
        Self::with_name(id, DEFAULT_SESSION_NAME)
    }

    /// Create a session with a display name
    pub fn with_name(id: SessionId, name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id,
            name: name.into(),
            created_at: now,
            updated_at: now,
            pinned: false,
            archived: false,
            metadata: SessionMetadata::default(),
        }
    }

    /// Update the last-changed timestamp
    ///
    /// Never moves backwards, even if the clock does.
    pub fn touch(&mut self) {
        self.updated_at = now_ms().max(self.updated_at);
    }
}

/// Errors reported by a [`SessionStore`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store cannot be reached right now
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected or failed the operation
    #[error("session store error: {0}")]
    Backend(String),
}

/// Persistent home of sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, `None` if it does not exist
    async fn load(&self, id: &SessionId) -> Result<Option<SessionEntity>, StoreError>;

    /// Insert or replace a session
    async fn save(&self, session: &SessionEntity) -> Result<(), StoreError>;
}

/// Process-local [`SessionStore`]
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, SessionEntity>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl InMemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `sessions`
    pub fn with_sessions(sessions: impl IntoIterator<Item = SessionEntity>) -> Self {
        let store = Self::new();
        {
            let mut map = store.sessions.lock();
            for session in sessions {
                map.insert(session.id.clone(), session);
            }
        }
        store
    }

    /// Stored copy of a session
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SessionEntity> {
        self.sessions.lock().get(id).cloned()
    }

    /// Number of stored sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `load` calls served
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of `save` calls served
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionEntity>, StoreError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.get(id))
    }

    async fn save(&self, session: &SessionEntity) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }
}

/// Recency cache of sessions in front of a [`SessionStore`]
pub struct SessionCache<S> {
    cache: RecencyCache<SessionId, SessionEntity>,
    store: Arc<S>,
}

impl<S: SessionStore> SessionCache<S> {
    /// Create a cache holding at most `capacity` sessions
    pub fn new(store: Arc<S>, capacity: usize) -> Self {
        Self {
            cache: RecencyCache::new(capacity),
            store,
        }
    }

    /// Resolve a session: cache, then store, then a fresh one
    ///
    /// The store is consulted without holding the cache lock. If another
    /// caller filled the slot meanwhile, its copy wins.
    ///
    /// # Errors
    ///
    /// Returns the store's error when the session is not cached and the
    /// store cannot be read.
    pub async fn load(&self, id: &SessionId) -> Result<SessionEntity, StoreError> {
        if let Some(session) = self.cache.get(id) {
            return Ok(session);
        }

        let stored = self.store.load(id).await?;
        let found = stored.is_some();
        let session = self.cache.get_or_create(id.clone(), move |id| {
            stored.unwrap_or_else(|| SessionEntity::new(id.clone()))
        });
        tracing::debug!(session_id = %id, found, "Session cache miss");
        Ok(session)
    }

    /// Write a session through the cache to the store
    ///
    /// # Errors
    ///
    /// Returns the store's error. The cache keeps the new copy either way.
    pub async fn save(&self, session: &SessionEntity) -> Result<(), StoreError> {
        if let Some((evicted, _)) = self.cache.put(session.id.clone(), session.clone()) {
            tracing::debug!(session_id = %evicted, "Session evicted from cache");
        }
        self.store.save(session).await
    }

    /// Load, mutate, touch and save a session
    ///
    /// Concurrent updates to the same session are last-writer-wins.
    ///
    /// # Errors
    ///
    /// Returns the store's error from either the load or the save.
    pub async fn update<F>(&self, id: &SessionId, mutate: F) -> Result<SessionEntity, StoreError>
    where
        F: FnOnce(&mut SessionEntity) + Send,
    {
        let mut session = self.load(id).await?;
        mutate(&mut session);
        session.touch();
        self.save(&session).await?;
        Ok(session)
    }

    /// Change the display name
    ///
    /// # Errors
    ///
    /// See [`SessionCache::update`].
    pub async fn rename(
        &self,
        id: &SessionId,
        name: impl Into<String> + Send,
    ) -> Result<SessionEntity, StoreError> {
        let name = name.into();
        self.update(id, move |session| session.name = name).await
    }

    /// Pin or unpin
    ///
    /// # Errors
    ///
    /// See [`SessionCache::update`].
    pub async fn set_pinned(&self, id: &SessionId, pinned: bool) -> Result<SessionEntity, StoreError> {
        self.update(id, move |session| session.pinned = pinned).await
    }

    /// Archive or restore
    ///
    /// # Errors
    ///
    /// See [`SessionCache::update`].
    pub async fn set_archived(
        &self,
        id: &SessionId,
        archived: bool,
    ) -> Result<SessionEntity, StoreError> {
        self.update(id, move |session| session.archived = archived)
            .await
    }

    /// Remember or clear unsent composer text
    ///
    /// # Errors
    ///
    /// See [`SessionCache::update`].
    pub async fn set_draft(
        &self,
        id: &SessionId,
        draft: Option<String>,
    ) -> Result<SessionEntity, StoreError> {
        self.update(id, move |session| session.metadata.last_draft = draft)
            .await
    }

    /// Cached copy without touching recency or the store
    #[must_use]
    pub fn cached(&self, id: &SessionId) -> Option<SessionEntity> {
        self.cache.peek(id)
    }

    /// Drop a session from the cache only
    pub fn invalidate(&self, id: &SessionId) -> bool {
        self.cache.remove(id).is_some()
    }

    /// Number of cached sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cached session ids, least to most recently used
    #[must_use]
    pub fn keys(&self) -> Vec<SessionId> {
        self.cache.keys()
    }

    /// Copy of the cached sessions, least to most recently used
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SessionId, SessionEntity)> {
        self.cache.snapshot()
    }

    /// Cache counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The backing store
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S> std::fmt::Debug for SessionCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Get current timestamp in milliseconds
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
