//! Per-contact session storage
//!
//! Writers are serialized per contact: [`SessionStore::lock`] hands out an
//! owned write guard and the next writer for the same id waits until it is
//! dropped. Different contacts never contend. Reads clone a snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use quote_intake_core::{Error, QuoteRecord, Result, Session};

/// Exclusive access to one session; dropping it commits
pub type SessionGuard = OwnedRwLockWriteGuard<Session>;

pub type SessionMutation = Box<dyn FnOnce(&mut Session) + Send>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Snapshot of the session, created in `Initial` on first contact
    async fn get_or_create(&self, id: &str, now: DateTime<Utc>) -> Result<Session>;

    async fn read(&self, id: &str) -> Result<Option<Session>>;

    /// Exclusive access, creating the session if needed
    async fn lock(&self, id: &str, now: DateTime<Utc>) -> Result<SessionGuard>;

    /// Exclusive access to a session that must already exist
    async fn lock_existing(&self, id: &str) -> Result<SessionGuard>;

    async fn list(&self) -> Result<Vec<Session>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` under the per-contact lock and return the result
    async fn mutate(&self, id: &str, now: DateTime<Utc>, f: SessionMutation) -> Result<Session> {
        let mut guard = self.lock(id, now).await?;
        f(&mut *guard);
        Ok(guard.clone())
    }

    /// Start the conversation over. History and transcript stay.
    async fn reset(&self, id: &str) -> Result<Session> {
        let mut guard = self.lock_existing(id).await?;
        guard.reset();
        Ok(guard.clone())
    }

    async fn append_history(&self, id: &str, record: QuoteRecord) -> Result<()> {
        let mut guard = self.lock_existing(id).await?;
        guard.append_history(record);
        Ok(())
    }
}

/// Process-local store
///
/// Each session sits behind its own `RwLock`; the map itself is only
/// touched to find or insert the cell, never held across an await.
pub struct InMemorySessionStore {
    sessions: DashMap<String, Arc<RwLock<Session>>>,
    max_sessions: usize,
}

impl InMemorySessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    fn cell(&self, id: &str, now: DateTime<Utc>) -> Result<Arc<RwLock<Session>>> {
        if id.trim().is_empty() {
            return Err(Error::InvalidOperation("contact id is empty".to_string()));
        }
        if let Some(cell) = self.sessions.get(id) {
            return Ok(cell.value().clone());
        }
        if self.sessions.len() >= self.max_sessions {
            tracing::error!(max_sessions = self.max_sessions, "Session store full");
            return Err(Error::SessionStoreUnavailable(format!(
                "maximum of {} sessions reached",
                self.max_sessions
            )));
        }

        let cell = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(contact_id = %id, "Creating session");
                Arc::new(RwLock::new(Session::new(id, now)))
            })
            .value()
            .clone();
        Ok(cell)
    }

    fn existing(&self, id: &str) -> Result<Arc<RwLock<Session>>> {
        self.sessions
            .get(id)
            .map(|cell| cell.value().clone())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, id: &str, now: DateTime<Utc>) -> Result<Session> {
        let cell = self.cell(id, now)?;
        let session = cell.read().await;
        Ok(session.clone())
    }

    async fn read(&self, id: &str) -> Result<Option<Session>> {
        let cell = match self.sessions.get(id) {
            Some(cell) => cell.value().clone(),
            None => return Ok(None),
        };
        let session = cell.read().await;
        Ok(Some(session.clone()))
    }

    async fn lock(&self, id: &str, now: DateTime<Utc>) -> Result<SessionGuard> {
        let cell = self.cell(id, now)?;
        Ok(cell.write_owned().await)
    }

    async fn lock_existing(&self, id: &str) -> Result<SessionGuard> {
        let cell = self.existing(id)?;
        Ok(cell.write_owned().await)
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let cells: Vec<_> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        let mut sessions = Vec::with_capacity(cells.len());
        for cell in cells {
            sessions.push(cell.read().await.clone());
        }
        sessions.sort_by(|a, b| b.last_interaction_at().cmp(&a.last_interaction_at()));
        Ok(sessions)
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
