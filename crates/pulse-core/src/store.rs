//! Hit persistence for offline tracking
//!
//! Offline sessions append every generated hit to a [`HitStore`] keyed by the
//! local session id, and the batch reporter reads the whole run back once the
//! session ends. The in-memory store is the default; embedders can supply a
//! durable implementation to survive process restarts.

use crate::error::{Error, Result};
use crate::hit::MediaHit;
use std::collections::HashMap;
use std::sync::Mutex;

pub trait HitStore: Send + Sync {
    /// Appends one hit to the session's run, preserving arrival order.
    fn persist_hit(&self, session_id: &str, hit: MediaHit) -> Result<()>;

    /// Returns the session's hits in the order they were persisted.
    fn get_hits(&self, session_id: &str) -> Result<Vec<MediaHit>>;

    /// Drops everything persisted for the session.
    fn delete_hits(&self, session_id: &str) -> Result<()>;

    /// Session ids that still have persisted hits, e.g. runs interrupted by
    /// a crash that should be reported on startup.
    fn persisted_session_ids(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemoryHitStore {
    sessions: Mutex<HashMap<String, Vec<MediaHit>>>,
}

impl InMemoryHitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<MediaHit>>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Store("hit store lock poisoned".to_string()))
    }
}

impl HitStore for InMemoryHitStore {
    fn persist_hit(&self, session_id: &str, hit: MediaHit) -> Result<()> {
        self.lock()?
            .entry(session_id.to_string())
            .or_default()
            .push(hit);
        Ok(())
    }

    fn get_hits(&self, session_id: &str) -> Result<Vec<MediaHit>> {
        Ok(self.lock()?.get(session_id).cloned().unwrap_or_default())
    }

    fn delete_hits(&self, session_id: &str) -> Result<()> {
        self.lock()?.remove(session_id);
        Ok(())
    }

    fn persisted_session_ids(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
