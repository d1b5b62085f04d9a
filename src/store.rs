//! Durable-store collaborator seam.
//!
//! The in-memory session is the authority for gameplay; the store holds a
//! mirrored, eventually-consistent copy for history and for reconnection
//! after a restart.

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::models::Session;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Find/save/remove operations over persisted session snapshots, keyed by
/// room code with a uniqueness constraint on that code.
pub trait SessionStore: Send + Sync {
    fn find(&self, room_id: &str) -> Result<Option<Session>, StoreError>;
    /// Upserts the snapshot.
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    fn remove(&self, room_id: &str) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<Session>, StoreError>;
}

/// Reference implementation backed by a hash map; used by standalone runs
/// and tests. Deployments plug in a store talking to real storage.
#[derive(Default)]
pub struct InMemorySessionStore {
    rooms: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> InMemorySessionStore {
        InMemorySessionStore::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn find(&self, room_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.rooms.lock().unwrap().get(room_id).cloned())
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.rooms
            .lock()
            .unwrap()
            .insert(session.room_id.clone(), session.clone());
        Ok(())
    }

    fn remove(&self, room_id: &str) -> Result<(), StoreError> {
        self.rooms.lock().unwrap().remove(room_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.rooms.lock().unwrap().values().cloned().collect())
    }
}
