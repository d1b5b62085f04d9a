//! Registry of live sessions: room-code allocation, the in-memory cache in
//! front of the durable store, and the persistence retry buffer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use rand::Rng;
use uuid::Uuid;

use crate::error::GameError;
use crate::models::{RoomSummary, Session, SessionStatus};
use crate::store::SessionStore;

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: u32 = 32;
/// Page size for the joinable-room listing.
const LIST_PAGE_SIZE: usize = 20;

/// Owns the authoritative session objects. Each session sits behind its own
/// mutex, the unit of mutual exclusion for everything that touches it;
/// different sessions proceed in parallel.
pub struct SessionDirectory {
    cache: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    store: Arc<dyn SessionStore>,
    /// Snapshots whose save failed, retried on later operations.
    pending: Mutex<Vec<Session>>,
}

impl SessionDirectory {
    pub fn new(store: Arc<dyn SessionStore>) -> SessionDirectory {
        SessionDirectory {
            cache: Mutex::new(HashMap::new()),
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())] as char)
            .collect()
    }

    /// Allocates a collision-free room code, seats the creator and persists
    /// the new waiting session.
    pub fn create(
        &self,
        user_id: Uuid,
        username: &str,
        conn: &str,
    ) -> Result<(String, Arc<Mutex<Session>>), GameError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = Self::generate_code();
            if self.cache.lock().unwrap().contains_key(&code) {
                continue;
            }
            match self.store.find(&code) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    // the live directory stays authoritative when the store
                    // cannot answer
                    warn!("room-code uniqueness check against the store failed: {}", e);
                }
            }
            let mut session = Session::new(code.clone());
            session.join(user_id, username, conn)?;
            let session = Arc::new(Mutex::new(session));
            self.cache
                .lock()
                .unwrap()
                .insert(code.clone(), session.clone());
            self.persist(&session.lock().unwrap());
            info!("created room {} for {}", code, username);
            return Ok((code, session));
        }
        Err(GameError::Transient(
            "could not allocate a unique room code".into(),
        ))
    }

    /// Serves from the cache, falling back to the durable store. Only
    /// sessions that are `playing` are promoted into the cache, which keeps
    /// the warm set bounded.
    pub fn get(&self, room_id: &str) -> Result<Option<Arc<Mutex<Session>>>, GameError> {
        if let Some(found) = self.cache.lock().unwrap().get(room_id) {
            return Ok(Some(found.clone()));
        }
        let loaded = match self.store.find(room_id) {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(None),
            Err(e) => return Err(GameError::Transient(e.to_string())),
        };
        if let Err(reason) = loaded.board.validate() {
            return Err(GameError::Fatal(format!(
                "persisted session {} is corrupted: {}",
                room_id, reason
            )));
        }
        let playing = loaded.status == SessionStatus::Playing;
        let session = Arc::new(Mutex::new(loaded));
        if playing {
            self.cache
                .lock()
                .unwrap()
                .insert(room_id.to_string(), session.clone());
        }
        Ok(Some(session))
    }

    /// Keeps a session warm after it changed hands, e.g. a join brought a
    /// cold room back to life.
    pub fn admit(&self, room_id: &str, session: &Arc<Mutex<Session>>) {
        self.cache
            .lock()
            .unwrap()
            .insert(room_id.to_string(), session.clone());
    }

    pub fn evict(&self, room_id: &str) {
        if self.cache.lock().unwrap().remove(room_id).is_some() {
            info!("evicted room {} from the live directory", room_id);
        }
    }

    /// Drops a half-created room after a failed matchmaking attempt.
    pub fn discard(&self, room_id: &str) {
        self.evict(room_id);
        if let Err(e) = self.store.remove(room_id) {
            warn!("discarding room {} from the store failed: {}", room_id, e);
        }
    }

    /// Waiting rooms with an open seat, most recent first, one page worth.
    pub fn list_joinable(&self) -> Vec<RoomSummary> {
        let mut rooms: HashMap<String, Session> = match self.store.list() {
            Ok(list) => list
                .into_iter()
                .map(|session| (session.room_id.clone(), session))
                .collect(),
            Err(e) => {
                warn!("listing rooms from the store failed: {}", e);
                HashMap::new()
            }
        };
        // the live copies win over whatever the store last saw
        let cached: Vec<(String, Arc<Mutex<Session>>)> = self
            .cache
            .lock()
            .unwrap()
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();
        for (id, session) in cached {
            rooms.insert(id, session.lock().unwrap().clone());
        }

        let mut joinable: Vec<Session> = rooms
            .into_values()
            .filter(|session| session.status == SessionStatus::Waiting && !session.is_full())
            .collect();
        joinable.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        joinable.truncate(LIST_PAGE_SIZE);
        joinable
            .into_iter()
            .map(|session| RoomSummary {
                room_id: session.room_id.clone(),
                player1: session.player1.as_ref().map(|p| p.username.clone()),
                player2: session.player2.as_ref().map(|p| p.username.clone()),
                created_at: session.created_at,
            })
            .collect()
    }

    /// Live sessions holding the given connection, for the disconnect sweep.
    pub fn sessions_for_connection(&self, conn: &str) -> Vec<(String, Arc<Mutex<Session>>)> {
        let candidates: Vec<(String, Arc<Mutex<Session>>)> = self
            .cache
            .lock()
            .unwrap()
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();
        candidates
            .into_iter()
            .filter(|(_, session)| session.lock().unwrap().has_connection(conn))
            .collect()
    }

    /// Mirrors a committed snapshot to the store. Failure never rolls the
    /// in-memory session back; the snapshot is parked and retried later.
    pub fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(session) {
            warn!(
                "persisting room {} failed, parking snapshot for retry: {}",
                session.room_id, e
            );
            let mut pending = self.pending.lock().unwrap();
            pending.retain(|parked| parked.room_id != session.room_id);
            pending.push(session.clone());
        }
    }

    /// Retries parked snapshots; called at the top of every dispatch.
    pub fn flush_pending(&self) {
        let parked: Vec<Session> = std::mem::take(&mut *self.pending.lock().unwrap());
        for snapshot in parked {
            self.persist(&snapshot);
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
