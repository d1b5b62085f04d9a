//! Application state shared between connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix::Addr;

use crate::dispatch::Dispatcher;
use crate::ranking::RankingService;
use crate::store::SessionStore;
use crate::websocket::ChessWebSocket;

pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Live websocket actors, keyed by connection id.
    pub connections: Mutex<HashMap<String, Addr<ChessWebSocket>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>, ranking: Arc<dyn RankingService>) -> AppState {
        AppState {
            dispatcher: Dispatcher::new(store, ranking),
            connections: Mutex::new(HashMap::new()),
        }
    }
}
