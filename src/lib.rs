//! Authoritative server core for real-time two-player chess: the board and
//! rule engine, the session state machine, the matchmaking queue, the
//! session directory and the dispatcher that ties them to a transport.

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod matchmaking;
pub mod models;
pub mod ranking;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;
