//! Environment-driven server configuration.

use std::env;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Reads `CHESS_ARENA_HOST` and `CHESS_ARENA_PORT`, falling back to the
    /// defaults when unset or unparsable.
    pub fn from_env() -> ServerConfig {
        let host = env::var("CHESS_ARENA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var("CHESS_ARENA_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        ServerConfig { host, port }
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
