use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::ServerError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BACKLOG: u32 = 100;
pub const HISTORY_CAPACITY: usize = 1000;
pub const REPLAY_LIMIT: usize = 50;
pub const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub history_capacity: usize,
    /// How many stored messages a newcomer is sent on join.
    pub replay_limit: usize,
    pub read_buffer_size: usize,
    /// Upper bound on how long `stop` waits for sessions to deregister.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port,
            backlog: DEFAULT_BACKLOG,
            history_capacity: HISTORY_CAPACITY,
            replay_limit: REPLAY_LIMIT,
            read_buffer_size: READ_BUFFER_SIZE,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_replay_limit(mut self, limit: usize) -> Self {
        self.replay_limit = limit;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.host.clone()))?;

        Ok(SocketAddr::new(ip, self.port))
    }
}
