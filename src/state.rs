use std::sync::Arc;
use tokio::sync::watch;

use crate::broadcast::BroadcastEngine;
use crate::config::ServerConfig;
use crate::history::MessageHistory;
use crate::registry::ClientRegistry;

/// What every connection task shares with the server.
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<ClientRegistry>,
    pub history: Arc<MessageHistory>,
    pub broadcast: BroadcastEngine,
    pub replay_limit: usize,
    pub read_buffer_size: usize,
    pub shutdown: watch::Receiver<bool>,
}

impl ServerState {
    pub fn new(config: &ServerConfig, shutdown: watch::Receiver<bool>) -> Self {
        let registry = Arc::new(ClientRegistry::new());

        Self {
            broadcast: BroadcastEngine::new(registry.clone()),
            registry,
            history: Arc::new(MessageHistory::new(config.history_capacity)),
            replay_limit: config.replay_limit,
            read_buffer_size: config.read_buffer_size.max(1),
            shutdown,
        }
    }
}
