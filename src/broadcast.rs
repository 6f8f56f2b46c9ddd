use std::sync::Arc;

use crate::history::Message;
use crate::protocol;
use crate::registry::ClientRegistry;

/// Fans payloads out to a registry snapshot. Sends run one after another on
/// the calling task, so a slow recipient delays the ones after it.
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<ClientRegistry>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub async fn broadcast(&self, message: &Message, exclude: &str) -> usize {
        self.fan_out(&protocol::chat_line(message), exclude).await
    }

    pub async fn announce(&self, notice: &str, exclude: &str) -> usize {
        self.fan_out(notice.as_bytes(), exclude).await
    }

    /// Returns how many recipients accepted the payload. A failed send is
    /// logged and skipped; the session itself disconnects on I/O errors.
    pub async fn fan_out(&self, payload: &[u8], exclude: &str) -> usize {
        let mut delivered = 0;

        for member in self.registry.snapshot() {
            if member.identity() == exclude {
                continue;
            }

            match member.send(payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(recipient = member.identity(), "broadcast skipped: {}", e);
                }
            }
        }

        delivered
    }
}
