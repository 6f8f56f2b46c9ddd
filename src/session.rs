use std::sync::atomic::{AtomicU8, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};

use crate::error::SessionError;
use crate::shutdown;

type Transport = Box<dyn AsyncWrite + Send + Unpin>;

const CONNECTED: u8 = 0;
const DISCONNECTING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Connected,
    Disconnecting,
    Closed,
}

/// Server side of one accepted connection. The read half lives with the
/// connection task; the session owns the write half.
pub struct ClientSession {
    identity: String,
    writer: Mutex<Transport>,
    state: AtomicU8,
    closed: watch::Sender<bool>,
}

impl ClientSession {
    pub fn new<W>(identity: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = shutdown::channel();

        Self {
            identity: identity.into(),
            writer: Mutex::new(Box::new(writer)),
            state: AtomicU8::new(CONNECTED),
            closed,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONNECTED
    }

    pub fn liveness(&self) -> Liveness {
        match self.state.load(Ordering::Acquire) {
            CONNECTED => Liveness::Connected,
            DISCONNECTING => Liveness::Disconnecting,
            _ => Liveness::Closed,
        }
    }

    /// Resolves once `disconnect` has been called by anyone.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        shutdown::triggered(&mut rx).await;
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let result = {
            let mut writer = self.writer.lock().await;

            tokio::select! {
                biased;

                _ = self.closed() => Err(SessionError::NotConnected),

                res = write_chunk(&mut writer, bytes) => res.map_err(SessionError::from),
            }
        };

        if let Err(SessionError::Io(e)) = &result {
            tracing::error!(identity = %self.identity, "failed to send: {}", e);
            self.disconnect().await;
        }

        result
    }

    /// Only the first call shuts the transport down; later calls return at once.
    pub async fn disconnect(&self) {
        if self
            .state
            .compare_exchange(CONNECTED, DISCONNECTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        // wakes the read loop and any send stuck on a full socket
        self.closed.send_replace(true);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(identity = %self.identity, "shutdown failed: {}", e);
            }
        }

        self.state.store(CLOSED, Ordering::Release);
    }
}

async fn write_chunk(writer: &mut Transport, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
