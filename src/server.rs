use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::conn;
use crate::error::ServerError;
use crate::session::ClientSession;
use crate::shutdown;
use crate::state::ServerState;

const CREATED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;
const STOPPED: u8 = 4;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does
/// not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl From<u8> for Lifecycle {
    fn from(raw: u8) -> Self {
        match raw {
            CREATED => Lifecycle::Created,
            STARTING => Lifecycle::Starting,
            RUNNING => Lifecycle::Running,
            STOPPING => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }
}

pub struct ChatServer {
    config: ServerConfig,
    state: ServerState,
    lifecycle: Arc<AtomicU8>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown, rx) = shutdown::channel();
        let state = ServerState::new(&config, rx);

        Self {
            config,
            state,
            lifecycle: Arc::new(AtomicU8::new(CREATED)),
            shutdown,
            accept_task: Mutex::new(None),
            local_addr: OnceLock::new(),
        }
    }

    /// Binds and starts accepting. Must be called from inside a tokio runtime.
    /// On failure the server stays `Created` and nothing is spawned.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        if self
            .lifecycle
            .compare_exchange(CREATED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServerError::AlreadyStarted);
        }

        let (listener, addr) = match self.listen() {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!("failed to start server: {}", e);
                self.lifecycle.store(CREATED, Ordering::Release);
                return Err(e);
            }
        };

        let _ = self.local_addr.set(addr);
        self.lifecycle.store(RUNNING, Ordering::Release);

        let task = tokio::spawn(
            accept_loop(
                listener,
                self.state.clone(),
                self.lifecycle.clone(),
                self.shutdown.subscribe(),
            )
            .instrument(tracing::info_span!("server", port = addr.port())),
        );

        *self.lock_accept_task() = Some(task);

        tracing::info!(%addr, backlog = self.config.backlog, "server started");

        Ok(addr)
    }

    /// Closes the listener, disconnects every session and waits for the
    /// acceptance task. Only the first call on a running server does anything.
    pub async fn stop(&self) {
        if self
            .lifecycle
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tracing::info!("stopping server");

        self.shutdown.send_replace(true);

        let task = self.lock_accept_task().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("accept task failed: {}", e);
            }
        }

        for session in self.state.registry.snapshot() {
            session.disconnect().await;
        }

        let drained = tokio::time::timeout(
            self.config.shutdown_grace,
            self.state.registry.wait_empty(),
        )
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = self.state.registry.count(),
                "sessions still registered after shutdown grace period"
            );
        }

        self.lifecycle.store(STOPPED, Ordering::Release);
        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == RUNNING
    }

    pub fn state(&self) -> Lifecycle {
        self.lifecycle.load(Ordering::Acquire).into()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn connected_clients(&self) -> usize {
        self.state.registry.count()
    }

    pub fn total_messages(&self) -> usize {
        self.state.history.count()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn listen(&self) -> Result<(TcpListener, SocketAddr), ServerError> {
        let addr = self.config.bind_addr()?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ServerError::Socket)?;

        socket.set_reuseaddr(true).map_err(ServerError::Socket)?;

        socket
            .bind(addr)
            .map_err(|source| ServerError::Bind { addr, source })?;

        let listener = socket
            .listen(self.config.backlog)
            .map_err(|source| ServerError::Listen { addr, source })?;

        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Listen { addr, source })?;

        Ok((listener, local))
    }

    fn lock_accept_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.accept_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        // tasks cannot be awaited here; raising the flag ends them on their own
        if self.is_running() {
            self.shutdown.send_replace(true);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: ServerState,
    lifecycle: Arc<AtomicU8>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;

            _ = shutdown::triggered(&mut shutdown_rx) => break,

            res = listener.accept() => res,
        };

        let (socket, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                if recover_from_accept_error(&e, &lifecycle).await {
                    continue;
                }

                break;
            }
        };

        let identity = format!("{}:{}", peer.ip(), peer.port());
        tracing::info!(%identity, "new connection");

        let (reader, writer) = socket.into_split();
        let session = Arc::new(ClientSession::new(identity.clone(), writer));
        state.registry.add(session.clone());

        tokio::spawn(
            conn::handle(state.clone(), session, reader)
                .instrument(tracing::info_span!("session", %identity)),
        );
    }

    tracing::debug!("acceptance loop finished");
}

/// Returns whether the acceptance loop should keep going.
async fn recover_from_accept_error(error: &std::io::Error, lifecycle: &AtomicU8) -> bool {
    if lifecycle.load(Ordering::Acquire) != RUNNING {
        return false;
    }

    tracing::error!("accept failed: {}", error);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;

    true
}
