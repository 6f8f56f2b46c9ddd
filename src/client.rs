use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::READ_BUFFER_SIZE;
use crate::error::SessionError;
use crate::shutdown;

/// Client side of the relay. Inbound chunks go to a callback, or to a
/// channel drained with [`ChatClient::recv`] when none is given.
pub struct ChatClient {
    client_id: String,
    server: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    stop: watch::Sender<bool>,
    recv_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    inbox: Option<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl ChatClient {
    pub async fn connect(addr: impl ToSocketAddrs, client_id: impl Into<String>) -> Result<Self, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut client = Self::with_callback(addr, client_id, move |chunk: &[u8]| {
            let _ = tx.send(chunk.to_vec());
        })
        .await?;

        client.inbox = Some(Mutex::new(rx));

        Ok(client)
    }

    pub async fn with_callback<F>(
        addr: impl ToSocketAddrs,
        client_id: impl Into<String>,
        on_message: F,
    ) -> Result<Self, SessionError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let client_id = client_id.into();

        let stream = TcpStream::connect(addr).await.map_err(|e| {
            tracing::error!(%client_id, "failed to connect: {}", e);
            e
        })?;
        let server = stream.peer_addr()?;

        let (reader, writer) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let (stop, stop_rx) = shutdown::channel();

        let task = tokio::spawn(receive(reader, connected.clone(), stop_rx, on_message));

        tracing::info!(%client_id, %server, "connected to server");

        Ok(Self {
            client_id,
            server,
            writer: Mutex::new(writer),
            connected,
            stop,
            recv_task: std::sync::Mutex::new(Some(task)),
            inbox: None,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            tracing::error!(client_id = %self.client_id, "not connected");
            return Err(SessionError::NotConnected);
        }

        let result = {
            let mut writer = self.writer.lock().await;
            writer.write_all(text.as_bytes()).await
        };

        if let Err(e) = result {
            tracing::error!(client_id = %self.client_id, "failed to send message: {}", e);
            self.disconnect().await;
            return Err(e.into());
        }

        Ok(())
    }

    /// Next inbound chunk; `None` once the connection is gone or when a
    /// callback was installed instead.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        match &self.inbox {
            Some(inbox) => inbox.lock().await.recv().await,
            None => None,
        }
    }

    pub async fn disconnect(&self) {
        let first = self
            .stop
            .send_if_modified(|stopped| !std::mem::replace(stopped, true));

        if !first {
            return;
        }

        self.connected.store(false, Ordering::Release);

        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }

        let task = self
            .recv_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(task) = task {
            let _ = task.await;
        }

        tracing::info!(client_id = %self.client_id, "disconnected from server");
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

async fn receive<F>(
    mut reader: OwnedReadHalf,
    connected: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
    mut on_message: F,
) where
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            biased;

            _ = shutdown::triggered(&mut stop) => break,

            res = reader.read(&mut buf) => res,
        };

        match read {
            Ok(0) => {
                if connected.swap(false, Ordering::AcqRel) {
                    tracing::info!("connection to server lost");
                }
                break;
            }

            Ok(n) => on_message(&buf[..n]),

            Err(e) => {
                if connected.swap(false, Ordering::AcqRel) {
                    tracing::warn!("connection to server lost: {}", e);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[tokio::test]
    async fn sends_and_receives_raw_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = ChatClient::connect(addr, "alice").await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        client.send_message("hi").await.unwrap();
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        peer.write_all(b"back").await.unwrap();
        let got = timeout(Duration::from_secs(2), client.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"back"[..]));

        assert_eq!(client.client_id(), "alice");
        assert_eq!(client.server_addr(), addr);
    }

    #[tokio::test]
    async fn callback_receives_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let client = ChatClient::with_callback(addr, "bob", move |chunk: &[u8]| {
            let _ = tx.send(String::from_utf8_lossy(chunk).into_owned());
        })
        .await
        .unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        peer.write_all(b"ping").await.unwrap();

        let got = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("ping"));
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn server_close_marks_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = ChatClient::connect(addr, "carol").await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);

        assert!(timeout(Duration::from_secs(2), client.recv()).await.unwrap().is_none());
        assert!(!client.is_connected());
        assert!(matches!(
            client.send_message("late").await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = ChatClient::connect(addr, "dave").await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());

        // peer sees a clean close
        let mut buf = Vec::new();
        timeout(Duration::from_secs(2), peer.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            ChatClient::connect(addr, "erin").await,
            Err(SessionError::Io(_))
        ));
    }
}
