use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::history::Message;
use crate::protocol;
use crate::session::ClientSession;
use crate::shutdown;
use crate::state::ServerState;

/// Serves one registered session until its peer goes away, a send to it
/// fails, or the server shuts down. Deregisters the session on the way out.
pub async fn handle<R>(state: ServerState, session: Arc<ClientSession>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let identity = session.identity().to_string();

    let notified = state
        .broadcast
        .announce(&protocol::join_notice(&identity), &identity)
        .await;
    tracing::info!(notified, "join notice sent");

    replay_history(&state, &session).await;

    let mut server_shutdown = state.shutdown.clone();
    let mut buf = vec![0u8; state.read_buffer_size];

    loop {
        let read = tokio::select! {
            biased;

            _ = session.closed() => {
                tracing::debug!("session closed");
                break;
            }

            _ = shutdown::triggered(&mut server_shutdown) => {
                tracing::debug!("server shutting down");
                break;
            }

            res = reader.read(&mut buf) => res,
        };

        match read {
            Ok(0) => {
                tracing::info!("client disconnected");
                break;
            }

            Ok(n) => {
                // one read is one message, whatever it contains
                let message = Message::new(identity.as_str(), buf[..n].to_vec());
                tracing::info!(bytes = n, "message: {}", message.text());

                state.history.append(message.clone());
                state.broadcast.broadcast(&message, &identity).await;
            }

            Err(e) => {
                tracing::warn!("read failed: {}", e);
                break;
            }
        }
    }

    let notified = state
        .broadcast
        .announce(&protocol::leave_notice(&identity), &identity)
        .await;
    tracing::info!(notified, "leave notice sent");

    session.disconnect().await;
    state.registry.remove_session(&session);
}

async fn replay_history(state: &ServerState, session: &ClientSession) {
    let recent = state.history.recent(state.replay_limit);

    if recent.is_empty() {
        let _ = session.send(protocol::WELCOME.as_bytes()).await;
        return;
    }

    if session.send(protocol::history_header(recent.len()).as_bytes()).await.is_err() {
        return;
    }

    for message in &recent {
        if session.send(&protocol::chat_line(message)).await.is_err() {
            return;
        }
    }

    let _ = session.send(protocol::HISTORY_FOOTER.as_bytes()).await;

    tracing::info!(count = recent.len(), "history sent");
}
