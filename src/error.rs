use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("failed to create listening socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server was already started")]
    AlreadyStarted,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Io(#[from] io::Error),
}
