//! TCP broadcast chat relay: every chunk a client sends is stored in a
//! bounded history and relayed to every other connected client.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod conn;
pub mod error;
pub mod history;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;

pub use broadcast::BroadcastEngine;
pub use client::ChatClient;
pub use config::ServerConfig;
pub use error::{ServerError, SessionError};
pub use history::{Message, MessageHistory};
pub use registry::ClientRegistry;
pub use server::{ChatServer, Lifecycle};
pub use session::{ClientSession, Liveness};
