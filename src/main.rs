use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use relay_chat::{ChatServer, ServerConfig, config, logging};

#[derive(Parser, Debug)]
#[command(name = "relay-chat-server", about = "TCP chat relay with message history")]
struct Args {
    /// Port to listen on
    #[arg(default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Pending-connection backlog passed to listen(2)
    #[arg(short, long, default_value_t = config::DEFAULT_BACKLOG)]
    backlog: u32,

    #[arg(long, default_value = "server.log")]
    log_file: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(env!("CARGO_BIN_NAME"), &args.log_level, Some(args.log_file.as_path()), true)?;

    let config = ServerConfig::new(args.port)
        .with_host(args.host)
        .with_backlog(args.backlog);

    let server = ChatServer::new(config);
    let addr = server.start()?;

    tracing::info!("listening on {}, press Ctrl+C to stop", addr);

    shutdown_signal().await;

    tracing::info!("interrupt received, stopping server");
    server.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
