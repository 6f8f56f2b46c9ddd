use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use relay_chat::{ChatClient, config, logging};

#[derive(Parser, Debug)]
#[command(name = "relay-chat-client", about = "Line-oriented client for the chat relay")]
struct Args {
    #[arg(default_value = "127.0.0.1")]
    host: String,

    #[arg(default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Name used in this client's own log lines
    #[arg(default_value = "Cliente")]
    client_id: String,

    #[arg(long, default_value = "client.log")]
    log_file: PathBuf,
}

const QUIT_WORDS: [&str; 3] = ["sair", "exit", "quit"];

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // console output would interleave with the chat
    logging::init(env!("CARGO_BIN_NAME"), "info", Some(args.log_file.as_path()), false)?;

    let client = ChatClient::with_callback(
        (args.host.as_str(), args.port),
        args.client_id.clone(),
        |chunk: &[u8]| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk);
            let _ = out.flush();
        },
    )
    .await
    .with_context(|| format!("cannot connect to {}:{}", args.host, args.port))?;

    println!("Connected to {}. Type messages ('sair' to leave):", client.server_addr());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while client.is_connected() {
        let Some(line) = lines.next_line().await? else {
            break;
        };

        if QUIT_WORDS.contains(&line.as_str()) {
            break;
        }

        if line.is_empty() {
            continue;
        }

        if client.send_message(&line).await.is_err() {
            eprintln!("failed to send, connection lost");
            break;
        }
    }

    client.disconnect().await;
    println!("Disconnected.");

    Ok(())
}
