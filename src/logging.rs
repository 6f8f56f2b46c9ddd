use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `RUST_LOG` overrides `default_level`.
///
/// With `log_file` set, records are also appended to that file without
/// colors; `console` controls whether they are echoed to stderr too.
pub fn init(binary_name: &str, default_level: &str, log_file: Option<&Path>, console: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{}={},{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            default_level,
            binary_name.replace('-', "_"),
            default_level
        )
        .into()
    });

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;

            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let console_layer = console.then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("logger already initialized")?;

    Ok(())
}
