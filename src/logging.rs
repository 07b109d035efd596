//! Process-wide diagnostics setup shared by the binaries

use color_eyre::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the error report hook and the tracing subscriber
///
/// The level comes from `RUST_LOG` and falls back to `info`.
pub fn init() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .try_init()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to install tracing subscriber: {}", e))?;
    Ok(())
}
