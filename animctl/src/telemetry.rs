//! Tracing initialization.
//!
//! Log verbosity is controlled by the standard `RUST_LOG` environment variable and defaults to
//! `info`. Output goes to stderr so that command output on stdout stays machine readable.
//!
//! ```bash
//! RUST_LOG=animctl=debug animctl generate --image cat.png
//! ```

use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing with an env filter and the fmt layer.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    debug!("Telemetry initialized");
    Ok(())
}
