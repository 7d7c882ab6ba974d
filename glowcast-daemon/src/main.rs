//! glowcast daemon entry point.
//!
//! ```text
//! glowcast                       Run in the foreground
//! glowcast --config <path>       Load a custom config TOML
//! glowcast --gen-config          Write default config to stdout
//! glowcast --list-backends       Probe capture backends and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use glowcast_core::BackendSelector;
use glowcast_daemon::config::{ConfigError, DaemonConfig};
use glowcast_daemon::service::{Daemon, describe_backends};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "glowcast", about = "Display capture streamer for ambient lighting")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "glowcast.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Probe every capture backend, print the result and exit.
    #[arg(long)]
    list_backends: bool,

    /// Sink host, overriding the config file.
    #[arg(long)]
    address: Option<String>,

    /// Sink port, overriding the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Capture width, overriding the config file.
    #[arg(long)]
    width: Option<u32>,

    /// Capture height, overriding the config file.
    #[arg(long)]
    height: Option<u32>,

    /// Force a capture backend by name.
    #[arg(long)]
    backend: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(address) = &self.address {
            config.sink.address = address.clone();
        }
        if let Some(port) = self.port {
            config.sink.port = port;
        }
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(backend) = &self.backend {
            config.capture.backend = backend.clone();
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&DaemonConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let (mut config, load_error) = match DaemonConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (DaemonConfig::default(), Some(e)),
    };
    cli.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match load_error {
        Some(e @ ConfigError::Missing(_)) => info!("{e}; using defaults"),
        Some(e) => warn!("{e}; using defaults"),
        None => {}
    }

    if cli.list_backends {
        let selector = BackendSelector::with_defaults();
        for line in describe_backends(&selector) {
            println!("{line}");
        }
        return Ok(());
    }

    info!("glowcast v{}", env!("CARGO_PKG_VERSION"));
    info!("sink: {}:{}", config.sink.address, config.sink.port);
    info!("capture size: {}x{}", config.capture.width, config.capture.height);
    if let Some(backend) = config.forced_backend() {
        info!("forced backend: {backend}");
    }

    let daemon = Daemon::new(config);
    daemon
        .run(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
        })
        .await;

    Ok(())
}
