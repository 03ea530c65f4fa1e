//! peercall terminal client
//!
//! Collects a display name and device choices, then joins the signaling
//! relay and runs an interactive command loop for placing and answering
//! calls.
//!
//! # Usage
//!
//! ```bash
//! # Interactive setup against the default relay
//! cargo run -p peercall-cli
//!
//! # Skip the setup prompts and use a local relay
//! cargo run -p peercall-cli -- --name Alice --no-prompt \
//!   --signaling-url ws://localhost:5000
//!
//! # Load settings from a file
//! PEERCALL_CONFIG=./peercall.yaml cargo run -p peercall-cli
//! ```

mod app;
mod commands;
#[cfg(feature = "system-devices")]
mod devices;
mod prompt;

use anyhow::Context;
use clap::Parser;
use peercall_core::config::PeerCallConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Peer-to-peer video calls from the terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "PEERCALL_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket signaling relay URL (overrides the config file)
    #[arg(long, env = "PEERCALL_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// STUN servers, comma-separated (overrides the config file)
    #[arg(long, value_delimiter = ',', env = "PEERCALL_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Display name shown to the other party
    #[arg(short, long, env = "PEERCALL_NAME")]
    name: Option<String>,

    /// Give up on unanswered calls after this many seconds
    #[arg(long, env = "PEERCALL_ANSWER_TIMEOUT")]
    answer_timeout: Option<u64>,

    /// Accept the default devices without prompting (requires --name)
    #[arg(long, default_value_t = false)]
    no_prompt: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "PEERCALL_LOG")]
    log_level: Option<String>,
}

impl Args {
    /// Load the config file, if any, and apply flag overrides
    pub fn resolve_config(&self) -> anyhow::Result<PeerCallConfig> {
        let mut config = match &self.config {
            Some(path) => PeerCallConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => PeerCallConfig::default(),
        };

        if let Some(url) = &self.signaling_url {
            config.signaling_url = url.clone();
        }
        if !self.stun_servers.is_empty() {
            config.stun_servers = self.stun_servers.clone();
        }
        if let Some(secs) = self.answer_timeout {
            config.call.answer_timeout_secs = Some(secs);
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.resolve_config()?;

    if args.no_prompt && args.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
        anyhow::bail!("--no-prompt needs a display name (--name)");
    }

    init_tracing(&config.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %config.signaling_url,
        "peercall starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("peercall-worker")
        .enable_all()
        .build()?;

    runtime.block_on(app::run(config, args.name, !args.no_prompt))
}

fn init_tracing(default_level: &str) {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
