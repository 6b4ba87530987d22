//! # pusher-events
//!
//! CLI tool for exercising the encrypted channel event pipeline.
//!
//! ## Commands
//!
//! - `keygen`: Generate a channel decryption key
//! - `seal`: Encrypt a message into a transport payload
//! - `replay`: Feed transport payloads through the channel event queue
//!
//! ## Example
//!
//! ```bash
//! # Generate a key
//! KEY=$(pusher-events keygen)
//!
//! # Seal two messages for an encrypted channel
//! pusher-events seal --key "$KEY" --channel private-encrypted-room "hello" >> events.jsonl
//! pusher-events seal --key "$KEY" --channel private-encrypted-room "world" >> events.jsonl
//!
//! # Replay them, answering key refreshes from the config file
//! pusher-events replay --config replay.toml events.jsonl
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{keygen, replay, seal};
use config::{LoggingConfig, ReplayConfig};

/// CLI tool for exercising the encrypted channel event pipeline.
#[derive(Parser, Debug)]
#[command(name = "pusher-events")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a random base64 channel key
    Keygen,

    /// Encrypt a message and print it as a transport payload
    Seal {
        /// Base64 channel key
        #[arg(long, short)]
        key: String,

        /// Encrypted channel name
        #[arg(long, short)]
        channel: String,

        /// Event name
        #[arg(long, short, default_value = "message")]
        event: String,

        /// Sender user id
        #[arg(long)]
        user_id: Option<String>,

        /// Plaintext to encrypt
        plaintext: String,
    },

    /// Replay transport payloads (one JSON object per line) through the queue
    Replay {
        /// TOML config with logging level and channel keys
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Input file (reads stdin if omitted)
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            init_tracing(&LoggingConfig::default());
            keygen::run()?;
        }
        Commands::Seal {
            key,
            channel,
            event,
            user_id,
            plaintext,
        } => {
            init_tracing(&LoggingConfig::default());
            seal::run(&key, &channel, &event, user_id.as_deref(), &plaintext)?;
        }
        Commands::Replay { config, input } => {
            let config = ReplayConfig::load(config.as_deref())?;
            init_tracing(&config.logging);

            let reader: Box<dyn BufRead> = match input {
                Some(path) => Box::new(BufReader::new(File::open(&path).with_context(|| {
                    format!("Failed to open input file {}", path.display())
                })?)),
                None => Box::new(io::stdin().lock()),
            };

            let summary = replay::run(&config, reader, io::stdout())?;
            summary.report();
        }
    }

    Ok(())
}

/// Log to stderr so stdout stays machine-readable. `RUST_LOG` wins over config.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
