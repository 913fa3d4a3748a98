//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// API gate - prefix routing and bearer token verification in one hop
#[derive(Parser, Debug)]
#[command(name = "api-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "API_GATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "API_GATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "API_GATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "API_GATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "API_GATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gate (default)
    Serve,

    /// Print a fresh random signing key (hex)
    GenKey,

    /// Seal a hex signing key for use as an `enc:` entry
    SealKey {
        /// Hex key-encryption key (or `env:VAR_NAME`)
        #[arg(long, env = "API_GATE_KEK")]
        kek: String,

        /// Hex signing key to seal
        #[arg(required = true)]
        key: String,
    },

    /// Hash a password, printing hex hash and salt
    HashPassword {
        /// Password to hash
        #[arg(required = true)]
        password: String,
    },
}
