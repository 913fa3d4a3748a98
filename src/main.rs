//! API gate
//!
//! Longest-prefix routing with HS512 bearer tokens, key rotation,
//! revocation and origin binding.

use std::env;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use api_gate::{
    cli::{Cli, Command},
    config::Config,
    crypto::{CryptoService, hash_password, random_bytes},
    gateway::Gateway,
    setup_tracing,
    token::keys::RECOMMENDED_KEY_LEN,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::GenKey) => run_gen_key(),
        Some(Command::SealKey { ref kek, ref key }) => run_seal_key(kek, key),
        Some(Command::HashPassword { ref password }) => run_hash_password(password),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

fn run_gen_key() -> ExitCode {
    match random_bytes(RECOMMENDED_KEY_LEN) {
        Ok(key) => {
            println!("{}", hex::encode(key));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Key generation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_seal_key(kek: &str, key: &str) -> ExitCode {
    let kek = match kek.strip_prefix("env:") {
        Some(var) => match env::var(var) {
            Ok(v) => v,
            Err(_) => {
                error!("{var} is not set");
                return ExitCode::FAILURE;
            }
        },
        None => kek.to_string(),
    };

    let sealed = CryptoService::from_hex(&kek).and_then(|svc| {
        let plain = hex::decode(key.trim())?;
        svc.encrypt_base64(&plain)
    });
    match sealed {
        Ok(sealed) => {
            println!("enc:{sealed}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Sealing failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_hash_password(password: &str) -> ExitCode {
    match hash_password(password) {
        Ok(cred) => {
            println!("hash: {}", cred.hash);
            println!("salt: {}", cred.salt);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Hashing failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        issuer = %config.token.issuer(),
        reserved_routes = config.reserved_routes.len(),
        "Starting API gate"
    );

    let gateway = match Gateway::new(config, cli.config.clone()) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
