// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! livelist admin server CLI
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file (created with defaults if missing)
//! livelist-admin --config admin.toml
//!
//! # Write an example configuration
//! livelist-admin gen-config --output admin.toml
//!
//! # Check a configuration without starting
//! livelist-admin validate --config admin.toml
//! ```

use clap::{Parser, Subcommand};
use livelist_admin::config::{Account, AdminConfig};
use livelist_admin::listeners::public_urls;
use livelist_admin::state::ACCESS_LOG;
use livelist_admin::{AdminState, ConfigStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// livelist administrative server
#[derive(Parser, Debug)]
#[command(name = "livelist-admin")]
#[command(about = "Admin API with live connection, plugin and log lists")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "livelist-admin.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "livelist-admin.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let store = ConfigStore::open(&args.config)?;
    store.current().validate()?;
    let admin = AdminState::new(store);
    if let Err(e) = admin.load_plugins() {
        warn!("Plugin discovery failed: {}", e);
    }

    println!("livelist admin v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();

    let server = livelist_admin::start(Arc::clone(&admin)).await;

    let config = admin.config.current();
    let (http, https) = (admin.status.http(), admin.status.https());
    for (name, status) in [("http", &http), ("https", &https)] {
        if let Some(error) = &status.error {
            println!("{}: failed ({})", name, error);
        }
    }
    for url in public_urls(config.bind_ip()?, &http, &https) {
        println!("Admin: {}", url);
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    server.shutdown().await;

    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AdminConfig::default();
    config.accounts.insert(
        "admin".into(),
        Account {
            token: "change-me".into(),
            admin: true,
        },
    );
    config.logs.insert(ACCESS_LOG.into(), PathBuf::from("access.log"));
    config.plugins_dir = Some(PathBuf::from("plugins"));

    config.to_file(&output)?;
    println!("Generated configuration: {}", output.display());
    Ok(())
}

fn cmd_validate(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = AdminConfig::from_file(&path)?;
    config.validate()?;

    println!("Configuration is valid");
    println!();
    println!(
        "HTTP:  {}",
        if config.http.enabled {
            format!("port {}", config.http.port)
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "HTTPS: {}",
        if config.https.enabled {
            format!("port {}", config.https.port)
        } else {
            "disabled".to_string()
        }
    );
    println!("Bind:  {}", config.bind_address);
    println!("Accounts: {}", config.accounts.len());
    for (name, path) in &config.logs {
        println!("Log '{}': {}", name, path.display());
    }
    Ok(())
}
