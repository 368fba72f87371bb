// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Forge server binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use forge_server_config::{LogFormat, LoggingConfig, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod housekeeping;
mod version;

/// Forge server - repository model and webhook housekeeping.
#[derive(Parser, Debug)]
#[command(name = "forge-server", about = "Forge server", version)]
struct Args {
	/// Configuration file, layered over the defaults and under the environment
	#[arg(long, env = "FORGE_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Create the database if needed and apply the schema
	Migrate,
	/// Prune delivered hook tasks using the configured cleanup mode
	CleanupHookTasks,
	/// Deliver every undelivered hook task once
	Redeliver,
	/// Show version and build information
	Version,
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| logging.level.clone().into());
	let (json, text) = match logging.format {
		LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
		LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
	};
	tracing_subscriber::registry()
		.with(filter)
		.with(json)
		.with(text)
		.init();
}

/// Load `.env`, the layered config and the tracing subscriber.
fn setup(path: Option<PathBuf>) -> anyhow::Result<ServerConfig> {
	dotenvy::dotenv().ok();

	let config = match path {
		Some(path) => forge_server_config::load_config_with_file(&path)
			.with_context(|| format!("failed to load config from {}", path.display()))?,
		None => forge_server_config::load_config().context("failed to load config")?,
	};
	init_tracing(&config.logging);
	Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	match args.command {
		Command::Version => println!("{}", version::format_version_info()),
		Command::Migrate => {
			let config = setup(args.config)?;
			housekeeping::migrate(&config).await?;
		}
		Command::CleanupHookTasks => {
			let config = setup(args.config)?;
			let removed = housekeeping::cleanup_hook_tasks(&config).await?;
			println!("removed {removed} hook tasks");
		}
		Command::Redeliver => {
			let config = setup(args.config)?;
			let attempted = housekeeping::redeliver(&config).await?;
			println!("attempted {attempted} deliveries");
		}
	}

	Ok(())
}
