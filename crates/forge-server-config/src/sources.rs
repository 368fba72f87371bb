// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	CleanupType, DatabaseConfigLayer, LogFormat, LoggingConfigLayer, RepositoryConfigLayer, WebhookConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults live in each section's `finalize`, so this source is
/// empty.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/forge/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: FORGE_SERVER_<SECTION>_<FIELD>. List values are comma
/// separated.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()?),
			logging: Some(load_logging_from_env()?),
			repository: Some(load_repository_from_env()?),
			webhook: Some(load_webhook_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_list(name: &str) -> Option<Vec<String>> {
	env_var(name).map(|s| {
		s.split(',')
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty())
			.collect()
	})
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: Display,
{
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|e| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("'{v}': {e}"),
		}),
		None => Ok(None),
	}
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("FORGE_SERVER_DATABASE_URL"),
		max_connections: env_parse("FORGE_SERVER_DATABASE_MAX_CONNECTIONS")?,
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	Ok(LoggingConfigLayer {
		level: env_var("FORGE_SERVER_LOGGING_LEVEL"),
		format: env_parse::<LogFormat>("FORGE_SERVER_LOGGING_FORMAT")?,
	})
}

fn load_repository_from_env() -> Result<RepositoryConfigLayer, ConfigError> {
	Ok(RepositoryConfigLayer {
		work_in_progress_prefixes: env_list("FORGE_SERVER_REPOSITORY_WORK_IN_PROGRESS_PREFIXES"),
		close_keywords: env_list("FORGE_SERVER_REPOSITORY_CLOSE_KEYWORDS"),
		reopen_keywords: env_list("FORGE_SERVER_REPOSITORY_REOPEN_KEYWORDS"),
		enable_dependencies: env_bool("FORGE_SERVER_REPOSITORY_ENABLE_DEPENDENCIES"),
		allow_cross_repo_dependencies: env_bool("FORGE_SERVER_REPOSITORY_ALLOW_CROSS_REPO_DEPENDENCIES"),
		app_url: env_var("FORGE_SERVER_REPOSITORY_APP_URL"),
	})
}

fn load_webhook_from_env() -> Result<WebhookConfigLayer, ConfigError> {
	Ok(WebhookConfigLayer {
		deliver_timeout_secs: env_parse("FORGE_SERVER_WEBHOOK_DELIVER_TIMEOUT_SECS")?,
		skip_tls_verify: env_bool("FORGE_SERVER_WEBHOOK_SKIP_TLS_VERIFY"),
		paging_num: env_parse("FORGE_SERVER_WEBHOOK_PAGING_NUM")?,
		cleanup_type: env_parse::<CleanupType>("FORGE_SERVER_WEBHOOK_CLEANUP_TYPE")?,
		cleanup_older_than_days: env_parse("FORGE_SERVER_WEBHOOK_CLEANUP_OLDER_THAN_DAYS")?,
		cleanup_keep_number: env_parse("FORGE_SERVER_WEBHOOK_CLEANUP_KEEP_NUMBER")?,
	})
}
