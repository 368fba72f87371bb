// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One-shot maintenance commands.

use std::sync::Arc;

use anyhow::Context;
use forge_server_config::{CleanupType, ServerConfig, WebhookConfig};
use forge_server_db::{create_pool, run_migrations, HookTaskCleanup, HookTaskRepository, WebhookRepository};
use forge_server_webhook::{build_client, HookDeliverer};
use sqlx::SqlitePool;

/// The cleanup mode configured for hook task history.
pub fn cleanup_mode(config: &WebhookConfig) -> HookTaskCleanup {
	match config.cleanup_type {
		CleanupType::OlderThan => {
			HookTaskCleanup::OlderThan(chrono::Duration::days(i64::from(config.cleanup_older_than_days)))
		}
		CleanupType::PerWebhook => HookTaskCleanup::PerWebhook(i64::from(config.cleanup_keep_number)),
	}
}

/// Open the configured database and bring its schema up to date.
pub async fn open_database(config: &ServerConfig) -> anyhow::Result<SqlitePool> {
	let pool = create_pool(&config.database.url, config.database.max_connections)
		.await
		.with_context(|| format!("failed to open database {}", config.database.url))?;
	run_migrations(&pool).await.context("failed to run migrations")?;
	Ok(pool)
}

pub async fn migrate(config: &ServerConfig) -> anyhow::Result<()> {
	open_database(config).await?;
	tracing::info!(database = %config.database.url, "migrations applied");
	Ok(())
}

pub async fn cleanup_hook_tasks(config: &ServerConfig) -> anyhow::Result<u64> {
	let pool = open_database(config).await?;
	let mode = cleanup_mode(&config.webhook);
	let removed = HookTaskRepository::new(pool)
		.cleanup_hook_task_table(mode)
		.await
		.context("hook task cleanup failed")?;
	tracing::info!(removed, cleanup_type = %config.webhook.cleanup_type, "hook tasks cleaned up");
	Ok(removed)
}

pub async fn redeliver(config: &ServerConfig) -> anyhow::Result<usize> {
	let pool = open_database(config).await?;
	let client = build_client(&config.webhook).context("failed to build webhook client")?;
	let deliverer = HookDeliverer::new(
		client,
		Arc::new(WebhookRepository::new(pool.clone())),
		Arc::new(HookTaskRepository::new(pool)),
	);
	let attempted = deliverer
		.deliver_undelivered()
		.await
		.context("redelivery failed")?;
	Ok(attempted)
}

#[cfg(test)]
mod tests {
	use super::*;
	use forge_server_config::{DatabaseConfig, LoggingConfig, RepositoryConfig};

	fn config_for(dir: &tempfile::TempDir, webhook: WebhookConfig) -> ServerConfig {
		ServerConfig {
			database: DatabaseConfig {
				url: format!("sqlite:{}", dir.path().join("forge.db").display()),
				max_connections: 1,
			},
			logging: LoggingConfig::default(),
			repository: RepositoryConfig::default(),
			webhook,
		}
	}

	#[test]
	fn test_cleanup_mode_follows_config() {
		let older = WebhookConfig::default();
		assert_eq!(cleanup_mode(&older), HookTaskCleanup::OlderThan(chrono::Duration::days(7)));

		let per_webhook = WebhookConfig {
			cleanup_type: CleanupType::PerWebhook,
			cleanup_keep_number: 3,
			..WebhookConfig::default()
		};
		assert_eq!(cleanup_mode(&per_webhook), HookTaskCleanup::PerWebhook(3));
	}

	#[tokio::test]
	async fn test_migrate_then_cleanup_empty_database() {
		let dir = tempfile::tempdir().unwrap();
		let config = config_for(&dir, WebhookConfig::default());

		migrate(&config).await.unwrap();
		assert_eq!(cleanup_hook_tasks(&config).await.unwrap(), 0);
		assert_eq!(redeliver(&config).await.unwrap(), 0);
	}
}
