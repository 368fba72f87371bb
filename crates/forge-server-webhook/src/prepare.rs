// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turning a repository event into stored hook tasks.

use forge_server_db::{
	HookEventType, HookTask, HookTaskStore, HookType, NewHookTask, Repository, Webhook, WebhookStore,
};
use tracing::{debug, warn};

use crate::api::Payload;
use crate::error::Result;
use crate::{discord, msteams, slack};

/// Render `payload` in the body format `webhook` expects.
pub fn convert_payload(webhook: &Webhook, event: HookEventType, payload: &Payload) -> Result<String> {
	let body = match webhook.hook_type {
		HookType::Forge => payload.to_json()?,
		HookType::Slack => serde_json::to_string_pretty(&slack::convert(payload, event, &webhook.meta)?)?,
		HookType::Discord => serde_json::to_string_pretty(&discord::convert(payload, event, &webhook.meta)?)?,
		HookType::MsTeams => serde_json::to_string_pretty(&msteams::convert(payload, event, &webhook.meta)?)?,
	};
	Ok(body)
}

/// Whether `webhook` wants this event, including its branch filter for the
/// payloads that name a branch.
pub fn should_deliver(webhook: &Webhook, event: HookEventType, payload: &Payload) -> bool {
	if !webhook.is_active || !webhook.has_event(event) {
		return false;
	}
	match payload.filter_branch() {
		Some(branch) => webhook.matches_branch(branch),
		None => true,
	}
}

/// Store one hook task per interested webhook of the repository, its owning
/// organization and the system. A webhook whose payload cannot be converted
/// is skipped.
#[tracing::instrument(skip(hooks, tasks, repo, payload), fields(repo_id = repo.id, event = event.as_str()))]
pub async fn prepare_webhooks(
	hooks: &dyn WebhookStore,
	tasks: &dyn HookTaskStore,
	repo: &Repository,
	event: HookEventType,
	payload: &Payload,
) -> Result<Vec<HookTask>> {
	let mut webhooks = hooks.list_active_webhooks_by_repo_id(repo.id).await?;
	webhooks.extend(hooks.list_active_webhooks_by_org_id(repo.owner_id).await?);
	webhooks.extend(
		hooks
			.list_system_webhooks()
			.await?
			.into_iter()
			.filter(|hook| hook.is_active),
	);

	let mut created = Vec::new();
	for webhook in webhooks.iter().filter(|hook| should_deliver(hook, event, payload)) {
		let payload_content = match convert_payload(webhook, event, payload) {
			Ok(content) => content,
			Err(e) => {
				warn!(hook_id = webhook.id, hook_type = webhook.hook_type.as_str(), error = %e, "skipping webhook");
				continue;
			}
		};
		let task = tasks
			.create_hook_task(&NewHookTask {
				repo_id: repo.id,
				hook_id: webhook.id,
				event_type: event,
				payload_content,
			})
			.await?;
		created.push(task);
	}

	debug!(count = created.len(), "hook tasks prepared");
	Ok(created)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::fixtures;
	use crate::api::HookIssueAction;
	use chrono::Utc;
	use forge_server_db::{
		run_migrations, HookContentType, HookEvent, HookEvents, HookTaskRepository, NewWebhook, WebhookRepository,
	};
	use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
	use std::str::FromStr;

	async fn test_pool() -> SqlitePool {
		let options = SqliteConnectOptions::from_str("sqlite::memory:")
			.unwrap()
			.foreign_keys(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await
			.unwrap();
		run_migrations(&pool).await.unwrap();
		pool
	}

	fn repository(id: i64, owner_id: i64) -> Repository {
		Repository {
			id,
			owner_id,
			owner_name: "test".to_string(),
			lower_name: "repo".to_string(),
			name: "repo".to_string(),
			description: String::new(),
			default_branch: "main".to_string(),
			is_private: false,
			is_fork: false,
			fork_id: None,
			is_archived: false,
			num_watches: 0,
			num_stars: 0,
			num_forks: 0,
			num_issues: 0,
			num_closed_issues: 0,
			num_pulls: 0,
			num_closed_pulls: 0,
			num_milestones: 0,
			num_closed_milestones: 0,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	fn hook(repo_id: i64, events: HookEvent) -> NewWebhook {
		NewWebhook {
			repo_id,
			url: "http://hooks.example.com/receive".to_string(),
			content_type: HookContentType::Json,
			events,
			is_active: true,
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_push_creates_task_for_matching_hooks() {
		let pool = test_pool().await;
		let hooks = WebhookRepository::new(pool.clone());
		let tasks = HookTaskRepository::new(pool);

		hooks.create_webhook(&hook(1, HookEvent::push_only())).await.unwrap();
		hooks
			.create_webhook(&hook(
				1,
				HookEvent {
					choose_events: true,
					events: HookEvents {
						issues: true,
						..Default::default()
					},
					..Default::default()
				},
			))
			.await
			.unwrap();
		hooks.create_webhook(&hook(2, HookEvent::everything())).await.unwrap();

		let payload = Payload::Push(fixtures::push(2));
		let created = prepare_webhooks(&hooks, &tasks, &repository(1, 10), HookEventType::Push, &payload)
			.await
			.unwrap();

		assert_eq!(created.len(), 1);
		assert_eq!(created[0].event_type, HookEventType::Push);
		assert!(!created[0].is_delivered);
		assert!(created[0].payload_content.contains("\"commits\""));
	}

	#[tokio::test]
	async fn test_branch_filter_skips_other_branches() {
		let pool = test_pool().await;
		let hooks = WebhookRepository::new(pool.clone());
		let tasks = HookTaskRepository::new(pool);

		hooks
			.create_webhook(&hook(
				1,
				HookEvent {
					send_everything: true,
					branch_filter: "release/*".to_string(),
					..Default::default()
				},
			))
			.await
			.unwrap();

		let payload = Payload::Push(fixtures::push(1));
		let created = prepare_webhooks(&hooks, &tasks, &repository(1, 10), HookEventType::Push, &payload)
			.await
			.unwrap();
		assert!(created.is_empty());
	}

	#[tokio::test]
	async fn test_org_and_system_hooks_are_included() {
		let pool = test_pool().await;
		let hooks = WebhookRepository::new(pool.clone());
		let tasks = HookTaskRepository::new(pool);

		hooks
			.create_webhook(&NewWebhook {
				org_id: 10,
				..hook(0, HookEvent::everything())
			})
			.await
			.unwrap();
		hooks
			.create_webhook(&NewWebhook {
				is_system_webhook: true,
				..hook(0, HookEvent::everything())
			})
			.await
			.unwrap();

		let payload = Payload::Issues(fixtures::issue_payload(HookIssueAction::Opened));
		let created = prepare_webhooks(&hooks, &tasks, &repository(1, 10), HookEventType::Issues, &payload)
			.await
			.unwrap();
		assert_eq!(created.len(), 2);
		assert!(created.iter().all(|t| t.repo_id == 1));
	}

	#[tokio::test]
	async fn test_invalid_slack_meta_is_skipped() {
		let pool = test_pool().await;
		let hooks = WebhookRepository::new(pool.clone());
		let tasks = HookTaskRepository::new(pool);

		hooks
			.create_webhook(&NewWebhook {
				hook_type: HookType::Slack,
				meta: "{}".to_string(),
				..hook(1, HookEvent::everything())
			})
			.await
			.unwrap();
		hooks
			.create_webhook(&NewWebhook {
				hook_type: HookType::Slack,
				meta: r##"{"channel":"#dev"}"##.to_string(),
				..hook(1, HookEvent::everything())
			})
			.await
			.unwrap();

		let payload = Payload::Push(fixtures::push(1));
		let created = prepare_webhooks(&hooks, &tasks, &repository(1, 10), HookEventType::Push, &payload)
			.await
			.unwrap();
		assert_eq!(created.len(), 1);
		assert!(created[0].payload_content.contains("\"channel\": \"#dev\""));
	}
}
