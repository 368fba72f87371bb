// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Queued and delivered webhook requests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::types::{from_opt_db_time, to_db_time, ListOptions};
use crate::webhook::HookEventType;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRequest {
	pub url: String,
	pub http_method: String,
	pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
	pub status: u16,
	pub headers: BTreeMap<String, String>,
	pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTask {
	pub id: i64,
	pub repo_id: i64,
	pub hook_id: i64,
	pub uuid: String,
	/// Serialized payload, as sent for JSON webhooks.
	pub payload_content: String,
	pub event_type: HookEventType,
	pub is_delivered: bool,
	pub delivered_at: Option<DateTime<Utc>>,
	pub is_succeed: bool,
	pub request_content: Option<HookRequest>,
	pub response_content: Option<HookResponse>,
}

#[derive(Debug, Clone)]
pub struct NewHookTask {
	pub repo_id: i64,
	pub hook_id: i64,
	pub event_type: HookEventType,
	pub payload_content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookTaskCleanup {
	/// Delete delivered tasks older than the given age.
	OlderThan(Duration),
	/// Keep only this many of the most recent deliveries per webhook.
	PerWebhook(i64),
}

#[async_trait]
pub trait HookTaskStore: Send + Sync {
	async fn create_hook_task(&self, task: &NewHookTask) -> Result<HookTask>;
	async fn get_hook_task_by_id(&self, id: i64) -> Result<Option<HookTask>>;
	async fn update_hook_task(&self, task: &HookTask) -> Result<()>;
	async fn list_hook_tasks(&self, hook_id: i64, opts: &ListOptions) -> Result<Vec<HookTask>>;
	async fn find_undelivered_hook_tasks(&self) -> Result<Vec<HookTask>>;
	async fn find_repo_undelivered_hook_tasks(&self, repo_id: i64) -> Result<Vec<HookTask>>;
	async fn cleanup_hook_task_table(&self, cleanup: HookTaskCleanup) -> Result<u64>;
}

#[derive(Clone)]
pub struct HookTaskRepository {
	pool: SqlitePool,
}

impl HookTaskRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, task), fields(hook_id = task.hook_id, event = %task.event_type))]
	pub async fn create_hook_task(&self, task: &NewHookTask) -> Result<HookTask> {
		let uuid = Uuid::new_v4().to_string();
		let result = sqlx::query(
			r#"
			INSERT INTO hook_tasks (repo_id, hook_id, uuid, payload_content, event_type)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(task.repo_id)
		.bind(task.hook_id)
		.bind(&uuid)
		.bind(&task.payload_content)
		.bind(task.event_type.as_str())
		.execute(&self.pool)
		.await?;
		let id = result.last_insert_rowid();
		tracing::debug!(task_id = id, uuid = %uuid, "hook task queued");
		self.get_hook_task_by_id(id)
			.await?
			.ok_or_else(|| DbError::Internal(format!("hook task {id} vanished after insert")))
	}

	#[tracing::instrument(skip(self), fields(task_id = id))]
	pub async fn get_hook_task_by_id(&self, id: i64) -> Result<Option<HookTask>> {
		let row = sqlx::query(&format!("{SELECT_HOOK_TASK} WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_hook_task(&r)).transpose()
	}

	/// Persist the delivery outcome of a task.
	#[tracing::instrument(skip(self, task), fields(task_id = task.id, is_succeed = task.is_succeed))]
	pub async fn update_hook_task(&self, task: &HookTask) -> Result<()> {
		let request = task.request_content.as_ref().map(serde_json::to_string).transpose()?;
		let response = task.response_content.as_ref().map(serde_json::to_string).transpose()?;
		let result = sqlx::query(
			r#"
			UPDATE hook_tasks SET is_delivered = ?, delivered_at = ?, is_succeed = ?,
				request_content = ?, response_content = ?
			WHERE id = ?
			"#,
		)
		.bind(task.is_delivered)
		.bind(task.delivered_at.as_ref().map(to_db_time))
		.bind(task.is_succeed)
		.bind(request)
		.bind(response)
		.bind(task.id)
		.execute(&self.pool)
		.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("hook task {}", task.id)));
		}
		Ok(())
	}

	/// Delivery history of a webhook, newest first.
	#[tracing::instrument(skip(self, opts), fields(hook_id))]
	pub async fn list_hook_tasks(&self, hook_id: i64, opts: &ListOptions) -> Result<Vec<HookTask>> {
		let (limit, offset) = opts.limit_offset();
		let rows = sqlx::query(&format!(
			"{SELECT_HOOK_TASK} WHERE hook_id = ? ORDER BY id DESC LIMIT ? OFFSET ?"
		))
		.bind(hook_id)
		.bind(limit)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_hook_task).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_undelivered_hook_tasks(&self) -> Result<Vec<HookTask>> {
		let rows = sqlx::query(&format!("{SELECT_HOOK_TASK} WHERE is_delivered = 0 ORDER BY id ASC"))
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(row_to_hook_task).collect()
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn find_repo_undelivered_hook_tasks(&self, repo_id: i64) -> Result<Vec<HookTask>> {
		let rows = sqlx::query(&format!(
			"{SELECT_HOOK_TASK} WHERE repo_id = ? AND is_delivered = 0 ORDER BY id ASC"
		))
		.bind(repo_id)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_hook_task).collect()
	}

	/// Returns the number of deleted tasks. Undelivered tasks are never
	/// removed.
	#[tracing::instrument(skip(self))]
	pub async fn cleanup_hook_task_table(&self, cleanup: HookTaskCleanup) -> Result<u64> {
		let deleted = match cleanup {
			HookTaskCleanup::OlderThan(age) => {
				let cutoff = to_db_time(&(Utc::now() - age));
				sqlx::query("DELETE FROM hook_tasks WHERE is_delivered = 1 AND delivered_at < ?")
					.bind(cutoff)
					.execute(&self.pool)
					.await?
					.rows_affected()
			}
			HookTaskCleanup::PerWebhook(keep) => {
				if keep < 0 {
					return Err(DbError::InvalidInput(format!("cannot keep {keep} deliveries")));
				}
				let mut conn = self.pool.acquire().await?;
				let hook_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM webhooks ORDER BY id")
					.fetch_all(&mut *conn)
					.await?;
				let mut total = 0;
				for hook_id in hook_ids {
					total += delete_delivered_tasks_by_webhook(&mut *conn, hook_id, keep).await?;
				}
				total
			}
		};
		tracing::info!(deleted, "hook task table cleaned");
		Ok(deleted)
	}
}

#[async_trait]
impl HookTaskStore for HookTaskRepository {
	async fn create_hook_task(&self, task: &NewHookTask) -> Result<HookTask> {
		HookTaskRepository::create_hook_task(self, task).await
	}

	async fn get_hook_task_by_id(&self, id: i64) -> Result<Option<HookTask>> {
		HookTaskRepository::get_hook_task_by_id(self, id).await
	}

	async fn update_hook_task(&self, task: &HookTask) -> Result<()> {
		HookTaskRepository::update_hook_task(self, task).await
	}

	async fn list_hook_tasks(&self, hook_id: i64, opts: &ListOptions) -> Result<Vec<HookTask>> {
		HookTaskRepository::list_hook_tasks(self, hook_id, opts).await
	}

	async fn find_undelivered_hook_tasks(&self) -> Result<Vec<HookTask>> {
		HookTaskRepository::find_undelivered_hook_tasks(self).await
	}

	async fn find_repo_undelivered_hook_tasks(&self, repo_id: i64) -> Result<Vec<HookTask>> {
		HookTaskRepository::find_repo_undelivered_hook_tasks(self, repo_id).await
	}

	async fn cleanup_hook_task_table(&self, cleanup: HookTaskCleanup) -> Result<u64> {
		HookTaskRepository::cleanup_hook_task_table(self, cleanup).await
	}
}

const SELECT_HOOK_TASK: &str = r#"
	SELECT id, repo_id, hook_id, uuid, payload_content, event_type, is_delivered, delivered_at,
		is_succeed, request_content, response_content
	FROM hook_tasks"#;

async fn delete_delivered_tasks_by_webhook(conn: &mut SqliteConnection, hook_id: i64, keep: i64) -> Result<u64> {
	let oldest_kept: Option<String> = sqlx::query_scalar(
		r#"
		SELECT delivered_at FROM hook_tasks
		WHERE hook_id = ? AND is_delivered = 1 AND delivered_at IS NOT NULL
		ORDER BY delivered_at DESC
		LIMIT 1 OFFSET ?
		"#,
	)
	.bind(hook_id)
	.bind(keep)
	.fetch_optional(&mut *conn)
	.await?;

	let Some(cutoff) = oldest_kept else {
		tracing::trace!(hook_id, "no hook tasks to delete");
		return Ok(0);
	};
	let result = sqlx::query("DELETE FROM hook_tasks WHERE hook_id = ? AND is_delivered = 1 AND delivered_at <= ?")
		.bind(hook_id)
		.bind(cutoff)
		.execute(&mut *conn)
		.await?;
	tracing::trace!(hook_id, deleted = result.rows_affected(), "deleted hook tasks");
	Ok(result.rows_affected())
}

fn parse_content<T: DeserializeOwned>(task_id: i64, column: &str, raw: Option<String>) -> Option<T> {
	let raw = raw.filter(|s| !s.is_empty())?;
	match serde_json::from_str(&raw) {
		Ok(v) => Some(v),
		Err(e) => {
			tracing::warn!(task_id, column, error = %e, "unreadable hook task content");
			None
		}
	}
}

fn row_to_hook_task(row: &SqliteRow) -> Result<HookTask> {
	let id: i64 = row.get("id");
	let event_type: String = row.get("event_type");
	Ok(HookTask {
		id,
		repo_id: row.get("repo_id"),
		hook_id: row.get("hook_id"),
		uuid: row.get("uuid"),
		payload_content: row.get("payload_content"),
		event_type: event_type.parse()?,
		is_delivered: row.get("is_delivered"),
		delivered_at: from_opt_db_time(row.get("delivered_at"))?,
		is_succeed: row.get("is_succeed"),
		request_content: parse_content(id, "request_content", row.get("request_content")),
		response_content: parse_content(id, "response_content", row.get("response_content")),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;
	use crate::webhook::{HookEvent, NewWebhook, WebhookRepository};

	fn task(hook_id: i64) -> NewHookTask {
		NewHookTask {
			repo_id: 1,
			hook_id,
			event_type: HookEventType::Push,
			payload_content: r#"{"ref":"refs/heads/main"}"#.to_string(),
		}
	}

	async fn deliver(tasks: &HookTaskRepository, id: i64, at: DateTime<Utc>) {
		let mut t = tasks.get_hook_task_by_id(id).await.unwrap().unwrap();
		t.is_delivered = true;
		t.is_succeed = true;
		t.delivered_at = Some(at);
		tasks.update_hook_task(&t).await.unwrap();
	}

	#[tokio::test]
	async fn test_create_and_record_delivery() {
		let pool = create_test_pool().await;
		let tasks = HookTaskRepository::new(pool);

		let a = tasks.create_hook_task(&task(1)).await.unwrap();
		let b = tasks.create_hook_task(&task(1)).await.unwrap();
		assert_ne!(a.uuid, b.uuid);
		assert!(Uuid::parse_str(&a.uuid).is_ok());
		assert!(!a.is_delivered);
		assert_eq!(tasks.find_undelivered_hook_tasks().await.unwrap().len(), 2);

		let mut delivered = a.clone();
		delivered.is_delivered = true;
		delivered.delivered_at = Some(Utc::now());
		delivered.request_content = Some(HookRequest {
			url: "https://example.com".to_string(),
			http_method: "POST".to_string(),
			headers: BTreeMap::from([("X-Forge-Event".to_string(), "push".to_string())]),
		});
		delivered.response_content = Some(HookResponse {
			status: 204,
			..Default::default()
		});
		tasks.update_hook_task(&delivered).await.unwrap();

		let reloaded = tasks.get_hook_task_by_id(a.id).await.unwrap().unwrap();
		assert_eq!(reloaded.request_content, delivered.request_content);
		assert_eq!(reloaded.response_content.unwrap().status, 204);
		assert_eq!(
			tasks.find_repo_undelivered_hook_tasks(1).await.unwrap().iter().map(|t| t.id).collect::<Vec<_>>(),
			vec![b.id]
		);

		let history = tasks.list_hook_tasks(1, &ListOptions::default()).await.unwrap();
		assert_eq!(history.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b.id, a.id]);
	}

	#[tokio::test]
	async fn test_cleanup_older_than() {
		let pool = create_test_pool().await;
		let tasks = HookTaskRepository::new(pool);
		let old = tasks.create_hook_task(&task(1)).await.unwrap();
		let recent = tasks.create_hook_task(&task(1)).await.unwrap();
		let pending = tasks.create_hook_task(&task(1)).await.unwrap();
		deliver(&tasks, old.id, Utc::now() - Duration::days(10)).await;
		deliver(&tasks, recent.id, Utc::now()).await;

		let deleted = tasks
			.cleanup_hook_task_table(HookTaskCleanup::OlderThan(Duration::days(7)))
			.await
			.unwrap();
		assert_eq!(deleted, 1);
		assert!(tasks.get_hook_task_by_id(old.id).await.unwrap().is_none());
		assert!(tasks.get_hook_task_by_id(recent.id).await.unwrap().is_some());
		assert!(tasks.get_hook_task_by_id(pending.id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_cleanup_per_webhook_keeps_newest() {
		let pool = create_test_pool().await;
		let hook = WebhookRepository::new(pool.clone())
			.create_webhook(&NewWebhook {
				repo_id: 1,
				url: "https://example.com/hook".to_string(),
				events: HookEvent::push_only(),
				is_active: true,
				..Default::default()
			})
			.await
			.unwrap();
		let tasks = HookTaskRepository::new(pool);

		let now = Utc::now();
		let mut ids = Vec::new();
		for age in [4, 3, 2, 1] {
			let t = tasks.create_hook_task(&task(hook.id)).await.unwrap();
			deliver(&tasks, t.id, now - Duration::hours(age)).await;
			ids.push(t.id);
		}
		let pending = tasks.create_hook_task(&task(hook.id)).await.unwrap();

		let deleted = tasks.cleanup_hook_task_table(HookTaskCleanup::PerWebhook(2)).await.unwrap();
		assert_eq!(deleted, 2);
		let left: Vec<i64> = tasks
			.list_hook_tasks(hook.id, &ListOptions::default())
			.await
			.unwrap()
			.iter()
			.map(|t| t.id)
			.collect();
		assert_eq!(left, vec![pending.id, ids[3], ids[2]]);
	}
}
