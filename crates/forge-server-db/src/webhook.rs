// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook definitions and their event subscriptions.
//!
//! A webhook belongs to a repository, an organization, or to nobody. In the
//! last case it is either a system webhook, fired for every repository, or
//! a default webhook, copied into each new repository.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_common_webhook::SigningSecret;
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{DbError, Result};
use crate::pattern::glob_match;
use crate::types::{from_db_time, now_db_time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEventType {
	Create,
	Delete,
	Fork,
	Push,
	Issues,
	IssueAssign,
	IssueLabel,
	IssueMilestone,
	IssueComment,
	PullRequest,
	PullRequestAssign,
	PullRequestLabel,
	PullRequestMilestone,
	PullRequestComment,
	PullRequestReviewApproved,
	PullRequestReviewRejected,
	PullRequestReviewComment,
	PullRequestSync,
	Repository,
	Release,
}

impl HookEventType {
	pub const ALL: [HookEventType; 20] = [
		HookEventType::Create,
		HookEventType::Delete,
		HookEventType::Fork,
		HookEventType::Push,
		HookEventType::Issues,
		HookEventType::IssueAssign,
		HookEventType::IssueLabel,
		HookEventType::IssueMilestone,
		HookEventType::IssueComment,
		HookEventType::PullRequest,
		HookEventType::PullRequestAssign,
		HookEventType::PullRequestLabel,
		HookEventType::PullRequestMilestone,
		HookEventType::PullRequestComment,
		HookEventType::PullRequestReviewApproved,
		HookEventType::PullRequestReviewRejected,
		HookEventType::PullRequestReviewComment,
		HookEventType::PullRequestSync,
		HookEventType::Repository,
		HookEventType::Release,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			HookEventType::Create => "create",
			HookEventType::Delete => "delete",
			HookEventType::Fork => "fork",
			HookEventType::Push => "push",
			HookEventType::Issues => "issues",
			HookEventType::IssueAssign => "issue_assign",
			HookEventType::IssueLabel => "issue_label",
			HookEventType::IssueMilestone => "issue_milestone",
			HookEventType::IssueComment => "issue_comment",
			HookEventType::PullRequest => "pull_request",
			HookEventType::PullRequestAssign => "pull_request_assign",
			HookEventType::PullRequestLabel => "pull_request_label",
			HookEventType::PullRequestMilestone => "pull_request_milestone",
			HookEventType::PullRequestComment => "pull_request_comment",
			HookEventType::PullRequestReviewApproved => "pull_request_review_approved",
			HookEventType::PullRequestReviewRejected => "pull_request_review_rejected",
			HookEventType::PullRequestReviewComment => "pull_request_review_comment",
			HookEventType::PullRequestSync => "pull_request_sync",
			HookEventType::Repository => "repository",
			HookEventType::Release => "release",
		}
	}

	/// Value of the event header sent with a delivery. Several fine-grained
	/// types share a header.
	pub fn event(&self) -> &'static str {
		match self {
			HookEventType::Create => "create",
			HookEventType::Delete => "delete",
			HookEventType::Fork => "fork",
			HookEventType::Push => "push",
			HookEventType::Issues
			| HookEventType::IssueAssign
			| HookEventType::IssueLabel
			| HookEventType::IssueMilestone => "issues",
			HookEventType::PullRequest
			| HookEventType::PullRequestAssign
			| HookEventType::PullRequestLabel
			| HookEventType::PullRequestMilestone
			| HookEventType::PullRequestSync => "pull_request",
			HookEventType::IssueComment | HookEventType::PullRequestComment => "issue_comment",
			HookEventType::PullRequestReviewApproved => "pull_request_approved",
			HookEventType::PullRequestReviewRejected => "pull_request_rejected",
			HookEventType::PullRequestReviewComment => "pull_request_comment",
			HookEventType::Repository => "repository",
			HookEventType::Release => "release",
		}
	}
}

impl fmt::Display for HookEventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for HookEventType {
	type Err = DbError;

	fn from_str(s: &str) -> Result<Self> {
		HookEventType::ALL
			.into_iter()
			.find(|t| t.as_str() == s)
			.ok_or_else(|| DbError::InvalidInput(format!("unknown hook event type: {s}")))
	}
}

/// Per-event subscription flags, only consulted when `choose_events` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookEvents {
	pub create: bool,
	pub delete: bool,
	pub fork: bool,
	pub issues: bool,
	pub issue_assign: bool,
	pub issue_label: bool,
	pub issue_milestone: bool,
	pub issue_comment: bool,
	pub push: bool,
	pub pull_request: bool,
	pub pull_request_assign: bool,
	pub pull_request_label: bool,
	pub pull_request_milestone: bool,
	pub pull_request_comment: bool,
	/// Covers approved, rejected and review comment events.
	pub pull_request_review: bool,
	pub pull_request_sync: bool,
	pub repository: bool,
	pub release: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookEvent {
	pub push_only: bool,
	pub send_everything: bool,
	pub choose_events: bool,
	pub branch_filter: String,
	pub events: HookEvents,
}

impl HookEvent {
	pub fn push_only() -> Self {
		Self {
			push_only: true,
			..Default::default()
		}
	}

	pub fn everything() -> Self {
		Self {
			send_everything: true,
			..Default::default()
		}
	}

	pub fn has_event(&self, event: HookEventType) -> bool {
		if self.send_everything {
			return true;
		}
		if event == HookEventType::Push && self.push_only {
			return true;
		}
		if !self.choose_events {
			return false;
		}
		let e = &self.events;
		match event {
			HookEventType::Create => e.create,
			HookEventType::Delete => e.delete,
			HookEventType::Fork => e.fork,
			HookEventType::Push => e.push,
			HookEventType::Issues => e.issues,
			HookEventType::IssueAssign => e.issue_assign,
			HookEventType::IssueLabel => e.issue_label,
			HookEventType::IssueMilestone => e.issue_milestone,
			HookEventType::IssueComment => e.issue_comment,
			HookEventType::PullRequest => e.pull_request,
			HookEventType::PullRequestAssign => e.pull_request_assign,
			HookEventType::PullRequestLabel => e.pull_request_label,
			HookEventType::PullRequestMilestone => e.pull_request_milestone,
			HookEventType::PullRequestComment => e.pull_request_comment,
			HookEventType::PullRequestReviewApproved
			| HookEventType::PullRequestReviewRejected
			| HookEventType::PullRequestReviewComment => e.pull_request_review,
			HookEventType::PullRequestSync => e.pull_request_sync,
			HookEventType::Repository => e.repository,
			HookEventType::Release => e.release,
		}
	}

	pub fn events_array(&self) -> Vec<&'static str> {
		HookEventType::ALL
			.into_iter()
			.filter(|t| self.has_event(*t))
			.map(|t| t.as_str())
			.collect()
	}

	/// An empty filter or `*` matches every branch. `*` does not stop at
	/// `/`, so `release*` also matches `release/1.0`.
	pub fn matches_branch(&self, branch: &str) -> bool {
		let filter = self.branch_filter.trim();
		if filter.is_empty() || filter == "*" {
			return true;
		}
		glob_match(filter, branch, false)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookContentType {
	#[default]
	Json = 1,
	Form = 2,
}

impl HookContentType {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		match v {
			1 => Some(HookContentType::Json),
			2 => Some(HookContentType::Form),
			_ => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			HookContentType::Json => "json",
			HookContentType::Form => "form",
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookType {
	#[default]
	Forge,
	Slack,
	Discord,
	MsTeams,
}

impl HookType {
	pub fn as_str(&self) -> &'static str {
		match self {
			HookType::Forge => "forge",
			HookType::Slack => "slack",
			HookType::Discord => "discord",
			HookType::MsTeams => "msteams",
		}
	}
}

impl FromStr for HookType {
	type Err = DbError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim() {
			"forge" => Ok(HookType::Forge),
			"slack" => Ok(HookType::Slack),
			"discord" => Ok(HookType::Discord),
			"msteams" => Ok(HookType::MsTeams),
			other => Err(DbError::InvalidInput(format!("unknown hook type: {other}"))),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
	#[default]
	None = 0,
	Succeed = 1,
	Fail = 2,
}

impl HookStatus {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Self {
		match v {
			1 => HookStatus::Succeed,
			2 => HookStatus::Fail,
			_ => HookStatus::None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
	pub id: i64,
	pub repo_id: i64,
	pub org_id: i64,
	pub is_system_webhook: bool,
	pub url: String,
	pub http_method: String,
	pub content_type: HookContentType,
	pub secret: SigningSecret,
	pub events: HookEvent,
	pub is_active: bool,
	pub hook_type: HookType,
	/// Hook-type specific settings as JSON, e.g. the Slack channel.
	pub meta: String,
	pub last_status: HookStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Webhook {
	pub fn has_event(&self, event: HookEventType) -> bool {
		self.events.has_event(event)
	}

	pub fn events_array(&self) -> Vec<&'static str> {
		self.events.events_array()
	}

	pub fn matches_branch(&self, branch: &str) -> bool {
		self.events.matches_branch(branch)
	}
}

#[derive(Debug, Clone, Default)]
pub struct NewWebhook {
	pub repo_id: i64,
	pub org_id: i64,
	pub is_system_webhook: bool,
	pub url: String,
	/// Defaults to POST when empty.
	pub http_method: String,
	pub content_type: HookContentType,
	pub secret: SigningSecret,
	pub events: HookEvent,
	pub is_active: bool,
	pub hook_type: HookType,
	pub meta: String,
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
	async fn create_webhook(&self, hook: &NewWebhook) -> Result<Webhook>;
	async fn get_webhook_by_id(&self, id: i64) -> Result<Webhook>;
	async fn get_webhook_by_repo_id(&self, repo_id: i64, id: i64) -> Result<Webhook>;
	async fn get_webhook_by_org_id(&self, org_id: i64, id: i64) -> Result<Webhook>;
	async fn list_webhooks_by_repo_id(&self, repo_id: i64) -> Result<Vec<Webhook>>;
	async fn list_active_webhooks_by_repo_id(&self, repo_id: i64) -> Result<Vec<Webhook>>;
	async fn list_active_webhooks_by_org_id(&self, org_id: i64) -> Result<Vec<Webhook>>;
	async fn list_system_webhooks(&self) -> Result<Vec<Webhook>>;
	async fn list_default_webhooks(&self) -> Result<Vec<Webhook>>;
	async fn copy_default_webhooks_to_repo(&self, repo_id: i64) -> Result<Vec<Webhook>>;
	async fn update_webhook(&self, hook: &Webhook) -> Result<Webhook>;
	async fn update_webhook_last_status(&self, id: i64, status: HookStatus) -> Result<()>;
	async fn delete_webhook_by_repo_id(&self, repo_id: i64, id: i64) -> Result<()>;
	async fn delete_webhook_by_org_id(&self, org_id: i64, id: i64) -> Result<()>;
	async fn delete_default_system_webhook(&self, id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct WebhookRepository {
	pool: SqlitePool,
}

impl WebhookRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, hook), fields(repo_id = hook.repo_id, org_id = hook.org_id, hook_type = hook.hook_type.as_str()))]
	pub async fn create_webhook(&self, hook: &NewWebhook) -> Result<Webhook> {
		let mut conn = self.pool.acquire().await?;
		let created = insert_webhook(&mut *conn, hook).await?;
		tracing::debug!(hook_id = created.id, "webhook created");
		Ok(created)
	}

	#[tracing::instrument(skip(self), fields(hook_id = id))]
	pub async fn get_webhook_by_id(&self, id: i64) -> Result<Webhook> {
		self.get_one(&format!("{SELECT_WEBHOOK} WHERE id = ?"), id, None).await
	}

	#[tracing::instrument(skip(self), fields(repo_id, hook_id = id))]
	pub async fn get_webhook_by_repo_id(&self, repo_id: i64, id: i64) -> Result<Webhook> {
		self.get_one(&format!("{SELECT_WEBHOOK} WHERE id = ? AND repo_id = ?"), id, Some(repo_id))
			.await
	}

	#[tracing::instrument(skip(self), fields(org_id, hook_id = id))]
	pub async fn get_webhook_by_org_id(&self, org_id: i64, id: i64) -> Result<Webhook> {
		self.get_one(&format!("{SELECT_WEBHOOK} WHERE id = ? AND org_id = ?"), id, Some(org_id))
			.await
	}

	async fn get_one(&self, sql: &str, id: i64, owner: Option<i64>) -> Result<Webhook> {
		let mut query = sqlx::query(sql).bind(id);
		if let Some(owner) = owner {
			query = query.bind(owner);
		}
		let row = query
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("webhook {id}")))?;
		row_to_webhook(&row)
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn list_webhooks_by_repo_id(&self, repo_id: i64) -> Result<Vec<Webhook>> {
		self.list(&format!("{SELECT_WEBHOOK} WHERE repo_id = ? ORDER BY id"), Some(repo_id))
			.await
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn list_active_webhooks_by_repo_id(&self, repo_id: i64) -> Result<Vec<Webhook>> {
		self.list(
			&format!("{SELECT_WEBHOOK} WHERE repo_id = ? AND is_active = 1 ORDER BY id"),
			Some(repo_id),
		)
		.await
	}

	#[tracing::instrument(skip(self), fields(org_id))]
	pub async fn list_active_webhooks_by_org_id(&self, org_id: i64) -> Result<Vec<Webhook>> {
		self.list(
			&format!("{SELECT_WEBHOOK} WHERE org_id = ? AND is_active = 1 ORDER BY id"),
			Some(org_id),
		)
		.await
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_system_webhooks(&self) -> Result<Vec<Webhook>> {
		self.list(
			&format!("{SELECT_WEBHOOK} WHERE repo_id = 0 AND org_id = 0 AND is_system_webhook = 1 ORDER BY id"),
			None,
		)
		.await
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_default_webhooks(&self) -> Result<Vec<Webhook>> {
		let mut conn = self.pool.acquire().await?;
		list_default_webhooks(&mut *conn).await
	}

	async fn list(&self, sql: &str, owner: Option<i64>) -> Result<Vec<Webhook>> {
		let mut query = sqlx::query(sql);
		if let Some(owner) = owner {
			query = query.bind(owner);
		}
		let rows = query.fetch_all(&self.pool).await?;
		rows.iter().map(row_to_webhook).collect()
	}

	/// Give a new repository its own copy of every default webhook.
	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn copy_default_webhooks_to_repo(&self, repo_id: i64) -> Result<Vec<Webhook>> {
		let mut tx = self.pool.begin().await?;
		let defaults = list_default_webhooks(&mut *tx).await?;
		let mut copies = Vec::with_capacity(defaults.len());
		for hook in defaults {
			let copy = NewWebhook {
				repo_id,
				org_id: 0,
				is_system_webhook: false,
				url: hook.url,
				http_method: hook.http_method,
				content_type: hook.content_type,
				secret: hook.secret,
				events: hook.events,
				is_active: hook.is_active,
				hook_type: hook.hook_type,
				meta: hook.meta,
			};
			copies.push(insert_webhook(&mut *tx, &copy).await?);
		}
		tx.commit().await?;
		Ok(copies)
	}

	#[tracing::instrument(skip(self, hook), fields(hook_id = hook.id))]
	pub async fn update_webhook(&self, hook: &Webhook) -> Result<Webhook> {
		validate_url(&hook.url)?;
		let http_method = normalize_http_method(&hook.http_method)?;
		let result = sqlx::query(
			r#"
			UPDATE webhooks SET url = ?, http_method = ?, content_type = ?, secret = ?, events = ?,
				is_active = ?, hook_type = ?, meta = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(hook.url.trim())
		.bind(http_method)
		.bind(hook.content_type.as_i64())
		.bind(hook.secret.expose())
		.bind(serde_json::to_string(&hook.events)?)
		.bind(hook.is_active)
		.bind(hook.hook_type.as_str())
		.bind(&hook.meta)
		.bind(now_db_time())
		.bind(hook.id)
		.execute(&self.pool)
		.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("webhook {}", hook.id)));
		}
		self.get_webhook_by_id(hook.id).await
	}

	#[tracing::instrument(skip(self), fields(hook_id = id, status = ?status))]
	pub async fn update_webhook_last_status(&self, id: i64, status: HookStatus) -> Result<()> {
		sqlx::query("UPDATE webhooks SET last_status = ? WHERE id = ?")
			.bind(status.as_i64())
			.bind(id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(repo_id, hook_id = id))]
	pub async fn delete_webhook_by_repo_id(&self, repo_id: i64, id: i64) -> Result<()> {
		self.delete_webhook("DELETE FROM webhooks WHERE id = ? AND repo_id = ?", id, repo_id)
			.await
	}

	#[tracing::instrument(skip(self), fields(org_id, hook_id = id))]
	pub async fn delete_webhook_by_org_id(&self, org_id: i64, id: i64) -> Result<()> {
		self.delete_webhook("DELETE FROM webhooks WHERE id = ? AND org_id = ?", id, org_id)
			.await
	}

	/// Delete a system or default webhook.
	#[tracing::instrument(skip(self), fields(hook_id = id))]
	pub async fn delete_default_system_webhook(&self, id: i64) -> Result<()> {
		self.delete_webhook(
			"DELETE FROM webhooks WHERE id = ? AND repo_id = 0 AND org_id = ?",
			id,
			0,
		)
		.await
	}

	async fn delete_webhook(&self, sql: &str, id: i64, owner: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let result = sqlx::query(sql).bind(id).bind(owner).execute(&mut *tx).await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("webhook {id}")));
		}
		let tasks = sqlx::query("DELETE FROM hook_tasks WHERE hook_id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		tracing::debug!(hook_id = id, tasks = tasks.rows_affected(), "webhook deleted");
		Ok(())
	}
}

#[async_trait]
impl WebhookStore for WebhookRepository {
	async fn create_webhook(&self, hook: &NewWebhook) -> Result<Webhook> {
		WebhookRepository::create_webhook(self, hook).await
	}

	async fn get_webhook_by_id(&self, id: i64) -> Result<Webhook> {
		WebhookRepository::get_webhook_by_id(self, id).await
	}

	async fn get_webhook_by_repo_id(&self, repo_id: i64, id: i64) -> Result<Webhook> {
		WebhookRepository::get_webhook_by_repo_id(self, repo_id, id).await
	}

	async fn get_webhook_by_org_id(&self, org_id: i64, id: i64) -> Result<Webhook> {
		WebhookRepository::get_webhook_by_org_id(self, org_id, id).await
	}

	async fn list_webhooks_by_repo_id(&self, repo_id: i64) -> Result<Vec<Webhook>> {
		WebhookRepository::list_webhooks_by_repo_id(self, repo_id).await
	}

	async fn list_active_webhooks_by_repo_id(&self, repo_id: i64) -> Result<Vec<Webhook>> {
		WebhookRepository::list_active_webhooks_by_repo_id(self, repo_id).await
	}

	async fn list_active_webhooks_by_org_id(&self, org_id: i64) -> Result<Vec<Webhook>> {
		WebhookRepository::list_active_webhooks_by_org_id(self, org_id).await
	}

	async fn list_system_webhooks(&self) -> Result<Vec<Webhook>> {
		WebhookRepository::list_system_webhooks(self).await
	}

	async fn list_default_webhooks(&self) -> Result<Vec<Webhook>> {
		WebhookRepository::list_default_webhooks(self).await
	}

	async fn copy_default_webhooks_to_repo(&self, repo_id: i64) -> Result<Vec<Webhook>> {
		WebhookRepository::copy_default_webhooks_to_repo(self, repo_id).await
	}

	async fn update_webhook(&self, hook: &Webhook) -> Result<Webhook> {
		WebhookRepository::update_webhook(self, hook).await
	}

	async fn update_webhook_last_status(&self, id: i64, status: HookStatus) -> Result<()> {
		WebhookRepository::update_webhook_last_status(self, id, status).await
	}

	async fn delete_webhook_by_repo_id(&self, repo_id: i64, id: i64) -> Result<()> {
		WebhookRepository::delete_webhook_by_repo_id(self, repo_id, id).await
	}

	async fn delete_webhook_by_org_id(&self, org_id: i64, id: i64) -> Result<()> {
		WebhookRepository::delete_webhook_by_org_id(self, org_id, id).await
	}

	async fn delete_default_system_webhook(&self, id: i64) -> Result<()> {
		WebhookRepository::delete_default_system_webhook(self, id).await
	}
}

const SELECT_WEBHOOK: &str = r#"
	SELECT id, repo_id, org_id, is_system_webhook, url, http_method, content_type, secret, events,
		is_active, hook_type, meta, last_status, created_at, updated_at
	FROM webhooks"#;

/// Only absolute http(s) URLs are accepted.
fn validate_url(raw: &str) -> Result<()> {
	let parsed = url::Url::parse(raw.trim())
		.map_err(|e| DbError::InvalidInput(format!("invalid webhook url {raw:?}: {e}")))?;
	match parsed.scheme() {
		"http" | "https" if parsed.host_str().is_some() => Ok(()),
		_ => Err(DbError::InvalidInput(format!("webhook url must be http or https: {raw}"))),
	}
}

fn normalize_http_method(raw: &str) -> Result<&'static str> {
	match raw.trim().to_ascii_uppercase().as_str() {
		"" | "POST" => Ok("POST"),
		"GET" => Ok("GET"),
		"PUT" => Ok("PUT"),
		other => Err(DbError::InvalidInput(format!("unsupported webhook http method: {other}"))),
	}
}

async fn insert_webhook(conn: &mut SqliteConnection, hook: &NewWebhook) -> Result<Webhook> {
	validate_url(&hook.url)?;
	let http_method = normalize_http_method(&hook.http_method)?;
	let now = now_db_time();
	let result = sqlx::query(
		r#"
		INSERT INTO webhooks (repo_id, org_id, is_system_webhook, url, http_method, content_type, secret,
			events, is_active, hook_type, meta, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(hook.repo_id)
	.bind(hook.org_id)
	.bind(hook.is_system_webhook)
	.bind(hook.url.trim())
	.bind(http_method)
	.bind(hook.content_type.as_i64())
	.bind(hook.secret.expose())
	.bind(serde_json::to_string(&hook.events)?)
	.bind(hook.is_active)
	.bind(hook.hook_type.as_str())
	.bind(&hook.meta)
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await?;
	let row = sqlx::query(&format!("{SELECT_WEBHOOK} WHERE id = ?"))
		.bind(result.last_insert_rowid())
		.fetch_one(&mut *conn)
		.await?;
	row_to_webhook(&row)
}

async fn list_default_webhooks(conn: &mut SqliteConnection) -> Result<Vec<Webhook>> {
	let rows = sqlx::query(&format!(
		"{SELECT_WEBHOOK} WHERE repo_id = 0 AND org_id = 0 AND is_system_webhook = 0 ORDER BY id"
	))
	.fetch_all(&mut *conn)
	.await?;
	rows.iter().map(row_to_webhook).collect()
}

fn row_to_webhook(row: &SqliteRow) -> Result<Webhook> {
	let id: i64 = row.get("id");
	let raw_content_type: i64 = row.get("content_type");
	let hook_type: String = row.get("hook_type");
	let events: String = row.get("events");
	let events = serde_json::from_str(&events).unwrap_or_else(|e| {
		tracing::warn!(hook_id = id, error = %e, "unreadable webhook events, treating as none");
		HookEvent::default()
	});
	let secret: String = row.get("secret");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Webhook {
		id,
		repo_id: row.get("repo_id"),
		org_id: row.get("org_id"),
		is_system_webhook: row.get("is_system_webhook"),
		url: row.get("url"),
		http_method: row.get("http_method"),
		content_type: HookContentType::from_i64(raw_content_type).unwrap_or_default(),
		secret: SigningSecret::new(secret),
		events,
		is_active: row.get("is_active"),
		hook_type: hook_type.parse()?,
		meta: row.get("meta"),
		last_status: HookStatus::from_i64(row.get("last_status")),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	fn repo_hook(repo_id: i64, events: HookEvent) -> NewWebhook {
		NewWebhook {
			repo_id,
			url: "https://ci.example.com/hook".to_string(),
			secret: SigningSecret::new("s3cret"),
			events,
			is_active: true,
			..Default::default()
		}
	}

	#[test]
	fn test_event_header_names() {
		assert_eq!(HookEventType::IssueLabel.event(), "issues");
		assert_eq!(HookEventType::PullRequestSync.event(), "pull_request");
		assert_eq!(HookEventType::PullRequestComment.event(), "issue_comment");
		assert_eq!(HookEventType::PullRequestReviewApproved.event(), "pull_request_approved");
		assert_eq!(HookEventType::PullRequestReviewComment.event(), "pull_request_comment");
		assert_eq!("pull_request_sync".parse::<HookEventType>().unwrap(), HookEventType::PullRequestSync);
		assert!("bogus".parse::<HookEventType>().is_err());
	}

	#[test]
	fn test_push_only() {
		let ev = HookEvent::push_only();
		assert!(ev.has_event(HookEventType::Push));
		assert!(!ev.has_event(HookEventType::Create));
		assert!(!ev.has_event(HookEventType::Delete));
		assert_eq!(ev.events_array(), vec!["push"]);
	}

	#[test]
	fn test_choose_events() {
		let ev = HookEvent {
			choose_events: true,
			events: HookEvents {
				issues: true,
				pull_request_review: true,
				..Default::default()
			},
			..Default::default()
		};
		assert!(ev.has_event(HookEventType::Issues));
		assert!(!ev.has_event(HookEventType::IssueLabel));
		assert!(ev.has_event(HookEventType::PullRequestReviewRejected));
		assert_eq!(
			ev.events_array(),
			vec![
				"issues",
				"pull_request_review_approved",
				"pull_request_review_rejected",
				"pull_request_review_comment"
			]
		);

		// Flags are ignored unless events are chosen.
		let ignored = HookEvent {
			choose_events: false,
			..ev
		};
		assert!(ignored.events_array().is_empty());
		assert_eq!(HookEvent::everything().events_array().len(), HookEventType::ALL.len());
	}

	#[test]
	fn test_branch_filter() {
		let mut ev = HookEvent::everything();
		assert!(ev.matches_branch("anything"));
		ev.branch_filter = "*".to_string();
		assert!(ev.matches_branch("feature/x"));
		ev.branch_filter = "{main,release/*}".to_string();
		assert!(ev.matches_branch("main"));
		assert!(ev.matches_branch("release/1.0"));
		assert!(!ev.matches_branch("feature/x"));
		ev.branch_filter = "feat*".to_string();
		assert!(ev.matches_branch("feature/nested/x"));
	}

	#[test]
	fn test_secret_not_in_debug() {
		let hook = repo_hook(1, HookEvent::push_only());
		assert!(!format!("{hook:?}").contains("s3cret"));
	}

	#[tokio::test]
	async fn test_create_validates() {
		let pool = create_test_pool().await;
		let hooks = WebhookRepository::new(pool);

		let bad_url = NewWebhook {
			url: "ftp://example.com".to_string(),
			..repo_hook(1, HookEvent::push_only())
		};
		assert!(hooks.create_webhook(&bad_url).await.unwrap_err().is_invalid_input());

		let bad_method = NewWebhook {
			http_method: "DELETE".to_string(),
			..repo_hook(1, HookEvent::push_only())
		};
		assert!(hooks.create_webhook(&bad_method).await.unwrap_err().is_invalid_input());

		let created = hooks.create_webhook(&repo_hook(1, HookEvent::push_only())).await.unwrap();
		assert_eq!(created.http_method, "POST");
		assert_eq!(created.secret.expose(), "s3cret");
		assert_eq!(created.events, HookEvent::push_only());
		assert_eq!(created.last_status, HookStatus::None);
	}

	#[tokio::test]
	async fn test_lookup_scoping_and_active_filter() {
		let pool = create_test_pool().await;
		let hooks = WebhookRepository::new(pool);

		let active = hooks.create_webhook(&repo_hook(1, HookEvent::everything())).await.unwrap();
		let inactive = hooks
			.create_webhook(&NewWebhook {
				is_active: false,
				..repo_hook(1, HookEvent::everything())
			})
			.await
			.unwrap();

		assert!(hooks.get_webhook_by_repo_id(2, active.id).await.unwrap_err().is_not_found());
		assert_eq!(hooks.get_webhook_by_repo_id(1, active.id).await.unwrap().id, active.id);

		let listed = hooks.list_active_webhooks_by_repo_id(1).await.unwrap();
		assert_eq!(listed.iter().map(|h| h.id).collect::<Vec<_>>(), vec![active.id]);
		assert_eq!(hooks.list_webhooks_by_repo_id(1).await.unwrap().len(), 2);

		let updated = hooks
			.update_webhook(&Webhook {
				is_active: true,
				..inactive
			})
			.await
			.unwrap();
		assert!(updated.is_active);
		assert_eq!(hooks.list_active_webhooks_by_repo_id(1).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_system_and_default_hooks() {
		let pool = create_test_pool().await;
		let hooks = WebhookRepository::new(pool);
		let system = hooks
			.create_webhook(&NewWebhook {
				is_system_webhook: true,
				..repo_hook(0, HookEvent::everything())
			})
			.await
			.unwrap();
		let default = hooks.create_webhook(&repo_hook(0, HookEvent::push_only())).await.unwrap();

		assert_eq!(hooks.list_system_webhooks().await.unwrap()[0].id, system.id);
		assert_eq!(hooks.list_default_webhooks().await.unwrap()[0].id, default.id);

		let copies = hooks.copy_default_webhooks_to_repo(7).await.unwrap();
		assert_eq!(copies.len(), 1);
		assert_eq!(copies[0].repo_id, 7);
		assert_eq!(copies[0].events, HookEvent::push_only());

		hooks.delete_default_system_webhook(system.id).await.unwrap();
		assert!(hooks.list_system_webhooks().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_delete_removes_hook_tasks() {
		let pool = create_test_pool().await;
		let hooks = WebhookRepository::new(pool.clone());
		let hook = hooks.create_webhook(&repo_hook(1, HookEvent::push_only())).await.unwrap();
		sqlx::query(
			"INSERT INTO hook_tasks (repo_id, hook_id, uuid, payload_content, event_type) VALUES (1, ?, 'u1', '{}', 'push')",
		)
		.bind(hook.id)
		.execute(&pool)
		.await
		.unwrap();

		assert!(hooks.delete_webhook_by_org_id(1, hook.id).await.unwrap_err().is_not_found());
		hooks.delete_webhook_by_repo_id(1, hook.id).await.unwrap();
		let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hook_tasks")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(left, 0);
	}
}
