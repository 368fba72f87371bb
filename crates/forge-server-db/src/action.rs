// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Activity feed.
//!
//! Every action is copied into the feed of the actor, of each repository
//! watcher and of the owning organization, one row per recipient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::access::access_mode;
use crate::error::{DbError, Result};
use crate::issue::fetch_issue;
use crate::repo::{fetch_repository, get_repo_watchers_ids};
use crate::types::{from_db_time, now_db_time, AccessMode, ListOptions};
use crate::user::{fetch_user, get_user_by_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
	CreateRepo = 1,
	RenameRepo = 2,
	StarRepo = 3,
	WatchRepo = 4,
	CommitRepo = 5,
	CreateIssue = 6,
	CreatePullRequest = 7,
	TransferRepo = 8,
	PushTag = 9,
	CommentIssue = 10,
	MergePullRequest = 11,
	CloseIssue = 12,
	ReopenIssue = 13,
	ClosePullRequest = 14,
	ReopenPullRequest = 15,
	DeleteTag = 16,
	DeleteBranch = 17,
	ApprovePullRequest = 21,
	RejectPullRequest = 22,
	CommentPull = 23,
	PublishRelease = 24,
}

impl ActionType {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		use ActionType::*;
		Some(match v {
			1 => CreateRepo,
			2 => RenameRepo,
			3 => StarRepo,
			4 => WatchRepo,
			5 => CommitRepo,
			6 => CreateIssue,
			7 => CreatePullRequest,
			8 => TransferRepo,
			9 => PushTag,
			10 => CommentIssue,
			11 => MergePullRequest,
			12 => CloseIssue,
			13 => ReopenIssue,
			14 => ClosePullRequest,
			15 => ReopenPullRequest,
			16 => DeleteTag,
			17 => DeleteBranch,
			21 => ApprovePullRequest,
			22 => RejectPullRequest,
			23 => CommentPull,
			24 => PublishRelease,
			_ => return None,
		})
	}

	/// Actions that reveal issue or pull request content.
	pub fn is_issue_related(&self) -> bool {
		matches!(
			self,
			ActionType::CreateIssue
				| ActionType::CreatePullRequest
				| ActionType::CommentIssue
				| ActionType::MergePullRequest
				| ActionType::CloseIssue
				| ActionType::ReopenIssue
				| ActionType::ClosePullRequest
				| ActionType::ReopenPullRequest
				| ActionType::ApprovePullRequest
				| ActionType::RejectPullRequest
				| ActionType::CommentPull
		)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
	pub id: i64,
	/// The feed this row belongs to.
	pub user_id: i64,
	pub op_type: ActionType,
	pub act_user_id: i64,
	pub repo_id: i64,
	pub comment_id: Option<i64>,
	pub is_deleted: bool,
	pub ref_name: String,
	pub is_private: bool,
	/// For issue and pull request actions this is `"{index}|{title}"`.
	pub content: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAction {
	pub op_type: ActionType,
	pub act_user_id: i64,
	pub repo_id: i64,
	pub comment_id: Option<i64>,
	pub ref_name: String,
	pub content: String,
}

impl NewAction {
	pub fn new(op_type: ActionType, act_user_id: i64, repo_id: i64) -> Self {
		Self {
			op_type,
			act_user_id,
			repo_id,
			comment_id: None,
			ref_name: String::new(),
			content: String::new(),
		}
	}

	/// Content for an action about an issue or pull request.
	pub fn issue_content(index: i64, title: &str) -> String {
		format!("{index}|{title}")
	}
}

#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
	/// Whose feed to read.
	pub request_user: i64,
	/// Who is reading it. Private entries are only shown to the feed owner
	/// or an admin.
	pub actor: Option<i64>,
	pub include_private: bool,
	pub include_deleted: bool,
	/// Only actions the feed owner performed.
	pub only_performed_by: bool,
	pub list: ListOptions,
}

#[async_trait]
pub trait ActionStore: Send + Sync {
	async fn notify_watchers(&self, action: &NewAction) -> Result<()>;
	async fn get_feeds(&self, opts: &FeedOptions) -> Result<Vec<Action>>;
	async fn delete_issue_actions(&self, repo_id: i64, issue_id: i64) -> Result<u64>;
}

#[derive(Clone)]
pub struct ActionRepository {
	pool: SqlitePool,
}

impl ActionRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, action), fields(op_type = ?action.op_type, repo_id = action.repo_id))]
	pub async fn notify_watchers(&self, action: &NewAction) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let repo = fetch_repository(&mut *tx, action.repo_id).await?;

		insert_action(&mut *tx, action.act_user_id, action, repo.is_private).await?;
		let mut delivered = 1usize;

		let owner = fetch_user(&mut *tx, repo.owner_id).await?;
		if owner.is_organization() && owner.id != action.act_user_id {
			insert_action(&mut *tx, owner.id, action, repo.is_private).await?;
			delivered += 1;
		}

		for watcher in get_repo_watchers_ids(&mut *tx, repo.id).await? {
			if watcher == action.act_user_id || watcher == owner.id {
				continue;
			}
			if action.op_type.is_issue_related()
				&& access_mode(&mut *tx, Some(watcher), &repo).await? < AccessMode::Read
			{
				continue;
			}
			insert_action(&mut *tx, watcher, action, repo.is_private).await?;
			delivered += 1;
		}
		tx.commit().await?;

		tracing::debug!(delivered, "action delivered to feeds");
		Ok(())
	}

	/// Newest first.
	#[tracing::instrument(skip(self, opts), fields(request_user = opts.request_user))]
	pub async fn get_feeds(&self, opts: &FeedOptions) -> Result<Vec<Action>> {
		let mut conn = self.pool.acquire().await?;
		let mut include_private = false;
		if opts.include_private {
			if let Some(actor) = opts.actor {
				include_private = actor == opts.request_user
					|| get_user_by_id(&mut *conn, actor)
						.await?
						.is_some_and(|u| u.is_admin);
			}
		}

		let mut sql = format!("{SELECT_ACTION} WHERE user_id = ?");
		if opts.only_performed_by {
			sql.push_str(" AND act_user_id = user_id");
		}
		if !include_private {
			sql.push_str(" AND is_private = 0");
		}
		if !opts.include_deleted {
			sql.push_str(" AND is_deleted = 0");
		}
		sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");

		let (limit, offset) = opts.list.limit_offset();
		let rows = sqlx::query(&sql)
			.bind(opts.request_user)
			.bind(limit)
			.bind(offset)
			.fetch_all(&mut *conn)
			.await?;
		rows.iter().map(row_to_action).collect()
	}

	/// Hide every action that refers to the issue or one of its comments.
	#[tracing::instrument(skip(self), fields(repo_id, issue_id))]
	pub async fn delete_issue_actions(&self, repo_id: i64, issue_id: i64) -> Result<u64> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		if issue.repo_id != repo_id {
			return Err(DbError::NotFound(format!("issue {issue_id} in repo {repo_id}")));
		}
		let result = sqlx::query(
			r#"
			UPDATE actions SET is_deleted = 1
			WHERE repo_id = ?
			AND (
				(op_type IN (?, ?) AND content LIKE ?)
				OR comment_id IN (SELECT id FROM comments WHERE issue_id = ?)
			)
			"#,
		)
		.bind(repo_id)
		.bind(ActionType::CreateIssue.as_i64())
		.bind(ActionType::CreatePullRequest.as_i64())
		.bind(format!("{}|%", issue.index))
		.bind(issue_id)
		.execute(&mut *tx)
		.await?;
		tx.commit().await?;

		tracing::debug!(hidden = result.rows_affected(), "issue actions deleted");
		Ok(result.rows_affected())
	}
}

#[async_trait]
impl ActionStore for ActionRepository {
	async fn notify_watchers(&self, action: &NewAction) -> Result<()> {
		ActionRepository::notify_watchers(self, action).await
	}

	async fn get_feeds(&self, opts: &FeedOptions) -> Result<Vec<Action>> {
		ActionRepository::get_feeds(self, opts).await
	}

	async fn delete_issue_actions(&self, repo_id: i64, issue_id: i64) -> Result<u64> {
		ActionRepository::delete_issue_actions(self, repo_id, issue_id).await
	}
}

const SELECT_ACTION: &str = r#"
	SELECT id, user_id, op_type, act_user_id, repo_id, comment_id, is_deleted, ref_name,
		is_private, content, created_at
	FROM actions"#;

async fn insert_action(conn: &mut SqliteConnection, user_id: i64, action: &NewAction, is_private: bool) -> Result<()> {
	sqlx::query(
		r#"
		INSERT INTO actions (user_id, op_type, act_user_id, repo_id, comment_id, ref_name, is_private,
			content, created_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(user_id)
	.bind(action.op_type.as_i64())
	.bind(action.act_user_id)
	.bind(action.repo_id)
	.bind(action.comment_id)
	.bind(&action.ref_name)
	.bind(is_private)
	.bind(&action.content)
	.bind(now_db_time())
	.execute(&mut *conn)
	.await?;
	Ok(())
}

fn row_to_action(row: &SqliteRow) -> Result<Action> {
	let raw_op: i64 = row.get("op_type");
	let op_type =
		ActionType::from_i64(raw_op).ok_or_else(|| DbError::Internal(format!("unknown action type {raw_op}")))?;
	let created_at: String = row.get("created_at");
	Ok(Action {
		id: row.get("id"),
		user_id: row.get("user_id"),
		op_type,
		act_user_id: row.get("act_user_id"),
		repo_id: row.get("repo_id"),
		comment_id: row.get("comment_id"),
		is_deleted: row.get("is_deleted"),
		ref_name: row.get("ref_name"),
		is_private: row.get("is_private"),
		content: row.get("content"),
		created_at: from_db_time(&created_at)?,
	})
}
