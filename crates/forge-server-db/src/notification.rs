// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-user notification inbox.
//!
//! There is at most one notification per (user, issue). New activity on an
//! issue re-marks a read notification as unread instead of adding rows.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::access::access_mode;
use crate::error::{DbError, Result};
use crate::issue::{fetch_issue, get_issue_watchers_ids, get_participant_ids, Issue};
use crate::pull::is_work_in_progress;
use crate::repo::{fetch_repository, get_repo_watchers_ids};
use crate::team::OWNER_TEAM_NAME;
use crate::types::{from_db_time, now_db_time, AccessMode, ListOptions};
use crate::user::{fetch_user, get_user_by_id, UserKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
	Unread = 1,
	Read = 2,
	Pinned = 3,
}

impl NotificationStatus {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		match v {
			1 => Some(NotificationStatus::Unread),
			2 => Some(NotificationStatus::Read),
			3 => Some(NotificationStatus::Pinned),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
	Issue = 1,
	PullRequest = 2,
	Commit = 3,
	Repository = 4,
}

impl NotificationSource {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		match v {
			1 => Some(NotificationSource::Issue),
			2 => Some(NotificationSource::PullRequest),
			3 => Some(NotificationSource::Commit),
			4 => Some(NotificationSource::Repository),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
	pub id: i64,
	pub user_id: i64,
	pub repo_id: i64,
	pub status: NotificationStatus,
	pub source: NotificationSource,
	/// Zero for repository notifications.
	pub issue_id: i64,
	pub commit_id: Option<String>,
	pub comment_id: Option<i64>,
	pub updated_by: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
	async fn create_or_update_issue_notifications(
		&self,
		issue_id: i64,
		comment_id: Option<i64>,
		author_id: i64,
		receiver_id: Option<i64>,
		wip_prefixes: &[String],
	) -> Result<()>;
	async fn list_notifications(
		&self,
		user_id: i64,
		statuses: &[NotificationStatus],
		opts: &ListOptions,
	) -> Result<Vec<Notification>>;
	async fn count_unread(&self, user_id: i64) -> Result<i64>;
	async fn get_notification_count(&self, user_id: i64, status: NotificationStatus) -> Result<i64>;
	async fn get_issue_notification(&self, user_id: i64, issue_id: i64) -> Result<Option<Notification>>;
	async fn set_issue_read_by(&self, issue_id: i64, user_id: i64) -> Result<()>;
	async fn set_repo_read_by(&self, user_id: i64, repo_id: i64) -> Result<()>;
	async fn set_notification_status(&self, id: i64, user_id: i64, status: NotificationStatus) -> Result<Notification>;
	async fn update_notification_statuses(
		&self,
		user_id: i64,
		from: NotificationStatus,
		to: NotificationStatus,
	) -> Result<u64>;
	async fn create_repo_transfer_notification(&self, doer_id: i64, new_owner_id: i64, repo_id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct NotificationRepository {
	pool: SqlitePool,
}

impl NotificationRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Fan out activity on an issue to everyone following it.
	///
	/// With `receiver_id` only that user is notified. Otherwise the issue's
	/// watchers, the repository's watchers and the issue's participants are,
	/// minus the author and anyone who unwatched the issue. Repository
	/// watchers are skipped for work-in-progress pull requests.
	#[tracing::instrument(skip(self, wip_prefixes), fields(issue_id, author_id))]
	pub async fn create_or_update_issue_notifications(
		&self,
		issue_id: i64,
		comment_id: Option<i64>,
		author_id: i64,
		receiver_id: Option<i64>,
		wip_prefixes: &[String],
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;

		let recipients = match receiver_id {
			Some(receiver) => BTreeSet::from([receiver]),
			None => {
				let mut ids: BTreeSet<i64> = get_issue_watchers_ids(&mut *tx, issue_id, true)
					.await?
					.into_iter()
					.collect();
				if !(issue.is_pull && is_work_in_progress(&issue.title, wip_prefixes)) {
					ids.extend(get_repo_watchers_ids(&mut *tx, issue.repo_id).await?);
				}
				ids.extend(get_participant_ids(&mut *tx, issue_id).await?);
				ids.remove(&author_id);
				for unwatcher in get_issue_watchers_ids(&mut *tx, issue_id, false).await? {
					ids.remove(&unwatcher);
				}
				ids
			}
		};

		let repo = fetch_repository(&mut *tx, issue.repo_id).await?;
		let mut created = 0usize;
		let mut updated = 0usize;
		for user_id in recipients {
			if get_user_by_id(&mut *tx, user_id).await?.is_none() {
				tracing::warn!(user_id, issue_id, "skipping unknown notification recipient");
				continue;
			}
			if access_mode(&mut *tx, Some(user_id), &repo).await? < AccessMode::Read {
				tracing::warn!(user_id, issue_id, "skipping notification recipient without read access");
				continue;
			}
			match get_issue_notification(&mut *tx, user_id, issue_id).await? {
				Some(existing) => {
					refresh_issue_notification(&mut *tx, &existing, comment_id, author_id).await?;
					updated += 1;
				}
				None => {
					insert_issue_notification(&mut *tx, user_id, &issue, comment_id, author_id).await?;
					created += 1;
				}
			}
		}
		tx.commit().await?;

		tracing::debug!(created, updated, "issue notifications dispatched");
		Ok(())
	}

	/// Newest activity first. An empty status list yields nothing.
	#[tracing::instrument(skip(self, statuses, opts), fields(user_id))]
	pub async fn list_notifications(
		&self,
		user_id: i64,
		statuses: &[NotificationStatus],
		opts: &ListOptions,
	) -> Result<Vec<Notification>> {
		if statuses.is_empty() {
			return Ok(Vec::new());
		}
		let placeholders = vec!["?"; statuses.len()].join(", ");
		let sql = format!(
			"{SELECT_NOTIFICATION} WHERE user_id = ? AND status IN ({placeholders}) ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?"
		);
		let (limit, offset) = opts.limit_offset();
		let mut query = sqlx::query(&sql).bind(user_id);
		for status in statuses {
			query = query.bind(status.as_i64());
		}
		let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
		rows.iter().map(row_to_notification).collect()
	}

	#[tracing::instrument(skip(self), fields(user_id))]
	pub async fn count_unread(&self, user_id: i64) -> Result<i64> {
		self.get_notification_count(user_id, NotificationStatus::Unread).await
	}

	#[tracing::instrument(skip(self), fields(user_id, status = ?status))]
	pub async fn get_notification_count(&self, user_id: i64, status: NotificationStatus) -> Result<i64> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND status = ?")
			.bind(user_id)
			.bind(status.as_i64())
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}

	#[tracing::instrument(skip(self), fields(user_id, issue_id))]
	pub async fn get_issue_notification(&self, user_id: i64, issue_id: i64) -> Result<Option<Notification>> {
		let mut conn = self.pool.acquire().await?;
		get_issue_notification(&mut *conn, user_id, issue_id).await
	}

	/// Mark the user's notification on an issue as read. Pinned
	/// notifications stay pinned.
	#[tracing::instrument(skip(self), fields(issue_id, user_id))]
	pub async fn set_issue_read_by(&self, issue_id: i64, user_id: i64) -> Result<()> {
		sqlx::query("UPDATE notifications SET status = ?, updated_at = ? WHERE user_id = ? AND issue_id = ? AND status = ?")
			.bind(NotificationStatus::Read.as_i64())
			.bind(now_db_time())
			.bind(user_id)
			.bind(issue_id)
			.bind(NotificationStatus::Unread.as_i64())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Mark unread repository notifications (e.g. transfers) as read.
	#[tracing::instrument(skip(self), fields(user_id, repo_id))]
	pub async fn set_repo_read_by(&self, user_id: i64, repo_id: i64) -> Result<()> {
		sqlx::query(
			r#"
			UPDATE notifications SET status = ?, updated_at = ?
			WHERE user_id = ? AND repo_id = ? AND source = ? AND status = ?
			"#,
		)
		.bind(NotificationStatus::Read.as_i64())
		.bind(now_db_time())
		.bind(user_id)
		.bind(repo_id)
		.bind(NotificationSource::Repository.as_i64())
		.bind(NotificationStatus::Unread.as_i64())
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(notification_id = id, user_id, status = ?status))]
	pub async fn set_notification_status(&self, id: i64, user_id: i64, status: NotificationStatus) -> Result<Notification> {
		let mut tx = self.pool.begin().await?;
		let notification = get_notification_by_id(&mut *tx, id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("notification {id}")))?;
		if notification.user_id != user_id {
			return Err(DbError::PermissionDenied(format!(
				"notification {id} belongs to another user"
			)));
		}
		sqlx::query("UPDATE notifications SET status = ?, updated_at = ? WHERE id = ?")
			.bind(status.as_i64())
			.bind(now_db_time())
			.bind(id)
			.execute(&mut *tx)
			.await?;
		let updated = get_notification_by_id(&mut *tx, id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("notification {id}")))?;
		tx.commit().await?;
		Ok(updated)
	}

	/// Move every notification of `user_id` in status `from` to `to`.
	#[tracing::instrument(skip(self), fields(user_id, from = ?from, to = ?to))]
	pub async fn update_notification_statuses(
		&self,
		user_id: i64,
		from: NotificationStatus,
		to: NotificationStatus,
	) -> Result<u64> {
		let result = sqlx::query(
			"UPDATE notifications SET status = ?, updated_by = ?, updated_at = ? WHERE user_id = ? AND status = ?",
		)
		.bind(to.as_i64())
		.bind(user_id)
		.bind(now_db_time())
		.bind(user_id)
		.bind(from.as_i64())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	/// Tell the new owner about a pending repository transfer. For an
	/// organization every member of its owners team is told.
	#[tracing::instrument(skip(self), fields(doer_id, new_owner_id, repo_id))]
	pub async fn create_repo_transfer_notification(&self, doer_id: i64, new_owner_id: i64, repo_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let new_owner = fetch_user(&mut *tx, new_owner_id).await?;
		let recipients: Vec<i64> = if new_owner.kind == UserKind::Organization {
			sqlx::query_scalar(
				r#"
				SELECT tu.user_id FROM team_users tu
				JOIN teams t ON t.id = tu.team_id
				WHERE t.org_id = ? AND t.lower_name = ?
				ORDER BY tu.user_id
				"#,
			)
			.bind(new_owner_id)
			.bind(OWNER_TEAM_NAME.to_lowercase())
			.fetch_all(&mut *tx)
			.await?
		} else {
			vec![new_owner_id]
		};

		let now = now_db_time();
		for user_id in &recipients {
			sqlx::query(
				r#"
				INSERT INTO notifications (user_id, repo_id, status, source, issue_id, updated_by, created_at, updated_at)
				VALUES (?, ?, ?, ?, 0, ?, ?, ?)
				"#,
			)
			.bind(user_id)
			.bind(repo_id)
			.bind(NotificationStatus::Unread.as_i64())
			.bind(NotificationSource::Repository.as_i64())
			.bind(doer_id)
			.bind(&now)
			.bind(&now)
			.execute(&mut *tx)
			.await?;
		}
		tx.commit().await?;

		tracing::debug!(recipients = recipients.len(), "repo transfer notifications created");
		Ok(())
	}
}

#[async_trait]
impl NotificationStore for NotificationRepository {
	async fn create_or_update_issue_notifications(
		&self,
		issue_id: i64,
		comment_id: Option<i64>,
		author_id: i64,
		receiver_id: Option<i64>,
		wip_prefixes: &[String],
	) -> Result<()> {
		NotificationRepository::create_or_update_issue_notifications(
			self,
			issue_id,
			comment_id,
			author_id,
			receiver_id,
			wip_prefixes,
		)
		.await
	}

	async fn list_notifications(
		&self,
		user_id: i64,
		statuses: &[NotificationStatus],
		opts: &ListOptions,
	) -> Result<Vec<Notification>> {
		NotificationRepository::list_notifications(self, user_id, statuses, opts).await
	}

	async fn count_unread(&self, user_id: i64) -> Result<i64> {
		NotificationRepository::count_unread(self, user_id).await
	}

	async fn get_notification_count(&self, user_id: i64, status: NotificationStatus) -> Result<i64> {
		NotificationRepository::get_notification_count(self, user_id, status).await
	}

	async fn get_issue_notification(&self, user_id: i64, issue_id: i64) -> Result<Option<Notification>> {
		NotificationRepository::get_issue_notification(self, user_id, issue_id).await
	}

	async fn set_issue_read_by(&self, issue_id: i64, user_id: i64) -> Result<()> {
		NotificationRepository::set_issue_read_by(self, issue_id, user_id).await
	}

	async fn set_repo_read_by(&self, user_id: i64, repo_id: i64) -> Result<()> {
		NotificationRepository::set_repo_read_by(self, user_id, repo_id).await
	}

	async fn set_notification_status(&self, id: i64, user_id: i64, status: NotificationStatus) -> Result<Notification> {
		NotificationRepository::set_notification_status(self, id, user_id, status).await
	}

	async fn update_notification_statuses(
		&self,
		user_id: i64,
		from: NotificationStatus,
		to: NotificationStatus,
	) -> Result<u64> {
		NotificationRepository::update_notification_statuses(self, user_id, from, to).await
	}

	async fn create_repo_transfer_notification(&self, doer_id: i64, new_owner_id: i64, repo_id: i64) -> Result<()> {
		NotificationRepository::create_repo_transfer_notification(self, doer_id, new_owner_id, repo_id).await
	}
}

const SELECT_NOTIFICATION: &str = r#"
	SELECT id, user_id, repo_id, status, source, issue_id, commit_id, comment_id, updated_by,
		created_at, updated_at
	FROM notifications"#;

async fn get_notification_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Notification>> {
	let row = sqlx::query(&format!("{SELECT_NOTIFICATION} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_notification(&r)).transpose()
}

async fn get_issue_notification(
	conn: &mut SqliteConnection,
	user_id: i64,
	issue_id: i64,
) -> Result<Option<Notification>> {
	let row = sqlx::query(&format!("{SELECT_NOTIFICATION} WHERE user_id = ? AND issue_id = ? LIMIT 1"))
		.bind(user_id)
		.bind(issue_id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_notification(&r)).transpose()
}

async fn insert_issue_notification(
	conn: &mut SqliteConnection,
	user_id: i64,
	issue: &Issue,
	comment_id: Option<i64>,
	updated_by: i64,
) -> Result<()> {
	let source = if issue.is_pull {
		NotificationSource::PullRequest
	} else {
		NotificationSource::Issue
	};
	let now = now_db_time();
	sqlx::query(
		r#"
		INSERT INTO notifications (user_id, repo_id, status, source, issue_id, comment_id, updated_by,
			created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(user_id)
	.bind(issue.repo_id)
	.bind(NotificationStatus::Unread.as_i64())
	.bind(source.as_i64())
	.bind(issue.id)
	.bind(comment_id)
	.bind(updated_by)
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

/// A read notification becomes unread and points at the new comment. An
/// unread one keeps its comment so older activity is not skipped.
async fn refresh_issue_notification(
	conn: &mut SqliteConnection,
	existing: &Notification,
	comment_id: Option<i64>,
	updated_by: i64,
) -> Result<()> {
	if existing.status == NotificationStatus::Read {
		sqlx::query("UPDATE notifications SET status = ?, comment_id = ?, updated_by = ?, updated_at = ? WHERE id = ?")
			.bind(NotificationStatus::Unread.as_i64())
			.bind(comment_id)
			.bind(updated_by)
			.bind(now_db_time())
			.bind(existing.id)
			.execute(&mut *conn)
			.await?;
	} else {
		sqlx::query("UPDATE notifications SET updated_by = ?, updated_at = ? WHERE id = ?")
			.bind(updated_by)
			.bind(now_db_time())
			.bind(existing.id)
			.execute(&mut *conn)
			.await?;
	}
	Ok(())
}

fn row_to_notification(row: &SqliteRow) -> Result<Notification> {
	let raw_status: i64 = row.get("status");
	let raw_source: i64 = row.get("source");
	let status = NotificationStatus::from_i64(raw_status)
		.ok_or_else(|| DbError::Internal(format!("unknown notification status {raw_status}")))?;
	let source = NotificationSource::from_i64(raw_source)
		.ok_or_else(|| DbError::Internal(format!("unknown notification source {raw_source}")))?;
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Notification {
		id: row.get("id"),
		user_id: row.get("user_id"),
		repo_id: row.get("repo_id"),
		status,
		source,
		issue_id: row.get("issue_id"),
		commit_id: row.get("commit_id"),
		comment_id: row.get("comment_id"),
		updated_by: row.get("updated_by"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}
