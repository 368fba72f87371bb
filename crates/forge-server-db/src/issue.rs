// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Issues and the state shared with pull requests: status, assignees,
//! watches, deadlines and locking.
//!
//! Every mutation that touches counters runs in one transaction and
//! recounts from the source tables rather than applying deltas.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::comment::{create_comment, Comment, CommentType, CreateCommentOptions};
use crate::dependency::issue_no_dependencies_left;
use crate::error::{DbError, Result};
use crate::label::{add_label_to_issue, list_issue_label_ids, update_label_counters};
use crate::milestone::{get_milestone_by_repo_id, update_milestone_counters};
use crate::repo::update_repo_issue_numbers;
use crate::resource_index::{next_resource_index, ResourceIndexKind};
use crate::types::{from_db_time, from_opt_db_time, now_db_time, to_db_time, ListOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
	pub id: i64,
	pub repo_id: i64,
	/// Per-repository number shared by issues and pull requests.
	pub index: i64,
	pub poster_id: i64,
	pub title: String,
	pub content: String,
	pub milestone_id: Option<i64>,
	pub priority: i64,
	pub is_closed: bool,
	pub is_pull: bool,
	pub num_comments: i64,
	pub is_locked: bool,
	pub deadline: Option<DateTime<Utc>>,
	pub closed_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewIssueOptions {
	pub repo_id: i64,
	pub poster_id: i64,
	pub title: String,
	pub content: String,
	pub label_ids: Vec<i64>,
	pub milestone_id: Option<i64>,
	pub is_pull: bool,
}

impl NewIssueOptions {
	pub fn new(repo_id: i64, poster_id: i64, title: impl Into<String>) -> Self {
		Self {
			repo_id,
			poster_id,
			title: title.into(),
			..Default::default()
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSort {
	#[default]
	Newest,
	Oldest,
	RecentUpdate,
	MostComments,
}

impl IssueSort {
	fn order_by(&self) -> &'static str {
		match self {
			IssueSort::Newest => "created_at DESC, id DESC",
			IssueSort::Oldest => "created_at ASC, id ASC",
			IssueSort::RecentUpdate => "updated_at DESC, id DESC",
			IssueSort::MostComments => "num_comments DESC, id DESC",
		}
	}
}

/// Filters are ANDed; `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct IssueListOptions {
	pub repo_id: Option<i64>,
	pub is_closed: Option<bool>,
	pub is_pull: Option<bool>,
	pub poster_id: Option<i64>,
	pub label_id: Option<i64>,
	pub milestone_id: Option<i64>,
	pub sort: IssueSort,
	pub list: ListOptions,
}

#[async_trait]
pub trait IssueStore: Send + Sync {
	async fn new_issue(&self, opts: &NewIssueOptions) -> Result<Issue>;
	async fn get_issue_by_id(&self, id: i64) -> Result<Option<Issue>>;
	async fn get_issue_by_index(&self, repo_id: i64, index: i64) -> Result<Option<Issue>>;
	async fn list_issues(&self, opts: &IssueListOptions) -> Result<Vec<Issue>>;
	async fn change_issue_title(&self, issue_id: i64, doer_id: i64, title: &str) -> Result<Option<Comment>>;
	async fn change_issue_content(&self, issue_id: i64, content: &str) -> Result<Issue>;
	async fn update_issue_deadline(
		&self,
		issue_id: i64,
		doer_id: i64,
		deadline: Option<DateTime<Utc>>,
	) -> Result<Option<Comment>>;
	async fn change_issue_status(
		&self,
		issue_id: i64,
		doer_id: i64,
		is_closed: bool,
		enable_dependencies: bool,
	) -> Result<Comment>;
	async fn lock_issue(&self, issue_id: i64, doer_id: i64, reason: &str) -> Result<Comment>;
	async fn unlock_issue(&self, issue_id: i64, doer_id: i64) -> Result<Comment>;
	async fn toggle_issue_assignee(
		&self,
		issue_id: i64,
		doer_id: i64,
		assignee_id: i64,
	) -> Result<(bool, Comment)>;
	async fn list_issue_assignees(&self, issue_id: i64) -> Result<Vec<i64>>;
	async fn watch_issue(&self, user_id: i64, issue_id: i64, watching: bool) -> Result<()>;
	async fn get_issue_watchers_ids(&self, issue_id: i64, watching: bool) -> Result<Vec<i64>>;
	async fn get_participant_ids(&self, issue_id: i64) -> Result<Vec<i64>>;
	async fn delete_issue(&self, issue_id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct IssueRepository {
	pool: SqlitePool,
}

impl IssueRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, opts), fields(repo_id = opts.repo_id, poster_id = opts.poster_id))]
	pub async fn new_issue(&self, opts: &NewIssueOptions) -> Result<Issue> {
		let mut tx = self.pool.begin().await?;
		let issue = insert_issue(&mut *tx, opts).await?;
		tx.commit().await?;
		Ok(issue)
	}

	#[tracing::instrument(skip(self), fields(issue_id = id))]
	pub async fn get_issue_by_id(&self, id: i64) -> Result<Option<Issue>> {
		let mut conn = self.pool.acquire().await?;
		get_issue_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(repo_id, index))]
	pub async fn get_issue_by_index(&self, repo_id: i64, index: i64) -> Result<Option<Issue>> {
		let mut conn = self.pool.acquire().await?;
		get_issue_by_index(&mut *conn, repo_id, index).await
	}

	#[tracing::instrument(skip(self, opts), fields(repo_id = ?opts.repo_id))]
	pub async fn list_issues(&self, opts: &IssueListOptions) -> Result<Vec<Issue>> {
		let (limit, offset) = opts.list.limit_offset();
		let sql = format!(
			r#"{SELECT_ISSUE}
			WHERE (?1 IS NULL OR repo_id = ?1)
				AND (?2 IS NULL OR is_closed = ?2)
				AND (?3 IS NULL OR is_pull = ?3)
				AND (?4 IS NULL OR poster_id = ?4)
				AND (?5 IS NULL OR id IN (SELECT issue_id FROM issue_labels WHERE label_id = ?5))
				AND (?6 IS NULL OR milestone_id = ?6)
			ORDER BY {}
			LIMIT ?7 OFFSET ?8"#,
			opts.sort.order_by()
		);
		let rows = sqlx::query(&sql)
			.bind(opts.repo_id)
			.bind(opts.is_closed)
			.bind(opts.is_pull)
			.bind(opts.poster_id)
			.bind(opts.label_id)
			.bind(opts.milestone_id)
			.bind(limit)
			.bind(offset)
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(row_to_issue).collect()
	}

	/// Returns the ChangeTitle comment, or `None` when the title is unchanged.
	#[tracing::instrument(skip(self, title), fields(issue_id, doer_id))]
	pub async fn change_issue_title(&self, issue_id: i64, doer_id: i64, title: &str) -> Result<Option<Comment>> {
		let title = title.trim();
		if title.is_empty() {
			return Err(DbError::InvalidInput("issue title cannot be empty".to_string()));
		}

		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		if issue.title == title {
			return Ok(None);
		}
		sqlx::query("UPDATE issues SET title = ?, updated_at = ? WHERE id = ?")
			.bind(title)
			.bind(now_db_time())
			.bind(issue_id)
			.execute(&mut *tx)
			.await?;
		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				old_title: Some(issue.title),
				new_title: Some(title.to_string()),
				..CreateCommentOptions::new(CommentType::ChangeTitle, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;
		Ok(Some(comment))
	}

	#[tracing::instrument(skip(self, content), fields(issue_id))]
	pub async fn change_issue_content(&self, issue_id: i64, content: &str) -> Result<Issue> {
		let mut conn = self.pool.acquire().await?;
		let result = sqlx::query("UPDATE issues SET content = ?, updated_at = ? WHERE id = ?")
			.bind(content)
			.bind(now_db_time())
			.bind(issue_id)
			.execute(&mut *conn)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("issue {issue_id}")));
		}
		fetch_issue(&mut *conn, issue_id).await
	}

	/// Deadline comments carry `new|old` dates (`YYYY-MM-DD`) in their content.
	#[tracing::instrument(skip(self), fields(issue_id, doer_id))]
	pub async fn update_issue_deadline(
		&self,
		issue_id: i64,
		doer_id: i64,
		deadline: Option<DateTime<Utc>>,
	) -> Result<Option<Comment>> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		let day = |d: &DateTime<Utc>| d.format("%Y-%m-%d").to_string();
		let (comment_type, content) = match (&issue.deadline, &deadline) {
			(None, None) => return Ok(None),
			(Some(old), Some(new)) if day(old) == day(new) => return Ok(None),
			(None, Some(new)) => (CommentType::AddedDeadline, day(new)),
			(Some(old), Some(new)) => (CommentType::ModifiedDeadline, format!("{}|{}", day(new), day(old))),
			(Some(old), None) => (CommentType::RemovedDeadline, day(old)),
		};

		sqlx::query("UPDATE issues SET deadline = ?, updated_at = ? WHERE id = ?")
			.bind(deadline.as_ref().map(to_db_time))
			.bind(now_db_time())
			.bind(issue_id)
			.execute(&mut *tx)
			.await?;
		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				content,
				..CreateCommentOptions::new(comment_type, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;
		Ok(Some(comment))
	}

	#[tracing::instrument(skip(self), fields(issue_id, doer_id, is_closed))]
	pub async fn change_issue_status(
		&self,
		issue_id: i64,
		doer_id: i64,
		is_closed: bool,
		enable_dependencies: bool,
	) -> Result<Comment> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		if issue.is_closed == is_closed {
			return Err(if issue.is_pull {
				DbError::PullWasClosed { issue_id }
			} else {
				DbError::IssueWasClosed { issue_id }
			});
		}
		if is_closed && enable_dependencies && !issue_no_dependencies_left(&mut *tx, issue_id).await? {
			return Err(DbError::DependenciesLeft { issue_id });
		}

		let comment_type = if is_closed {
			CommentType::Close
		} else {
			CommentType::Reopen
		};
		let comment = set_issue_closed(&mut *tx, &issue, doer_id, is_closed, comment_type).await?;
		tx.commit().await?;

		tracing::debug!(issue_id, is_closed, "issue status changed");
		Ok(comment)
	}

	#[tracing::instrument(skip(self, reason), fields(issue_id, doer_id))]
	pub async fn lock_issue(&self, issue_id: i64, doer_id: i64, reason: &str) -> Result<Comment> {
		self.set_locked(issue_id, doer_id, true, reason).await
	}

	#[tracing::instrument(skip(self), fields(issue_id, doer_id))]
	pub async fn unlock_issue(&self, issue_id: i64, doer_id: i64) -> Result<Comment> {
		self.set_locked(issue_id, doer_id, false, "").await
	}

	async fn set_locked(&self, issue_id: i64, doer_id: i64, locked: bool, reason: &str) -> Result<Comment> {
		let mut tx = self.pool.begin().await?;
		fetch_issue(&mut *tx, issue_id).await?;
		sqlx::query("UPDATE issues SET is_locked = ?, updated_at = ? WHERE id = ?")
			.bind(locked)
			.bind(now_db_time())
			.bind(issue_id)
			.execute(&mut *tx)
			.await?;
		let comment_type = if locked {
			CommentType::Lock
		} else {
			CommentType::Unlock
		};
		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				content: reason.to_string(),
				..CreateCommentOptions::new(comment_type, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;
		Ok(comment)
	}

	/// Adds the assignee if absent, removes it otherwise. Returns whether it
	/// was removed, plus the Assignees comment.
	#[tracing::instrument(skip(self), fields(issue_id, doer_id, assignee_id))]
	pub async fn toggle_issue_assignee(
		&self,
		issue_id: i64,
		doer_id: i64,
		assignee_id: i64,
	) -> Result<(bool, Comment)> {
		let mut tx = self.pool.begin().await?;
		fetch_issue(&mut *tx, issue_id).await?;
		let removed = sqlx::query("DELETE FROM issue_assignees WHERE issue_id = ? AND assignee_id = ?")
			.bind(issue_id)
			.bind(assignee_id)
			.execute(&mut *tx)
			.await?
			.rows_affected()
			> 0;
		if !removed {
			sqlx::query("INSERT INTO issue_assignees (issue_id, assignee_id) VALUES (?, ?)")
				.bind(issue_id)
				.bind(assignee_id)
				.execute(&mut *tx)
				.await?;
			watch_issue(&mut *tx, assignee_id, issue_id, true).await?;
		}
		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				assignee_id: Some(assignee_id),
				removed_assignee: removed,
				..CreateCommentOptions::new(CommentType::Assignees, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;
		Ok((removed, comment))
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn list_issue_assignees(&self, issue_id: i64) -> Result<Vec<i64>> {
		let ids = sqlx::query_scalar("SELECT assignee_id FROM issue_assignees WHERE issue_id = ? ORDER BY assignee_id")
			.bind(issue_id)
			.fetch_all(&self.pool)
			.await?;
		Ok(ids)
	}

	#[tracing::instrument(skip(self), fields(user_id, issue_id, watching))]
	pub async fn watch_issue(&self, user_id: i64, issue_id: i64, watching: bool) -> Result<()> {
		let mut conn = self.pool.acquire().await?;
		watch_issue(&mut *conn, user_id, issue_id, watching).await
	}

	#[tracing::instrument(skip(self), fields(issue_id, watching))]
	pub async fn get_issue_watchers_ids(&self, issue_id: i64, watching: bool) -> Result<Vec<i64>> {
		let mut conn = self.pool.acquire().await?;
		get_issue_watchers_ids(&mut *conn, issue_id, watching).await
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn get_participant_ids(&self, issue_id: i64) -> Result<Vec<i64>> {
		let mut conn = self.pool.acquire().await?;
		get_participant_ids(&mut *conn, issue_id).await
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn delete_issue(&self, issue_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		let label_ids = list_issue_label_ids(&mut *tx, issue_id).await?;

		for sql in [
			"DELETE FROM comments WHERE issue_id = ?1 OR ref_issue_id = ?1",
			"DELETE FROM issue_labels WHERE issue_id = ?1",
			"DELETE FROM issue_assignees WHERE issue_id = ?1",
			"DELETE FROM issue_watches WHERE issue_id = ?1",
			"DELETE FROM issue_dependencies WHERE issue_id = ?1 OR dependency_id = ?1",
			"DELETE FROM notifications WHERE issue_id = ?1",
			"DELETE FROM reviews WHERE issue_id = ?1",
			"DELETE FROM pull_requests WHERE issue_id = ?1",
			"DELETE FROM issues WHERE id = ?1",
		] {
			sqlx::query(sql).bind(issue_id).execute(&mut *tx).await?;
		}

		for label_id in label_ids {
			update_label_counters(&mut *tx, label_id).await?;
		}
		if let Some(milestone_id) = issue.milestone_id {
			update_milestone_counters(&mut *tx, milestone_id).await?;
		}
		update_repo_issue_numbers(&mut *tx, issue.repo_id).await?;
		tx.commit().await?;

		tracing::debug!(issue_id, repo_id = issue.repo_id, "issue deleted");
		Ok(())
	}
}

#[async_trait]
impl IssueStore for IssueRepository {
	async fn new_issue(&self, opts: &NewIssueOptions) -> Result<Issue> {
		IssueRepository::new_issue(self, opts).await
	}

	async fn get_issue_by_id(&self, id: i64) -> Result<Option<Issue>> {
		IssueRepository::get_issue_by_id(self, id).await
	}

	async fn get_issue_by_index(&self, repo_id: i64, index: i64) -> Result<Option<Issue>> {
		IssueRepository::get_issue_by_index(self, repo_id, index).await
	}

	async fn list_issues(&self, opts: &IssueListOptions) -> Result<Vec<Issue>> {
		IssueRepository::list_issues(self, opts).await
	}

	async fn change_issue_title(&self, issue_id: i64, doer_id: i64, title: &str) -> Result<Option<Comment>> {
		IssueRepository::change_issue_title(self, issue_id, doer_id, title).await
	}

	async fn change_issue_content(&self, issue_id: i64, content: &str) -> Result<Issue> {
		IssueRepository::change_issue_content(self, issue_id, content).await
	}

	async fn update_issue_deadline(
		&self,
		issue_id: i64,
		doer_id: i64,
		deadline: Option<DateTime<Utc>>,
	) -> Result<Option<Comment>> {
		IssueRepository::update_issue_deadline(self, issue_id, doer_id, deadline).await
	}

	async fn change_issue_status(
		&self,
		issue_id: i64,
		doer_id: i64,
		is_closed: bool,
		enable_dependencies: bool,
	) -> Result<Comment> {
		IssueRepository::change_issue_status(self, issue_id, doer_id, is_closed, enable_dependencies).await
	}

	async fn lock_issue(&self, issue_id: i64, doer_id: i64, reason: &str) -> Result<Comment> {
		IssueRepository::lock_issue(self, issue_id, doer_id, reason).await
	}

	async fn unlock_issue(&self, issue_id: i64, doer_id: i64) -> Result<Comment> {
		IssueRepository::unlock_issue(self, issue_id, doer_id).await
	}

	async fn toggle_issue_assignee(
		&self,
		issue_id: i64,
		doer_id: i64,
		assignee_id: i64,
	) -> Result<(bool, Comment)> {
		IssueRepository::toggle_issue_assignee(self, issue_id, doer_id, assignee_id).await
	}

	async fn list_issue_assignees(&self, issue_id: i64) -> Result<Vec<i64>> {
		IssueRepository::list_issue_assignees(self, issue_id).await
	}

	async fn watch_issue(&self, user_id: i64, issue_id: i64, watching: bool) -> Result<()> {
		IssueRepository::watch_issue(self, user_id, issue_id, watching).await
	}

	async fn get_issue_watchers_ids(&self, issue_id: i64, watching: bool) -> Result<Vec<i64>> {
		IssueRepository::get_issue_watchers_ids(self, issue_id, watching).await
	}

	async fn get_participant_ids(&self, issue_id: i64) -> Result<Vec<i64>> {
		IssueRepository::get_participant_ids(self, issue_id).await
	}

	async fn delete_issue(&self, issue_id: i64) -> Result<()> {
		IssueRepository::delete_issue(self, issue_id).await
	}
}

const SELECT_ISSUE: &str = r#"
	SELECT id, repo_id, idx, poster_id, title, content, milestone_id, priority, is_closed,
		is_pull, num_comments, is_locked, deadline, closed_at, created_at, updated_at
	FROM issues"#;

/// Create an issue (or the issue half of a pull request) on an open
/// transaction.
pub(crate) async fn insert_issue(conn: &mut SqliteConnection, opts: &NewIssueOptions) -> Result<Issue> {
	let title = opts.title.trim();
	if title.is_empty() {
		return Err(DbError::InvalidInput("issue title cannot be empty".to_string()));
	}

	let index = next_resource_index(&mut *conn, ResourceIndexKind::Issue, opts.repo_id).await?;

	let mut milestone_id = opts.milestone_id;
	if let Some(id) = milestone_id {
		if get_milestone_by_repo_id(&mut *conn, opts.repo_id, id).await?.is_none() {
			tracing::warn!(repo_id = opts.repo_id, milestone_id = id, "dropping milestone from another repository");
			milestone_id = None;
		}
	}

	let now = now_db_time();
	let result = sqlx::query(
		r#"
		INSERT INTO issues (repo_id, idx, poster_id, title, content, milestone_id, is_pull,
			created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(opts.repo_id)
	.bind(index)
	.bind(opts.poster_id)
	.bind(title)
	.bind(&opts.content)
	.bind(milestone_id)
	.bind(opts.is_pull)
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await?;
	let id = result.last_insert_rowid();
	let issue = fetch_issue(&mut *conn, id).await?;

	if let Some(milestone_id) = milestone_id {
		update_milestone_counters(&mut *conn, milestone_id).await?;
		create_comment(
			&mut *conn,
			&CreateCommentOptions {
				milestone_id: Some(milestone_id),
				..CreateCommentOptions::new(CommentType::Milestone, opts.poster_id, id)
			},
		)
		.await?;
	}
	for label_id in &opts.label_ids {
		add_label_to_issue(&mut *conn, &issue, *label_id, opts.poster_id).await?;
	}
	update_repo_issue_numbers(&mut *conn, opts.repo_id).await?;
	watch_issue(&mut *conn, opts.poster_id, id, true).await?;

	tracing::debug!(issue_id = id, repo_id = opts.repo_id, index, is_pull = opts.is_pull, "issue created");
	fetch_issue(&mut *conn, id).await
}

/// Flip the closed flag, recount every counter the issue feeds and record
/// `comment_type` on the timeline. Callers check the preconditions.
pub(crate) async fn set_issue_closed(
	conn: &mut SqliteConnection,
	issue: &Issue,
	doer_id: i64,
	is_closed: bool,
	comment_type: CommentType,
) -> Result<Comment> {
	let now = now_db_time();
	let closed_at = is_closed.then(|| now.clone());
	sqlx::query("UPDATE issues SET is_closed = ?, closed_at = ?, updated_at = ? WHERE id = ?")
		.bind(is_closed)
		.bind(closed_at)
		.bind(&now)
		.bind(issue.id)
		.execute(&mut *conn)
		.await?;

	for label_id in list_issue_label_ids(&mut *conn, issue.id).await? {
		update_label_counters(&mut *conn, label_id).await?;
	}
	if let Some(milestone_id) = issue.milestone_id {
		update_milestone_counters(&mut *conn, milestone_id).await?;
	}
	update_repo_issue_numbers(&mut *conn, issue.repo_id).await?;

	create_comment(
		&mut *conn,
		&CreateCommentOptions::new(comment_type, doer_id, issue.id),
	)
	.await
}

pub(crate) async fn watch_issue(
	conn: &mut SqliteConnection,
	user_id: i64,
	issue_id: i64,
	watching: bool,
) -> Result<()> {
	let now = now_db_time();
	sqlx::query(
		r#"
		INSERT INTO issue_watches (user_id, issue_id, is_watching, created_at, updated_at)
		VALUES (?1, ?2, ?3, ?4, ?4)
		ON CONFLICT(user_id, issue_id) DO UPDATE SET is_watching = ?3, updated_at = ?4
		"#,
	)
	.bind(user_id)
	.bind(issue_id)
	.bind(watching)
	.bind(&now)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

pub(crate) async fn get_issue_watchers_ids(
	conn: &mut SqliteConnection,
	issue_id: i64,
	watching: bool,
) -> Result<Vec<i64>> {
	let ids = sqlx::query_scalar(
		"SELECT user_id FROM issue_watches WHERE issue_id = ? AND is_watching = ? ORDER BY user_id",
	)
	.bind(issue_id)
	.bind(watching)
	.fetch_all(&mut *conn)
	.await?;
	Ok(ids)
}

/// The poster plus everyone who commented or reviewed.
pub(crate) async fn get_participant_ids(conn: &mut SqliteConnection, issue_id: i64) -> Result<Vec<i64>> {
	let ids = sqlx::query_scalar(
		r#"
		SELECT poster_id FROM issues WHERE id = ?1
		UNION
		SELECT poster_id FROM comments WHERE issue_id = ?1 AND comment_type IN (?2, ?3)
		ORDER BY 1
		"#,
	)
	.bind(issue_id)
	.bind(CommentType::Comment.as_i64())
	.bind(CommentType::Review.as_i64())
	.fetch_all(&mut *conn)
	.await?;
	Ok(ids)
}

pub(crate) async fn get_issue_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Issue>> {
	let row = sqlx::query(&format!("{SELECT_ISSUE} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_issue(&r)).transpose()
}

pub(crate) async fn fetch_issue(conn: &mut SqliteConnection, id: i64) -> Result<Issue> {
	get_issue_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("issue {id}")))
}

pub(crate) async fn get_issue_by_index(
	conn: &mut SqliteConnection,
	repo_id: i64,
	index: i64,
) -> Result<Option<Issue>> {
	let row = sqlx::query(&format!("{SELECT_ISSUE} WHERE repo_id = ? AND idx = ?"))
		.bind(repo_id)
		.bind(index)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_issue(&r)).transpose()
}

fn row_to_issue(row: &SqliteRow) -> Result<Issue> {
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Issue {
		id: row.get("id"),
		repo_id: row.get("repo_id"),
		index: row.get("idx"),
		poster_id: row.get("poster_id"),
		title: row.get("title"),
		content: row.get("content"),
		milestone_id: row.get("milestone_id"),
		priority: row.get("priority"),
		is_closed: row.get("is_closed"),
		is_pull: row.get("is_pull"),
		num_comments: row.get("num_comments"),
		is_locked: row.get("is_locked"),
		deadline: from_opt_db_time(row.get("deadline"))?,
		closed_at: from_opt_db_time(row.get("closed_at"))?,
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}
