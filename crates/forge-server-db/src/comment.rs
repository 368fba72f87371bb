// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Issue timeline entries: user comments plus the event rows recorded when
//! labels, milestones, assignees, state and references change.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_common_references::{find_all_issue_references, KeywordSet, RefAction};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::access::access_mode_by_id;
use crate::error::{DbError, Result};
use crate::issue::{fetch_issue, get_issue_by_index, Issue};
use crate::types::{from_db_time, now_db_time, AccessMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentType {
	#[default]
	Comment = 0,
	Reopen = 1,
	Close = 2,
	IssueRef = 3,
	CommitRef = 4,
	CommentRef = 5,
	PullRef = 6,
	Label = 7,
	Milestone = 8,
	Assignees = 9,
	ChangeTitle = 10,
	DeleteBranch = 11,
	AddedDeadline = 16,
	ModifiedDeadline = 17,
	RemovedDeadline = 18,
	AddDependency = 19,
	RemoveDependency = 20,
	Review = 22,
	Lock = 23,
	Unlock = 24,
	ReviewRequest = 27,
	MergePull = 28,
}

impl CommentType {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		use CommentType::*;
		Some(match v {
			0 => Comment,
			1 => Reopen,
			2 => Close,
			3 => IssueRef,
			4 => CommitRef,
			5 => CommentRef,
			6 => PullRef,
			7 => Label,
			8 => Milestone,
			9 => Assignees,
			10 => ChangeTitle,
			11 => DeleteBranch,
			16 => AddedDeadline,
			17 => ModifiedDeadline,
			18 => RemovedDeadline,
			19 => AddDependency,
			20 => RemoveDependency,
			22 => Review,
			23 => Lock,
			24 => Unlock,
			27 => ReviewRequest,
			28 => MergePull,
			_ => return None,
		})
	}

	/// Types that count towards `issue.num_comments`.
	pub fn is_counted(&self) -> bool {
		matches!(self, CommentType::Comment | CommentType::Review)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
	pub id: i64,
	pub comment_type: CommentType,
	pub poster_id: i64,
	pub issue_id: i64,
	pub label_id: Option<i64>,
	pub milestone_id: Option<i64>,
	pub old_milestone_id: Option<i64>,
	pub assignee_id: Option<i64>,
	pub removed_assignee: bool,
	pub dependent_issue_id: Option<i64>,
	pub review_id: Option<i64>,
	pub old_title: Option<String>,
	pub new_title: Option<String>,
	pub ref_repo_id: Option<i64>,
	pub ref_issue_id: Option<i64>,
	pub ref_comment_id: Option<i64>,
	pub ref_action: RefAction,
	pub ref_is_pull: bool,
	pub commit_sha: Option<String>,
	pub content: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateCommentOptions {
	pub comment_type: CommentType,
	pub poster_id: i64,
	pub issue_id: i64,
	pub label_id: Option<i64>,
	pub milestone_id: Option<i64>,
	pub old_milestone_id: Option<i64>,
	pub assignee_id: Option<i64>,
	pub removed_assignee: bool,
	pub dependent_issue_id: Option<i64>,
	pub review_id: Option<i64>,
	pub old_title: Option<String>,
	pub new_title: Option<String>,
	pub ref_repo_id: Option<i64>,
	pub ref_issue_id: Option<i64>,
	pub ref_comment_id: Option<i64>,
	pub ref_action: RefAction,
	pub ref_is_pull: bool,
	pub commit_sha: Option<String>,
	pub content: String,
}

impl CreateCommentOptions {
	pub fn new(comment_type: CommentType, poster_id: i64, issue_id: i64) -> Self {
		Self {
			comment_type,
			poster_id,
			issue_id,
			..Default::default()
		}
	}
}

/// How references in comment text are recognised.
#[derive(Debug, Clone, Default)]
pub struct RefParseOptions {
	pub keywords: KeywordSet,
	/// Public base URL; full issue links under it count as references.
	pub app_url: Option<String>,
}

#[async_trait]
pub trait CommentStore: Send + Sync {
	async fn create_comment(&self, opts: &CreateCommentOptions) -> Result<Comment>;
	async fn get_comment_by_id(&self, id: i64) -> Result<Option<Comment>>;
	async fn list_comments(
		&self,
		issue_id: i64,
		comment_type: Option<CommentType>,
	) -> Result<Vec<Comment>>;
	async fn update_comment(&self, id: i64, content: &str) -> Result<Comment>;
	async fn delete_comment(&self, id: i64) -> Result<()>;
	async fn create_ref_comments(
		&self,
		doer_id: i64,
		issue_id: i64,
		comment_id: Option<i64>,
		content: &str,
		opts: &RefParseOptions,
	) -> Result<Vec<Comment>>;
}

#[derive(Clone)]
pub struct CommentRepository {
	pool: SqlitePool,
}

impl CommentRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, opts), fields(issue_id = opts.issue_id, comment_type = ?opts.comment_type))]
	pub async fn create_comment(&self, opts: &CreateCommentOptions) -> Result<Comment> {
		let mut tx = self.pool.begin().await?;
		let comment = create_comment(&mut *tx, opts).await?;
		tx.commit().await?;
		Ok(comment)
	}

	#[tracing::instrument(skip(self), fields(comment_id = id))]
	pub async fn get_comment_by_id(&self, id: i64) -> Result<Option<Comment>> {
		let mut conn = self.pool.acquire().await?;
		get_comment_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn list_comments(
		&self,
		issue_id: i64,
		comment_type: Option<CommentType>,
	) -> Result<Vec<Comment>> {
		let mut conn = self.pool.acquire().await?;
		list_comments(&mut *conn, issue_id, comment_type).await
	}

	#[tracing::instrument(skip(self, content), fields(comment_id = id))]
	pub async fn update_comment(&self, id: i64, content: &str) -> Result<Comment> {
		let mut tx = self.pool.begin().await?;
		let result = sqlx::query("UPDATE comments SET content = ?, updated_at = ? WHERE id = ?")
			.bind(content)
			.bind(now_db_time())
			.bind(id)
			.execute(&mut *tx)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("comment {id}")));
		}
		let comment = fetch_comment(&mut *tx, id).await?;
		tx.commit().await?;
		tracing::debug!(comment_id = id, "comment updated");
		Ok(comment)
	}

	/// Delete a comment and the reference comments it created elsewhere.
	#[tracing::instrument(skip(self), fields(comment_id = id))]
	pub async fn delete_comment(&self, id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let comment = fetch_comment(&mut *tx, id).await?;
		sqlx::query("DELETE FROM comments WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		if comment.comment_type.is_counted() {
			sqlx::query("UPDATE issues SET num_comments = num_comments - 1 WHERE id = ?")
				.bind(comment.issue_id)
				.execute(&mut *tx)
				.await?;
		}
		sqlx::query("DELETE FROM comments WHERE ref_comment_id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		tracing::debug!(comment_id = id, issue_id = comment.issue_id, "comment deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self, content, opts), fields(doer_id, issue_id, comment_id))]
	pub async fn create_ref_comments(
		&self,
		doer_id: i64,
		issue_id: i64,
		comment_id: Option<i64>,
		content: &str,
		opts: &RefParseOptions,
	) -> Result<Vec<Comment>> {
		let mut tx = self.pool.begin().await?;
		let created =
			create_ref_comments(&mut *tx, doer_id, issue_id, comment_id, content, opts).await?;
		tx.commit().await?;
		Ok(created)
	}
}

#[async_trait]
impl CommentStore for CommentRepository {
	async fn create_comment(&self, opts: &CreateCommentOptions) -> Result<Comment> {
		CommentRepository::create_comment(self, opts).await
	}

	async fn get_comment_by_id(&self, id: i64) -> Result<Option<Comment>> {
		CommentRepository::get_comment_by_id(self, id).await
	}

	async fn list_comments(
		&self,
		issue_id: i64,
		comment_type: Option<CommentType>,
	) -> Result<Vec<Comment>> {
		CommentRepository::list_comments(self, issue_id, comment_type).await
	}

	async fn update_comment(&self, id: i64, content: &str) -> Result<Comment> {
		CommentRepository::update_comment(self, id, content).await
	}

	async fn delete_comment(&self, id: i64) -> Result<()> {
		CommentRepository::delete_comment(self, id).await
	}

	async fn create_ref_comments(
		&self,
		doer_id: i64,
		issue_id: i64,
		comment_id: Option<i64>,
		content: &str,
		opts: &RefParseOptions,
	) -> Result<Vec<Comment>> {
		CommentRepository::create_ref_comments(self, doer_id, issue_id, comment_id, content, opts)
			.await
	}
}

const SELECT_COMMENT: &str = r#"
	SELECT id, comment_type, poster_id, issue_id, label_id, milestone_id, old_milestone_id,
		assignee_id, removed_assignee, dependent_issue_id, review_id, old_title, new_title,
		ref_repo_id, ref_issue_id, ref_comment_id, ref_action, ref_is_pull, commit_sha, content,
		created_at, updated_at
	FROM comments"#;

/// Insert a timeline entry and touch the issue. Counted types bump
/// `num_comments`.
pub(crate) async fn create_comment(
	conn: &mut SqliteConnection,
	opts: &CreateCommentOptions,
) -> Result<Comment> {
	let now = now_db_time();
	let result = sqlx::query(
		r#"
		INSERT INTO comments (comment_type, poster_id, issue_id, label_id, milestone_id,
			old_milestone_id, assignee_id, removed_assignee, dependent_issue_id, review_id,
			old_title, new_title, ref_repo_id, ref_issue_id, ref_comment_id, ref_action,
			ref_is_pull, commit_sha, content, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(opts.comment_type.as_i64())
	.bind(opts.poster_id)
	.bind(opts.issue_id)
	.bind(opts.label_id)
	.bind(opts.milestone_id)
	.bind(opts.old_milestone_id)
	.bind(opts.assignee_id)
	.bind(opts.removed_assignee)
	.bind(opts.dependent_issue_id)
	.bind(opts.review_id)
	.bind(&opts.old_title)
	.bind(&opts.new_title)
	.bind(opts.ref_repo_id)
	.bind(opts.ref_issue_id)
	.bind(opts.ref_comment_id)
	.bind(opts.ref_action.as_i64())
	.bind(opts.ref_is_pull)
	.bind(&opts.commit_sha)
	.bind(&opts.content)
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await?;
	let id = result.last_insert_rowid();

	let counted = if opts.comment_type.is_counted() { 1 } else { 0 };
	sqlx::query("UPDATE issues SET num_comments = num_comments + ?, updated_at = ? WHERE id = ?")
		.bind(counted)
		.bind(&now)
		.bind(opts.issue_id)
		.execute(&mut *conn)
		.await?;

	tracing::debug!(comment_id = id, issue_id = opts.issue_id, "comment created");
	fetch_comment(conn, id).await
}

/// Record references found in `content` as timeline entries on the
/// referenced issues. Unknown targets, the source itself and repositories
/// the doer cannot read are skipped. Only pull requests may close or reopen.
pub(crate) async fn create_ref_comments(
	conn: &mut SqliteConnection,
	doer_id: i64,
	issue_id: i64,
	comment_id: Option<i64>,
	content: &str,
	opts: &RefParseOptions,
) -> Result<Vec<Comment>> {
	let source = fetch_issue(&mut *conn, issue_id).await?;
	let references = find_all_issue_references(content, &opts.keywords, opts.app_url.as_deref());

	let mut seen = HashSet::new();
	let mut created = Vec::new();
	for reference in references {
		let repo_id = match (&reference.owner, &reference.name) {
			(Some(owner), Some(name)) => {
				let found: Option<i64> = sqlx::query_scalar(
					r#"
					SELECT r.id FROM repos r
					JOIN users u ON u.id = r.owner_id
					WHERE u.lower_name = ? AND r.lower_name = ?
					"#,
				)
				.bind(owner)
				.bind(name)
				.fetch_optional(&mut *conn)
				.await?;
				match found {
					Some(id) => id,
					None => continue,
				}
			}
			_ => source.repo_id,
		};

		let Some(target) = get_issue_by_index(&mut *conn, repo_id, reference.index).await? else {
			continue;
		};
		if target.id == source.id || !seen.insert(target.id) {
			continue;
		}
		if repo_id != source.repo_id
			&& access_mode_by_id(&mut *conn, doer_id, repo_id).await? < AccessMode::Read
		{
			tracing::debug!(doer_id, repo_id, "skipping reference to unreadable repository");
			continue;
		}

		let comment = create_comment(
			&mut *conn,
			&ref_comment_options(&source, comment_id, doer_id, &target, reference.action),
		)
		.await?;
		created.push(comment);
	}
	Ok(created)
}

fn ref_comment_options(
	source: &Issue,
	comment_id: Option<i64>,
	doer_id: i64,
	target: &Issue,
	action: RefAction,
) -> CreateCommentOptions {
	let comment_type = match (comment_id, source.is_pull) {
		(Some(_), _) => CommentType::CommentRef,
		(None, true) => CommentType::PullRef,
		(None, false) => CommentType::IssueRef,
	};
	let action = if source.is_pull || action == RefAction::None {
		action
	} else {
		RefAction::Neutered
	};
	CreateCommentOptions {
		ref_repo_id: Some(source.repo_id),
		ref_issue_id: Some(source.id),
		ref_comment_id: comment_id,
		ref_action: action,
		ref_is_pull: source.is_pull,
		..CreateCommentOptions::new(comment_type, doer_id, target.id)
	}
}

pub(crate) async fn get_comment_by_id(
	conn: &mut SqliteConnection,
	id: i64,
) -> Result<Option<Comment>> {
	let row = sqlx::query(&format!("{SELECT_COMMENT} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_comment(&r)).transpose()
}

async fn fetch_comment(conn: &mut SqliteConnection, id: i64) -> Result<Comment> {
	get_comment_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("comment {id}")))
}

pub(crate) async fn list_comments(
	conn: &mut SqliteConnection,
	issue_id: i64,
	comment_type: Option<CommentType>,
) -> Result<Vec<Comment>> {
	let rows = sqlx::query(&format!(
		"{SELECT_COMMENT} WHERE issue_id = ? AND (? IS NULL OR comment_type = ?) ORDER BY created_at ASC, id ASC"
	))
	.bind(issue_id)
	.bind(comment_type.map(|t| t.as_i64()))
	.bind(comment_type.map(|t| t.as_i64()))
	.fetch_all(&mut *conn)
	.await?;
	rows.iter().map(row_to_comment).collect()
}

fn row_to_comment(row: &SqliteRow) -> Result<Comment> {
	let raw_type: i64 = row.get("comment_type");
	let comment_type = CommentType::from_i64(raw_type)
		.ok_or_else(|| DbError::Internal(format!("unknown comment type {raw_type}")))?;
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Comment {
		id: row.get("id"),
		comment_type,
		poster_id: row.get("poster_id"),
		issue_id: row.get("issue_id"),
		label_id: row.get("label_id"),
		milestone_id: row.get("milestone_id"),
		old_milestone_id: row.get("old_milestone_id"),
		assignee_id: row.get("assignee_id"),
		removed_assignee: row.get("removed_assignee"),
		dependent_issue_id: row.get("dependent_issue_id"),
		review_id: row.get("review_id"),
		old_title: row.get("old_title"),
		new_title: row.get("new_title"),
		ref_repo_id: row.get("ref_repo_id"),
		ref_issue_id: row.get("ref_issue_id"),
		ref_comment_id: row.get("ref_comment_id"),
		ref_action: RefAction::from_i64(row.get("ref_action")),
		ref_is_pull: row.get("ref_is_pull"),
		commit_sha: row.get("commit_sha"),
		content: row.get("content"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::issue::{IssueRepository, NewIssueOptions};
	use crate::testing::{create_test_pool, insert_repo, insert_user};

	async fn new_issue(issues: &IssueRepository, repo_id: i64, poster_id: i64, title: &str) -> Issue {
		issues
			.new_issue(&NewIssueOptions::new(repo_id, poster_id, title))
			.await
			.unwrap()
	}

	#[test]
	fn test_comment_type_codes_are_stable() {
		assert_eq!(CommentType::Comment.as_i64(), 0);
		assert_eq!(CommentType::AddedDeadline.as_i64(), 16);
		assert_eq!(CommentType::MergePull.as_i64(), 28);
		assert_eq!(CommentType::from_i64(27), Some(CommentType::ReviewRequest));
		assert_eq!(CommentType::from_i64(12), None);
	}

	#[tokio::test]
	async fn test_counted_comments() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo = insert_repo(&pool, alice, "forge", false).await;
		let issues = IssueRepository::new(pool.clone());
		let comments = CommentRepository::new(pool.clone());
		let issue = new_issue(&issues, repo, alice, "bug").await;

		let mut opts = CreateCommentOptions::new(CommentType::Comment, alice, issue.id);
		opts.content = "first".to_string();
		let first = comments.create_comment(&opts).await.unwrap();
		comments
			.create_comment(&CreateCommentOptions::new(CommentType::Lock, alice, issue.id))
			.await
			.unwrap();

		let issue_now = issues.get_issue_by_id(issue.id).await.unwrap().unwrap();
		assert_eq!(issue_now.num_comments, 1);

		let updated = comments.update_comment(first.id, "edited").await.unwrap();
		assert_eq!(updated.content, "edited");

		comments.delete_comment(first.id).await.unwrap();
		let issue_now = issues.get_issue_by_id(issue.id).await.unwrap().unwrap();
		assert_eq!(issue_now.num_comments, 0);

		let locks = comments
			.list_comments(issue.id, Some(CommentType::Lock))
			.await
			.unwrap();
		assert_eq!(locks.len(), 1);
	}

	#[tokio::test]
	async fn test_ref_comments() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let bob = insert_user(&pool, "bob").await;
		let repo = insert_repo(&pool, alice, "forge", false).await;
		let other = insert_repo(&pool, bob, "tools", false).await;
		let hidden = insert_repo(&pool, bob, "hidden", true).await;
		let issues = IssueRepository::new(pool.clone());
		let comments = CommentRepository::new(pool.clone());

		let source = new_issue(&issues, repo, alice, "source").await;
		let local = new_issue(&issues, repo, alice, "local").await;
		let cross = new_issue(&issues, other, bob, "cross").await;
		new_issue(&issues, hidden, bob, "hidden").await;

		let content = format!(
			"fixes #{} and #{} and #{}, see bob/tools#{} and bob/hidden#1 and #999",
			local.index, local.index, source.index, cross.index
		);
		let created = comments
			.create_ref_comments(alice, source.id, None, &content, &RefParseOptions::default())
			.await
			.unwrap();

		assert_eq!(created.len(), 2);
		assert_eq!(created[0].issue_id, local.id);
		assert_eq!(created[0].comment_type, CommentType::IssueRef);
		assert_eq!(created[0].ref_issue_id, Some(source.id));
		assert_eq!(created[0].ref_action, RefAction::Neutered);
		assert_eq!(created[1].issue_id, cross.id);
		assert_eq!(created[1].ref_action, RefAction::None);
	}

	#[tokio::test]
	async fn test_comment_ref_and_cleanup() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo = insert_repo(&pool, alice, "forge", false).await;
		let issues = IssueRepository::new(pool.clone());
		let comments = CommentRepository::new(pool.clone());
		let source = new_issue(&issues, repo, alice, "source").await;
		let target = new_issue(&issues, repo, alice, "target").await;

		let mut opts = CreateCommentOptions::new(CommentType::Comment, alice, source.id);
		opts.content = format!("see #{}", target.index);
		let comment = comments.create_comment(&opts).await.unwrap();
		let created = comments
			.create_ref_comments(
				alice,
				source.id,
				Some(comment.id),
				&opts.content,
				&RefParseOptions::default(),
			)
			.await
			.unwrap();
		assert_eq!(created.len(), 1);
		assert_eq!(created[0].comment_type, CommentType::CommentRef);
		assert_eq!(created[0].ref_comment_id, Some(comment.id));

		comments.delete_comment(comment.id).await.unwrap();
		assert!(comments.get_comment_by_id(created[0].id).await.unwrap().is_none());
	}
}
