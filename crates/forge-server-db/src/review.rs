// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pull request reviews and review requests.
//!
//! A review request is stored as a review of type `Request`; a user's
//! verdict replaces their outstanding requests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::access::access_mode_by_id;
use crate::comment::{create_comment, Comment, CommentType, CreateCommentOptions};
use crate::error::{DbError, Result};
use crate::issue::fetch_issue;
use crate::protected_branch::{get_first_matching_protected_branch_rule, whitelisted};
use crate::pull::{get_pull_request_by_issue_id, PullRequest};
use crate::types::{from_db_time, now_db_time, AccessMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewType {
	Pending = 0,
	Approve = 1,
	Comment = 2,
	Reject = 3,
	Request = 4,
}

impl ReviewType {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		match v {
			0 => Some(ReviewType::Pending),
			1 => Some(ReviewType::Approve),
			2 => Some(ReviewType::Comment),
			3 => Some(ReviewType::Reject),
			4 => Some(ReviewType::Request),
			_ => None,
		}
	}

	/// Approve and Reject decide a pull request; the others do not.
	pub fn is_verdict(&self) -> bool {
		matches!(self, ReviewType::Approve | ReviewType::Reject)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
	pub id: i64,
	pub review_type: ReviewType,
	pub reviewer_id: i64,
	pub reviewer_team_id: i64,
	pub original_author: String,
	pub issue_id: i64,
	pub content: String,
	pub official: bool,
	pub commit_id: String,
	pub stale: bool,
	pub dismissed: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateReviewOptions {
	pub review_type: ReviewType,
	pub reviewer_id: i64,
	/// Non-zero for a team review request.
	pub reviewer_team_id: i64,
	pub issue_id: i64,
	pub content: String,
	pub official: bool,
	pub commit_id: String,
	pub stale: bool,
}

impl CreateReviewOptions {
	pub fn new(review_type: ReviewType, reviewer_id: i64, issue_id: i64) -> Self {
		Self {
			review_type,
			reviewer_id,
			reviewer_team_id: 0,
			issue_id,
			content: String::new(),
			official: false,
			commit_id: String::new(),
			stale: false,
		}
	}
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
	async fn create_review(&self, opts: &CreateReviewOptions) -> Result<Review>;
	async fn get_review_by_id(&self, id: i64) -> Result<Option<Review>>;
	async fn list_reviews(&self, issue_id: i64) -> Result<Vec<Review>>;
	async fn get_current_review(&self, reviewer_id: i64, issue_id: i64) -> Result<Option<Review>>;
	async fn get_pending_review(&self, reviewer_id: i64, issue_id: i64) -> Result<Option<Review>>;
	async fn submit_review(
		&self,
		doer_id: i64,
		issue_id: i64,
		review_type: ReviewType,
		content: &str,
		commit_id: &str,
		stale: bool,
	) -> Result<(Review, Comment)>;
	async fn dismiss_review(&self, id: i64, dismissed: bool) -> Result<()>;
	async fn mark_reviews_stale(&self, issue_id: i64, commit_id: &str) -> Result<u64>;
	async fn request_review(&self, doer_id: i64, issue_id: i64, reviewer_id: i64) -> Result<Option<Comment>>;
	async fn remove_review_request(&self, doer_id: i64, issue_id: i64, reviewer_id: i64)
		-> Result<Option<Comment>>;
	async fn is_official_reviewer(&self, pr: &PullRequest, user_id: i64) -> Result<bool>;
	async fn get_review_approval_counts(&self, issue_id: i64) -> Result<HashMap<ReviewType, i64>>;
}

#[derive(Clone)]
pub struct ReviewRepository {
	pool: SqlitePool,
}

impl ReviewRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, opts), fields(issue_id = opts.issue_id, reviewer_id = opts.reviewer_id))]
	pub async fn create_review(&self, opts: &CreateReviewOptions) -> Result<Review> {
		let mut tx = self.pool.begin().await?;
		let review = create_review(&mut *tx, opts).await?;
		tx.commit().await?;
		Ok(review)
	}

	#[tracing::instrument(skip(self), fields(review_id = id))]
	pub async fn get_review_by_id(&self, id: i64) -> Result<Option<Review>> {
		let mut conn = self.pool.acquire().await?;
		get_review_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn list_reviews(&self, issue_id: i64) -> Result<Vec<Review>> {
		let rows = sqlx::query(&format!("{SELECT_REVIEW} WHERE issue_id = ? ORDER BY created_at ASC, id ASC"))
			.bind(issue_id)
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(row_to_review).collect()
	}

	/// The reviewer's latest submitted, undismissed review.
	#[tracing::instrument(skip(self), fields(reviewer_id, issue_id))]
	pub async fn get_current_review(&self, reviewer_id: i64, issue_id: i64) -> Result<Option<Review>> {
		let row = sqlx::query(&format!(
			r#"{SELECT_REVIEW}
			WHERE reviewer_id = ? AND issue_id = ? AND dismissed = 0 AND review_type != ?
			ORDER BY id DESC LIMIT 1"#
		))
		.bind(reviewer_id)
		.bind(issue_id)
		.bind(ReviewType::Pending.as_i64())
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| row_to_review(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(reviewer_id, issue_id))]
	pub async fn get_pending_review(&self, reviewer_id: i64, issue_id: i64) -> Result<Option<Review>> {
		let mut conn = self.pool.acquire().await?;
		get_pending_review(&mut *conn, reviewer_id, issue_id).await
	}

	/// Publish the doer's review, reusing their pending draft when there is
	/// one, and add a Review comment to the timeline.
	#[tracing::instrument(skip(self, content), fields(doer_id, issue_id, review_type = ?review_type))]
	pub async fn submit_review(
		&self,
		doer_id: i64,
		issue_id: i64,
		review_type: ReviewType,
		content: &str,
		commit_id: &str,
		stale: bool,
	) -> Result<(Review, Comment)> {
		if matches!(review_type, ReviewType::Pending | ReviewType::Request) {
			return Err(DbError::InvalidInput(format!("cannot submit a review of type {review_type:?}")));
		}
		if review_type != ReviewType::Approve && content.trim().is_empty() {
			return Err(DbError::ReviewContentEmpty);
		}

		let mut tx = self.pool.begin().await?;
		let pr = get_pull_request_by_issue_id(&mut *tx, issue_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("pull request for issue {issue_id}")))?;

		let mut official = false;
		if review_type.is_verdict() {
			sqlx::query("UPDATE reviews SET official = 0 WHERE issue_id = ? AND reviewer_id = ? AND review_type IN (?, ?)")
				.bind(issue_id)
				.bind(doer_id)
				.bind(ReviewType::Approve.as_i64())
				.bind(ReviewType::Reject.as_i64())
				.execute(&mut *tx)
				.await?;
			official = is_official_reviewer(&mut *tx, &pr, doer_id).await?;
		}

		let review = match get_pending_review(&mut *tx, doer_id, issue_id).await? {
			Some(pending) => {
				if review_type.is_verdict() {
					dismiss_previous_verdicts(&mut *tx, doer_id, issue_id).await?;
				}
				sqlx::query(
					r#"
					UPDATE reviews SET review_type = ?, content = ?, official = ?, commit_id = ?,
						stale = ?, updated_at = ?
					WHERE id = ?
					"#,
				)
				.bind(review_type.as_i64())
				.bind(content)
				.bind(official)
				.bind(commit_id)
				.bind(stale)
				.bind(now_db_time())
				.bind(pending.id)
				.execute(&mut *tx)
				.await?;
				delete_review_requests(&mut *tx, doer_id, issue_id).await?;
				fetch_review(&mut *tx, pending.id).await?
			}
			None => {
				create_review(
					&mut *tx,
					&CreateReviewOptions {
						content: content.to_string(),
						official,
						commit_id: commit_id.to_string(),
						stale,
						..CreateReviewOptions::new(review_type, doer_id, issue_id)
					},
				)
				.await?
			}
		};

		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				review_id: Some(review.id),
				content: content.to_string(),
				..CreateCommentOptions::new(CommentType::Review, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;

		tracing::debug!(review_id = review.id, official, "review submitted");
		Ok((review, comment))
	}

	#[tracing::instrument(skip(self), fields(review_id = id, dismissed))]
	pub async fn dismiss_review(&self, id: i64, dismissed: bool) -> Result<()> {
		let result = sqlx::query("UPDATE reviews SET dismissed = ?, updated_at = ? WHERE id = ?")
			.bind(dismissed)
			.bind(now_db_time())
			.bind(id)
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("review {id}")));
		}
		Ok(())
	}

	/// Mark verdicts given on another commit as stale. Returns how many changed.
	#[tracing::instrument(skip(self), fields(issue_id, commit_id))]
	pub async fn mark_reviews_stale(&self, issue_id: i64, commit_id: &str) -> Result<u64> {
		let result = sqlx::query(
			r#"
			UPDATE reviews SET stale = 1
			WHERE issue_id = ? AND review_type IN (?, ?) AND commit_id != ? AND stale = 0
			"#,
		)
		.bind(issue_id)
		.bind(ReviewType::Approve.as_i64())
		.bind(ReviewType::Reject.as_i64())
		.bind(commit_id)
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	/// Returns `None` when the reviewer's latest review is already an
	/// outstanding request.
	#[tracing::instrument(skip(self), fields(doer_id, issue_id, reviewer_id))]
	pub async fn request_review(&self, doer_id: i64, issue_id: i64, reviewer_id: i64) -> Result<Option<Comment>> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		if issue.poster_id == reviewer_id {
			return Err(DbError::NotValidReviewRequest {
				reason: "the poster cannot review their own pull request".to_string(),
				user_id: reviewer_id,
				issue_id,
			});
		}
		let pr = get_pull_request_by_issue_id(&mut *tx, issue_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("pull request for issue {issue_id}")))?;
		if issue.is_closed || pr.has_merged {
			return Err(DbError::ReviewRequestOnClosedPr { issue_id });
		}
		let latest = get_latest_verdict_or_request(&mut *tx, reviewer_id, issue_id).await?;
		if latest.is_some_and(|r| r.review_type == ReviewType::Request) {
			tracing::debug!("reviewer already has an outstanding request");
			return Ok(None);
		}

		let official = is_official_reviewer(&mut *tx, &pr, reviewer_id).await?;
		if official {
			sqlx::query("UPDATE reviews SET official = 0 WHERE issue_id = ? AND reviewer_id = ?")
				.bind(issue_id)
				.bind(reviewer_id)
				.execute(&mut *tx)
				.await?;
		}

		create_review(
			&mut *tx,
			&CreateReviewOptions {
				official,
				..CreateReviewOptions::new(ReviewType::Request, reviewer_id, issue_id)
			},
		)
		.await?;
		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				assignee_id: Some(reviewer_id),
				..CreateCommentOptions::new(CommentType::ReviewRequest, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;
		Ok(Some(comment))
	}

	/// Returns `None` when there was no outstanding request.
	#[tracing::instrument(skip(self), fields(doer_id, issue_id, reviewer_id))]
	pub async fn remove_review_request(
		&self,
		doer_id: i64,
		issue_id: i64,
		reviewer_id: i64,
	) -> Result<Option<Comment>> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		if issue.poster_id == reviewer_id {
			return Err(DbError::NotValidReviewRequest {
				reason: "the poster cannot review their own pull request".to_string(),
				user_id: reviewer_id,
				issue_id,
			});
		}
		if delete_review_requests(&mut *tx, reviewer_id, issue_id).await? == 0 {
			return Ok(None);
		}
		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				assignee_id: Some(reviewer_id),
				removed_assignee: true,
				..CreateCommentOptions::new(CommentType::ReviewRequest, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;
		Ok(Some(comment))
	}

	#[tracing::instrument(skip(self, pr), fields(pull_id = pr.id, user_id))]
	pub async fn is_official_reviewer(&self, pr: &PullRequest, user_id: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		is_official_reviewer(&mut *conn, pr, user_id).await
	}

	/// Counts per review type over official, undismissed reviews.
	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn get_review_approval_counts(&self, issue_id: i64) -> Result<HashMap<ReviewType, i64>> {
		let rows = sqlx::query(
			r#"
			SELECT review_type, COUNT(*) AS count FROM reviews
			WHERE issue_id = ? AND official = 1 AND dismissed = 0
			GROUP BY review_type
			"#,
		)
		.bind(issue_id)
		.fetch_all(&self.pool)
		.await?;

		let mut counts = HashMap::new();
		for row in rows {
			let raw: i64 = row.get("review_type");
			if let Some(review_type) = ReviewType::from_i64(raw) {
				counts.insert(review_type, row.get::<i64, _>("count"));
			}
		}
		Ok(counts)
	}
}

#[async_trait]
impl ReviewStore for ReviewRepository {
	async fn create_review(&self, opts: &CreateReviewOptions) -> Result<Review> {
		ReviewRepository::create_review(self, opts).await
	}

	async fn get_review_by_id(&self, id: i64) -> Result<Option<Review>> {
		ReviewRepository::get_review_by_id(self, id).await
	}

	async fn list_reviews(&self, issue_id: i64) -> Result<Vec<Review>> {
		ReviewRepository::list_reviews(self, issue_id).await
	}

	async fn get_current_review(&self, reviewer_id: i64, issue_id: i64) -> Result<Option<Review>> {
		ReviewRepository::get_current_review(self, reviewer_id, issue_id).await
	}

	async fn get_pending_review(&self, reviewer_id: i64, issue_id: i64) -> Result<Option<Review>> {
		ReviewRepository::get_pending_review(self, reviewer_id, issue_id).await
	}

	async fn submit_review(
		&self,
		doer_id: i64,
		issue_id: i64,
		review_type: ReviewType,
		content: &str,
		commit_id: &str,
		stale: bool,
	) -> Result<(Review, Comment)> {
		ReviewRepository::submit_review(self, doer_id, issue_id, review_type, content, commit_id, stale).await
	}

	async fn dismiss_review(&self, id: i64, dismissed: bool) -> Result<()> {
		ReviewRepository::dismiss_review(self, id, dismissed).await
	}

	async fn mark_reviews_stale(&self, issue_id: i64, commit_id: &str) -> Result<u64> {
		ReviewRepository::mark_reviews_stale(self, issue_id, commit_id).await
	}

	async fn request_review(&self, doer_id: i64, issue_id: i64, reviewer_id: i64) -> Result<Option<Comment>> {
		ReviewRepository::request_review(self, doer_id, issue_id, reviewer_id).await
	}

	async fn remove_review_request(
		&self,
		doer_id: i64,
		issue_id: i64,
		reviewer_id: i64,
	) -> Result<Option<Comment>> {
		ReviewRepository::remove_review_request(self, doer_id, issue_id, reviewer_id).await
	}

	async fn is_official_reviewer(&self, pr: &PullRequest, user_id: i64) -> Result<bool> {
		ReviewRepository::is_official_reviewer(self, pr, user_id).await
	}

	async fn get_review_approval_counts(&self, issue_id: i64) -> Result<HashMap<ReviewType, i64>> {
		ReviewRepository::get_review_approval_counts(self, issue_id).await
	}
}

const SELECT_REVIEW: &str = r#"
	SELECT id, review_type, reviewer_id, reviewer_team_id, original_author, issue_id, content,
		official, commit_id, stale, dismissed, created_at, updated_at
	FROM reviews"#;

pub(crate) async fn create_review(conn: &mut SqliteConnection, opts: &CreateReviewOptions) -> Result<Review> {
	let review_type = if opts.reviewer_team_id > 0 {
		ReviewType::Request
	} else {
		opts.review_type
	};

	if opts.reviewer_team_id == 0 && review_type != ReviewType::Pending {
		delete_review_requests(&mut *conn, opts.reviewer_id, opts.issue_id).await?;
	}
	if review_type.is_verdict() {
		dismiss_previous_verdicts(&mut *conn, opts.reviewer_id, opts.issue_id).await?;
	}

	let now = now_db_time();
	let result = sqlx::query(
		r#"
		INSERT INTO reviews (review_type, reviewer_id, reviewer_team_id, issue_id, content, official,
			commit_id, stale, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(review_type.as_i64())
	.bind(if opts.reviewer_team_id > 0 { 0 } else { opts.reviewer_id })
	.bind(opts.reviewer_team_id)
	.bind(opts.issue_id)
	.bind(&opts.content)
	.bind(opts.official)
	.bind(&opts.commit_id)
	.bind(opts.stale)
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await?;
	fetch_review(conn, result.last_insert_rowid()).await
}

/// Official reviewers are those whose verdict counts towards the base
/// branch's protection rule.
pub(crate) async fn is_official_reviewer(
	conn: &mut SqliteConnection,
	pr: &PullRequest,
	user_id: i64,
) -> Result<bool> {
	let Some(rule) = get_first_matching_protected_branch_rule(&mut *conn, pr.base_repo_id, &pr.base_branch).await?
	else {
		return Ok(false);
	};
	if !rule.enable_approvals_whitelist {
		return Ok(access_mode_by_id(&mut *conn, user_id, pr.base_repo_id).await? >= AccessMode::Write);
	}
	whitelisted(
		conn,
		user_id,
		&rule.approvals_whitelist_user_ids,
		&rule.approvals_whitelist_team_ids,
	)
	.await
}

async fn dismiss_previous_verdicts(conn: &mut SqliteConnection, reviewer_id: i64, issue_id: i64) -> Result<()> {
	sqlx::query(
		"UPDATE reviews SET dismissed = 1 WHERE issue_id = ? AND reviewer_id = ? AND review_type IN (?, ?)",
	)
	.bind(issue_id)
	.bind(reviewer_id)
	.bind(ReviewType::Approve.as_i64())
	.bind(ReviewType::Reject.as_i64())
	.execute(&mut *conn)
	.await?;
	Ok(())
}

async fn delete_review_requests(conn: &mut SqliteConnection, reviewer_id: i64, issue_id: i64) -> Result<u64> {
	let result = sqlx::query("DELETE FROM reviews WHERE issue_id = ? AND reviewer_id = ? AND review_type = ?")
		.bind(issue_id)
		.bind(reviewer_id)
		.bind(ReviewType::Request.as_i64())
		.execute(&mut *conn)
		.await?;
	Ok(result.rows_affected())
}

async fn get_pending_review(
	conn: &mut SqliteConnection,
	reviewer_id: i64,
	issue_id: i64,
) -> Result<Option<Review>> {
	let row = sqlx::query(&format!(
		"{SELECT_REVIEW} WHERE reviewer_id = ? AND issue_id = ? AND review_type = ? ORDER BY id DESC LIMIT 1"
	))
	.bind(reviewer_id)
	.bind(issue_id)
	.bind(ReviewType::Pending.as_i64())
	.fetch_optional(&mut *conn)
	.await?;
	row.map(|r| row_to_review(&r)).transpose()
}

async fn get_latest_verdict_or_request(
	conn: &mut SqliteConnection,
	reviewer_id: i64,
	issue_id: i64,
) -> Result<Option<Review>> {
	let row = sqlx::query(&format!(
		"{SELECT_REVIEW} WHERE reviewer_id = ? AND issue_id = ? AND review_type IN (?, ?, ?) ORDER BY id DESC LIMIT 1"
	))
	.bind(reviewer_id)
	.bind(issue_id)
	.bind(ReviewType::Approve.as_i64())
	.bind(ReviewType::Reject.as_i64())
	.bind(ReviewType::Request.as_i64())
	.fetch_optional(&mut *conn)
	.await?;
	row.map(|r| row_to_review(&r)).transpose()
}

async fn get_review_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Review>> {
	let row = sqlx::query(&format!("{SELECT_REVIEW} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_review(&r)).transpose()
}

async fn fetch_review(conn: &mut SqliteConnection, id: i64) -> Result<Review> {
	get_review_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("review {id}")))
}

fn row_to_review(row: &SqliteRow) -> Result<Review> {
	let raw_type: i64 = row.get("review_type");
	let review_type = ReviewType::from_i64(raw_type)
		.ok_or_else(|| DbError::Internal(format!("unknown review type {raw_type}")))?;
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Review {
		id: row.get("id"),
		review_type,
		reviewer_id: row.get("reviewer_id"),
		reviewer_team_id: row.get("reviewer_team_id"),
		original_author: row.get("original_author"),
		issue_id: row.get("issue_id"),
		content: row.get("content"),
		official: row.get("official"),
		commit_id: row.get("commit_id"),
		stale: row.get("stale"),
		dismissed: row.get("dismissed"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::access::AccessRepository;
	use crate::issue::NewIssueOptions;
	use crate::protected_branch::{ProtectedBranch, ProtectedBranchRepository};
	use crate::pull::{NewPullRequest, PullRequestRepository};
	use crate::testing::{create_test_pool, insert_repo, insert_user};

	struct Fixture {
		pool: SqlitePool,
		reviews: ReviewRepository,
		alice: i64,
		bob: i64,
		repo_id: i64,
		issue_id: i64,
		pr: PullRequest,
	}

	/// alice owns the repo and opens the pull request; bob is a writer.
	async fn fixture() -> Fixture {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let bob = insert_user(&pool, "bob").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		AccessRepository::new(pool.clone())
			.add_collaborator(repo_id, bob, AccessMode::Write)
			.await
			.unwrap();
		let (issue, pr) = PullRequestRepository::new(pool.clone())
			.new_pull_request(
				&NewIssueOptions::new(repo_id, alice, "feature"),
				&NewPullRequest {
					head_repo_id: Some(repo_id),
					head_branch: "feat".to_string(),
					base_branch: "main".to_string(),
					..Default::default()
				},
			)
			.await
			.unwrap();
		Fixture {
			reviews: ReviewRepository::new(pool.clone()),
			pool,
			alice,
			bob,
			repo_id,
			issue_id: issue.id,
			pr,
		}
	}

	#[tokio::test]
	async fn test_submit_requires_content_unless_approving() {
		let f = fixture().await;
		let err = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Reject, "  ", "c1", false)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::ReviewContentEmpty));

		let (review, comment) = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Approve, "", "c1", false)
			.await
			.unwrap();
		assert_eq!(review.review_type, ReviewType::Approve);
		assert_eq!(comment.review_id, Some(review.id));
		assert_eq!(comment.comment_type, CommentType::Review);
	}

	#[tokio::test]
	async fn test_official_depends_on_protection_rule() {
		let f = fixture().await;
		let (review, _) = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Approve, "", "c1", false)
			.await
			.unwrap();
		assert!(!review.official);

		let rules = ProtectedBranchRepository::new(f.pool.clone());
		let rule = rules.update_protect_branch(&ProtectedBranch::new(f.repo_id, "main")).await.unwrap();
		assert!(f.reviews.is_official_reviewer(&f.pr, f.bob).await.unwrap());

		rules
			.update_protect_branch(&ProtectedBranch {
				enable_approvals_whitelist: true,
				approvals_whitelist_user_ids: vec![f.alice],
				..rule
			})
			.await
			.unwrap();
		assert!(!f.reviews.is_official_reviewer(&f.pr, f.bob).await.unwrap());
		assert!(f.reviews.is_official_reviewer(&f.pr, f.alice).await.unwrap());
	}

	#[tokio::test]
	async fn test_new_verdict_dismisses_previous() {
		let f = fixture().await;
		let rules = ProtectedBranchRepository::new(f.pool.clone());
		rules.update_protect_branch(&ProtectedBranch::new(f.repo_id, "main")).await.unwrap();

		let (first, _) = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Approve, "", "c1", false)
			.await
			.unwrap();
		let (second, _) = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Reject, "needs tests", "c1", false)
			.await
			.unwrap();
		assert!(second.official);

		let first = f.reviews.get_review_by_id(first.id).await.unwrap().unwrap();
		assert!(first.dismissed);
		assert!(!first.official);

		let current = f.reviews.get_current_review(f.bob, f.issue_id).await.unwrap().unwrap();
		assert_eq!(current.id, second.id);

		let counts = f.reviews.get_review_approval_counts(f.issue_id).await.unwrap();
		assert_eq!(counts.get(&ReviewType::Reject), Some(&1));
		assert_eq!(counts.get(&ReviewType::Approve), None);
	}

	#[tokio::test]
	async fn test_pending_review_is_reused() {
		let f = fixture().await;
		let pending = f
			.reviews
			.create_review(&CreateReviewOptions::new(ReviewType::Pending, f.bob, f.issue_id))
			.await
			.unwrap();
		assert_eq!(
			f.reviews.get_pending_review(f.bob, f.issue_id).await.unwrap().map(|r| r.id),
			Some(pending.id)
		);

		let (review, _) = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Comment, "looks fine", "c1", false)
			.await
			.unwrap();
		assert_eq!(review.id, pending.id);
		assert_eq!(review.review_type, ReviewType::Comment);
		assert!(f.reviews.get_pending_review(f.bob, f.issue_id).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_review_requests() {
		let f = fixture().await;
		let err = f.reviews.request_review(f.alice, f.issue_id, f.alice).await.unwrap_err();
		assert!(err.is_invalid_input());

		let comment = f.reviews.request_review(f.alice, f.issue_id, f.bob).await.unwrap().unwrap();
		assert_eq!(comment.comment_type, CommentType::ReviewRequest);
		assert_eq!(comment.assignee_id, Some(f.bob));
		assert!(!comment.removed_assignee);

		// Submitting a verdict clears the request.
		f.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Approve, "", "c1", false)
			.await
			.unwrap();
		assert!(f.reviews.remove_review_request(f.alice, f.issue_id, f.bob).await.unwrap().is_none());

		f.reviews.request_review(f.alice, f.issue_id, f.bob).await.unwrap();
		let removed = f
			.reviews
			.remove_review_request(f.alice, f.issue_id, f.bob)
			.await
			.unwrap()
			.unwrap();
		assert!(removed.removed_assignee);
	}

	#[tokio::test]
	async fn test_repeated_request_adds_one_comment() {
		let f = fixture().await;
		assert!(f.reviews.request_review(f.alice, f.issue_id, f.bob).await.unwrap().is_some());
		assert!(f.reviews.request_review(f.alice, f.issue_id, f.bob).await.unwrap().is_none());

		let (requests, comments): (i64, i64) = sqlx::query_as(
			r#"
			SELECT
				(SELECT COUNT(*) FROM reviews WHERE issue_id = ?1 AND reviewer_id = ?2 AND review_type = ?3),
				(SELECT COUNT(*) FROM comments WHERE issue_id = ?1 AND comment_type = ?4)
			"#,
		)
		.bind(f.issue_id)
		.bind(f.bob)
		.bind(ReviewType::Request.as_i64())
		.bind(CommentType::ReviewRequest.as_i64())
		.fetch_one(&f.pool)
		.await
		.unwrap();
		assert_eq!(requests, 1);
		assert_eq!(comments, 1);
	}

	#[tokio::test]
	async fn test_request_on_merged_pull_is_rejected() {
		let f = fixture().await;
		PullRequestRepository::new(f.pool.clone())
			.set_merged(f.pr.id, f.alice, "abc123", Some(Utc::now()))
			.await
			.unwrap();
		let err = f.reviews.request_review(f.alice, f.issue_id, f.bob).await.unwrap_err();
		assert!(err.is_review_request_on_closed_pr());
		assert!(f.reviews.remove_review_request(f.alice, f.issue_id, f.bob).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_request_clears_official_on_previous_reviews() {
		let f = fixture().await;
		ProtectedBranchRepository::new(f.pool.clone())
			.update_protect_branch(&ProtectedBranch::new(f.repo_id, "main"))
			.await
			.unwrap();
		let (approval, _) = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Approve, "", "c1", false)
			.await
			.unwrap();
		assert!(approval.official);

		f.reviews.request_review(f.alice, f.issue_id, f.bob).await.unwrap().unwrap();
		let approval = f.reviews.get_review_by_id(approval.id).await.unwrap().unwrap();
		assert!(!approval.official);
	}

	#[tokio::test]
	async fn test_team_reviewer_is_always_request() {
		let f = fixture().await;
		let review = f
			.reviews
			.create_review(&CreateReviewOptions {
				reviewer_team_id: 42,
				..CreateReviewOptions::new(ReviewType::Approve, 0, f.issue_id)
			})
			.await
			.unwrap();
		assert_eq!(review.review_type, ReviewType::Request);
		assert_eq!(review.reviewer_team_id, 42);
	}

	#[tokio::test]
	async fn test_stale_and_dismiss() {
		let f = fixture().await;
		let (review, _) = f
			.reviews
			.submit_review(f.bob, f.issue_id, ReviewType::Approve, "", "c1", false)
			.await
			.unwrap();
		assert_eq!(f.reviews.mark_reviews_stale(f.issue_id, "c1").await.unwrap(), 0);
		assert_eq!(f.reviews.mark_reviews_stale(f.issue_id, "c2").await.unwrap(), 1);
		assert!(f.reviews.get_review_by_id(review.id).await.unwrap().unwrap().stale);

		f.reviews.dismiss_review(review.id, true).await.unwrap();
		assert!(f.reviews.get_current_review(f.bob, f.issue_id).await.unwrap().is_none());
		assert!(f.reviews.dismiss_review(9999, true).await.unwrap_err().is_not_found());
	}
}
