// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pull requests. Each pull request owns an issue row (`is_pull = 1`) and
//! shares its per-repository index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::comment::CommentType;
use crate::error::{DbError, Result};
use crate::issue::{fetch_issue, insert_issue, set_issue_closed, Issue, NewIssueOptions};
use crate::types::{from_opt_db_time, to_db_time};

/// Title prefixes that mark a pull request as work in progress when none
/// are configured.
pub const DEFAULT_WIP_PREFIXES: &[&str] = &["WIP:", "[WIP]"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestStatus {
	Conflict = 0,
	Checking = 1,
	Mergeable = 2,
	ManuallyMerged = 3,
	Error = 4,
	Empty = 5,
	Ancestor = 6,
}

impl PullRequestStatus {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		match v {
			0 => Some(PullRequestStatus::Conflict),
			1 => Some(PullRequestStatus::Checking),
			2 => Some(PullRequestStatus::Mergeable),
			3 => Some(PullRequestStatus::ManuallyMerged),
			4 => Some(PullRequestStatus::Error),
			5 => Some(PullRequestStatus::Empty),
			6 => Some(PullRequestStatus::Ancestor),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			PullRequestStatus::Conflict => "CONFLICT",
			PullRequestStatus::Checking => "CHECKING",
			PullRequestStatus::Mergeable => "MERGEABLE",
			PullRequestStatus::ManuallyMerged => "MANUALLY_MERGED",
			PullRequestStatus::Error => "ERROR",
			PullRequestStatus::Empty => "EMPTY",
			PullRequestStatus::Ancestor => "ANCESTOR",
		}
	}
}

impl std::fmt::Display for PullRequestStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How the head branch reached the server: a regular branch (`Github`) or
/// an `refs/for/` push (`AGit`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestFlow {
	#[default]
	Github = 0,
	AGit = 1,
}

impl PullRequestFlow {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Self {
		match v {
			1 => PullRequestFlow::AGit,
			_ => PullRequestFlow::Github,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
	pub id: i64,
	pub issue_id: i64,
	pub index: i64,
	pub status: PullRequestStatus,
	pub conflicted_files: Vec<String>,
	pub commits_ahead: i64,
	pub commits_behind: i64,
	pub head_repo_id: Option<i64>,
	pub base_repo_id: i64,
	pub head_branch: String,
	pub base_branch: String,
	pub merge_base: String,
	pub allow_maintainer_edit: bool,
	pub has_merged: bool,
	pub merged_commit_id: Option<String>,
	pub merger_id: Option<i64>,
	pub merged_at: Option<DateTime<Utc>>,
	pub flow: PullRequestFlow,
}

impl PullRequest {
	pub fn is_checking(&self) -> bool {
		self.status == PullRequestStatus::Checking
	}

	pub fn can_auto_merge(&self) -> bool {
		self.status == PullRequestStatus::Mergeable
	}

	pub fn is_same_repo(&self) -> bool {
		self.head_repo_id == Some(self.base_repo_id)
	}

	/// Mergeable when the last check produced no blocking status and the
	/// title does not mark it as work in progress.
	pub fn is_mergeable<S: AsRef<str>>(&self, title: &str, wip_prefixes: &[S]) -> bool {
		!matches!(
			self.status,
			PullRequestStatus::Checking | PullRequestStatus::Conflict | PullRequestStatus::Error
		) && !is_work_in_progress(title, wip_prefixes)
	}
}

/// Case-insensitive prefix match of the title against `prefixes`.
pub fn is_work_in_progress<S: AsRef<str>>(title: &str, prefixes: &[S]) -> bool {
	let title = title.to_uppercase();
	prefixes
		.iter()
		.map(|p| p.as_ref().trim())
		.filter(|p| !p.is_empty())
		.any(|p| title.starts_with(&p.to_uppercase()))
}

#[derive(Debug, Clone, Default)]
pub struct NewPullRequest {
	pub head_repo_id: Option<i64>,
	pub head_branch: String,
	pub base_branch: String,
	pub merge_base: String,
	pub allow_maintainer_edit: bool,
	pub flow: PullRequestFlow,
}

#[async_trait]
pub trait PullRequestStore: Send + Sync {
	async fn new_pull_request(
		&self,
		issue: &NewIssueOptions,
		pr: &NewPullRequest,
	) -> Result<(Issue, PullRequest)>;
	async fn get_pull_request_by_id(&self, id: i64) -> Result<Option<PullRequest>>;
	async fn get_pull_request_by_issue_id(&self, issue_id: i64) -> Result<Option<PullRequest>>;
	async fn get_pull_request_by_index(&self, base_repo_id: i64, index: i64) -> Result<Option<PullRequest>>;
	async fn get_unmerged_pull_request(
		&self,
		head_repo_id: i64,
		base_repo_id: i64,
		head_branch: &str,
		base_branch: &str,
		flow: PullRequestFlow,
	) -> Result<Option<PullRequest>>;
	async fn list_unmerged_pull_requests_by_head_info(
		&self,
		repo_id: i64,
		branch: &str,
		flow: PullRequestFlow,
	) -> Result<Vec<PullRequest>>;
	async fn list_unmerged_pull_requests_by_base_info(&self, repo_id: i64, branch: &str) -> Result<Vec<PullRequest>>;
	async fn update_pull_request_status(
		&self,
		id: i64,
		status: PullRequestStatus,
		conflicted_files: &[String],
	) -> Result<()>;
	async fn update_commit_divergence(&self, id: i64, ahead: i64, behind: i64) -> Result<()>;
	async fn set_allow_maintainer_edit(&self, id: i64, allow: bool) -> Result<()>;
	async fn set_merged(
		&self,
		id: i64,
		merger_id: i64,
		merged_commit_id: &str,
		merged_at: Option<DateTime<Utc>>,
	) -> Result<PullRequest>;
}

#[derive(Clone)]
pub struct PullRequestRepository {
	pool: SqlitePool,
}

impl PullRequestRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, issue, pr), fields(repo_id = issue.repo_id, head_branch = %pr.head_branch, base_branch = %pr.base_branch))]
	pub async fn new_pull_request(
		&self,
		issue: &NewIssueOptions,
		pr: &NewPullRequest,
	) -> Result<(Issue, PullRequest)> {
		let mut tx = self.pool.begin().await?;
		let issue = insert_issue(
			&mut *tx,
			&NewIssueOptions {
				is_pull: true,
				..issue.clone()
			},
		)
		.await?;

		let result = sqlx::query(
			r#"
			INSERT INTO pull_requests (issue_id, idx, status, head_repo_id, base_repo_id,
				head_branch, base_branch, merge_base, allow_maintainer_edit, flow)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(issue.id)
		.bind(issue.index)
		.bind(PullRequestStatus::Checking.as_i64())
		.bind(pr.head_repo_id)
		.bind(issue.repo_id)
		.bind(&pr.head_branch)
		.bind(&pr.base_branch)
		.bind(&pr.merge_base)
		.bind(pr.allow_maintainer_edit)
		.bind(pr.flow.as_i64())
		.execute(&mut *tx)
		.await?;
		let id = result.last_insert_rowid();
		let created = fetch_pull_request(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::debug!(pull_id = id, issue_id = issue.id, index = issue.index, "pull request created");
		Ok((issue, created))
	}

	#[tracing::instrument(skip(self), fields(pull_id = id))]
	pub async fn get_pull_request_by_id(&self, id: i64) -> Result<Option<PullRequest>> {
		let mut conn = self.pool.acquire().await?;
		get_pull_request_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn get_pull_request_by_issue_id(&self, issue_id: i64) -> Result<Option<PullRequest>> {
		let mut conn = self.pool.acquire().await?;
		get_pull_request_by_issue_id(&mut *conn, issue_id).await
	}

	#[tracing::instrument(skip(self), fields(base_repo_id, index))]
	pub async fn get_pull_request_by_index(&self, base_repo_id: i64, index: i64) -> Result<Option<PullRequest>> {
		let row = sqlx::query(&format!("{SELECT_PULL} WHERE base_repo_id = ? AND idx = ?"))
			.bind(base_repo_id)
			.bind(index)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_pull_request(&r)).transpose()
	}

	/// The open, unmerged pull request for this exact head/base pair.
	#[tracing::instrument(skip(self), fields(head_repo_id, base_repo_id, head_branch, base_branch))]
	pub async fn get_unmerged_pull_request(
		&self,
		head_repo_id: i64,
		base_repo_id: i64,
		head_branch: &str,
		base_branch: &str,
		flow: PullRequestFlow,
	) -> Result<Option<PullRequest>> {
		let row = sqlx::query(&format!(
			r#"{SELECT_UNMERGED_PULL}
			AND pr.head_repo_id = ? AND pr.base_repo_id = ?
			AND pr.head_branch = ? AND pr.base_branch = ? AND pr.flow = ?"#
		))
		.bind(head_repo_id)
		.bind(base_repo_id)
		.bind(head_branch)
		.bind(base_branch)
		.bind(flow.as_i64())
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| row_to_pull_request(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(repo_id, branch))]
	pub async fn list_unmerged_pull_requests_by_head_info(
		&self,
		repo_id: i64,
		branch: &str,
		flow: PullRequestFlow,
	) -> Result<Vec<PullRequest>> {
		let rows = sqlx::query(&format!(
			"{SELECT_UNMERGED_PULL} AND pr.head_repo_id = ? AND pr.head_branch = ? AND pr.flow = ? ORDER BY pr.id"
		))
		.bind(repo_id)
		.bind(branch)
		.bind(flow.as_i64())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_pull_request).collect()
	}

	#[tracing::instrument(skip(self), fields(repo_id, branch))]
	pub async fn list_unmerged_pull_requests_by_base_info(&self, repo_id: i64, branch: &str) -> Result<Vec<PullRequest>> {
		let rows = sqlx::query(&format!(
			"{SELECT_UNMERGED_PULL} AND pr.base_repo_id = ? AND pr.base_branch = ? ORDER BY pr.id"
		))
		.bind(repo_id)
		.bind(branch)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_pull_request).collect()
	}

	#[tracing::instrument(skip(self, conflicted_files), fields(pull_id = id, status = %status))]
	pub async fn update_pull_request_status(
		&self,
		id: i64,
		status: PullRequestStatus,
		conflicted_files: &[String],
	) -> Result<()> {
		let files = serde_json::to_string(conflicted_files)?;
		let result = sqlx::query("UPDATE pull_requests SET status = ?, conflicted_files = ? WHERE id = ?")
			.bind(status.as_i64())
			.bind(files)
			.bind(id)
			.execute(&self.pool)
			.await?;
		ensure_updated(result.rows_affected(), id)
	}

	#[tracing::instrument(skip(self), fields(pull_id = id, ahead, behind))]
	pub async fn update_commit_divergence(&self, id: i64, ahead: i64, behind: i64) -> Result<()> {
		let result = sqlx::query("UPDATE pull_requests SET commits_ahead = ?, commits_behind = ? WHERE id = ?")
			.bind(ahead)
			.bind(behind)
			.bind(id)
			.execute(&self.pool)
			.await?;
		ensure_updated(result.rows_affected(), id)
	}

	#[tracing::instrument(skip(self), fields(pull_id = id, allow))]
	pub async fn set_allow_maintainer_edit(&self, id: i64, allow: bool) -> Result<()> {
		let result = sqlx::query("UPDATE pull_requests SET allow_maintainer_edit = ? WHERE id = ?")
			.bind(allow)
			.bind(id)
			.execute(&self.pool)
			.await?;
		ensure_updated(result.rows_affected(), id)
	}

	/// Record the merge and close the pull request's issue with a MergePull
	/// comment.
	#[tracing::instrument(skip(self), fields(pull_id = id, merger_id))]
	pub async fn set_merged(
		&self,
		id: i64,
		merger_id: i64,
		merged_commit_id: &str,
		merged_at: Option<DateTime<Utc>>,
	) -> Result<PullRequest> {
		let mut tx = self.pool.begin().await?;
		let pr = fetch_pull_request(&mut *tx, id).await?;
		if pr.has_merged {
			return Err(DbError::PullAlreadyMerged { pull_id: id });
		}
		if merged_commit_id.is_empty() {
			return Err(DbError::InvalidInput("merged commit id is empty".to_string()));
		}
		let Some(merged_at) = merged_at else {
			return Err(DbError::InvalidInput("merge time is missing".to_string()));
		};
		if merger_id <= 0 {
			return Err(DbError::InvalidInput("merger is missing".to_string()));
		}

		let issue = fetch_issue(&mut *tx, pr.issue_id).await?;
		if issue.is_closed {
			return Err(DbError::PullWasClosed { issue_id: issue.id });
		}

		let status = if pr.status == PullRequestStatus::ManuallyMerged {
			PullRequestStatus::ManuallyMerged
		} else {
			PullRequestStatus::Mergeable
		};
		sqlx::query(
			r#"
			UPDATE pull_requests SET has_merged = 1, merged_commit_id = ?, merger_id = ?,
				merged_at = ?, conflicted_files = '[]', status = ?
			WHERE id = ?
			"#,
		)
		.bind(merged_commit_id)
		.bind(merger_id)
		.bind(to_db_time(&merged_at))
		.bind(status.as_i64())
		.bind(id)
		.execute(&mut *tx)
		.await?;

		set_issue_closed(&mut *tx, &issue, merger_id, true, CommentType::MergePull).await?;
		let merged = fetch_pull_request(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::info!(pull_id = id, issue_id = issue.id, merged_commit_id, "pull request merged");
		Ok(merged)
	}
}

#[async_trait]
impl PullRequestStore for PullRequestRepository {
	async fn new_pull_request(
		&self,
		issue: &NewIssueOptions,
		pr: &NewPullRequest,
	) -> Result<(Issue, PullRequest)> {
		PullRequestRepository::new_pull_request(self, issue, pr).await
	}

	async fn get_pull_request_by_id(&self, id: i64) -> Result<Option<PullRequest>> {
		PullRequestRepository::get_pull_request_by_id(self, id).await
	}

	async fn get_pull_request_by_issue_id(&self, issue_id: i64) -> Result<Option<PullRequest>> {
		PullRequestRepository::get_pull_request_by_issue_id(self, issue_id).await
	}

	async fn get_pull_request_by_index(&self, base_repo_id: i64, index: i64) -> Result<Option<PullRequest>> {
		PullRequestRepository::get_pull_request_by_index(self, base_repo_id, index).await
	}

	async fn get_unmerged_pull_request(
		&self,
		head_repo_id: i64,
		base_repo_id: i64,
		head_branch: &str,
		base_branch: &str,
		flow: PullRequestFlow,
	) -> Result<Option<PullRequest>> {
		PullRequestRepository::get_unmerged_pull_request(
			self,
			head_repo_id,
			base_repo_id,
			head_branch,
			base_branch,
			flow,
		)
		.await
	}

	async fn list_unmerged_pull_requests_by_head_info(
		&self,
		repo_id: i64,
		branch: &str,
		flow: PullRequestFlow,
	) -> Result<Vec<PullRequest>> {
		PullRequestRepository::list_unmerged_pull_requests_by_head_info(self, repo_id, branch, flow).await
	}

	async fn list_unmerged_pull_requests_by_base_info(&self, repo_id: i64, branch: &str) -> Result<Vec<PullRequest>> {
		PullRequestRepository::list_unmerged_pull_requests_by_base_info(self, repo_id, branch).await
	}

	async fn update_pull_request_status(
		&self,
		id: i64,
		status: PullRequestStatus,
		conflicted_files: &[String],
	) -> Result<()> {
		PullRequestRepository::update_pull_request_status(self, id, status, conflicted_files).await
	}

	async fn update_commit_divergence(&self, id: i64, ahead: i64, behind: i64) -> Result<()> {
		PullRequestRepository::update_commit_divergence(self, id, ahead, behind).await
	}

	async fn set_allow_maintainer_edit(&self, id: i64, allow: bool) -> Result<()> {
		PullRequestRepository::set_allow_maintainer_edit(self, id, allow).await
	}

	async fn set_merged(
		&self,
		id: i64,
		merger_id: i64,
		merged_commit_id: &str,
		merged_at: Option<DateTime<Utc>>,
	) -> Result<PullRequest> {
		PullRequestRepository::set_merged(self, id, merger_id, merged_commit_id, merged_at).await
	}
}

const SELECT_PULL: &str = r#"
	SELECT id, issue_id, idx, status, conflicted_files, commits_ahead, commits_behind,
		head_repo_id, base_repo_id, head_branch, base_branch, merge_base, allow_maintainer_edit,
		has_merged, merged_commit_id, merger_id, merged_at, flow
	FROM pull_requests"#;

const SELECT_UNMERGED_PULL: &str = r#"
	SELECT pr.id, pr.issue_id, pr.idx, pr.status, pr.conflicted_files, pr.commits_ahead,
		pr.commits_behind, pr.head_repo_id, pr.base_repo_id, pr.head_branch, pr.base_branch,
		pr.merge_base, pr.allow_maintainer_edit, pr.has_merged, pr.merged_commit_id, pr.merger_id,
		pr.merged_at, pr.flow
	FROM pull_requests pr
	JOIN issues i ON i.id = pr.issue_id
	WHERE i.is_closed = 0 AND pr.has_merged = 0"#;

pub(crate) async fn get_pull_request_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<PullRequest>> {
	let row = sqlx::query(&format!("{SELECT_PULL} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_pull_request(&r)).transpose()
}

pub(crate) async fn fetch_pull_request(conn: &mut SqliteConnection, id: i64) -> Result<PullRequest> {
	get_pull_request_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("pull request {id}")))
}

pub(crate) async fn get_pull_request_by_issue_id(
	conn: &mut SqliteConnection,
	issue_id: i64,
) -> Result<Option<PullRequest>> {
	let row = sqlx::query(&format!("{SELECT_PULL} WHERE issue_id = ?"))
		.bind(issue_id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_pull_request(&r)).transpose()
}

fn ensure_updated(rows_affected: u64, id: i64) -> Result<()> {
	if rows_affected == 0 {
		return Err(DbError::NotFound(format!("pull request {id}")));
	}
	Ok(())
}

fn row_to_pull_request(row: &SqliteRow) -> Result<PullRequest> {
	let raw_status: i64 = row.get("status");
	let status = PullRequestStatus::from_i64(raw_status)
		.ok_or_else(|| DbError::Internal(format!("unknown pull request status {raw_status}")))?;
	let conflicted_files: String = row.get("conflicted_files");
	Ok(PullRequest {
		id: row.get("id"),
		issue_id: row.get("issue_id"),
		index: row.get("idx"),
		status,
		conflicted_files: serde_json::from_str(&conflicted_files)?,
		commits_ahead: row.get("commits_ahead"),
		commits_behind: row.get("commits_behind"),
		head_repo_id: row.get("head_repo_id"),
		base_repo_id: row.get("base_repo_id"),
		head_branch: row.get("head_branch"),
		base_branch: row.get("base_branch"),
		merge_base: row.get("merge_base"),
		allow_maintainer_edit: row.get("allow_maintainer_edit"),
		has_merged: row.get("has_merged"),
		merged_commit_id: row.get("merged_commit_id"),
		merger_id: row.get("merger_id"),
		merged_at: from_opt_db_time(row.get("merged_at"))?,
		flow: PullRequestFlow::from_i64(row.get("flow")),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::comment::CommentRepository;
	use crate::issue::IssueRepository;
	use crate::repo::RepoRepository;
	use crate::testing::{create_test_pool, insert_repo, insert_user};
	use proptest::prelude::*;

	struct Fixture {
		pool: SqlitePool,
		pulls: PullRequestRepository,
		alice: i64,
		repo_id: i64,
	}

	async fn fixture() -> Fixture {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		Fixture {
			pulls: PullRequestRepository::new(pool.clone()),
			pool,
			alice,
			repo_id,
		}
	}

	fn feature_branch(repo_id: i64, head: &str) -> NewPullRequest {
		NewPullRequest {
			head_repo_id: Some(repo_id),
			head_branch: head.to_string(),
			base_branch: "main".to_string(),
			..Default::default()
		}
	}

	#[test]
	fn test_status_codes() {
		assert_eq!(PullRequestStatus::ManuallyMerged.as_i64(), 3);
		assert_eq!(PullRequestStatus::from_i64(6), Some(PullRequestStatus::Ancestor));
		assert_eq!(PullRequestStatus::from_i64(9), None);
		assert_eq!(PullRequestStatus::ManuallyMerged.to_string(), "MANUALLY_MERGED");
	}

	#[test]
	fn test_work_in_progress() {
		assert!(is_work_in_progress("WIP: add parser", DEFAULT_WIP_PREFIXES));
		assert!(is_work_in_progress("[wip] add parser", DEFAULT_WIP_PREFIXES));
		assert!(!is_work_in_progress("add WIP: parser", DEFAULT_WIP_PREFIXES));
		assert!(!is_work_in_progress("anything", &[""]));
	}

	proptest! {
		#[test]
		fn wip_prefix_always_detected(rest in "[a-zA-Z0-9 ]{0,20}") {
			let title = format!("wip:{rest}");
			prop_assert!(is_work_in_progress(&title, DEFAULT_WIP_PREFIXES));
		}
	}

	#[tokio::test]
	async fn test_pull_shares_issue_index() {
		let f = fixture().await;
		let issues = IssueRepository::new(f.pool.clone());
		issues.new_issue(&NewIssueOptions::new(f.repo_id, f.alice, "bug")).await.unwrap();

		let (issue, pr) = f
			.pulls
			.new_pull_request(&NewIssueOptions::new(f.repo_id, f.alice, "fix bug"), &feature_branch(f.repo_id, "fix"))
			.await
			.unwrap();
		assert!(issue.is_pull);
		assert_eq!(issue.index, 2);
		assert_eq!(pr.index, 2);
		assert_eq!(pr.status, PullRequestStatus::Checking);
		assert!(pr.is_same_repo());

		let by_index = f.pulls.get_pull_request_by_index(f.repo_id, 2).await.unwrap().unwrap();
		assert_eq!(by_index.id, pr.id);
		let by_issue = f.pulls.get_pull_request_by_issue_id(issue.id).await.unwrap().unwrap();
		assert_eq!(by_issue.id, pr.id);

		let repo = RepoRepository::new(f.pool.clone()).get_repository_by_id(f.repo_id).await.unwrap().unwrap();
		assert_eq!(repo.num_pulls, 1);
		assert_eq!(repo.num_issues, 1);
	}

	#[tokio::test]
	async fn test_status_and_mergeability() {
		let f = fixture().await;
		let (_, pr) = f
			.pulls
			.new_pull_request(&NewIssueOptions::new(f.repo_id, f.alice, "feature"), &feature_branch(f.repo_id, "feat"))
			.await
			.unwrap();
		assert!(pr.is_checking());
		assert!(!pr.is_mergeable("feature", DEFAULT_WIP_PREFIXES));

		let files = vec!["src/lib.rs".to_string()];
		f.pulls
			.update_pull_request_status(pr.id, PullRequestStatus::Conflict, &files)
			.await
			.unwrap();
		let pr = f.pulls.get_pull_request_by_id(pr.id).await.unwrap().unwrap();
		assert_eq!(pr.conflicted_files, files);
		assert!(!pr.can_auto_merge());

		f.pulls
			.update_pull_request_status(pr.id, PullRequestStatus::Mergeable, &[])
			.await
			.unwrap();
		let pr = f.pulls.get_pull_request_by_id(pr.id).await.unwrap().unwrap();
		assert!(pr.can_auto_merge());
		assert!(pr.is_mergeable("feature", DEFAULT_WIP_PREFIXES));
		assert!(!pr.is_mergeable("WIP: feature", DEFAULT_WIP_PREFIXES));

		f.pulls.update_commit_divergence(pr.id, 3, 1).await.unwrap();
		f.pulls.set_allow_maintainer_edit(pr.id, true).await.unwrap();
		let pr = f.pulls.get_pull_request_by_id(pr.id).await.unwrap().unwrap();
		assert_eq!((pr.commits_ahead, pr.commits_behind), (3, 1));
		assert!(pr.allow_maintainer_edit);

		assert!(f.pulls.update_commit_divergence(9999, 0, 0).await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn test_unmerged_lookups() {
		let f = fixture().await;
		let (_, pr) = f
			.pulls
			.new_pull_request(&NewIssueOptions::new(f.repo_id, f.alice, "feature"), &feature_branch(f.repo_id, "feat"))
			.await
			.unwrap();

		let found = f
			.pulls
			.get_unmerged_pull_request(f.repo_id, f.repo_id, "feat", "main", PullRequestFlow::Github)
			.await
			.unwrap();
		assert_eq!(found.map(|p| p.id), Some(pr.id));
		assert_eq!(
			f.pulls
				.list_unmerged_pull_requests_by_head_info(f.repo_id, "feat", PullRequestFlow::Github)
				.await
				.unwrap()
				.len(),
			1
		);
		assert!(f
			.pulls
			.list_unmerged_pull_requests_by_head_info(f.repo_id, "feat", PullRequestFlow::AGit)
			.await
			.unwrap()
			.is_empty());

		f.pulls
			.set_merged(pr.id, f.alice, "abc123", Some(Utc::now()))
			.await
			.unwrap();
		assert!(f
			.pulls
			.list_unmerged_pull_requests_by_base_info(f.repo_id, "main")
			.await
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_set_merged_closes_issue() {
		let f = fixture().await;
		let comments = CommentRepository::new(f.pool.clone());
		let issues = IssueRepository::new(f.pool.clone());
		let (issue, pr) = f
			.pulls
			.new_pull_request(&NewIssueOptions::new(f.repo_id, f.alice, "feature"), &feature_branch(f.repo_id, "feat"))
			.await
			.unwrap();
		f.pulls
			.update_pull_request_status(pr.id, PullRequestStatus::ManuallyMerged, &["a".to_string()])
			.await
			.unwrap();

		let err = f.pulls.set_merged(pr.id, f.alice, "", Some(Utc::now())).await.unwrap_err();
		assert!(err.is_invalid_input());
		let err = f.pulls.set_merged(pr.id, f.alice, "abc", None).await.unwrap_err();
		assert!(err.is_invalid_input());

		let merged = f.pulls.set_merged(pr.id, f.alice, "abc", Some(Utc::now())).await.unwrap();
		assert!(merged.has_merged);
		assert!(merged.conflicted_files.is_empty());
		assert_eq!(merged.status, PullRequestStatus::ManuallyMerged);
		assert_eq!(merged.merger_id, Some(f.alice));

		let issue = issues.get_issue_by_id(issue.id).await.unwrap().unwrap();
		assert!(issue.is_closed);
		let merge_comments = comments.list_comments(issue.id, Some(CommentType::MergePull)).await.unwrap();
		assert_eq!(merge_comments.len(), 1);

		let err = f.pulls.set_merged(pr.id, f.alice, "abc", Some(Utc::now())).await.unwrap_err();
		assert!(err.is_pull_already_merged());
	}

	#[tokio::test]
	async fn test_closed_pull_cannot_merge() {
		let f = fixture().await;
		let issues = IssueRepository::new(f.pool.clone());
		let (issue, pr) = f
			.pulls
			.new_pull_request(&NewIssueOptions::new(f.repo_id, f.alice, "feature"), &feature_branch(f.repo_id, "feat"))
			.await
			.unwrap();
		issues.change_issue_status(issue.id, f.alice, true, false).await.unwrap();

		let err = f.pulls.set_merged(pr.id, f.alice, "abc", Some(Utc::now())).await.unwrap_err();
		assert!(err.is_pull_was_closed());
		let err = issues.change_issue_status(issue.id, f.alice, true, false).await.unwrap_err();
		assert!(err.is_pull_was_closed());
	}
}
