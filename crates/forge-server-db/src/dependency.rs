// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! "Blocked by" relations between issues.
//!
//! A row `(issue_id, dependency_id)` means `issue_id` cannot be closed while
//! `dependency_id` is open. The relation graph is kept acyclic.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::comment::{create_comment, CommentType, CreateCommentOptions};
use crate::error::{DbError, Result};
use crate::issue::{fetch_issue, Issue};
use crate::types::{from_db_time, now_db_time};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDependency {
	pub id: i64,
	pub user_id: i64,
	pub issue_id: i64,
	pub dependency_id: i64,
	pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DependencyStore: Send + Sync {
	async fn create_issue_dependency(
		&self,
		doer_id: i64,
		issue_id: i64,
		dependency_id: i64,
		allow_cross_repo: bool,
	) -> Result<IssueDependency>;
	async fn remove_issue_dependency(&self, doer_id: i64, issue_id: i64, dependency_id: i64) -> Result<()>;
	async fn list_blocked_by(&self, issue_id: i64) -> Result<Vec<Issue>>;
	async fn list_blocking(&self, issue_id: i64) -> Result<Vec<Issue>>;
	async fn issue_no_dependencies_left(&self, issue_id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct DependencyRepository {
	pool: SqlitePool,
}

impl DependencyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self), fields(doer_id, issue_id, dependency_id))]
	pub async fn create_issue_dependency(
		&self,
		doer_id: i64,
		issue_id: i64,
		dependency_id: i64,
		allow_cross_repo: bool,
	) -> Result<IssueDependency> {
		if issue_id == dependency_id {
			return Err(DbError::CircularDependency {
				issue_id,
				dependency_id,
			});
		}

		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		let dependency = fetch_issue(&mut *tx, dependency_id).await?;
		if issue.repo_id != dependency.repo_id && !allow_cross_repo {
			return Err(DbError::DependencyCrossRepo {
				issue_id,
				dependency_id,
			});
		}
		if dependency_exists(&mut *tx, issue_id, dependency_id).await? {
			return Err(DbError::DependencyExists {
				issue_id,
				dependency_id,
			});
		}
		if depends_on(&mut *tx, dependency_id, issue_id).await? {
			return Err(DbError::CircularDependency {
				issue_id,
				dependency_id,
			});
		}

		let result = sqlx::query(
			"INSERT INTO issue_dependencies (user_id, issue_id, dependency_id, created_at) VALUES (?, ?, ?, ?)",
		)
		.bind(doer_id)
		.bind(issue_id)
		.bind(dependency_id)
		.bind(now_db_time())
		.execute(&mut *tx)
		.await?;
		let id = result.last_insert_rowid();

		record_dependency_change(&mut *tx, doer_id, &issue, &dependency, CommentType::AddDependency).await?;

		let row = sqlx::query(
			"SELECT id, user_id, issue_id, dependency_id, created_at FROM issue_dependencies WHERE id = ?",
		)
		.bind(id)
		.fetch_one(&mut *tx)
		.await?;
		let created = row_to_dependency(&row)?;
		tx.commit().await?;

		tracing::debug!(issue_id, dependency_id, "issue dependency created");
		Ok(created)
	}

	#[tracing::instrument(skip(self), fields(doer_id, issue_id, dependency_id))]
	pub async fn remove_issue_dependency(&self, doer_id: i64, issue_id: i64, dependency_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		let dependency = fetch_issue(&mut *tx, dependency_id).await?;
		let result = sqlx::query("DELETE FROM issue_dependencies WHERE issue_id = ? AND dependency_id = ?")
			.bind(issue_id)
			.bind(dependency_id)
			.execute(&mut *tx)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::DependencyNotExists {
				issue_id,
				dependency_id,
			});
		}
		record_dependency_change(&mut *tx, doer_id, &issue, &dependency, CommentType::RemoveDependency)
			.await?;
		tx.commit().await?;

		tracing::debug!(issue_id, dependency_id, "issue dependency removed");
		Ok(())
	}

	/// Issues that must be closed before `issue_id` can be.
	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn list_blocked_by(&self, issue_id: i64) -> Result<Vec<Issue>> {
		self.related_issues(
			"SELECT dependency_id FROM issue_dependencies WHERE issue_id = ? ORDER BY dependency_id",
			issue_id,
		)
		.await
	}

	/// Issues that wait on `issue_id`.
	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn list_blocking(&self, issue_id: i64) -> Result<Vec<Issue>> {
		self.related_issues(
			"SELECT issue_id FROM issue_dependencies WHERE dependency_id = ? ORDER BY issue_id",
			issue_id,
		)
		.await
	}

	async fn related_issues(&self, sql: &str, issue_id: i64) -> Result<Vec<Issue>> {
		let mut conn = self.pool.acquire().await?;
		let ids: Vec<i64> = sqlx::query_scalar(sql).bind(issue_id).fetch_all(&mut *conn).await?;
		let mut issues = Vec::with_capacity(ids.len());
		for id in ids {
			issues.push(fetch_issue(&mut *conn, id).await?);
		}
		Ok(issues)
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn issue_no_dependencies_left(&self, issue_id: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		issue_no_dependencies_left(&mut *conn, issue_id).await
	}
}

#[async_trait]
impl DependencyStore for DependencyRepository {
	async fn create_issue_dependency(
		&self,
		doer_id: i64,
		issue_id: i64,
		dependency_id: i64,
		allow_cross_repo: bool,
	) -> Result<IssueDependency> {
		DependencyRepository::create_issue_dependency(self, doer_id, issue_id, dependency_id, allow_cross_repo)
			.await
	}

	async fn remove_issue_dependency(&self, doer_id: i64, issue_id: i64, dependency_id: i64) -> Result<()> {
		DependencyRepository::remove_issue_dependency(self, doer_id, issue_id, dependency_id).await
	}

	async fn list_blocked_by(&self, issue_id: i64) -> Result<Vec<Issue>> {
		DependencyRepository::list_blocked_by(self, issue_id).await
	}

	async fn list_blocking(&self, issue_id: i64) -> Result<Vec<Issue>> {
		DependencyRepository::list_blocking(self, issue_id).await
	}

	async fn issue_no_dependencies_left(&self, issue_id: i64) -> Result<bool> {
		DependencyRepository::issue_no_dependencies_left(self, issue_id).await
	}
}

/// True when no issue blocking `issue_id` is still open.
pub(crate) async fn issue_no_dependencies_left(conn: &mut SqliteConnection, issue_id: i64) -> Result<bool> {
	let open: i64 = sqlx::query_scalar(
		r#"
		SELECT COUNT(*) FROM issue_dependencies d
		JOIN issues i ON i.id = d.dependency_id
		WHERE d.issue_id = ? AND i.is_closed = 0
		"#,
	)
	.bind(issue_id)
	.fetch_one(&mut *conn)
	.await?;
	Ok(open == 0)
}

async fn dependency_exists(conn: &mut SqliteConnection, issue_id: i64, dependency_id: i64) -> Result<bool> {
	let found: Option<i64> =
		sqlx::query_scalar("SELECT id FROM issue_dependencies WHERE issue_id = ? AND dependency_id = ?")
			.bind(issue_id)
			.bind(dependency_id)
			.fetch_optional(&mut *conn)
			.await?;
	Ok(found.is_some())
}

/// Breadth-first walk over blockers: does `from` (transitively) depend on `target`?
async fn depends_on(conn: &mut SqliteConnection, from: i64, target: i64) -> Result<bool> {
	let mut visited = HashSet::from([from]);
	let mut queue = VecDeque::from([from]);
	while let Some(current) = queue.pop_front() {
		let blockers: Vec<i64> = sqlx::query_scalar("SELECT dependency_id FROM issue_dependencies WHERE issue_id = ?")
			.bind(current)
			.fetch_all(&mut *conn)
			.await?;
		for blocker in blockers {
			if blocker == target {
				return Ok(true);
			}
			if visited.insert(blocker) {
				queue.push_back(blocker);
			}
		}
	}
	Ok(false)
}

async fn record_dependency_change(
	conn: &mut SqliteConnection,
	doer_id: i64,
	issue: &Issue,
	dependency: &Issue,
	comment_type: CommentType,
) -> Result<()> {
	for (on, other) in [(issue, dependency), (dependency, issue)] {
		create_comment(
			&mut *conn,
			&CreateCommentOptions {
				dependent_issue_id: Some(other.id),
				..CreateCommentOptions::new(comment_type, doer_id, on.id)
			},
		)
		.await?;
	}
	Ok(())
}

fn row_to_dependency(row: &SqliteRow) -> Result<IssueDependency> {
	let created_at: String = row.get("created_at");
	Ok(IssueDependency {
		id: row.get("id"),
		user_id: row.get("user_id"),
		issue_id: row.get("issue_id"),
		dependency_id: row.get("dependency_id"),
		created_at: from_db_time(&created_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::comment::CommentRepository;
	use crate::issue::{IssueRepository, NewIssueOptions};
	use crate::testing::{create_test_pool, insert_repo, insert_user};

	struct Fixture {
		deps: DependencyRepository,
		issues: IssueRepository,
		comments: CommentRepository,
		alice: i64,
		ids: Vec<i64>,
		other_repo_issue: i64,
	}

	async fn fixture() -> Fixture {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let other = insert_repo(&pool, alice, "other", false).await;
		let issues = IssueRepository::new(pool.clone());
		let mut ids = Vec::new();
		for title in ["a", "b", "c", "d"] {
			ids.push(issues.new_issue(&NewIssueOptions::new(repo_id, alice, title)).await.unwrap().id);
		}
		let other_repo_issue = issues.new_issue(&NewIssueOptions::new(other, alice, "x")).await.unwrap().id;
		Fixture {
			deps: DependencyRepository::new(pool.clone()),
			comments: CommentRepository::new(pool.clone()),
			issues,
			alice,
			ids,
			other_repo_issue,
		}
	}

	#[tokio::test]
	async fn test_self_dependency_is_circular() {
		let f = fixture().await;
		let err = f
			.deps
			.create_issue_dependency(f.alice, f.ids[0], f.ids[0], false)
			.await
			.unwrap_err();
		assert!(err.is_circular_dependency());
	}

	#[tokio::test]
	async fn test_transitive_cycle_is_rejected() {
		let f = fixture().await;
		let [a, b, c, d] = [f.ids[0], f.ids[1], f.ids[2], f.ids[3]];
		f.deps.create_issue_dependency(f.alice, a, b, false).await.unwrap();
		f.deps.create_issue_dependency(f.alice, b, c, false).await.unwrap();
		f.deps.create_issue_dependency(f.alice, c, d, false).await.unwrap();

		let err = f.deps.create_issue_dependency(f.alice, d, a, false).await.unwrap_err();
		assert!(err.is_circular_dependency());

		let err = f.deps.create_issue_dependency(f.alice, a, b, false).await.unwrap_err();
		assert!(matches!(err, DbError::DependencyExists { .. }));

		// A diamond is not a cycle.
		f.deps.create_issue_dependency(f.alice, a, d, false).await.unwrap();
	}

	#[tokio::test]
	async fn test_cross_repo_dependency() {
		let f = fixture().await;
		let err = f
			.deps
			.create_issue_dependency(f.alice, f.ids[0], f.other_repo_issue, false)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::DependencyCrossRepo { .. }));

		f.deps
			.create_issue_dependency(f.alice, f.ids[0], f.other_repo_issue, true)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn test_blockers_prevent_closing() {
		let f = fixture().await;
		let [a, b] = [f.ids[0], f.ids[1]];
		f.deps.create_issue_dependency(f.alice, a, b, false).await.unwrap();

		assert!(!f.deps.issue_no_dependencies_left(a).await.unwrap());
		let err = f.issues.change_issue_status(a, f.alice, true, true).await.unwrap_err();
		assert!(err.is_dependencies_left());

		// Dependencies disabled: closing is allowed.
		f.issues.change_issue_status(a, f.alice, true, false).await.unwrap();
		f.issues.change_issue_status(a, f.alice, false, false).await.unwrap();

		f.issues.change_issue_status(b, f.alice, true, true).await.unwrap();
		assert!(f.deps.issue_no_dependencies_left(a).await.unwrap());
		f.issues.change_issue_status(a, f.alice, true, true).await.unwrap();
	}

	#[tokio::test]
	async fn test_listing_and_removal_comments() {
		let f = fixture().await;
		let [a, b, c] = [f.ids[0], f.ids[1], f.ids[2]];
		f.deps.create_issue_dependency(f.alice, a, b, false).await.unwrap();
		f.deps.create_issue_dependency(f.alice, c, b, false).await.unwrap();

		let blocked_by: Vec<i64> = f.deps.list_blocked_by(a).await.unwrap().iter().map(|i| i.id).collect();
		assert_eq!(blocked_by, vec![b]);
		let blocking: Vec<i64> = f.deps.list_blocking(b).await.unwrap().iter().map(|i| i.id).collect();
		assert_eq!(blocking, vec![a, c]);

		f.deps.remove_issue_dependency(f.alice, a, b).await.unwrap();
		let err = f.deps.remove_issue_dependency(f.alice, a, b).await.unwrap_err();
		assert!(err.is_not_found());

		let on_b = f
			.comments
			.list_comments(b, Some(CommentType::RemoveDependency))
			.await
			.unwrap();
		assert_eq!(on_b.len(), 1);
		assert_eq!(on_b[0].dependent_issue_id, Some(a));
		let added_on_a = f
			.comments
			.list_comments(a, Some(CommentType::AddDependency))
			.await
			.unwrap();
		assert_eq!(added_on_a.len(), 1);
	}
}
