// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repository milestones and their issue counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::comment::{create_comment, Comment, CommentType, CreateCommentOptions};
use crate::error::{DbError, Result};
use crate::issue::fetch_issue;
use crate::repo::update_repo_milestone_numbers;
use crate::types::{from_db_time, from_opt_db_time, now_db_time, to_db_time};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
	pub id: i64,
	pub repo_id: i64,
	pub name: String,
	pub content: String,
	pub is_closed: bool,
	pub num_issues: i64,
	pub num_closed_issues: i64,
	/// Percentage of closed issues, 0 to 100.
	pub completeness: i64,
	pub deadline: Option<DateTime<Utc>>,
	pub closed_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Milestone {
	pub fn num_open_issues(&self) -> i64 {
		self.num_issues - self.num_closed_issues
	}
}

#[derive(Debug, Clone, Default)]
pub struct NewMilestone {
	pub repo_id: i64,
	pub name: String,
	pub content: String,
	pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MilestoneUpdate {
	pub name: Option<String>,
	pub content: Option<String>,
	/// `Some(None)` clears the deadline.
	pub deadline: Option<Option<DateTime<Utc>>>,
}

#[async_trait]
pub trait MilestoneStore: Send + Sync {
	async fn new_milestone(&self, milestone: &NewMilestone) -> Result<Milestone>;
	async fn get_milestone_by_repo_id(&self, repo_id: i64, id: i64) -> Result<Option<Milestone>>;
	async fn list_milestones(&self, repo_id: i64, is_closed: Option<bool>) -> Result<Vec<Milestone>>;
	async fn update_milestone(&self, id: i64, update: &MilestoneUpdate) -> Result<Milestone>;
	async fn change_milestone_status(&self, id: i64, is_closed: bool) -> Result<Milestone>;
	async fn delete_milestone_by_repo_id(&self, repo_id: i64, id: i64) -> Result<()>;
	async fn update_milestone_counters(&self, id: i64) -> Result<()>;
	async fn change_issue_milestone(
		&self,
		issue_id: i64,
		doer_id: i64,
		milestone_id: Option<i64>,
	) -> Result<Option<Comment>>;
}

#[derive(Clone)]
pub struct MilestoneRepository {
	pool: SqlitePool,
}

impl MilestoneRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, milestone), fields(repo_id = milestone.repo_id))]
	pub async fn new_milestone(&self, milestone: &NewMilestone) -> Result<Milestone> {
		let name = milestone.name.trim();
		if name.is_empty() {
			return Err(DbError::InvalidInput("milestone name cannot be empty".to_string()));
		}

		let mut tx = self.pool.begin().await?;
		let now = now_db_time();
		let result = sqlx::query(
			r#"
			INSERT INTO milestones (repo_id, name, content, deadline, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(milestone.repo_id)
		.bind(name)
		.bind(&milestone.content)
		.bind(milestone.deadline.as_ref().map(to_db_time))
		.bind(&now)
		.bind(&now)
		.execute(&mut *tx)
		.await?;
		let id = result.last_insert_rowid();
		update_repo_milestone_numbers(&mut *tx, milestone.repo_id).await?;
		let created = fetch_milestone(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::debug!(milestone_id = id, "milestone created");
		Ok(created)
	}

	#[tracing::instrument(skip(self), fields(repo_id, milestone_id = id))]
	pub async fn get_milestone_by_repo_id(&self, repo_id: i64, id: i64) -> Result<Option<Milestone>> {
		let mut conn = self.pool.acquire().await?;
		get_milestone_by_repo_id(&mut *conn, repo_id, id).await
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn list_milestones(&self, repo_id: i64, is_closed: Option<bool>) -> Result<Vec<Milestone>> {
		let rows = sqlx::query(&format!(
			"{SELECT_MILESTONE} WHERE repo_id = ? AND (? IS NULL OR is_closed = ?) ORDER BY deadline IS NULL, deadline ASC, id ASC"
		))
		.bind(repo_id)
		.bind(is_closed)
		.bind(is_closed)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_milestone).collect()
	}

	#[tracing::instrument(skip(self, update), fields(milestone_id = id))]
	pub async fn update_milestone(&self, id: i64, update: &MilestoneUpdate) -> Result<Milestone> {
		let mut tx = self.pool.begin().await?;
		let mut milestone = fetch_milestone(&mut *tx, id).await?;
		if let Some(name) = &update.name {
			let name = name.trim();
			if name.is_empty() {
				return Err(DbError::InvalidInput("milestone name cannot be empty".to_string()));
			}
			milestone.name = name.to_string();
		}
		if let Some(content) = &update.content {
			milestone.content = content.clone();
		}
		if let Some(deadline) = update.deadline {
			milestone.deadline = deadline;
		}
		sqlx::query("UPDATE milestones SET name = ?, content = ?, deadline = ?, updated_at = ? WHERE id = ?")
			.bind(&milestone.name)
			.bind(&milestone.content)
			.bind(milestone.deadline.as_ref().map(to_db_time))
			.bind(now_db_time())
			.bind(id)
			.execute(&mut *tx)
			.await?;
		update_milestone_counters(&mut *tx, id).await?;
		let milestone = fetch_milestone(&mut *tx, id).await?;
		tx.commit().await?;
		Ok(milestone)
	}

	#[tracing::instrument(skip(self), fields(milestone_id = id, is_closed))]
	pub async fn change_milestone_status(&self, id: i64, is_closed: bool) -> Result<Milestone> {
		let mut tx = self.pool.begin().await?;
		let milestone = fetch_milestone(&mut *tx, id).await?;
		let now = now_db_time();
		let closed_at = is_closed.then(|| now.clone());
		sqlx::query("UPDATE milestones SET is_closed = ?, closed_at = ?, updated_at = ? WHERE id = ?")
			.bind(is_closed)
			.bind(closed_at)
			.bind(&now)
			.bind(id)
			.execute(&mut *tx)
			.await?;
		update_repo_milestone_numbers(&mut *tx, milestone.repo_id).await?;
		let milestone = fetch_milestone(&mut *tx, id).await?;
		tx.commit().await?;
		Ok(milestone)
	}

	#[tracing::instrument(skip(self), fields(repo_id, milestone_id = id))]
	pub async fn delete_milestone_by_repo_id(&self, repo_id: i64, id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		if get_milestone_by_repo_id(&mut *tx, repo_id, id).await?.is_none() {
			return Err(DbError::NotFound(format!("milestone {id} in repository {repo_id}")));
		}
		sqlx::query("UPDATE issues SET milestone_id = NULL WHERE milestone_id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM milestones WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		update_repo_milestone_numbers(&mut *tx, repo_id).await?;
		tx.commit().await?;

		tracing::debug!(milestone_id = id, repo_id, "milestone deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(milestone_id = id))]
	pub async fn update_milestone_counters(&self, id: i64) -> Result<()> {
		let mut conn = self.pool.acquire().await?;
		update_milestone_counters(&mut *conn, id).await
	}

	/// Move an issue to another milestone, or clear it with `None`. Returns
	/// the Milestone comment, or `None` when nothing changed.
	#[tracing::instrument(skip(self), fields(issue_id, doer_id, milestone_id))]
	pub async fn change_issue_milestone(
		&self,
		issue_id: i64,
		doer_id: i64,
		milestone_id: Option<i64>,
	) -> Result<Option<Comment>> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		if issue.milestone_id == milestone_id {
			return Ok(None);
		}
		if let Some(id) = milestone_id {
			if get_milestone_by_repo_id(&mut *tx, issue.repo_id, id).await?.is_none() {
				return Err(DbError::NotFound(format!(
					"milestone {id} in repository {}",
					issue.repo_id
				)));
			}
		}

		sqlx::query("UPDATE issues SET milestone_id = ?, updated_at = ? WHERE id = ?")
			.bind(milestone_id)
			.bind(now_db_time())
			.bind(issue_id)
			.execute(&mut *tx)
			.await?;
		for id in issue.milestone_id.iter().chain(milestone_id.iter()) {
			update_milestone_counters(&mut *tx, *id).await?;
		}
		let comment = create_comment(
			&mut *tx,
			&CreateCommentOptions {
				milestone_id,
				old_milestone_id: issue.milestone_id,
				..CreateCommentOptions::new(CommentType::Milestone, doer_id, issue_id)
			},
		)
		.await?;
		tx.commit().await?;
		Ok(Some(comment))
	}
}

#[async_trait]
impl MilestoneStore for MilestoneRepository {
	async fn new_milestone(&self, milestone: &NewMilestone) -> Result<Milestone> {
		MilestoneRepository::new_milestone(self, milestone).await
	}

	async fn get_milestone_by_repo_id(&self, repo_id: i64, id: i64) -> Result<Option<Milestone>> {
		MilestoneRepository::get_milestone_by_repo_id(self, repo_id, id).await
	}

	async fn list_milestones(&self, repo_id: i64, is_closed: Option<bool>) -> Result<Vec<Milestone>> {
		MilestoneRepository::list_milestones(self, repo_id, is_closed).await
	}

	async fn update_milestone(&self, id: i64, update: &MilestoneUpdate) -> Result<Milestone> {
		MilestoneRepository::update_milestone(self, id, update).await
	}

	async fn change_milestone_status(&self, id: i64, is_closed: bool) -> Result<Milestone> {
		MilestoneRepository::change_milestone_status(self, id, is_closed).await
	}

	async fn delete_milestone_by_repo_id(&self, repo_id: i64, id: i64) -> Result<()> {
		MilestoneRepository::delete_milestone_by_repo_id(self, repo_id, id).await
	}

	async fn update_milestone_counters(&self, id: i64) -> Result<()> {
		MilestoneRepository::update_milestone_counters(self, id).await
	}

	async fn change_issue_milestone(
		&self,
		issue_id: i64,
		doer_id: i64,
		milestone_id: Option<i64>,
	) -> Result<Option<Comment>> {
		MilestoneRepository::change_issue_milestone(self, issue_id, doer_id, milestone_id).await
	}
}

const SELECT_MILESTONE: &str = r#"
	SELECT id, repo_id, name, content, is_closed, num_issues, num_closed_issues, completeness,
		deadline, closed_at, created_at, updated_at
	FROM milestones"#;

pub(crate) async fn get_milestone_by_repo_id(
	conn: &mut SqliteConnection,
	repo_id: i64,
	id: i64,
) -> Result<Option<Milestone>> {
	let row = sqlx::query(&format!("{SELECT_MILESTONE} WHERE id = ? AND repo_id = ?"))
		.bind(id)
		.bind(repo_id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_milestone(&r)).transpose()
}

/// Recount issues and closed issues, then derive completeness.
pub(crate) async fn update_milestone_counters(conn: &mut SqliteConnection, id: i64) -> Result<()> {
	sqlx::query(
		r#"
		UPDATE milestones SET
			num_issues = (SELECT COUNT(*) FROM issues WHERE milestone_id = ?1),
			num_closed_issues = (SELECT COUNT(*) FROM issues WHERE milestone_id = ?1 AND is_closed = 1),
			updated_at = ?2
		WHERE id = ?1
		"#,
	)
	.bind(id)
	.bind(now_db_time())
	.execute(&mut *conn)
	.await?;
	sqlx::query(
		r#"
		UPDATE milestones SET completeness = CASE
			WHEN num_issues = 0 THEN 0
			ELSE num_closed_issues * 100 / num_issues
		END
		WHERE id = ?
		"#,
	)
	.bind(id)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

async fn fetch_milestone(conn: &mut SqliteConnection, id: i64) -> Result<Milestone> {
	let row = sqlx::query(&format!("{SELECT_MILESTONE} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_milestone(&r))
		.transpose()?
		.ok_or_else(|| DbError::NotFound(format!("milestone {id}")))
}

fn row_to_milestone(row: &SqliteRow) -> Result<Milestone> {
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Milestone {
		id: row.get("id"),
		repo_id: row.get("repo_id"),
		name: row.get("name"),
		content: row.get("content"),
		is_closed: row.get("is_closed"),
		num_issues: row.get("num_issues"),
		num_closed_issues: row.get("num_closed_issues"),
		completeness: row.get("completeness"),
		deadline: from_opt_db_time(row.get("deadline"))?,
		closed_at: from_opt_db_time(row.get("closed_at"))?,
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::issue::{IssueRepository, NewIssueOptions};
	use crate::repo::RepoRepository;
	use crate::testing::{create_test_pool, insert_repo, insert_user};

	fn new_milestone(repo_id: i64, name: &str) -> NewMilestone {
		NewMilestone {
			repo_id,
			name: name.to_string(),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_milestone_repo_counters() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let milestones = MilestoneRepository::new(pool.clone());
		let repos = RepoRepository::new(pool.clone());

		let v1 = milestones
			.new_milestone(&new_milestone(repo_id, "  v1.0 "))
			.await
			.unwrap();
		assert_eq!(v1.name, "v1.0");
		milestones.new_milestone(&new_milestone(repo_id, "v2.0")).await.unwrap();

		let closed = milestones.change_milestone_status(v1.id, true).await.unwrap();
		assert!(closed.is_closed);
		assert!(closed.closed_at.is_some());

		let repo = repos.get_repository_by_id(repo_id).await.unwrap().unwrap();
		assert_eq!(repo.num_milestones, 2);
		assert_eq!(repo.num_closed_milestones, 1);

		assert_eq!(milestones.list_milestones(repo_id, Some(false)).await.unwrap().len(), 1);
		assert_eq!(milestones.list_milestones(repo_id, None).await.unwrap().len(), 2);

		let reopened = milestones.change_milestone_status(v1.id, false).await.unwrap();
		assert!(reopened.closed_at.is_none());
	}

	#[tokio::test]
	async fn test_completeness_tracks_issue_state() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let milestones = MilestoneRepository::new(pool.clone());
		let issues = IssueRepository::new(pool.clone());
		let v1 = milestones.new_milestone(&new_milestone(repo_id, "v1")).await.unwrap();

		let mut ids = Vec::new();
		for title in ["a", "b", "c"] {
			let issue = issues
				.new_issue(&NewIssueOptions {
					milestone_id: Some(v1.id),
					..NewIssueOptions::new(repo_id, alice, title)
				})
				.await
				.unwrap();
			ids.push(issue.id);
		}
		issues.change_issue_status(ids[0], alice, true, false).await.unwrap();

		let v1 = milestones.get_milestone_by_repo_id(repo_id, v1.id).await.unwrap().unwrap();
		assert_eq!(v1.num_issues, 3);
		assert_eq!(v1.num_closed_issues, 1);
		assert_eq!(v1.completeness, 33);

		let comment = milestones.change_issue_milestone(ids[1], alice, None).await.unwrap();
		assert_eq!(comment.unwrap().old_milestone_id, Some(v1.id));
		assert!(milestones.change_issue_milestone(ids[1], alice, None).await.unwrap().is_none());
		let v1 = milestones.get_milestone_by_repo_id(repo_id, v1.id).await.unwrap().unwrap();
		assert_eq!(v1.num_issues, 2);
		assert_eq!(v1.completeness, 50);
	}

	#[tokio::test]
	async fn test_delete_milestone_clears_issues() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let other_repo = insert_repo(&pool, alice, "other", false).await;
		let milestones = MilestoneRepository::new(pool.clone());
		let issues = IssueRepository::new(pool.clone());
		let v1 = milestones.new_milestone(&new_milestone(repo_id, "v1")).await.unwrap();
		let issue = issues
			.new_issue(&NewIssueOptions {
				milestone_id: Some(v1.id),
				..NewIssueOptions::new(repo_id, alice, "a")
			})
			.await
			.unwrap();

		let err = milestones.delete_milestone_by_repo_id(other_repo, v1.id).await.unwrap_err();
		assert!(err.is_not_found());

		milestones.delete_milestone_by_repo_id(repo_id, v1.id).await.unwrap();
		let issue = issues.get_issue_by_id(issue.id).await.unwrap().unwrap();
		assert_eq!(issue.milestone_id, None);
	}

	#[tokio::test]
	async fn test_new_milestone_rejects_blank_name() {
		let pool = create_test_pool().await;
		let milestones = MilestoneRepository::new(pool);
		let err = milestones.new_milestone(&new_milestone(1, "   ")).await.unwrap_err();
		assert!(err.is_invalid_input());
	}
}
