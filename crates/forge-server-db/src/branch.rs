// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Branch records mirrored from the git repository.
//!
//! Deleting a branch keeps its row with `is_deleted` set so it can be
//! restored; a later push of the same name revives it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{DbError, Result};
use crate::pattern::is_plain_name;
use crate::protected_branch::find_repo_protected_branch_rules;
use crate::types::{from_db_time, from_opt_db_time, now_db_time, to_db_time};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
	pub id: i64,
	pub repo_id: i64,
	pub name: String,
	pub commit_id: String,
	pub commit_message: String,
	pub pusher_id: i64,
	pub is_deleted: bool,
	pub deleted_by_id: Option<i64>,
	pub deleted_at: Option<DateTime<Utc>>,
	pub commit_time: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBranch {
	pub repo_id: i64,
	pub name: String,
	pub commit_id: String,
	pub commit_message: String,
	pub pusher_id: i64,
	pub commit_time: DateTime<Utc>,
}

#[async_trait]
pub trait BranchStore: Send + Sync {
	async fn add_branch(&self, branch: &NewBranch) -> Result<Branch>;
	async fn get_branch(&self, repo_id: i64, name: &str) -> Result<Branch>;
	async fn list_branches(&self, repo_id: i64, include_deleted: bool) -> Result<Vec<Branch>>;
	async fn update_branch_commit(
		&self,
		repo_id: i64,
		name: &str,
		commit_id: &str,
		commit_message: &str,
		pusher_id: i64,
		commit_time: DateTime<Utc>,
	) -> Result<Branch>;
	async fn add_deleted_branch(&self, repo_id: i64, name: &str, doer_id: i64) -> Result<()>;
	async fn remove_deleted_branch_by_name(&self, repo_id: i64, name: &str) -> Result<bool>;
	async fn remove_old_deleted_branches(&self, before: DateTime<Utc>) -> Result<u64>;
	async fn rename_branch(&self, repo_id: i64, from: &str, to: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct BranchRepository {
	pool: SqlitePool,
}

impl BranchRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, branch), fields(repo_id = branch.repo_id, name = %branch.name))]
	pub async fn add_branch(&self, branch: &NewBranch) -> Result<Branch> {
		let mut tx = self.pool.begin().await?;
		let existing = get_branch_row(&mut *tx, branch.repo_id, &branch.name).await?;
		let now = now_db_time();

		let id = match existing {
			Some(b) if !b.is_deleted => {
				return Err(DbError::BranchAlreadyExists {
					repo_id: branch.repo_id,
					name: branch.name.clone(),
				});
			}
			Some(b) => {
				sqlx::query(
					r#"
					UPDATE branches SET commit_id = ?, commit_message = ?, pusher_id = ?, commit_time = ?,
						is_deleted = 0, deleted_by_id = NULL, deleted_at = NULL, updated_at = ?
					WHERE id = ?
					"#,
				)
				.bind(&branch.commit_id)
				.bind(&branch.commit_message)
				.bind(branch.pusher_id)
				.bind(to_db_time(&branch.commit_time))
				.bind(&now)
				.bind(b.id)
				.execute(&mut *tx)
				.await?;
				b.id
			}
			None => sqlx::query(
				r#"
				INSERT INTO branches (repo_id, name, commit_id, commit_message, pusher_id, commit_time,
					created_at, updated_at)
				VALUES (?, ?, ?, ?, ?, ?, ?, ?)
				"#,
			)
			.bind(branch.repo_id)
			.bind(&branch.name)
			.bind(&branch.commit_id)
			.bind(&branch.commit_message)
			.bind(branch.pusher_id)
			.bind(to_db_time(&branch.commit_time))
			.bind(&now)
			.bind(&now)
			.execute(&mut *tx)
			.await?
			.last_insert_rowid(),
		};

		let created = fetch_branch(&mut *tx, id).await?;
		tx.commit().await?;
		tracing::debug!(branch_id = id, "branch added");
		Ok(created)
	}

	/// Deleted branches are returned too; check `is_deleted`.
	#[tracing::instrument(skip(self), fields(repo_id, name))]
	pub async fn get_branch(&self, repo_id: i64, name: &str) -> Result<Branch> {
		let mut conn = self.pool.acquire().await?;
		get_branch_row(&mut *conn, repo_id, name)
			.await?
			.ok_or_else(|| branch_not_exist(repo_id, name))
	}

	#[tracing::instrument(skip(self), fields(repo_id, include_deleted))]
	pub async fn list_branches(&self, repo_id: i64, include_deleted: bool) -> Result<Vec<Branch>> {
		let rows = sqlx::query(&format!(
			"{SELECT_BRANCH} WHERE repo_id = ? AND (? OR is_deleted = 0) ORDER BY name ASC"
		))
		.bind(repo_id)
		.bind(include_deleted)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_branch).collect()
	}

	#[tracing::instrument(skip(self, commit_message), fields(repo_id, name, commit_id))]
	pub async fn update_branch_commit(
		&self,
		repo_id: i64,
		name: &str,
		commit_id: &str,
		commit_message: &str,
		pusher_id: i64,
		commit_time: DateTime<Utc>,
	) -> Result<Branch> {
		let mut tx = self.pool.begin().await?;
		let branch = get_branch_row(&mut *tx, repo_id, name)
			.await?
			.ok_or_else(|| branch_not_exist(repo_id, name))?;
		sqlx::query(
			r#"
			UPDATE branches SET commit_id = ?, commit_message = ?, pusher_id = ?, commit_time = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(commit_id)
		.bind(commit_message)
		.bind(pusher_id)
		.bind(to_db_time(&commit_time))
		.bind(now_db_time())
		.bind(branch.id)
		.execute(&mut *tx)
		.await?;
		let updated = fetch_branch(&mut *tx, branch.id).await?;
		tx.commit().await?;
		Ok(updated)
	}

	#[tracing::instrument(skip(self), fields(repo_id, name, doer_id))]
	pub async fn add_deleted_branch(&self, repo_id: i64, name: &str, doer_id: i64) -> Result<()> {
		let now = now_db_time();
		let result = sqlx::query(
			r#"
			UPDATE branches SET is_deleted = 1, deleted_by_id = ?, deleted_at = ?, updated_at = ?
			WHERE repo_id = ? AND name = ? AND is_deleted = 0
			"#,
		)
		.bind(doer_id)
		.bind(&now)
		.bind(&now)
		.bind(repo_id)
		.bind(name)
		.execute(&self.pool)
		.await?;
		if result.rows_affected() == 0 {
			return Err(branch_not_exist(repo_id, name));
		}
		tracing::debug!("branch marked deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(repo_id, name))]
	pub async fn remove_deleted_branch_by_name(&self, repo_id: i64, name: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM branches WHERE repo_id = ? AND name = ? AND is_deleted = 1")
			.bind(repo_id)
			.bind(name)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Purge branches deleted before `before`. Returns the number removed.
	#[tracing::instrument(skip(self))]
	pub async fn remove_old_deleted_branches(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM branches WHERE is_deleted = 1 AND deleted_at < ?")
			.bind(to_db_time(&before))
			.execute(&self.pool)
			.await?;
		if result.rows_affected() > 0 {
			tracing::info!(removed = result.rows_affected(), "purged old deleted branches");
		}
		Ok(result.rows_affected())
	}

	/// Rename a branch and everything that refers to it by name: the repo's
	/// default branch, a plain protection rule, and open pull requests.
	#[tracing::instrument(skip(self), fields(repo_id, from, to))]
	pub async fn rename_branch(&self, repo_id: i64, from: &str, to: &str) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let branch = match get_branch_row(&mut *tx, repo_id, from).await? {
			Some(b) if !b.is_deleted => b,
			_ => return Err(branch_not_exist(repo_id, from)),
		};
		if get_branch_row(&mut *tx, repo_id, to).await?.is_some() {
			return Err(DbError::BranchAlreadyExists {
				repo_id,
				name: to.to_string(),
			});
		}

		let now = now_db_time();
		sqlx::query("UPDATE branches SET name = ?, updated_at = ? WHERE id = ?")
			.bind(to)
			.bind(&now)
			.bind(branch.id)
			.execute(&mut *tx)
			.await?;

		sqlx::query("UPDATE repos SET default_branch = ?, updated_at = ? WHERE id = ? AND default_branch = ?")
			.bind(to)
			.bind(&now)
			.bind(repo_id)
			.bind(from)
			.execute(&mut *tx)
			.await?;

		let rules = find_repo_protected_branch_rules(&mut *tx, repo_id).await?;
		if let Some(rule) = rules
			.iter()
			.find(|r| is_plain_name(&r.rule_name) && r.rule_name == from)
		{
			sqlx::query("UPDATE protected_branches SET rule_name = ?, updated_at = ? WHERE id = ?")
				.bind(to)
				.bind(&now)
				.bind(rule.id)
				.execute(&mut *tx)
				.await?;
		}

		sqlx::query(
			r#"
			UPDATE pull_requests SET base_branch = ?
			WHERE base_repo_id = ? AND base_branch = ? AND has_merged = 0
				AND issue_id IN (SELECT id FROM issues WHERE is_closed = 0)
			"#,
		)
		.bind(to)
		.bind(repo_id)
		.bind(from)
		.execute(&mut *tx)
		.await?;
		sqlx::query(
			r#"
			UPDATE pull_requests SET head_branch = ?
			WHERE head_repo_id = ? AND head_branch = ? AND has_merged = 0
				AND issue_id IN (SELECT id FROM issues WHERE is_closed = 0)
			"#,
		)
		.bind(to)
		.bind(repo_id)
		.bind(from)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		tracing::info!("branch renamed");
		Ok(())
	}
}

#[async_trait]
impl BranchStore for BranchRepository {
	async fn add_branch(&self, branch: &NewBranch) -> Result<Branch> {
		BranchRepository::add_branch(self, branch).await
	}

	async fn get_branch(&self, repo_id: i64, name: &str) -> Result<Branch> {
		BranchRepository::get_branch(self, repo_id, name).await
	}

	async fn list_branches(&self, repo_id: i64, include_deleted: bool) -> Result<Vec<Branch>> {
		BranchRepository::list_branches(self, repo_id, include_deleted).await
	}

	async fn update_branch_commit(
		&self,
		repo_id: i64,
		name: &str,
		commit_id: &str,
		commit_message: &str,
		pusher_id: i64,
		commit_time: DateTime<Utc>,
	) -> Result<Branch> {
		BranchRepository::update_branch_commit(self, repo_id, name, commit_id, commit_message, pusher_id, commit_time)
			.await
	}

	async fn add_deleted_branch(&self, repo_id: i64, name: &str, doer_id: i64) -> Result<()> {
		BranchRepository::add_deleted_branch(self, repo_id, name, doer_id).await
	}

	async fn remove_deleted_branch_by_name(&self, repo_id: i64, name: &str) -> Result<bool> {
		BranchRepository::remove_deleted_branch_by_name(self, repo_id, name).await
	}

	async fn remove_old_deleted_branches(&self, before: DateTime<Utc>) -> Result<u64> {
		BranchRepository::remove_old_deleted_branches(self, before).await
	}

	async fn rename_branch(&self, repo_id: i64, from: &str, to: &str) -> Result<()> {
		BranchRepository::rename_branch(self, repo_id, from, to).await
	}
}

const SELECT_BRANCH: &str = r#"
	SELECT id, repo_id, name, commit_id, commit_message, pusher_id, is_deleted, deleted_by_id,
		deleted_at, commit_time, created_at, updated_at
	FROM branches"#;

fn branch_not_exist(repo_id: i64, name: &str) -> DbError {
	DbError::BranchNotExist {
		repo_id,
		name: name.to_string(),
	}
}

async fn get_branch_row(conn: &mut SqliteConnection, repo_id: i64, name: &str) -> Result<Option<Branch>> {
	let row = sqlx::query(&format!("{SELECT_BRANCH} WHERE repo_id = ? AND name = ?"))
		.bind(repo_id)
		.bind(name)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_branch(&r)).transpose()
}

async fn fetch_branch(conn: &mut SqliteConnection, id: i64) -> Result<Branch> {
	let row = sqlx::query(&format!("{SELECT_BRANCH} WHERE id = ?"))
		.bind(id)
		.fetch_one(&mut *conn)
		.await?;
	row_to_branch(&row)
}

fn row_to_branch(row: &SqliteRow) -> Result<Branch> {
	let commit_time: String = row.get("commit_time");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Branch {
		id: row.get("id"),
		repo_id: row.get("repo_id"),
		name: row.get("name"),
		commit_id: row.get("commit_id"),
		commit_message: row.get("commit_message"),
		pusher_id: row.get("pusher_id"),
		is_deleted: row.get("is_deleted"),
		deleted_by_id: row.get("deleted_by_id"),
		deleted_at: from_opt_db_time(row.get("deleted_at"))?,
		commit_time: from_db_time(&commit_time)?,
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::issue::NewIssueOptions;
	use crate::protected_branch::{ProtectedBranch, ProtectedBranchRepository};
	use crate::pull::{NewPullRequest, PullRequestRepository};
	use crate::repo::RepoRepository;
	use crate::testing::{create_test_pool, insert_repo, insert_user};
	use chrono::Duration;

	fn new_branch(repo_id: i64, name: &str) -> NewBranch {
		NewBranch {
			repo_id,
			name: name.to_string(),
			commit_id: "abc123".to_string(),
			commit_message: "initial".to_string(),
			pusher_id: 1,
			commit_time: Utc::now(),
		}
	}

	#[tokio::test]
	async fn test_add_duplicate_and_revive() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let branches = BranchRepository::new(pool);

		let created = branches.add_branch(&new_branch(repo_id, "main")).await.unwrap();
		let err = branches.add_branch(&new_branch(repo_id, "main")).await.unwrap_err();
		assert!(matches!(err, DbError::BranchAlreadyExists { .. }));
		assert!(err.is_conflict());

		branches.add_deleted_branch(repo_id, "main", alice).await.unwrap();
		assert!(branches.list_branches(repo_id, false).await.unwrap().is_empty());
		assert_eq!(branches.list_branches(repo_id, true).await.unwrap().len(), 1);

		let revived = branches.add_branch(&new_branch(repo_id, "main")).await.unwrap();
		assert_eq!(revived.id, created.id);
		assert!(!revived.is_deleted);
		assert!(revived.deleted_by_id.is_none());
	}

	#[tokio::test]
	async fn test_get_missing_branch() {
		let pool = create_test_pool().await;
		let branches = BranchRepository::new(pool);
		let err = branches.get_branch(1, "nope").await.unwrap_err();
		assert!(matches!(err, DbError::BranchNotExist { .. }));
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn test_remove_old_deleted_branches() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let branches = BranchRepository::new(pool);

		branches.add_branch(&new_branch(repo_id, "old")).await.unwrap();
		branches.add_deleted_branch(repo_id, "old", alice).await.unwrap();
		assert_eq!(
			branches
				.remove_old_deleted_branches(Utc::now() - Duration::days(1))
				.await
				.unwrap(),
			0
		);
		assert_eq!(
			branches
				.remove_old_deleted_branches(Utc::now() + Duration::seconds(1))
				.await
				.unwrap(),
			1
		);
		assert!(!branches.remove_deleted_branch_by_name(repo_id, "old").await.unwrap());
	}

	#[tokio::test]
	async fn test_rename_branch_updates_references() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let branches = BranchRepository::new(pool.clone());
		let rules = ProtectedBranchRepository::new(pool.clone());
		let pulls = PullRequestRepository::new(pool.clone());

		branches.add_branch(&new_branch(repo_id, "main")).await.unwrap();
		branches.add_branch(&new_branch(repo_id, "dev")).await.unwrap();
		rules.update_protect_branch(&ProtectedBranch::new(repo_id, "main")).await.unwrap();
		rules.update_protect_branch(&ProtectedBranch::new(repo_id, "ma*")).await.unwrap();
		let (_, pr) = pulls
			.new_pull_request(
				&NewIssueOptions::new(repo_id, alice, "dev into main"),
				&NewPullRequest {
					head_repo_id: Some(repo_id),
					head_branch: "dev".to_string(),
					base_branch: "main".to_string(),
					..Default::default()
				},
			)
			.await
			.unwrap();

		let err = branches.rename_branch(repo_id, "main", "dev").await.unwrap_err();
		assert!(matches!(err, DbError::BranchAlreadyExists { .. }));

		branches.rename_branch(repo_id, "main", "trunk").await.unwrap();
		assert!(branches.get_branch(repo_id, "main").await.is_err());
		assert_eq!(branches.get_branch(repo_id, "trunk").await.unwrap().name, "trunk");

		let repo = RepoRepository::new(pool.clone())
			.get_repository_by_id(repo_id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(repo.default_branch, "trunk");

		assert!(rules.get_protected_branch_rule_by_name(repo_id, "trunk").await.unwrap().is_some());
		assert!(rules.get_protected_branch_rule_by_name(repo_id, "ma*").await.unwrap().is_some());

		let pr = pulls.get_pull_request_by_id(pr.id).await.unwrap().unwrap();
		assert_eq!(pr.base_branch, "trunk");
		assert_eq!(pr.head_branch, "dev");
	}
}
