// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repositories, watches, stars and forks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{map_unique_violation, DbError, Result};
use crate::resource_index::{delete_resource_index, ResourceIndexKind};
use crate::team::add_team_repo;
use crate::types::{from_db_time, now_db_time, ListOptions};
use crate::user::{fetch_user, validate_repo_name, UserKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
	pub id: i64,
	pub owner_id: i64,
	pub owner_name: String,
	pub lower_name: String,
	pub name: String,
	pub description: String,
	pub default_branch: String,
	pub is_private: bool,
	pub is_fork: bool,
	pub fork_id: Option<i64>,
	pub is_archived: bool,
	pub num_watches: i64,
	pub num_stars: i64,
	pub num_forks: i64,
	pub num_issues: i64,
	pub num_closed_issues: i64,
	pub num_pulls: i64,
	pub num_closed_pulls: i64,
	pub num_milestones: i64,
	pub num_closed_milestones: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Repository {
	pub fn full_name(&self) -> String {
		format!("{}/{}", self.owner_name, self.name)
	}

	pub fn num_open_issues(&self) -> i64 {
		self.num_issues - self.num_closed_issues
	}

	pub fn num_open_pulls(&self) -> i64 {
		self.num_pulls - self.num_closed_pulls
	}
}

#[derive(Debug, Clone)]
pub struct NewRepository {
	pub name: String,
	pub description: String,
	pub default_branch: Option<String>,
	pub is_private: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryUpdate {
	pub description: Option<String>,
	pub is_private: Option<bool>,
	pub is_archived: Option<bool>,
	pub default_branch: Option<String>,
}

#[async_trait]
pub trait RepoStore: Send + Sync {
	async fn create_repository(
		&self,
		doer_id: i64,
		owner_id: i64,
		repo: &NewRepository,
	) -> Result<Repository>;
	async fn get_repository_by_id(&self, id: i64) -> Result<Option<Repository>>;
	async fn get_repository_by_name(&self, owner_name: &str, name: &str)
		-> Result<Option<Repository>>;
	async fn list_repositories_by_owner(
		&self,
		owner_id: i64,
		opts: &ListOptions,
	) -> Result<Vec<Repository>>;
	async fn update_repository(&self, id: i64, update: &RepositoryUpdate) -> Result<Repository>;
	async fn delete_repository(&self, id: i64) -> Result<()>;
	async fn watch_repo(&self, user_id: i64, repo_id: i64, watch: bool) -> Result<()>;
	async fn get_repo_watchers_ids(&self, repo_id: i64) -> Result<Vec<i64>>;
	async fn star_repo(&self, user_id: i64, repo_id: i64, star: bool) -> Result<()>;
	async fn fork_repository(
		&self,
		doer_id: i64,
		owner_id: i64,
		base_repo_id: i64,
		name: &str,
	) -> Result<Repository>;
	async fn update_repo_issue_numbers(&self, repo_id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct RepoRepository {
	pool: SqlitePool,
}

impl RepoRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Create a repository under `owner_id`. The creating user watches it.
	#[tracing::instrument(skip(self, repo), fields(doer_id, owner_id, name = %repo.name))]
	pub async fn create_repository(
		&self,
		doer_id: i64,
		owner_id: i64,
		repo: &NewRepository,
	) -> Result<Repository> {
		validate_repo_name(&repo.name)?;
		let mut tx = self.pool.begin().await?;
		let id = insert_repository(&mut *tx, doer_id, owner_id, repo, None).await?;
		let created = fetch_repository(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::debug!(repo_id = id, owner_id, "repository created");
		Ok(created)
	}

	#[tracing::instrument(skip(self), fields(repo_id = id))]
	pub async fn get_repository_by_id(&self, id: i64) -> Result<Option<Repository>> {
		let mut conn = self.pool.acquire().await?;
		get_repository_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(owner_name, name))]
	pub async fn get_repository_by_name(
		&self,
		owner_name: &str,
		name: &str,
	) -> Result<Option<Repository>> {
		let row = sqlx::query(&format!(
			r#"{SELECT_REPO}
			WHERE lower_name = ?
			AND owner_id = (SELECT id FROM users WHERE lower_name = ?)"#
		))
		.bind(name.to_lowercase())
		.bind(owner_name.to_lowercase())
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| row_to_repository(&r)).transpose()
	}

	#[tracing::instrument(skip(self, opts), fields(owner_id))]
	pub async fn list_repositories_by_owner(
		&self,
		owner_id: i64,
		opts: &ListOptions,
	) -> Result<Vec<Repository>> {
		let (limit, offset) = opts.limit_offset();
		let rows = sqlx::query(&format!(
			"{SELECT_REPO} WHERE owner_id = ? ORDER BY lower_name ASC LIMIT ? OFFSET ?"
		))
		.bind(owner_id)
		.bind(limit)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_repository).collect()
	}

	#[tracing::instrument(skip(self, update), fields(repo_id = id))]
	pub async fn update_repository(&self, id: i64, update: &RepositoryUpdate) -> Result<Repository> {
		let mut tx = self.pool.begin().await?;
		let mut repo = fetch_repository(&mut *tx, id).await?;
		if let Some(description) = &update.description {
			repo.description = description.clone();
		}
		if let Some(is_private) = update.is_private {
			repo.is_private = is_private;
		}
		if let Some(is_archived) = update.is_archived {
			repo.is_archived = is_archived;
		}
		if let Some(branch) = &update.default_branch {
			if branch.trim().is_empty() {
				return Err(DbError::InvalidInput(
					"default branch cannot be empty".to_string(),
				));
			}
			repo.default_branch = branch.clone();
		}

		sqlx::query(
			r#"
			UPDATE repos
			SET description = ?, is_private = ?, is_archived = ?, default_branch = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(&repo.description)
		.bind(repo.is_private)
		.bind(repo.is_archived)
		.bind(&repo.default_branch)
		.bind(now_db_time())
		.bind(id)
		.execute(&mut *tx)
		.await?;
		let repo = fetch_repository(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::debug!(repo_id = id, "repository updated");
		Ok(repo)
	}

	/// Delete a repository along with everything scoped to it.
	#[tracing::instrument(skip(self), fields(repo_id = id))]
	pub async fn delete_repository(&self, id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let repo = fetch_repository(&mut *tx, id).await?;

		let team_ids: Vec<i64> = sqlx::query_scalar("SELECT team_id FROM team_repos WHERE repo_id = ?")
			.bind(id)
			.fetch_all(&mut *tx)
			.await?;
		for team_id in team_ids {
			sqlx::query("UPDATE teams SET num_repos = num_repos - 1 WHERE id = ?")
				.bind(team_id)
				.execute(&mut *tx)
				.await?;
		}

		// Tables without a foreign key on repos.
		for table in [
			"team_repos",
			"labels",
			"webhooks",
			"hook_tasks",
			"commit_status_indexes",
			"notifications",
			"actions",
		] {
			sqlx::query(&format!("DELETE FROM {table} WHERE repo_id = ?"))
				.bind(id)
				.execute(&mut *tx)
				.await?;
		}
		delete_resource_index(&mut *tx, ResourceIndexKind::Issue, id).await?;

		sqlx::query("DELETE FROM repos WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("UPDATE users SET num_repos = num_repos - 1 WHERE id = ?")
			.bind(repo.owner_id)
			.execute(&mut *tx)
			.await?;
		if let Some(fork_id) = repo.fork_id {
			sqlx::query("UPDATE repos SET num_forks = num_forks - 1 WHERE id = ?")
				.bind(fork_id)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;

		tracing::debug!(repo_id = id, owner_id = repo.owner_id, "repository deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(user_id, repo_id, watch))]
	pub async fn watch_repo(&self, user_id: i64, repo_id: i64, watch: bool) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		watch_repo(&mut *tx, user_id, repo_id, watch).await?;
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn get_repo_watchers_ids(&self, repo_id: i64) -> Result<Vec<i64>> {
		let mut conn = self.pool.acquire().await?;
		get_repo_watchers_ids(&mut *conn, repo_id).await
	}

	#[tracing::instrument(skip(self), fields(user_id, repo_id, star))]
	pub async fn star_repo(&self, user_id: i64, repo_id: i64, star: bool) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let changed = if star {
			sqlx::query("INSERT OR IGNORE INTO stars (user_id, repo_id, created_at) VALUES (?, ?, ?)")
				.bind(user_id)
				.bind(repo_id)
				.bind(now_db_time())
				.execute(&mut *tx)
				.await?
				.rows_affected()
		} else {
			sqlx::query("DELETE FROM stars WHERE user_id = ? AND repo_id = ?")
				.bind(user_id)
				.bind(repo_id)
				.execute(&mut *tx)
				.await?
				.rows_affected()
		};
		if changed > 0 {
			let delta = if star { 1 } else { -1 };
			sqlx::query("UPDATE repos SET num_stars = num_stars + ? WHERE id = ?")
				.bind(delta)
				.bind(repo_id)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(doer_id, owner_id, base_repo_id, name))]
	pub async fn fork_repository(
		&self,
		doer_id: i64,
		owner_id: i64,
		base_repo_id: i64,
		name: &str,
	) -> Result<Repository> {
		validate_repo_name(name)?;
		let mut tx = self.pool.begin().await?;
		let base = fetch_repository(&mut *tx, base_repo_id).await?;
		let opts = NewRepository {
			name: name.to_string(),
			description: base.description.clone(),
			default_branch: Some(base.default_branch.clone()),
			is_private: base.is_private,
		};
		let id = insert_repository(&mut *tx, doer_id, owner_id, &opts, Some(base.id)).await?;
		sqlx::query("UPDATE repos SET num_forks = num_forks + 1 WHERE id = ?")
			.bind(base.id)
			.execute(&mut *tx)
			.await?;
		let fork = fetch_repository(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::debug!(repo_id = id, base_repo_id, "repository forked");
		Ok(fork)
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn update_repo_issue_numbers(&self, repo_id: i64) -> Result<()> {
		let mut conn = self.pool.acquire().await?;
		update_repo_issue_numbers(&mut *conn, repo_id).await
	}
}

#[async_trait]
impl RepoStore for RepoRepository {
	async fn create_repository(
		&self,
		doer_id: i64,
		owner_id: i64,
		repo: &NewRepository,
	) -> Result<Repository> {
		RepoRepository::create_repository(self, doer_id, owner_id, repo).await
	}

	async fn get_repository_by_id(&self, id: i64) -> Result<Option<Repository>> {
		RepoRepository::get_repository_by_id(self, id).await
	}

	async fn get_repository_by_name(
		&self,
		owner_name: &str,
		name: &str,
	) -> Result<Option<Repository>> {
		RepoRepository::get_repository_by_name(self, owner_name, name).await
	}

	async fn list_repositories_by_owner(
		&self,
		owner_id: i64,
		opts: &ListOptions,
	) -> Result<Vec<Repository>> {
		RepoRepository::list_repositories_by_owner(self, owner_id, opts).await
	}

	async fn update_repository(&self, id: i64, update: &RepositoryUpdate) -> Result<Repository> {
		RepoRepository::update_repository(self, id, update).await
	}

	async fn delete_repository(&self, id: i64) -> Result<()> {
		RepoRepository::delete_repository(self, id).await
	}

	async fn watch_repo(&self, user_id: i64, repo_id: i64, watch: bool) -> Result<()> {
		RepoRepository::watch_repo(self, user_id, repo_id, watch).await
	}

	async fn get_repo_watchers_ids(&self, repo_id: i64) -> Result<Vec<i64>> {
		RepoRepository::get_repo_watchers_ids(self, repo_id).await
	}

	async fn star_repo(&self, user_id: i64, repo_id: i64, star: bool) -> Result<()> {
		RepoRepository::star_repo(self, user_id, repo_id, star).await
	}

	async fn fork_repository(
		&self,
		doer_id: i64,
		owner_id: i64,
		base_repo_id: i64,
		name: &str,
	) -> Result<Repository> {
		RepoRepository::fork_repository(self, doer_id, owner_id, base_repo_id, name).await
	}

	async fn update_repo_issue_numbers(&self, repo_id: i64) -> Result<()> {
		RepoRepository::update_repo_issue_numbers(self, repo_id).await
	}
}

const SELECT_REPO: &str = r#"
	SELECT id, owner_id, owner_name, lower_name, name, description, default_branch, is_private,
		is_fork, fork_id, is_archived, num_watches, num_stars, num_forks, num_issues,
		num_closed_issues, num_pulls, num_closed_pulls, num_milestones, num_closed_milestones,
		created_at, updated_at
	FROM repos"#;

async fn insert_repository(
	conn: &mut SqliteConnection,
	doer_id: i64,
	owner_id: i64,
	repo: &NewRepository,
	fork_id: Option<i64>,
) -> Result<i64> {
	let owner = fetch_user(&mut *conn, owner_id).await?;
	let now = now_db_time();
	let result = sqlx::query(
		r#"
		INSERT INTO repos (owner_id, owner_name, lower_name, name, description, default_branch,
			is_private, is_fork, fork_id, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(owner_id)
	.bind(&owner.name)
	.bind(repo.name.to_lowercase())
	.bind(&repo.name)
	.bind(&repo.description)
	.bind(repo.default_branch.as_deref().unwrap_or("main"))
	.bind(repo.is_private)
	.bind(fork_id.is_some())
	.bind(fork_id)
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await
	.map_err(|e| {
		map_unique_violation(e, || DbError::RepoAlreadyExist {
			owner_id,
			name: repo.name.clone(),
		})
	})?;
	let repo_id = result.last_insert_rowid();

	sqlx::query("UPDATE users SET num_repos = num_repos + 1 WHERE id = ?")
		.bind(owner_id)
		.execute(&mut *conn)
		.await?;

	if owner.kind == UserKind::Organization {
		let team_ids: Vec<i64> = sqlx::query_scalar(
			"SELECT id FROM teams WHERE org_id = ? AND includes_all_repositories = 1",
		)
		.bind(owner_id)
		.fetch_all(&mut *conn)
		.await?;
		for team_id in team_ids {
			add_team_repo(&mut *conn, owner_id, team_id, repo_id).await?;
		}
	}

	watch_repo(&mut *conn, doer_id, repo_id, true).await?;
	Ok(repo_id)
}

pub(crate) async fn watch_repo(
	conn: &mut SqliteConnection,
	user_id: i64,
	repo_id: i64,
	watch: bool,
) -> Result<()> {
	let changed = if watch {
		sqlx::query("INSERT OR IGNORE INTO watches (user_id, repo_id, created_at) VALUES (?, ?, ?)")
			.bind(user_id)
			.bind(repo_id)
			.bind(now_db_time())
			.execute(&mut *conn)
			.await?
			.rows_affected()
	} else {
		sqlx::query("DELETE FROM watches WHERE user_id = ? AND repo_id = ?")
			.bind(user_id)
			.bind(repo_id)
			.execute(&mut *conn)
			.await?
			.rows_affected()
	};
	if changed > 0 {
		let delta = if watch { 1 } else { -1 };
		sqlx::query("UPDATE repos SET num_watches = num_watches + ? WHERE id = ?")
			.bind(delta)
			.bind(repo_id)
			.execute(&mut *conn)
			.await?;
	}
	Ok(())
}

pub(crate) async fn get_repo_watchers_ids(
	conn: &mut SqliteConnection,
	repo_id: i64,
) -> Result<Vec<i64>> {
	let ids = sqlx::query_scalar("SELECT user_id FROM watches WHERE repo_id = ? ORDER BY user_id")
		.bind(repo_id)
		.fetch_all(&mut *conn)
		.await?;
	Ok(ids)
}

pub(crate) async fn update_repo_issue_numbers(conn: &mut SqliteConnection, repo_id: i64) -> Result<()> {
	sqlx::query(
		r#"
		UPDATE repos SET
			num_issues = (SELECT COUNT(*) FROM issues WHERE repo_id = ?1 AND is_pull = 0),
			num_closed_issues = (SELECT COUNT(*) FROM issues WHERE repo_id = ?1 AND is_pull = 0 AND is_closed = 1),
			num_pulls = (SELECT COUNT(*) FROM issues WHERE repo_id = ?1 AND is_pull = 1),
			num_closed_pulls = (SELECT COUNT(*) FROM issues WHERE repo_id = ?1 AND is_pull = 1 AND is_closed = 1)
		WHERE id = ?1
		"#,
	)
	.bind(repo_id)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

pub(crate) async fn update_repo_milestone_numbers(
	conn: &mut SqliteConnection,
	repo_id: i64,
) -> Result<()> {
	sqlx::query(
		r#"
		UPDATE repos SET
			num_milestones = (SELECT COUNT(*) FROM milestones WHERE repo_id = ?1),
			num_closed_milestones = (SELECT COUNT(*) FROM milestones WHERE repo_id = ?1 AND is_closed = 1)
		WHERE id = ?1
		"#,
	)
	.bind(repo_id)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

pub(crate) async fn get_repository_by_id(
	conn: &mut SqliteConnection,
	id: i64,
) -> Result<Option<Repository>> {
	let row = sqlx::query(&format!("{SELECT_REPO} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_repository(&r)).transpose()
}

pub(crate) async fn fetch_repository(conn: &mut SqliteConnection, id: i64) -> Result<Repository> {
	get_repository_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("repository {id}")))
}

fn row_to_repository(row: &SqliteRow) -> Result<Repository> {
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Repository {
		id: row.get("id"),
		owner_id: row.get("owner_id"),
		owner_name: row.get("owner_name"),
		lower_name: row.get("lower_name"),
		name: row.get("name"),
		description: row.get("description"),
		default_branch: row.get("default_branch"),
		is_private: row.get("is_private"),
		is_fork: row.get("is_fork"),
		fork_id: row.get("fork_id"),
		is_archived: row.get("is_archived"),
		num_watches: row.get("num_watches"),
		num_stars: row.get("num_stars"),
		num_forks: row.get("num_forks"),
		num_issues: row.get("num_issues"),
		num_closed_issues: row.get("num_closed_issues"),
		num_pulls: row.get("num_pulls"),
		num_closed_pulls: row.get("num_closed_pulls"),
		num_milestones: row.get("num_milestones"),
		num_closed_milestones: row.get("num_closed_milestones"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}
