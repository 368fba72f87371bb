// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Organization teams, their members and the repositories they can reach.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{map_unique_violation, DbError, Result};
use crate::locked_resource::get_locked_resource;
use crate::org::{add_org_user, ORG_OWNERS_LOCK};
use crate::types::AccessMode;

pub const OWNER_TEAM_NAME: &str = "Owners";

const MAX_TEAM_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
	pub id: i64,
	pub org_id: i64,
	pub lower_name: String,
	pub name: String,
	pub description: String,
	pub authorize: AccessMode,
	pub num_repos: i64,
	pub num_members: i64,
	pub includes_all_repositories: bool,
	pub can_create_org_repo: bool,
}

impl Team {
	pub fn is_owner_team(&self) -> bool {
		self.lower_name == OWNER_TEAM_NAME.to_lowercase()
	}
}

#[derive(Debug, Clone)]
pub struct NewTeam {
	pub org_id: i64,
	pub name: String,
	pub description: String,
	pub authorize: AccessMode,
	pub includes_all_repositories: bool,
	pub can_create_org_repo: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TeamUpdate {
	pub name: Option<String>,
	pub description: Option<String>,
	pub authorize: Option<AccessMode>,
	pub includes_all_repositories: Option<bool>,
	pub can_create_org_repo: Option<bool>,
}

fn validate_team_name(name: &str) -> Result<()> {
	let valid = !name.is_empty()
		&& name.len() <= MAX_TEAM_NAME_LEN
		&& name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
	if !valid {
		return Err(DbError::InvalidName(name.to_string()));
	}
	Ok(())
}

#[async_trait]
pub trait TeamStore: Send + Sync {
	async fn new_team(&self, team: &NewTeam) -> Result<Team>;
	async fn get_team(&self, org_id: i64, name: &str) -> Result<Option<Team>>;
	async fn get_team_by_id(&self, id: i64) -> Result<Option<Team>>;
	async fn get_owner_team(&self, org_id: i64) -> Result<Option<Team>>;
	async fn list_org_teams(&self, org_id: i64) -> Result<Vec<Team>>;
	async fn list_user_org_teams(&self, org_id: i64, user_id: i64) -> Result<Vec<Team>>;
	async fn update_team(&self, team_id: i64, update: &TeamUpdate) -> Result<Team>;
	async fn delete_team(&self, team_id: i64) -> Result<()>;
	async fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<()>;
	async fn remove_team_member(&self, team_id: i64, user_id: i64) -> Result<()>;
	async fn is_team_member(&self, org_id: i64, team_id: i64, user_id: i64) -> Result<bool>;
	async fn list_team_members(&self, team_id: i64) -> Result<Vec<i64>>;
	async fn add_team_repository(&self, team_id: i64, repo_id: i64) -> Result<()>;
	async fn remove_team_repository(&self, team_id: i64, repo_id: i64) -> Result<()>;
	async fn has_team_repo(&self, org_id: i64, team_id: i64, repo_id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct TeamRepository {
	pool: SqlitePool,
}

impl TeamRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, team), fields(org_id = team.org_id, name = %team.name))]
	pub async fn new_team(&self, team: &NewTeam) -> Result<Team> {
		validate_team_name(&team.name)?;
		let mut tx = self.pool.begin().await?;
		let created = insert_team(&mut *tx, team).await?;
		tx.commit().await?;
		tracing::debug!(team_id = created.id, org_id = created.org_id, "team created");
		Ok(created)
	}

	#[tracing::instrument(skip(self), fields(org_id, name))]
	pub async fn get_team(&self, org_id: i64, name: &str) -> Result<Option<Team>> {
		let mut conn = self.pool.acquire().await?;
		get_team(&mut *conn, org_id, name).await
	}

	#[tracing::instrument(skip(self), fields(team_id = id))]
	pub async fn get_team_by_id(&self, id: i64) -> Result<Option<Team>> {
		let mut conn = self.pool.acquire().await?;
		get_team_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(org_id))]
	pub async fn get_owner_team(&self, org_id: i64) -> Result<Option<Team>> {
		self.get_team(org_id, OWNER_TEAM_NAME).await
	}

	#[tracing::instrument(skip(self), fields(org_id))]
	pub async fn list_org_teams(&self, org_id: i64) -> Result<Vec<Team>> {
		let rows = sqlx::query(&format!(
			"{SELECT_TEAM} WHERE org_id = ? ORDER BY lower_name ASC"
		))
		.bind(org_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.iter().map(row_to_team).collect())
	}

	#[tracing::instrument(skip(self), fields(org_id, user_id))]
	pub async fn list_user_org_teams(&self, org_id: i64, user_id: i64) -> Result<Vec<Team>> {
		let mut conn = self.pool.acquire().await?;
		list_user_org_teams(&mut *conn, org_id, user_id).await
	}

	#[tracing::instrument(skip(self, update), fields(team_id))]
	pub async fn update_team(&self, team_id: i64, update: &TeamUpdate) -> Result<Team> {
		let mut tx = self.pool.begin().await?;
		let mut team = get_team_by_id(&mut *tx, team_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("team {team_id}")))?;

		if let Some(name) = &update.name {
			if team.is_owner_team() && !name.eq_ignore_ascii_case(&team.name) {
				return Err(DbError::InvalidInput(
					"the owners team cannot be renamed".to_string(),
				));
			}
			validate_team_name(name)?;
			team.name = name.clone();
			team.lower_name = name.to_lowercase();
		}
		if let Some(authorize) = update.authorize {
			if team.is_owner_team() && authorize != AccessMode::Owner {
				return Err(DbError::InvalidInput(
					"the owners team permission cannot be changed".to_string(),
				));
			}
			team.authorize = authorize;
		}
		if let Some(description) = &update.description {
			team.description = description.clone();
		}
		if let Some(can_create) = update.can_create_org_repo {
			team.can_create_org_repo = can_create;
		}
		let attach_all =
			update.includes_all_repositories == Some(true) && !team.includes_all_repositories;
		if let Some(all) = update.includes_all_repositories {
			team.includes_all_repositories = all;
		}

		sqlx::query(
			r#"
			UPDATE teams
			SET name = ?, lower_name = ?, description = ?, authorize = ?,
				includes_all_repositories = ?, can_create_org_repo = ?
			WHERE id = ?
			"#,
		)
		.bind(&team.name)
		.bind(&team.lower_name)
		.bind(&team.description)
		.bind(team.authorize.as_i64())
		.bind(team.includes_all_repositories)
		.bind(team.can_create_org_repo)
		.bind(team_id)
		.execute(&mut *tx)
		.await
		.map_err(|e| {
			map_unique_violation(e, || DbError::TeamAlreadyExist {
				org_id: team.org_id,
				name: team.name.clone(),
			})
		})?;

		if attach_all {
			attach_all_org_repos(&mut *tx, team.org_id, team_id).await?;
		}
		let team = get_team_by_id(&mut *tx, team_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("team {team_id}")))?;
		tx.commit().await?;

		tracing::debug!(team_id, "team updated");
		Ok(team)
	}

	#[tracing::instrument(skip(self), fields(team_id))]
	pub async fn delete_team(&self, team_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let team = get_team_by_id(&mut *tx, team_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("team {team_id}")))?;
		if team.is_owner_team() {
			return Err(DbError::InvalidInput(
				"the owners team cannot be deleted".to_string(),
			));
		}

		sqlx::query("DELETE FROM team_users WHERE team_id = ?")
			.bind(team_id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM team_repos WHERE team_id = ?")
			.bind(team_id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM teams WHERE id = ?")
			.bind(team_id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("UPDATE users SET num_teams = num_teams - 1 WHERE id = ?")
			.bind(team.org_id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::debug!(team_id, org_id = team.org_id, "team deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(team_id, user_id))]
	pub async fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let team = get_team_by_id(&mut *tx, team_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("team {team_id}")))?;
		add_team_member(&mut *tx, &team, user_id).await?;
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(team_id, user_id))]
	pub async fn remove_team_member(&self, team_id: i64, user_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let team = get_team_by_id(&mut *tx, team_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("team {team_id}")))?;
		if team.is_owner_team() {
			get_locked_resource(&mut *tx, ORG_OWNERS_LOCK, team.org_id).await?;
			let members = count_team_members(&mut *tx, team_id).await?;
			if members <= 1 && is_team_member(&mut *tx, team_id, user_id).await? {
				return Err(DbError::LastOrgOwner {
					org_id: team.org_id,
					user_id,
				});
			}
		}
		remove_team_member(&mut *tx, team_id, user_id).await?;
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(org_id, team_id, user_id))]
	pub async fn is_team_member(&self, org_id: i64, team_id: i64, user_id: i64) -> Result<bool> {
		let count: i64 = sqlx::query_scalar(
			"SELECT COUNT(*) FROM team_users WHERE org_id = ? AND team_id = ? AND user_id = ?",
		)
		.bind(org_id)
		.bind(team_id)
		.bind(user_id)
		.fetch_one(&self.pool)
		.await?;
		Ok(count > 0)
	}

	#[tracing::instrument(skip(self), fields(team_id))]
	pub async fn list_team_members(&self, team_id: i64) -> Result<Vec<i64>> {
		let ids = sqlx::query_scalar(
			"SELECT user_id FROM team_users WHERE team_id = ? ORDER BY user_id ASC",
		)
		.bind(team_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(ids)
	}

	#[tracing::instrument(skip(self), fields(team_id, repo_id))]
	pub async fn add_team_repository(&self, team_id: i64, repo_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let team = get_team_by_id(&mut *tx, team_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("team {team_id}")))?;
		let owner_id: Option<i64> = sqlx::query_scalar("SELECT owner_id FROM repos WHERE id = ?")
			.bind(repo_id)
			.fetch_optional(&mut *tx)
			.await?;
		match owner_id {
			None => return Err(DbError::NotFound(format!("repository {repo_id}"))),
			Some(owner_id) if owner_id != team.org_id => {
				return Err(DbError::InvalidInput(format!(
					"repository {repo_id} does not belong to organization {}",
					team.org_id
				)))
			}
			Some(_) => {}
		}
		add_team_repo(&mut *tx, team.org_id, team_id, repo_id).await?;
		tx.commit().await?;
		tracing::debug!(team_id, repo_id, "repository added to team");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(team_id, repo_id))]
	pub async fn remove_team_repository(&self, team_id: i64, repo_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let removed = sqlx::query("DELETE FROM team_repos WHERE team_id = ? AND repo_id = ?")
			.bind(team_id)
			.bind(repo_id)
			.execute(&mut *tx)
			.await?;
		if removed.rows_affected() > 0 {
			sqlx::query("UPDATE teams SET num_repos = num_repos - 1 WHERE id = ?")
				.bind(team_id)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(org_id, team_id, repo_id))]
	pub async fn has_team_repo(&self, org_id: i64, team_id: i64, repo_id: i64) -> Result<bool> {
		let count: i64 = sqlx::query_scalar(
			"SELECT COUNT(*) FROM team_repos WHERE org_id = ? AND team_id = ? AND repo_id = ?",
		)
		.bind(org_id)
		.bind(team_id)
		.bind(repo_id)
		.fetch_one(&self.pool)
		.await?;
		Ok(count > 0)
	}
}

#[async_trait]
impl TeamStore for TeamRepository {
	async fn new_team(&self, team: &NewTeam) -> Result<Team> {
		TeamRepository::new_team(self, team).await
	}

	async fn get_team(&self, org_id: i64, name: &str) -> Result<Option<Team>> {
		TeamRepository::get_team(self, org_id, name).await
	}

	async fn get_team_by_id(&self, id: i64) -> Result<Option<Team>> {
		TeamRepository::get_team_by_id(self, id).await
	}

	async fn get_owner_team(&self, org_id: i64) -> Result<Option<Team>> {
		TeamRepository::get_owner_team(self, org_id).await
	}

	async fn list_org_teams(&self, org_id: i64) -> Result<Vec<Team>> {
		TeamRepository::list_org_teams(self, org_id).await
	}

	async fn list_user_org_teams(&self, org_id: i64, user_id: i64) -> Result<Vec<Team>> {
		TeamRepository::list_user_org_teams(self, org_id, user_id).await
	}

	async fn update_team(&self, team_id: i64, update: &TeamUpdate) -> Result<Team> {
		TeamRepository::update_team(self, team_id, update).await
	}

	async fn delete_team(&self, team_id: i64) -> Result<()> {
		TeamRepository::delete_team(self, team_id).await
	}

	async fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<()> {
		TeamRepository::add_team_member(self, team_id, user_id).await
	}

	async fn remove_team_member(&self, team_id: i64, user_id: i64) -> Result<()> {
		TeamRepository::remove_team_member(self, team_id, user_id).await
	}

	async fn is_team_member(&self, org_id: i64, team_id: i64, user_id: i64) -> Result<bool> {
		TeamRepository::is_team_member(self, org_id, team_id, user_id).await
	}

	async fn list_team_members(&self, team_id: i64) -> Result<Vec<i64>> {
		TeamRepository::list_team_members(self, team_id).await
	}

	async fn add_team_repository(&self, team_id: i64, repo_id: i64) -> Result<()> {
		TeamRepository::add_team_repository(self, team_id, repo_id).await
	}

	async fn remove_team_repository(&self, team_id: i64, repo_id: i64) -> Result<()> {
		TeamRepository::remove_team_repository(self, team_id, repo_id).await
	}

	async fn has_team_repo(&self, org_id: i64, team_id: i64, repo_id: i64) -> Result<bool> {
		TeamRepository::has_team_repo(self, org_id, team_id, repo_id).await
	}
}

const SELECT_TEAM: &str = r#"
	SELECT id, org_id, lower_name, name, description, authorize, num_repos, num_members,
		includes_all_repositories, can_create_org_repo
	FROM teams"#;

/// Insert a team, bump the org's team count and, when asked, attach every
/// repository the org owns.
pub(crate) async fn insert_team(conn: &mut SqliteConnection, team: &NewTeam) -> Result<Team> {
	let result = sqlx::query(
		r#"
		INSERT INTO teams (org_id, lower_name, name, description, authorize,
			includes_all_repositories, can_create_org_repo)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(team.org_id)
	.bind(team.name.to_lowercase())
	.bind(&team.name)
	.bind(&team.description)
	.bind(team.authorize.as_i64())
	.bind(team.includes_all_repositories)
	.bind(team.can_create_org_repo)
	.execute(&mut *conn)
	.await
	.map_err(|e| {
		map_unique_violation(e, || DbError::TeamAlreadyExist {
			org_id: team.org_id,
			name: team.name.clone(),
		})
	})?;
	let team_id = result.last_insert_rowid();

	sqlx::query("UPDATE users SET num_teams = num_teams + 1 WHERE id = ?")
		.bind(team.org_id)
		.execute(&mut *conn)
		.await?;
	if team.includes_all_repositories {
		attach_all_org_repos(&mut *conn, team.org_id, team_id).await?;
	}

	get_team_by_id(&mut *conn, team_id)
		.await?
		.ok_or_else(|| DbError::Internal(format!("team {team_id} vanished after insert")))
}

async fn attach_all_org_repos(conn: &mut SqliteConnection, org_id: i64, team_id: i64) -> Result<()> {
	let repo_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM repos WHERE owner_id = ?")
		.bind(org_id)
		.fetch_all(&mut *conn)
		.await?;
	for repo_id in repo_ids {
		add_team_repo(&mut *conn, org_id, team_id, repo_id).await?;
	}
	Ok(())
}

pub(crate) async fn add_team_repo(
	conn: &mut SqliteConnection,
	org_id: i64,
	team_id: i64,
	repo_id: i64,
) -> Result<()> {
	let inserted = sqlx::query(
		"INSERT OR IGNORE INTO team_repos (org_id, team_id, repo_id) VALUES (?, ?, ?)",
	)
	.bind(org_id)
	.bind(team_id)
	.bind(repo_id)
	.execute(&mut *conn)
	.await?;
	if inserted.rows_affected() > 0 {
		sqlx::query("UPDATE teams SET num_repos = num_repos + 1 WHERE id = ?")
			.bind(team_id)
			.execute(&mut *conn)
			.await?;
	}
	Ok(())
}

/// Add a user to a team, joining them to the org first when needed.
pub(crate) async fn add_team_member(
	conn: &mut SqliteConnection,
	team: &Team,
	user_id: i64,
) -> Result<()> {
	add_org_user(&mut *conn, team.org_id, user_id).await?;
	let inserted = sqlx::query(
		"INSERT OR IGNORE INTO team_users (org_id, team_id, user_id) VALUES (?, ?, ?)",
	)
	.bind(team.org_id)
	.bind(team.id)
	.bind(user_id)
	.execute(&mut *conn)
	.await?;
	if inserted.rows_affected() > 0 {
		sqlx::query("UPDATE teams SET num_members = num_members + 1 WHERE id = ?")
			.bind(team.id)
			.execute(&mut *conn)
			.await?;
		tracing::debug!(team_id = team.id, user_id, "team member added");
	}
	Ok(())
}

pub(crate) async fn remove_team_member(
	conn: &mut SqliteConnection,
	team_id: i64,
	user_id: i64,
) -> Result<()> {
	let removed = sqlx::query("DELETE FROM team_users WHERE team_id = ? AND user_id = ?")
		.bind(team_id)
		.bind(user_id)
		.execute(&mut *conn)
		.await?;
	if removed.rows_affected() > 0 {
		sqlx::query("UPDATE teams SET num_members = num_members - 1 WHERE id = ?")
			.bind(team_id)
			.execute(&mut *conn)
			.await?;
		tracing::debug!(team_id, user_id, "team member removed");
	}
	Ok(())
}

pub(crate) async fn is_team_member(
	conn: &mut SqliteConnection,
	team_id: i64,
	user_id: i64,
) -> Result<bool> {
	let count: i64 =
		sqlx::query_scalar("SELECT COUNT(*) FROM team_users WHERE team_id = ? AND user_id = ?")
			.bind(team_id)
			.bind(user_id)
			.fetch_one(&mut *conn)
			.await?;
	Ok(count > 0)
}

pub(crate) async fn count_team_members(conn: &mut SqliteConnection, team_id: i64) -> Result<i64> {
	let count = sqlx::query_scalar("SELECT COUNT(*) FROM team_users WHERE team_id = ?")
		.bind(team_id)
		.fetch_one(&mut *conn)
		.await?;
	Ok(count)
}

pub(crate) async fn get_team(
	conn: &mut SqliteConnection,
	org_id: i64,
	name: &str,
) -> Result<Option<Team>> {
	let row = sqlx::query(&format!("{SELECT_TEAM} WHERE org_id = ? AND lower_name = ?"))
		.bind(org_id)
		.bind(name.to_lowercase())
		.fetch_optional(&mut *conn)
		.await?;
	Ok(row.as_ref().map(row_to_team))
}

pub(crate) async fn get_team_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Team>> {
	let row = sqlx::query(&format!("{SELECT_TEAM} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	Ok(row.as_ref().map(row_to_team))
}

pub(crate) async fn list_user_org_teams(
	conn: &mut SqliteConnection,
	org_id: i64,
	user_id: i64,
) -> Result<Vec<Team>> {
	let rows = sqlx::query(&format!(
		r#"{SELECT_TEAM}
		WHERE org_id = ? AND id IN (SELECT team_id FROM team_users WHERE user_id = ?)
		ORDER BY lower_name ASC"#
	))
	.bind(org_id)
	.bind(user_id)
	.fetch_all(&mut *conn)
	.await?;
	Ok(rows.iter().map(row_to_team).collect())
}

fn row_to_team(row: &SqliteRow) -> Team {
	Team {
		id: row.get("id"),
		org_id: row.get("org_id"),
		lower_name: row.get("lower_name"),
		name: row.get("name"),
		description: row.get("description"),
		authorize: AccessMode::from_i64(row.get("authorize")),
		num_repos: row.get("num_repos"),
		num_members: row.get("num_members"),
		includes_all_repositories: row.get("includes_all_repositories"),
		can_create_org_repo: row.get("can_create_org_repo"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_pool, insert_org, insert_repo, insert_user};

	fn new_team(org_id: i64, name: &str) -> NewTeam {
		NewTeam {
			org_id,
			name: name.to_string(),
			description: String::new(),
			authorize: AccessMode::Write,
			includes_all_repositories: false,
			can_create_org_repo: false,
		}
	}

	#[tokio::test]
	async fn test_new_team_unique_per_org() {
		let pool = create_test_pool().await;
		let org = insert_org(&pool, "acme").await;
		let repo = TeamRepository::new(pool.clone());

		let team = repo.new_team(&new_team(org, "Devs")).await.unwrap();
		assert_eq!(team.lower_name, "devs");

		let err = repo.new_team(&new_team(org, "DEVS")).await.unwrap_err();
		assert!(matches!(err, DbError::TeamAlreadyExist { .. }));

		let num_teams: i64 = sqlx::query_scalar("SELECT num_teams FROM users WHERE id = ?")
			.bind(org)
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(num_teams, 1);
	}

	#[tokio::test]
	async fn test_team_includes_all_repositories() {
		let pool = create_test_pool().await;
		let org = insert_org(&pool, "acme").await;
		let r1 = insert_repo(&pool, org, "one", false).await;
		let r2 = insert_repo(&pool, org, "two", true).await;
		let repo = TeamRepository::new(pool.clone());

		let mut opts = new_team(org, "all");
		opts.includes_all_repositories = true;
		let team = repo.new_team(&opts).await.unwrap();
		assert_eq!(team.num_repos, 2);
		assert!(repo.has_team_repo(org, team.id, r1).await.unwrap());
		assert!(repo.has_team_repo(org, team.id, r2).await.unwrap());
	}

	#[tokio::test]
	async fn test_members_join_org() {
		let pool = create_test_pool().await;
		let org = insert_org(&pool, "acme").await;
		let alice = insert_user(&pool, "alice").await;
		let repo = TeamRepository::new(pool.clone());
		let team = repo.new_team(&new_team(org, "devs")).await.unwrap();

		repo.add_team_member(team.id, alice).await.unwrap();
		repo.add_team_member(team.id, alice).await.unwrap();

		let team = repo.get_team_by_id(team.id).await.unwrap().unwrap();
		assert_eq!(team.num_members, 1);
		assert!(repo.is_team_member(org, team.id, alice).await.unwrap());

		let in_org: i64 =
			sqlx::query_scalar("SELECT COUNT(*) FROM org_users WHERE org_id = ? AND user_id = ?")
				.bind(org)
				.bind(alice)
				.fetch_one(&pool)
				.await
				.unwrap();
		assert_eq!(in_org, 1);

		repo.remove_team_member(team.id, alice).await.unwrap();
		let team = repo.get_team_by_id(team.id).await.unwrap().unwrap();
		assert_eq!(team.num_members, 0);
	}

	#[tokio::test]
	async fn test_owner_team_is_protected() {
		let pool = create_test_pool().await;
		let org = insert_org(&pool, "acme").await;
		let alice = insert_user(&pool, "alice").await;
		let repo = TeamRepository::new(pool.clone());
		let mut opts = new_team(org, OWNER_TEAM_NAME);
		opts.authorize = AccessMode::Owner;
		let owners = repo.new_team(&opts).await.unwrap();
		repo.add_team_member(owners.id, alice).await.unwrap();

		let rename = TeamUpdate {
			name: Some("bosses".to_string()),
			..Default::default()
		};
		assert!(repo
			.update_team(owners.id, &rename)
			.await
			.unwrap_err()
			.is_invalid_input());
		assert!(repo.delete_team(owners.id).await.unwrap_err().is_invalid_input());
		assert!(repo
			.remove_team_member(owners.id, alice)
			.await
			.unwrap_err()
			.is_last_org_owner());
	}

	#[tokio::test]
	async fn test_team_repository_must_belong_to_org() {
		let pool = create_test_pool().await;
		let org = insert_org(&pool, "acme").await;
		let bob = insert_user(&pool, "bob").await;
		let foreign = insert_repo(&pool, bob, "mine", false).await;
		let own = insert_repo(&pool, org, "ours", false).await;
		let repo = TeamRepository::new(pool.clone());
		let team = repo.new_team(&new_team(org, "devs")).await.unwrap();

		assert!(repo
			.add_team_repository(team.id, foreign)
			.await
			.unwrap_err()
			.is_invalid_input());

		repo.add_team_repository(team.id, own).await.unwrap();
		repo.add_team_repository(team.id, own).await.unwrap();
		assert_eq!(repo.get_team_by_id(team.id).await.unwrap().unwrap().num_repos, 1);

		repo.remove_team_repository(team.id, own).await.unwrap();
		assert_eq!(repo.get_team_by_id(team.id).await.unwrap().unwrap().num_repos, 0);
	}

	#[tokio::test]
	async fn test_delete_team_decrements_org() {
		let pool = create_test_pool().await;
		let org = insert_org(&pool, "acme").await;
		let repo = TeamRepository::new(pool.clone());
		let team = repo.new_team(&new_team(org, "devs")).await.unwrap();
		repo.delete_team(team.id).await.unwrap();

		assert!(repo.get_team_by_id(team.id).await.unwrap().is_none());
		let num_teams: i64 = sqlx::query_scalar("SELECT num_teams FROM users WHERE id = ?")
			.bind(org)
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(num_teams, 0);
	}
}
