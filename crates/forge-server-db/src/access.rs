// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Effective repository permissions and collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool},
	Row,
};

use crate::error::{DbError, Result};
use crate::repo::{fetch_repository, Repository};
use crate::types::{now_db_time, AccessMode};
use crate::user::{get_user_by_id, UserKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
	pub user_id: i64,
	pub repo_id: i64,
	pub mode: AccessMode,
}

#[async_trait]
pub trait AccessStore: Send + Sync {
	async fn access_mode(&self, user_id: Option<i64>, repo_id: i64) -> Result<AccessMode>;
	async fn has_access(&self, user_id: Option<i64>, repo_id: i64, min_mode: AccessMode)
		-> Result<bool>;
	async fn add_collaborator(&self, repo_id: i64, user_id: i64, mode: AccessMode) -> Result<()>;
	async fn remove_collaborator(&self, repo_id: i64, user_id: i64) -> Result<bool>;
	async fn list_collaborators(&self, repo_id: i64) -> Result<Vec<Collaborator>>;
}

#[derive(Clone)]
pub struct AccessRepository {
	pool: SqlitePool,
}

impl AccessRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self), fields(user_id, repo_id))]
	pub async fn access_mode(&self, user_id: Option<i64>, repo_id: i64) -> Result<AccessMode> {
		let mut conn = self.pool.acquire().await?;
		let repo = fetch_repository(&mut *conn, repo_id).await?;
		access_mode(&mut *conn, user_id, &repo).await
	}

	#[tracing::instrument(skip(self), fields(user_id, repo_id, min_mode = min_mode.as_str()))]
	pub async fn has_access(
		&self,
		user_id: Option<i64>,
		repo_id: i64,
		min_mode: AccessMode,
	) -> Result<bool> {
		Ok(self.access_mode(user_id, repo_id).await? >= min_mode)
	}

	#[tracing::instrument(skip(self), fields(repo_id, user_id, mode = mode.as_str()))]
	pub async fn add_collaborator(&self, repo_id: i64, user_id: i64, mode: AccessMode) -> Result<()> {
		if mode == AccessMode::None || mode == AccessMode::Owner {
			return Err(DbError::InvalidInput(format!(
				"collaborator mode cannot be {}",
				mode.as_str()
			)));
		}
		sqlx::query(
			r#"
			INSERT INTO collaborations (repo_id, user_id, mode, created_at)
			VALUES (?, ?, ?, ?)
			ON CONFLICT(repo_id, user_id) DO UPDATE SET mode = excluded.mode
			"#,
		)
		.bind(repo_id)
		.bind(user_id)
		.bind(mode.as_i64())
		.bind(now_db_time())
		.execute(&self.pool)
		.await?;
		tracing::debug!(repo_id, user_id, "collaborator set");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(repo_id, user_id))]
	pub async fn remove_collaborator(&self, repo_id: i64, user_id: i64) -> Result<bool> {
		let result = sqlx::query("DELETE FROM collaborations WHERE repo_id = ? AND user_id = ?")
			.bind(repo_id)
			.bind(user_id)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn list_collaborators(&self, repo_id: i64) -> Result<Vec<Collaborator>> {
		let rows = sqlx::query(
			"SELECT user_id, repo_id, mode FROM collaborations WHERE repo_id = ? ORDER BY user_id",
		)
		.bind(repo_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows
			.iter()
			.map(|row| Collaborator {
				user_id: row.get("user_id"),
				repo_id: row.get("repo_id"),
				mode: AccessMode::from_i64(row.get("mode")),
			})
			.collect())
	}
}

#[async_trait]
impl AccessStore for AccessRepository {
	async fn access_mode(&self, user_id: Option<i64>, repo_id: i64) -> Result<AccessMode> {
		AccessRepository::access_mode(self, user_id, repo_id).await
	}

	async fn has_access(
		&self,
		user_id: Option<i64>,
		repo_id: i64,
		min_mode: AccessMode,
	) -> Result<bool> {
		AccessRepository::has_access(self, user_id, repo_id, min_mode).await
	}

	async fn add_collaborator(&self, repo_id: i64, user_id: i64, mode: AccessMode) -> Result<()> {
		AccessRepository::add_collaborator(self, repo_id, user_id, mode).await
	}

	async fn remove_collaborator(&self, repo_id: i64, user_id: i64) -> Result<bool> {
		AccessRepository::remove_collaborator(self, repo_id, user_id).await
	}

	async fn list_collaborators(&self, repo_id: i64) -> Result<Vec<Collaborator>> {
		AccessRepository::list_collaborators(self, repo_id).await
	}
}

/// Resolve the effective permission of `user_id` on `repo`. `None` is an
/// anonymous visitor.
pub(crate) async fn access_mode(
	conn: &mut SqliteConnection,
	user_id: Option<i64>,
	repo: &Repository,
) -> Result<AccessMode> {
	let fallback = if repo.is_private {
		AccessMode::None
	} else {
		AccessMode::Read
	};
	let Some(user_id) = user_id else {
		return Ok(fallback);
	};
	if user_id == repo.owner_id {
		return Ok(AccessMode::Owner);
	}
	let Some(user) = get_user_by_id(&mut *conn, user_id).await? else {
		return Ok(fallback);
	};
	if user.is_admin {
		return Ok(AccessMode::Owner);
	}

	let mut mode = fallback;

	let collaboration: Option<i64> =
		sqlx::query_scalar("SELECT mode FROM collaborations WHERE repo_id = ? AND user_id = ?")
			.bind(repo.id)
			.bind(user_id)
			.fetch_optional(&mut *conn)
			.await?;
	if let Some(collab) = collaboration {
		mode = mode.max(AccessMode::from_i64(collab));
	}

	let owner_kind: Option<i64> = sqlx::query_scalar("SELECT kind FROM users WHERE id = ?")
		.bind(repo.owner_id)
		.fetch_optional(&mut *conn)
		.await?;
	if owner_kind.map(UserKind::from_i64) == Some(UserKind::Organization) {
		let team_mode: Option<i64> = sqlx::query_scalar(
			r#"
			SELECT MAX(t.authorize)
			FROM teams t
			JOIN team_users tu ON tu.team_id = t.id
			WHERE t.org_id = ?1 AND tu.user_id = ?2
			AND (
				t.includes_all_repositories = 1
				OR EXISTS (SELECT 1 FROM team_repos tr WHERE tr.team_id = t.id AND tr.repo_id = ?3)
			)
			"#,
		)
		.bind(repo.owner_id)
		.bind(user_id)
		.bind(repo.id)
		.fetch_one(&mut *conn)
		.await?;
		if let Some(team_mode) = team_mode {
			mode = mode.max(AccessMode::from_i64(team_mode));
		}
	}

	Ok(mode)
}

/// Shortcut for callers that only hold ids.
pub(crate) async fn access_mode_by_id(
	conn: &mut SqliteConnection,
	user_id: i64,
	repo_id: i64,
) -> Result<AccessMode> {
	let repo = fetch_repository(&mut *conn, repo_id).await?;
	access_mode(conn, Some(user_id), &repo).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::org::{NewOrganization, OrgRepository};
	use crate::team::{NewTeam, TeamRepository};
	use crate::testing::{create_test_pool, insert_repo, insert_user};
	use crate::types::Visibility;

	#[tokio::test]
	async fn test_anonymous_access() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let public = insert_repo(&pool, alice, "public", false).await;
		let private = insert_repo(&pool, alice, "private", true).await;
		let access = AccessRepository::new(pool);

		assert_eq!(access.access_mode(None, public).await.unwrap(), AccessMode::Read);
		assert_eq!(access.access_mode(None, private).await.unwrap(), AccessMode::None);
		assert_eq!(
			access.access_mode(Some(alice), private).await.unwrap(),
			AccessMode::Owner
		);
	}

	#[tokio::test]
	async fn test_site_admin_is_owner() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let root = insert_user(&pool, "root").await;
		sqlx::query("UPDATE users SET is_admin = 1 WHERE id = ?")
			.bind(root)
			.execute(&pool)
			.await
			.unwrap();
		let private = insert_repo(&pool, alice, "private", true).await;
		let access = AccessRepository::new(pool);
		assert_eq!(
			access.access_mode(Some(root), private).await.unwrap(),
			AccessMode::Owner
		);
	}

	#[tokio::test]
	async fn test_collaborator_access() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let bob = insert_user(&pool, "bob").await;
		let private = insert_repo(&pool, alice, "private", true).await;
		let access = AccessRepository::new(pool);

		assert!(!access.has_access(Some(bob), private, AccessMode::Read).await.unwrap());
		access.add_collaborator(private, bob, AccessMode::Write).await.unwrap();
		assert_eq!(
			access.access_mode(Some(bob), private).await.unwrap(),
			AccessMode::Write
		);
		assert!(!access.has_access(Some(bob), private, AccessMode::Admin).await.unwrap());

		access.add_collaborator(private, bob, AccessMode::Admin).await.unwrap();
		assert_eq!(access.list_collaborators(private).await.unwrap().len(), 1);
		assert!(access.remove_collaborator(private, bob).await.unwrap());
		assert_eq!(
			access.access_mode(Some(bob), private).await.unwrap(),
			AccessMode::None
		);
	}

	#[tokio::test]
	async fn test_team_access_to_org_repo() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let bob = insert_user(&pool, "bob").await;
		let carol = insert_user(&pool, "carol").await;
		let org = OrgRepository::new(pool.clone())
			.create_organization(
				&NewOrganization {
					name: "acme".to_string(),
					full_name: String::new(),
					email: String::new(),
					visibility: Visibility::Public,
				},
				alice,
			)
			.await
			.unwrap();
		let repo = insert_repo(&pool, org.id, "secret", true).await;
		let other = insert_repo(&pool, org.id, "other", true).await;

		let teams = TeamRepository::new(pool.clone());
		let readers = teams
			.new_team(&NewTeam {
				org_id: org.id,
				name: "readers".to_string(),
				description: String::new(),
				authorize: AccessMode::Read,
				includes_all_repositories: false,
				can_create_org_repo: false,
			})
			.await
			.unwrap();
		teams.add_team_member(readers.id, bob).await.unwrap();
		teams.add_team_repository(readers.id, repo).await.unwrap();

		let access = AccessRepository::new(pool);
		assert_eq!(access.access_mode(Some(alice), repo).await.unwrap(), AccessMode::Owner);
		assert_eq!(access.access_mode(Some(bob), repo).await.unwrap(), AccessMode::Read);
		assert_eq!(access.access_mode(Some(bob), other).await.unwrap(), AccessMode::None);
		assert_eq!(access.access_mode(Some(carol), repo).await.unwrap(), AccessMode::None);
	}
}
