// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Organizations and their membership.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{DbError, Result};
use crate::locked_resource::get_locked_resource;
use crate::team::{
	add_team_member, count_team_members, get_team, insert_team, is_team_member,
	list_user_org_teams, remove_team_member, NewTeam, OWNER_TEAM_NAME,
};
use crate::types::{AccessMode, Visibility};
use crate::user::{fetch_user, insert_account, row_to_user, validate_user_name, User, UserKind, SELECT_USER};

/// Lock serializing changes to an organization's owner set.
pub(crate) const ORG_OWNERS_LOCK: &str = "org_owners";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUser {
	pub id: i64,
	pub user_id: i64,
	pub org_id: i64,
	pub is_public: bool,
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
	pub name: String,
	pub full_name: String,
	pub email: String,
	pub visibility: Visibility,
}

#[async_trait]
pub trait OrgStore: Send + Sync {
	async fn create_organization(&self, org: &NewOrganization, owner_id: i64) -> Result<User>;
	async fn is_organization_owner(&self, org_id: i64, user_id: i64) -> Result<bool>;
	async fn is_organization_member(&self, org_id: i64, user_id: i64) -> Result<bool>;
	async fn get_org_users(&self, org_id: i64) -> Result<Vec<OrgUser>>;
	async fn get_orgs_by_user_id(&self, user_id: i64, include_private: bool) -> Result<Vec<User>>;
	async fn add_org_user(&self, org_id: i64, user_id: i64) -> Result<()>;
	async fn remove_org_user(&self, org_id: i64, user_id: i64) -> Result<()>;
	async fn change_org_user_public_status(
		&self,
		org_id: i64,
		user_id: i64,
		public: bool,
	) -> Result<()>;
	async fn count_org_members(&self, org_id: i64) -> Result<i64>;
}

#[derive(Clone)]
pub struct OrgRepository {
	pool: SqlitePool,
}

impl OrgRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, org), fields(name = %org.name, owner_id))]
	pub async fn create_organization(&self, org: &NewOrganization, owner_id: i64) -> Result<User> {
		validate_user_name(&org.name)?;

		let mut tx = self.pool.begin().await?;
		fetch_user(&mut *tx, owner_id).await?;
		let org_id = insert_account(
			&mut *tx,
			&org.name,
			&org.full_name,
			&org.email,
			UserKind::Organization,
			false,
			true,
		)
		.await?;
		sqlx::query("UPDATE users SET visibility = ? WHERE id = ?")
			.bind(org.visibility.as_i64())
			.bind(org_id)
			.execute(&mut *tx)
			.await?;

		let owners = insert_team(
			&mut *tx,
			&NewTeam {
				org_id,
				name: OWNER_TEAM_NAME.to_string(),
				description: String::new(),
				authorize: AccessMode::Owner,
				includes_all_repositories: true,
				can_create_org_repo: true,
			},
		)
		.await?;
		add_team_member(&mut *tx, &owners, owner_id).await?;

		let created = fetch_user(&mut *tx, org_id).await?;
		tx.commit().await?;

		tracing::debug!(org_id, owner_id, "organization created");
		Ok(created)
	}

	#[tracing::instrument(skip(self), fields(org_id, user_id))]
	pub async fn is_organization_owner(&self, org_id: i64, user_id: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		is_organization_owner(&mut *conn, org_id, user_id).await
	}

	#[tracing::instrument(skip(self), fields(org_id, user_id))]
	pub async fn is_organization_member(&self, org_id: i64, user_id: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		is_organization_member(&mut *conn, org_id, user_id).await
	}

	#[tracing::instrument(skip(self), fields(org_id))]
	pub async fn get_org_users(&self, org_id: i64) -> Result<Vec<OrgUser>> {
		let rows = sqlx::query(
			"SELECT id, user_id, org_id, is_public FROM org_users WHERE org_id = ? ORDER BY id ASC",
		)
		.bind(org_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.iter().map(row_to_org_user).collect())
	}

	#[tracing::instrument(skip(self), fields(user_id, include_private))]
	pub async fn get_orgs_by_user_id(&self, user_id: i64, include_private: bool) -> Result<Vec<User>> {
		let rows = sqlx::query(&format!(
			r#"{SELECT_USER}
			WHERE id IN (
				SELECT org_id FROM org_users WHERE user_id = ? AND (is_public = 1 OR ?)
			)
			ORDER BY lower_name ASC"#
		))
		.bind(user_id)
		.bind(include_private)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_user).collect()
	}

	#[tracing::instrument(skip(self), fields(org_id, user_id))]
	pub async fn add_org_user(&self, org_id: i64, user_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		add_org_user(&mut *tx, org_id, user_id).await?;
		tx.commit().await?;
		Ok(())
	}

	/// Remove a user from the organization and all its teams. Refuses to drop
	/// the last owner.
	#[tracing::instrument(skip(self), fields(org_id, user_id))]
	pub async fn remove_org_user(&self, org_id: i64, user_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		get_locked_resource(&mut *tx, ORG_OWNERS_LOCK, org_id).await?;

		if let Some(owners) = get_team(&mut *tx, org_id, OWNER_TEAM_NAME).await? {
			if is_team_member(&mut *tx, owners.id, user_id).await?
				&& count_team_members(&mut *tx, owners.id).await? <= 1
			{
				return Err(DbError::LastOrgOwner { org_id, user_id });
			}
		}

		for team in list_user_org_teams(&mut *tx, org_id, user_id).await? {
			remove_team_member(&mut *tx, team.id, user_id).await?;
		}

		let removed = sqlx::query("DELETE FROM org_users WHERE org_id = ? AND user_id = ?")
			.bind(org_id)
			.bind(user_id)
			.execute(&mut *tx)
			.await?;
		if removed.rows_affected() > 0 {
			sqlx::query("UPDATE users SET num_members = num_members - 1 WHERE id = ?")
				.bind(org_id)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;

		tracing::debug!(org_id, user_id, "organization member removed");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(org_id, user_id, public))]
	pub async fn change_org_user_public_status(
		&self,
		org_id: i64,
		user_id: i64,
		public: bool,
	) -> Result<()> {
		let result = sqlx::query("UPDATE org_users SET is_public = ? WHERE org_id = ? AND user_id = ?")
			.bind(public)
			.bind(org_id)
			.bind(user_id)
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!(
				"user {user_id} is not a member of organization {org_id}"
			)));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(org_id))]
	pub async fn count_org_members(&self, org_id: i64) -> Result<i64> {
		let count = sqlx::query_scalar("SELECT COUNT(*) FROM org_users WHERE org_id = ?")
			.bind(org_id)
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}
}

#[async_trait]
impl OrgStore for OrgRepository {
	async fn create_organization(&self, org: &NewOrganization, owner_id: i64) -> Result<User> {
		OrgRepository::create_organization(self, org, owner_id).await
	}

	async fn is_organization_owner(&self, org_id: i64, user_id: i64) -> Result<bool> {
		OrgRepository::is_organization_owner(self, org_id, user_id).await
	}

	async fn is_organization_member(&self, org_id: i64, user_id: i64) -> Result<bool> {
		OrgRepository::is_organization_member(self, org_id, user_id).await
	}

	async fn get_org_users(&self, org_id: i64) -> Result<Vec<OrgUser>> {
		OrgRepository::get_org_users(self, org_id).await
	}

	async fn get_orgs_by_user_id(&self, user_id: i64, include_private: bool) -> Result<Vec<User>> {
		OrgRepository::get_orgs_by_user_id(self, user_id, include_private).await
	}

	async fn add_org_user(&self, org_id: i64, user_id: i64) -> Result<()> {
		OrgRepository::add_org_user(self, org_id, user_id).await
	}

	async fn remove_org_user(&self, org_id: i64, user_id: i64) -> Result<()> {
		OrgRepository::remove_org_user(self, org_id, user_id).await
	}

	async fn change_org_user_public_status(
		&self,
		org_id: i64,
		user_id: i64,
		public: bool,
	) -> Result<()> {
		OrgRepository::change_org_user_public_status(self, org_id, user_id, public).await
	}

	async fn count_org_members(&self, org_id: i64) -> Result<i64> {
		OrgRepository::count_org_members(self, org_id).await
	}
}

/// Idempotent. Returns true when the user was not yet a member.
pub(crate) async fn add_org_user(
	conn: &mut SqliteConnection,
	org_id: i64,
	user_id: i64,
) -> Result<bool> {
	let inserted =
		sqlx::query("INSERT OR IGNORE INTO org_users (user_id, org_id, is_public) VALUES (?, ?, 0)")
			.bind(user_id)
			.bind(org_id)
			.execute(&mut *conn)
			.await?;
	if inserted.rows_affected() == 0 {
		return Ok(false);
	}
	sqlx::query("UPDATE users SET num_members = num_members + 1 WHERE id = ?")
		.bind(org_id)
		.execute(&mut *conn)
		.await?;
	tracing::debug!(org_id, user_id, "organization member added");
	Ok(true)
}

pub(crate) async fn is_organization_owner(
	conn: &mut SqliteConnection,
	org_id: i64,
	user_id: i64,
) -> Result<bool> {
	let count: i64 = sqlx::query_scalar(
		r#"
		SELECT COUNT(*)
		FROM team_users tu
		JOIN teams t ON t.id = tu.team_id
		WHERE t.org_id = ? AND t.lower_name = ? AND tu.user_id = ?
		"#,
	)
	.bind(org_id)
	.bind(OWNER_TEAM_NAME.to_lowercase())
	.bind(user_id)
	.fetch_one(&mut *conn)
	.await?;
	Ok(count > 0)
}

pub(crate) async fn is_organization_member(
	conn: &mut SqliteConnection,
	org_id: i64,
	user_id: i64,
) -> Result<bool> {
	let count: i64 =
		sqlx::query_scalar("SELECT COUNT(*) FROM org_users WHERE org_id = ? AND user_id = ?")
			.bind(org_id)
			.bind(user_id)
			.fetch_one(&mut *conn)
			.await?;
	Ok(count > 0)
}

fn row_to_org_user(row: &SqliteRow) -> OrgUser {
	OrgUser {
		id: row.get("id"),
		user_id: row.get("user_id"),
		org_id: row.get("org_id"),
		is_public: row.get("is_public"),
	}
}
