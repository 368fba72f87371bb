// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User accounts and e-mail addresses.
//!
//! Organizations are stored as users with [`UserKind::Organization`]; see
//! [`crate::org`] for membership.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{map_unique_violation, DbError, Result};
use crate::types::{from_db_time, now_db_time, Visibility};

const MAX_USER_NAME_LEN: usize = 40;
const MAX_REPO_NAME_LEN: usize = 100;

const RESERVED_USER_NAMES: &[&str] = &[
	".", "..", "admin", "api", "assets", "explore", "issues", "login", "new", "org", "pulls",
	"repo", "user",
];
const RESERVED_USER_PATTERNS: &[&str] = &["*.keys", "*.gpg"];

const RESERVED_REPO_NAMES: &[&str] = &[".", "..", "-"];
const RESERVED_REPO_PATTERNS: &[&str] = &["*.git", "*.wiki"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
	Individual = 0,
	Organization = 1,
}

impl UserKind {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Self {
		if v == 1 {
			UserKind::Organization
		} else {
			UserKind::Individual
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
	pub id: i64,
	pub name: String,
	pub lower_name: String,
	pub full_name: String,
	pub email: String,
	pub kind: UserKind,
	pub visibility: Visibility,
	pub is_admin: bool,
	pub is_active: bool,
	pub num_repos: i64,
	pub num_teams: i64,
	pub num_members: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl User {
	pub fn is_organization(&self) -> bool {
		self.kind == UserKind::Organization
	}
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
	pub name: String,
	pub full_name: String,
	pub email: String,
	pub is_admin: bool,
	pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
	pub id: i64,
	pub user_id: i64,
	pub email: String,
	pub lower_email: String,
	pub is_activated: bool,
	pub is_primary: bool,
}

/// Check a user or organization name.
pub fn validate_user_name(name: &str) -> Result<()> {
	validate_name(
		name,
		MAX_USER_NAME_LEN,
		RESERVED_USER_NAMES,
		RESERVED_USER_PATTERNS,
	)
}

/// Check a repository name.
pub fn validate_repo_name(name: &str) -> Result<()> {
	validate_name(
		name,
		MAX_REPO_NAME_LEN,
		RESERVED_REPO_NAMES,
		RESERVED_REPO_PATTERNS,
	)
}

fn validate_name(name: &str, max_len: usize, reserved: &[&str], patterns: &[&str]) -> Result<()> {
	let lower = name.to_lowercase();
	if reserved.contains(&lower.as_str()) {
		return Err(DbError::NameReserved(name.to_string()));
	}
	for pattern in patterns {
		let suffix = pattern.trim_start_matches('*');
		if lower.ends_with(suffix) {
			return Err(DbError::NamePatternNotAllowed(pattern.to_string()));
		}
	}

	let valid_chars = name
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
	if name.is_empty()
		|| name.len() > max_len
		|| !valid_chars
		|| name.starts_with(['-', '.'])
		|| name.ends_with(['-', '.'])
		|| name.contains("..")
	{
		return Err(DbError::InvalidName(name.to_string()));
	}
	Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<()> {
	let trimmed = email.trim();
	let valid = match trimmed.split_once('@') {
		Some((local, domain)) => {
			!local.is_empty()
				&& !domain.is_empty()
				&& !domain.contains('@')
				&& !trimmed.chars().any(char::is_whitespace)
		}
		None => false,
	};
	if !valid {
		return Err(DbError::InvalidInput(format!("invalid e-mail address: {email}")));
	}
	Ok(())
}

#[async_trait]
pub trait UserStore: Send + Sync {
	async fn create_user(&self, new_user: &NewUser) -> Result<User>;
	async fn get_user_by_id(&self, id: i64) -> Result<Option<User>>;
	async fn get_user_by_name(&self, name: &str) -> Result<Option<User>>;
	async fn search_users(
		&self,
		keyword: &str,
		kind: Option<UserKind>,
		limit: i64,
	) -> Result<Vec<User>>;
	async fn add_email_address(
		&self,
		user_id: i64,
		email: &str,
		activated: bool,
	) -> Result<EmailAddress>;
	async fn activate_email(&self, email_id: i64) -> Result<bool>;
	async fn make_email_primary(&self, user_id: i64, email_id: i64) -> Result<()>;
	async fn delete_email_address(&self, user_id: i64, email_id: i64) -> Result<bool>;
	async fn list_email_addresses(&self, user_id: i64) -> Result<Vec<EmailAddress>>;
}

#[derive(Clone)]
pub struct UserRepository {
	pool: SqlitePool,
}

impl UserRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, new_user), fields(name = %new_user.name))]
	pub async fn create_user(&self, new_user: &NewUser) -> Result<User> {
		validate_user_name(&new_user.name)?;
		validate_email(&new_user.email)?;

		let mut tx = self.pool.begin().await?;
		let id = insert_account(
			&mut *tx,
			&new_user.name,
			&new_user.full_name,
			&new_user.email,
			UserKind::Individual,
			new_user.is_admin,
			new_user.is_active,
		)
		.await?;
		insert_email(&mut *tx, id, &new_user.email, new_user.is_active, true).await?;
		let user = fetch_user(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::debug!(user_id = id, "user created");
		Ok(user)
	}

	#[tracing::instrument(skip(self), fields(user_id = id))]
	pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
		let mut conn = self.pool.acquire().await?;
		get_user_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(name))]
	pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
		let row = sqlx::query(&format!("{SELECT_USER} WHERE lower_name = ?"))
			.bind(name.to_lowercase())
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_user(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(keyword, limit))]
	pub async fn search_users(
		&self,
		keyword: &str,
		kind: Option<UserKind>,
		limit: i64,
	) -> Result<Vec<User>> {
		let pattern = format!("%{}%", keyword.to_lowercase());
		let rows = sqlx::query(&format!(
			r#"{SELECT_USER}
			WHERE (lower_name LIKE ? OR LOWER(full_name) LIKE ?)
			AND (? IS NULL OR kind = ?)
			ORDER BY lower_name ASC
			LIMIT ?"#
		))
		.bind(&pattern)
		.bind(&pattern)
		.bind(kind.map(|k| k.as_i64()))
		.bind(kind.map(|k| k.as_i64()))
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_user).collect()
	}

	#[tracing::instrument(skip(self, email), fields(user_id))]
	pub async fn add_email_address(
		&self,
		user_id: i64,
		email: &str,
		activated: bool,
	) -> Result<EmailAddress> {
		validate_email(email)?;
		let mut conn = self.pool.acquire().await?;
		let id = insert_email(&mut *conn, user_id, email, activated, false).await?;
		tracing::debug!(user_id, email_id = id, "email address added");
		Ok(EmailAddress {
			id,
			user_id,
			email: email.trim().to_string(),
			lower_email: email.trim().to_lowercase(),
			is_activated: activated,
			is_primary: false,
		})
	}

	#[tracing::instrument(skip(self), fields(email_id))]
	pub async fn activate_email(&self, email_id: i64) -> Result<bool> {
		let result = sqlx::query("UPDATE email_addresses SET is_activated = 1 WHERE id = ?")
			.bind(email_id)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self), fields(user_id, email_id))]
	pub async fn make_email_primary(&self, user_id: i64, email_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let email = get_email_by_id(&mut *tx, email_id)
			.await?
			.filter(|e| e.user_id == user_id)
			.ok_or_else(|| DbError::NotFound(format!("email address {email_id}")))?;
		if !email.is_activated {
			return Err(DbError::InvalidInput(format!(
				"email address {} is not activated",
				email.email
			)));
		}

		sqlx::query("UPDATE email_addresses SET is_primary = (id = ?) WHERE user_id = ?")
			.bind(email_id)
			.bind(user_id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("UPDATE users SET email = ?, updated_at = ? WHERE id = ?")
			.bind(&email.email)
			.bind(now_db_time())
			.bind(user_id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::debug!(user_id, email_id, "primary email changed");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(user_id, email_id))]
	pub async fn delete_email_address(&self, user_id: i64, email_id: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		let Some(email) = get_email_by_id(&mut *conn, email_id)
			.await?
			.filter(|e| e.user_id == user_id)
		else {
			return Ok(false);
		};
		if email.is_primary {
			return Err(DbError::PrimaryEmailCannotDelete(email.email));
		}
		let result = sqlx::query("DELETE FROM email_addresses WHERE id = ?")
			.bind(email_id)
			.execute(&mut *conn)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self), fields(user_id))]
	pub async fn list_email_addresses(&self, user_id: i64) -> Result<Vec<EmailAddress>> {
		let rows = sqlx::query(
			r#"
			SELECT id, user_id, email, lower_email, is_activated, is_primary
			FROM email_addresses
			WHERE user_id = ?
			ORDER BY is_primary DESC, id ASC
			"#,
		)
		.bind(user_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.iter().map(row_to_email).collect())
	}
}

#[async_trait]
impl UserStore for UserRepository {
	async fn create_user(&self, new_user: &NewUser) -> Result<User> {
		UserRepository::create_user(self, new_user).await
	}

	async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
		UserRepository::get_user_by_id(self, id).await
	}

	async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
		UserRepository::get_user_by_name(self, name).await
	}

	async fn search_users(
		&self,
		keyword: &str,
		kind: Option<UserKind>,
		limit: i64,
	) -> Result<Vec<User>> {
		UserRepository::search_users(self, keyword, kind, limit).await
	}

	async fn add_email_address(
		&self,
		user_id: i64,
		email: &str,
		activated: bool,
	) -> Result<EmailAddress> {
		UserRepository::add_email_address(self, user_id, email, activated).await
	}

	async fn activate_email(&self, email_id: i64) -> Result<bool> {
		UserRepository::activate_email(self, email_id).await
	}

	async fn make_email_primary(&self, user_id: i64, email_id: i64) -> Result<()> {
		UserRepository::make_email_primary(self, user_id, email_id).await
	}

	async fn delete_email_address(&self, user_id: i64, email_id: i64) -> Result<bool> {
		UserRepository::delete_email_address(self, user_id, email_id).await
	}

	async fn list_email_addresses(&self, user_id: i64) -> Result<Vec<EmailAddress>> {
		UserRepository::list_email_addresses(self, user_id).await
	}
}

pub(crate) const SELECT_USER: &str = r#"
	SELECT id, name, lower_name, full_name, email, kind, visibility, is_admin, is_active,
		num_repos, num_teams, num_members, created_at, updated_at
	FROM users"#;

pub(crate) async fn insert_account(
	conn: &mut SqliteConnection,
	name: &str,
	full_name: &str,
	email: &str,
	kind: UserKind,
	is_admin: bool,
	is_active: bool,
) -> Result<i64> {
	let now = now_db_time();
	let result = sqlx::query(
		r#"
		INSERT INTO users (name, lower_name, full_name, email, kind, is_admin, is_active, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(name)
	.bind(name.to_lowercase())
	.bind(full_name)
	.bind(email.trim())
	.bind(kind.as_i64())
	.bind(is_admin)
	.bind(is_active)
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await
	.map_err(|e| map_unique_violation(e, || DbError::UserAlreadyExist(name.to_string())))?;
	Ok(result.last_insert_rowid())
}

async fn insert_email(
	conn: &mut SqliteConnection,
	user_id: i64,
	email: &str,
	activated: bool,
	primary: bool,
) -> Result<i64> {
	let email = email.trim();
	let result = sqlx::query(
		r#"
		INSERT INTO email_addresses (user_id, email, lower_email, is_activated, is_primary)
		VALUES (?, ?, ?, ?, ?)
		"#,
	)
	.bind(user_id)
	.bind(email)
	.bind(email.to_lowercase())
	.bind(activated)
	.bind(primary)
	.execute(&mut *conn)
	.await
	.map_err(|e| map_unique_violation(e, || DbError::EmailAlreadyUsed(email.to_string())))?;
	Ok(result.last_insert_rowid())
}

pub(crate) async fn get_user_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
	let row = sqlx::query(&format!("{SELECT_USER} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_user(&r)).transpose()
}

/// Like [`get_user_by_id`] but a missing row is an error.
pub(crate) async fn fetch_user(conn: &mut SqliteConnection, id: i64) -> Result<User> {
	get_user_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("user {id}")))
}

async fn get_email_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<EmailAddress>> {
	let row = sqlx::query(
		"SELECT id, user_id, email, lower_email, is_activated, is_primary FROM email_addresses WHERE id = ?",
	)
	.bind(id)
	.fetch_optional(&mut *conn)
	.await?;
	Ok(row.as_ref().map(row_to_email))
}

pub(crate) fn row_to_user(row: &SqliteRow) -> Result<User> {
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(User {
		id: row.get("id"),
		name: row.get("name"),
		lower_name: row.get("lower_name"),
		full_name: row.get("full_name"),
		email: row.get("email"),
		kind: UserKind::from_i64(row.get("kind")),
		visibility: Visibility::from_i64(row.get("visibility")),
		is_admin: row.get("is_admin"),
		is_active: row.get("is_active"),
		num_repos: row.get("num_repos"),
		num_teams: row.get("num_teams"),
		num_members: row.get("num_members"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

fn row_to_email(row: &SqliteRow) -> EmailAddress {
	EmailAddress {
		id: row.get("id"),
		user_id: row.get("user_id"),
		email: row.get("email"),
		lower_email: row.get("lower_email"),
		is_activated: row.get("is_activated"),
		is_primary: row.get("is_primary"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;
	use proptest::prelude::*;

	async fn make_repo() -> UserRepository {
		UserRepository::new(create_test_pool().await)
	}

	fn new_user(name: &str) -> NewUser {
		NewUser {
			name: name.to_string(),
			full_name: format!("{name} Example"),
			email: format!("{name}@example.com"),
			is_admin: false,
			is_active: true,
		}
	}

	#[test]
	fn test_validate_user_name() {
		assert!(validate_user_name("alice").is_ok());
		assert!(validate_user_name("a.b-c_d").is_ok());
		assert!(matches!(
			validate_user_name("Admin"),
			Err(DbError::NameReserved(_))
		));
		assert!(matches!(
			validate_user_name("bob.keys"),
			Err(DbError::NamePatternNotAllowed(_))
		));
		assert!(matches!(
			validate_user_name("-bob"),
			Err(DbError::InvalidName(_))
		));
		assert!(matches!(
			validate_user_name("bo..b"),
			Err(DbError::InvalidName(_))
		));
		assert!(matches!(
			validate_user_name("bo b"),
			Err(DbError::InvalidName(_))
		));
	}

	#[test]
	fn test_validate_repo_name() {
		assert!(validate_repo_name("forge").is_ok());
		assert!(matches!(
			validate_repo_name("forge.git"),
			Err(DbError::NamePatternNotAllowed(_))
		));
		assert!(matches!(
			validate_repo_name(".."),
			Err(DbError::NameReserved(_))
		));
	}

	proptest! {
		#[test]
		fn valid_names_round_trip_through_validation(name in "[a-z0-9][a-z0-9_-]{0,30}[a-z0-9]") {
			prop_assume!(!RESERVED_USER_NAMES.contains(&name.as_str()));
			prop_assert!(validate_user_name(&name).is_ok());
		}

		#[test]
		fn names_with_spaces_are_rejected(a in "[a-z]{1,10}", b in "[a-z]{1,10}") {
			let name = format!("{a} {b}");
			prop_assert!(validate_user_name(&name).is_err());
		}
	}

	#[tokio::test]
	async fn test_create_and_get_user() {
		let repo = make_repo().await;
		let user = repo.create_user(&new_user("Alice")).await.unwrap();
		assert_eq!(user.lower_name, "alice");
		assert_eq!(user.kind, UserKind::Individual);

		let by_name = repo.get_user_by_name("ALICE").await.unwrap().unwrap();
		assert_eq!(by_name.id, user.id);

		let emails = repo.list_email_addresses(user.id).await.unwrap();
		assert_eq!(emails.len(), 1);
		assert!(emails[0].is_primary);
	}

	#[tokio::test]
	async fn test_duplicate_user_and_email() {
		let repo = make_repo().await;
		repo.create_user(&new_user("alice")).await.unwrap();

		let err = repo.create_user(&new_user("ALICE")).await.unwrap_err();
		assert!(matches!(err, DbError::UserAlreadyExist(_)));

		let mut other = new_user("bob");
		other.email = "Alice@Example.com".to_string();
		let err = repo.create_user(&other).await.unwrap_err();
		assert!(matches!(err, DbError::EmailAlreadyUsed(_)));
		assert!(repo.get_user_by_name("bob").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_make_email_primary_requires_activation() {
		let repo = make_repo().await;
		let user = repo.create_user(&new_user("carol")).await.unwrap();
		let extra = repo
			.add_email_address(user.id, "carol@work.example", false)
			.await
			.unwrap();

		let err = repo.make_email_primary(user.id, extra.id).await.unwrap_err();
		assert!(err.is_invalid_input());

		assert!(repo.activate_email(extra.id).await.unwrap());
		repo.make_email_primary(user.id, extra.id).await.unwrap();

		let user = repo.get_user_by_id(user.id).await.unwrap().unwrap();
		assert_eq!(user.email, "carol@work.example");
		let emails = repo.list_email_addresses(user.id).await.unwrap();
		assert_eq!(emails.iter().filter(|e| e.is_primary).count(), 1);
	}

	#[tokio::test]
	async fn test_cannot_delete_primary_email() {
		let repo = make_repo().await;
		let user = repo.create_user(&new_user("dave")).await.unwrap();
		let primary = repo.list_email_addresses(user.id).await.unwrap()[0].clone();
		let err = repo
			.delete_email_address(user.id, primary.id)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::PrimaryEmailCannotDelete(_)));

		let extra = repo
			.add_email_address(user.id, "dave@other.example", true)
			.await
			.unwrap();
		assert!(repo.delete_email_address(user.id, extra.id).await.unwrap());
	}

	#[tokio::test]
	async fn test_search_users() {
		let repo = make_repo().await;
		repo.create_user(&new_user("erin")).await.unwrap();
		repo.create_user(&new_user("erika")).await.unwrap();
		repo.create_user(&new_user("frank")).await.unwrap();

		let found = repo.search_users("eri", None, 10).await.unwrap();
		assert_eq!(found.len(), 2);
		let orgs = repo
			.search_users("eri", Some(UserKind::Organization), 10)
			.await
			.unwrap();
		assert!(orgs.is_empty());
	}
}
