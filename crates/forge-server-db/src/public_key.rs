// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSH public keys of users and deploy keys of repositories.
//!
//! A deploy key row points at a shared `public_keys` row of type `Deploy`,
//! so the same key material can be deployed to several repositories.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{DbError, Result};
use crate::types::{from_db_time, now_db_time, AccessMode};
use crate::user::fetch_user;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
	User = 1,
	Deploy = 2,
	Principal = 3,
}

impl KeyType {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Option<Self> {
		match v {
			1 => Some(KeyType::User),
			2 => Some(KeyType::Deploy),
			3 => Some(KeyType::Principal),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
	pub id: i64,
	/// Zero for deploy keys.
	pub owner_id: i64,
	pub name: String,
	pub fingerprint: String,
	/// Normalized `<algorithm> <base64 blob>`, without the comment.
	pub content: String,
	pub mode: AccessMode,
	pub key_type: KeyType,
	pub verified: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub has_used: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployKey {
	pub id: i64,
	pub key_id: i64,
	pub repo_id: i64,
	pub name: String,
	pub fingerprint: String,
	pub mode: AccessMode,
	pub created_at: DateTime<Utc>,
}

const KNOWN_ALGORITHMS: &[&str] = &["ssh-rsa", "ssh-dss", "ssh-ed25519"];

fn is_known_algorithm(name: &str) -> bool {
	KNOWN_ALGORITHMS.contains(&name) || name.starts_with("ecdsa-sha2-") || name.starts_with("sk-")
}

/// Split an `authorized_keys` line into its algorithm and decoded key blob.
///
/// Leading options such as `no-pty` are skipped. The blob must start with
/// the same algorithm name, as the SSH wire format requires.
pub fn parse_authorized_key(content: &str) -> Result<(String, Vec<u8>)> {
	let line = content
		.lines()
		.map(str::trim)
		.find(|l| !l.is_empty() && !l.starts_with('#'))
		.ok_or_else(|| DbError::InvalidKey("empty key".to_string()))?;

	let mut fields = line.split_whitespace();
	let algorithm = fields
		.by_ref()
		.find(|f| is_known_algorithm(f))
		.ok_or_else(|| DbError::InvalidKey("unsupported key algorithm".to_string()))?;
	let encoded = fields
		.next()
		.ok_or_else(|| DbError::InvalidKey("missing key data".to_string()))?;
	let blob = STANDARD
		.decode(encoded)
		.map_err(|e| DbError::InvalidKey(format!("key data is not base64: {e}")))?;

	if wire_algorithm(&blob) != Some(algorithm) {
		return Err(DbError::InvalidKey(format!("key data does not match {algorithm}")));
	}
	Ok((algorithm.to_string(), blob))
}

/// The algorithm name embedded at the start of an SSH key blob.
fn wire_algorithm(blob: &[u8]) -> Option<&str> {
	let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
	let len = u32::from_be_bytes(len_bytes) as usize;
	let name = blob.get(4..4usize.checked_add(len)?)?;
	std::str::from_utf8(name).ok()
}

/// OpenSSH style fingerprint, e.g. `SHA256:47DEQpj8...`.
pub fn calc_fingerprint(blob: &[u8]) -> String {
	format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

#[async_trait]
pub trait PublicKeyStore: Send + Sync {
	async fn add_public_key(&self, owner_id: i64, name: &str, content: &str) -> Result<PublicKey>;
	async fn get_public_key_by_id(&self, id: i64) -> Result<Option<PublicKey>>;
	async fn search_public_key_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<PublicKey>>;
	async fn list_public_keys(&self, owner_id: i64) -> Result<Vec<PublicKey>>;
	async fn update_public_key_update_time(&self, id: i64) -> Result<()>;
	async fn delete_public_key(&self, doer_id: i64, id: i64) -> Result<()>;
	async fn add_deploy_key(&self, repo_id: i64, name: &str, content: &str, read_only: bool) -> Result<DeployKey>;
	async fn get_deploy_key_by_id(&self, id: i64) -> Result<Option<DeployKey>>;
	async fn list_deploy_keys(&self, repo_id: i64) -> Result<Vec<DeployKey>>;
	async fn delete_deploy_key(&self, repo_id: i64, id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct PublicKeyRepository {
	pool: SqlitePool,
}

impl PublicKeyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, content), fields(owner_id, name))]
	pub async fn add_public_key(&self, owner_id: i64, name: &str, content: &str) -> Result<PublicKey> {
		let name = name.trim();
		if name.is_empty() {
			return Err(DbError::InvalidInput("key name is empty".to_string()));
		}
		let (algorithm, blob) = parse_authorized_key(content)?;
		let fingerprint = calc_fingerprint(&blob);

		let mut tx = self.pool.begin().await?;
		if fingerprint_in_use(&mut *tx, &fingerprint).await? {
			return Err(DbError::KeyAlreadyExist(fingerprint));
		}
		let name_taken: i64 =
			sqlx::query_scalar("SELECT COUNT(*) FROM public_keys WHERE owner_id = ? AND name = ?")
				.bind(owner_id)
				.bind(name)
				.fetch_one(&mut *tx)
				.await?;
		if name_taken > 0 {
			return Err(DbError::KeyNameAlreadyUsed {
				owner_id,
				name: name.to_string(),
			});
		}

		let key = insert_key(
			&mut *tx,
			owner_id,
			name,
			&fingerprint,
			&normalized_content(&algorithm, &blob),
			AccessMode::Write,
			KeyType::User,
		)
		.await?;
		tx.commit().await?;

		tracing::info!(key_id = key.id, fingerprint = %key.fingerprint, "public key added");
		Ok(key)
	}

	#[tracing::instrument(skip(self), fields(key_id = id))]
	pub async fn get_public_key_by_id(&self, id: i64) -> Result<Option<PublicKey>> {
		let mut conn = self.pool.acquire().await?;
		get_public_key_by_id(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(fingerprint))]
	pub async fn search_public_key_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<PublicKey>> {
		let rows = sqlx::query(&format!("{SELECT_PUBLIC_KEY} WHERE fingerprint = ? ORDER BY id"))
			.bind(fingerprint)
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(row_to_public_key).collect()
	}

	#[tracing::instrument(skip(self), fields(owner_id))]
	pub async fn list_public_keys(&self, owner_id: i64) -> Result<Vec<PublicKey>> {
		let rows = sqlx::query(&format!(
			"{SELECT_PUBLIC_KEY} WHERE owner_id = ? AND key_type != ? ORDER BY id"
		))
		.bind(owner_id)
		.bind(KeyType::Deploy.as_i64())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_public_key).collect()
	}

	/// Record that a key was just used to authenticate.
	#[tracing::instrument(skip(self), fields(key_id = id))]
	pub async fn update_public_key_update_time(&self, id: i64) -> Result<()> {
		sqlx::query("UPDATE public_keys SET updated_at = ?, has_used = 1 WHERE id = ?")
			.bind(now_db_time())
			.bind(id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Only the key's owner or a site admin may delete it.
	#[tracing::instrument(skip(self), fields(doer_id, key_id = id))]
	pub async fn delete_public_key(&self, doer_id: i64, id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let key = get_public_key_by_id(&mut *tx, id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("public key {id}")))?;
		if key.owner_id != doer_id {
			let doer = fetch_user(&mut *tx, doer_id).await?;
			if !doer.is_admin {
				return Err(DbError::PermissionDenied(format!(
					"user {doer_id} cannot delete public key {id}"
				)));
			}
		}
		sqlx::query("DELETE FROM public_keys WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		tracing::info!("public key deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self, content), fields(repo_id, name, read_only))]
	pub async fn add_deploy_key(&self, repo_id: i64, name: &str, content: &str, read_only: bool) -> Result<DeployKey> {
		let name = name.trim();
		if name.is_empty() {
			return Err(DbError::InvalidInput("key name is empty".to_string()));
		}
		let (algorithm, blob) = parse_authorized_key(content)?;
		let fingerprint = calc_fingerprint(&blob);
		let mode = if read_only { AccessMode::Read } else { AccessMode::Write };

		let mut tx = self.pool.begin().await?;
		let existing = sqlx::query(&format!("{SELECT_PUBLIC_KEY} WHERE fingerprint = ? LIMIT 1"))
			.bind(&fingerprint)
			.fetch_optional(&mut *tx)
			.await?
			.map(|r| row_to_public_key(&r))
			.transpose()?;

		let key = match existing {
			Some(key) if key.key_type == KeyType::Deploy => key,
			Some(_) => return Err(DbError::KeyAlreadyExist(fingerprint)),
			None => {
				insert_key(
					&mut *tx,
					0,
					name,
					&fingerprint,
					&normalized_content(&algorithm, &blob),
					mode,
					KeyType::Deploy,
				)
				.await?
			}
		};

		let already_deployed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deploy_keys WHERE key_id = ? AND repo_id = ?")
			.bind(key.id)
			.bind(repo_id)
			.fetch_one(&mut *tx)
			.await?;
		if already_deployed > 0 {
			return Err(DbError::DeployKeyAlreadyExist { key_id: key.id, repo_id });
		}
		let name_taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deploy_keys WHERE repo_id = ? AND name = ?")
			.bind(repo_id)
			.bind(name)
			.fetch_one(&mut *tx)
			.await?;
		if name_taken > 0 {
			return Err(DbError::KeyNameAlreadyUsed {
				owner_id: repo_id,
				name: name.to_string(),
			});
		}

		let result = sqlx::query(
			r#"
			INSERT INTO deploy_keys (key_id, repo_id, name, fingerprint, mode, created_at)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(key.id)
		.bind(repo_id)
		.bind(name)
		.bind(&fingerprint)
		.bind(mode.as_i64())
		.bind(now_db_time())
		.execute(&mut *tx)
		.await?;
		let deploy_key = fetch_deploy_key(&mut *tx, result.last_insert_rowid()).await?;
		tx.commit().await?;

		tracing::info!(deploy_key_id = deploy_key.id, key_id = key.id, "deploy key added");
		Ok(deploy_key)
	}

	#[tracing::instrument(skip(self), fields(deploy_key_id = id))]
	pub async fn get_deploy_key_by_id(&self, id: i64) -> Result<Option<DeployKey>> {
		let row = sqlx::query(&format!("{SELECT_DEPLOY_KEY} WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_deploy_key(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn list_deploy_keys(&self, repo_id: i64) -> Result<Vec<DeployKey>> {
		let rows = sqlx::query(&format!("{SELECT_DEPLOY_KEY} WHERE repo_id = ? ORDER BY id"))
			.bind(repo_id)
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(row_to_deploy_key).collect()
	}

	/// Remove a deploy key from a repository, and the key material itself
	/// once no repository uses it.
	#[tracing::instrument(skip(self), fields(repo_id, deploy_key_id = id))]
	pub async fn delete_deploy_key(&self, repo_id: i64, id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let key_id: i64 = sqlx::query_scalar("SELECT key_id FROM deploy_keys WHERE id = ? AND repo_id = ?")
			.bind(id)
			.bind(repo_id)
			.fetch_optional(&mut *tx)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("deploy key {id}")))?;
		sqlx::query("DELETE FROM deploy_keys WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;

		let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deploy_keys WHERE key_id = ?")
			.bind(key_id)
			.fetch_one(&mut *tx)
			.await?;
		if remaining == 0 {
			sqlx::query("DELETE FROM public_keys WHERE id = ?")
				.bind(key_id)
				.execute(&mut *tx)
				.await?;
			tracing::debug!(key_id, "shared deploy key removed");
		}
		tx.commit().await?;
		Ok(())
	}
}

#[async_trait]
impl PublicKeyStore for PublicKeyRepository {
	async fn add_public_key(&self, owner_id: i64, name: &str, content: &str) -> Result<PublicKey> {
		PublicKeyRepository::add_public_key(self, owner_id, name, content).await
	}

	async fn get_public_key_by_id(&self, id: i64) -> Result<Option<PublicKey>> {
		PublicKeyRepository::get_public_key_by_id(self, id).await
	}

	async fn search_public_key_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<PublicKey>> {
		PublicKeyRepository::search_public_key_by_fingerprint(self, fingerprint).await
	}

	async fn list_public_keys(&self, owner_id: i64) -> Result<Vec<PublicKey>> {
		PublicKeyRepository::list_public_keys(self, owner_id).await
	}

	async fn update_public_key_update_time(&self, id: i64) -> Result<()> {
		PublicKeyRepository::update_public_key_update_time(self, id).await
	}

	async fn delete_public_key(&self, doer_id: i64, id: i64) -> Result<()> {
		PublicKeyRepository::delete_public_key(self, doer_id, id).await
	}

	async fn add_deploy_key(&self, repo_id: i64, name: &str, content: &str, read_only: bool) -> Result<DeployKey> {
		PublicKeyRepository::add_deploy_key(self, repo_id, name, content, read_only).await
	}

	async fn get_deploy_key_by_id(&self, id: i64) -> Result<Option<DeployKey>> {
		PublicKeyRepository::get_deploy_key_by_id(self, id).await
	}

	async fn list_deploy_keys(&self, repo_id: i64) -> Result<Vec<DeployKey>> {
		PublicKeyRepository::list_deploy_keys(self, repo_id).await
	}

	async fn delete_deploy_key(&self, repo_id: i64, id: i64) -> Result<()> {
		PublicKeyRepository::delete_deploy_key(self, repo_id, id).await
	}
}

const SELECT_PUBLIC_KEY: &str = r#"
	SELECT id, owner_id, name, fingerprint, content, mode, key_type, verified, has_used,
		created_at, updated_at
	FROM public_keys"#;

const SELECT_DEPLOY_KEY: &str = r#"
	SELECT id, key_id, repo_id, name, fingerprint, mode, created_at
	FROM deploy_keys"#;

fn normalized_content(algorithm: &str, blob: &[u8]) -> String {
	format!("{algorithm} {}", STANDARD.encode(blob))
}

async fn fingerprint_in_use(conn: &mut SqliteConnection, fingerprint: &str) -> Result<bool> {
	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM public_keys WHERE fingerprint = ?")
		.bind(fingerprint)
		.fetch_one(&mut *conn)
		.await?;
	Ok(count > 0)
}

async fn insert_key(
	conn: &mut SqliteConnection,
	owner_id: i64,
	name: &str,
	fingerprint: &str,
	content: &str,
	mode: AccessMode,
	key_type: KeyType,
) -> Result<PublicKey> {
	let now = now_db_time();
	let result = sqlx::query(
		r#"
		INSERT INTO public_keys (owner_id, name, fingerprint, content, mode, key_type, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(owner_id)
	.bind(name)
	.bind(fingerprint)
	.bind(content)
	.bind(mode.as_i64())
	.bind(key_type.as_i64())
	.bind(&now)
	.bind(&now)
	.execute(&mut *conn)
	.await?;
	let id = result.last_insert_rowid();
	get_public_key_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::Internal(format!("public key {id} vanished after insert")))
}

async fn get_public_key_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<PublicKey>> {
	let row = sqlx::query(&format!("{SELECT_PUBLIC_KEY} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_public_key(&r)).transpose()
}

async fn fetch_deploy_key(conn: &mut SqliteConnection, id: i64) -> Result<DeployKey> {
	let row = sqlx::query(&format!("{SELECT_DEPLOY_KEY} WHERE id = ?"))
		.bind(id)
		.fetch_one(&mut *conn)
		.await?;
	row_to_deploy_key(&row)
}

fn row_to_public_key(row: &SqliteRow) -> Result<PublicKey> {
	let raw_type: i64 = row.get("key_type");
	let key_type =
		KeyType::from_i64(raw_type).ok_or_else(|| DbError::Internal(format!("unknown key type {raw_type}")))?;
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(PublicKey {
		id: row.get("id"),
		owner_id: row.get("owner_id"),
		name: row.get("name"),
		fingerprint: row.get("fingerprint"),
		content: row.get("content"),
		mode: AccessMode::from_i64(row.get("mode")),
		key_type,
		verified: row.get("verified"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
		has_used: row.get("has_used"),
	})
}

fn row_to_deploy_key(row: &SqliteRow) -> Result<DeployKey> {
	let created_at: String = row.get("created_at");
	Ok(DeployKey {
		id: row.get("id"),
		key_id: row.get("key_id"),
		repo_id: row.get("repo_id"),
		name: row.get("name"),
		fingerprint: row.get("fingerprint"),
		mode: AccessMode::from_i64(row.get("mode")),
		created_at: from_db_time(&created_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_pool, insert_repo, insert_user};

	/// An `authorized_keys` line for an ed25519 key whose public bytes are
	/// all `seed`.
	fn ed25519_line(seed: u8, comment: &str) -> String {
		let algo = b"ssh-ed25519";
		let mut blob = Vec::new();
		blob.extend_from_slice(&(algo.len() as u32).to_be_bytes());
		blob.extend_from_slice(algo);
		blob.extend_from_slice(&32u32.to_be_bytes());
		blob.extend_from_slice(&[seed; 32]);
		format!("ssh-ed25519 {} {comment}", STANDARD.encode(blob))
	}

	#[test]
	fn test_parse_authorized_key() {
		let (algo, blob) = parse_authorized_key(&ed25519_line(7, "me@host")).unwrap();
		assert_eq!(algo, "ssh-ed25519");
		assert_eq!(blob.len(), 4 + 11 + 4 + 32);

		let with_options = format!("no-pty,no-port-forwarding {}", ed25519_line(7, ""));
		assert_eq!(parse_authorized_key(&with_options).unwrap().1, blob);

		assert!(parse_authorized_key("").unwrap_err().is_invalid_input());
		assert!(parse_authorized_key("ssh-foo AAAA").is_err());
		assert!(parse_authorized_key("ssh-ed25519 !!!notbase64").is_err());

		// Blob claims a different algorithm than the line.
		let mislabelled = ed25519_line(7, "").replacen("ssh-ed25519", "ssh-rsa", 1);
		assert!(matches!(
			parse_authorized_key(&mislabelled).unwrap_err(),
			DbError::InvalidKey(_)
		));
	}

	#[test]
	fn test_fingerprint_format() {
		// sha256("") in unpadded base64.
		assert_eq!(calc_fingerprint(b""), "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU");
	}

	#[tokio::test]
	async fn test_user_keys_unique() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let bob = insert_user(&pool, "bob").await;
		let keys = PublicKeyRepository::new(pool);

		let key = keys.add_public_key(alice, "laptop", &ed25519_line(1, "a@l")).await.unwrap();
		assert_eq!(key.key_type, KeyType::User);
		assert!(!key.content.contains("a@l"));

		let err = keys.add_public_key(bob, "laptop", &ed25519_line(1, "")).await.unwrap_err();
		assert!(matches!(err, DbError::KeyAlreadyExist(_)));

		let err = keys.add_public_key(alice, "laptop", &ed25519_line(2, "")).await.unwrap_err();
		assert!(matches!(err, DbError::KeyNameAlreadyUsed { .. }));

		assert_eq!(
			keys.search_public_key_by_fingerprint(&key.fingerprint).await.unwrap()[0].id,
			key.id
		);
		keys.update_public_key_update_time(key.id).await.unwrap();
		assert!(keys.get_public_key_by_id(key.id).await.unwrap().unwrap().has_used);
	}

	#[tokio::test]
	async fn test_delete_requires_owner_or_admin() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let bob = insert_user(&pool, "bob").await;
		let root = insert_user(&pool, "root").await;
		sqlx::query("UPDATE users SET is_admin = 1 WHERE id = ?")
			.bind(root)
			.execute(&pool)
			.await
			.unwrap();
		let keys = PublicKeyRepository::new(pool);

		let a = keys.add_public_key(alice, "a", &ed25519_line(1, "")).await.unwrap();
		let b = keys.add_public_key(alice, "b", &ed25519_line(2, "")).await.unwrap();
		assert!(keys.delete_public_key(bob, a.id).await.unwrap_err().is_permission_denied());
		keys.delete_public_key(alice, a.id).await.unwrap();
		keys.delete_public_key(root, b.id).await.unwrap();
		assert!(keys.list_public_keys(alice).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_deploy_keys_share_key_row() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_a = insert_repo(&pool, alice, "a", false).await;
		let repo_b = insert_repo(&pool, alice, "b", false).await;
		let keys = PublicKeyRepository::new(pool);
		let line = ed25519_line(9, "ci");

		let da = keys.add_deploy_key(repo_a, "ci", &line, true).await.unwrap();
		let db = keys.add_deploy_key(repo_b, "ci", &line, false).await.unwrap();
		assert_eq!(da.key_id, db.key_id);
		assert_eq!(da.mode, AccessMode::Read);
		assert_eq!(db.mode, AccessMode::Write);

		let err = keys.add_deploy_key(repo_a, "other", &line, true).await.unwrap_err();
		assert!(matches!(err, DbError::DeployKeyAlreadyExist { .. }));
		let err = keys.add_deploy_key(repo_a, "ci", &ed25519_line(10, ""), true).await.unwrap_err();
		assert!(matches!(err, DbError::KeyNameAlreadyUsed { .. }));

		// A user key cannot be reused as a deploy key.
		keys.add_public_key(alice, "laptop", &ed25519_line(11, "")).await.unwrap();
		let err = keys.add_deploy_key(repo_a, "x", &ed25519_line(11, ""), true).await.unwrap_err();
		assert!(matches!(err, DbError::KeyAlreadyExist(_)));

		keys.delete_deploy_key(repo_a, da.id).await.unwrap();
		assert!(keys.get_public_key_by_id(da.key_id).await.unwrap().is_some());
		keys.delete_deploy_key(repo_b, db.id).await.unwrap();
		assert!(keys.get_public_key_by_id(da.key_id).await.unwrap().is_none());
		assert!(keys.list_deploy_keys(repo_a).await.unwrap().is_empty());
	}
}
