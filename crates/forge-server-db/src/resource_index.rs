// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-group monotonically increasing indices (issue numbers within a repo).
//!
//! Allocation bumps the group's counter with an UPSERT and then checks that
//! the value it got back is exactly one above what it read first. Anything
//! else means another writer got there in between, reported as
//! [`DbError::ResourceOutdated`]. The pool-level entry point retries that a
//! few times in fresh transactions.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::error::{DbError, Result};

/// Attempts made by [`ResourceIndexRepository::get_next_resource_index`].
pub const MAX_INDEX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceIndexKind {
	Issue,
}

impl ResourceIndexKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceIndexKind::Issue => "issue",
		}
	}

	fn table(&self) -> &'static str {
		match self {
			ResourceIndexKind::Issue => "issue_index",
		}
	}
}

#[async_trait]
pub trait ResourceIndexStore: Send + Sync {
	async fn get_next_resource_index(&self, kind: ResourceIndexKind, group_id: i64) -> Result<i64>;
	async fn get_max_resource_index(
		&self,
		kind: ResourceIndexKind,
		group_id: i64,
	) -> Result<Option<i64>>;
	async fn sync_max_resource_index(
		&self,
		kind: ResourceIndexKind,
		group_id: i64,
		max_index: i64,
	) -> Result<()>;
	async fn delete_resource_index(&self, kind: ResourceIndexKind, group_id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct ResourceIndexRepository {
	pool: SqlitePool,
}

impl ResourceIndexRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self), fields(kind = kind.as_str(), group_id))]
	pub async fn get_next_resource_index(
		&self,
		kind: ResourceIndexKind,
		group_id: i64,
	) -> Result<i64> {
		let mut last_err = None;
		for attempt in 1..=MAX_INDEX_ATTEMPTS {
			let mut tx = self.pool.begin().await?;
			match next_resource_index(&mut *tx, kind, group_id).await {
				Ok(index) => {
					tx.commit().await?;
					return Ok(index);
				}
				Err(e) if e.is_resource_outdated() => {
					tracing::warn!(attempt, "resource index outdated, retrying");
					last_err = Some(e);
				}
				Err(e) => return Err(e),
			}
		}
		Err(last_err.unwrap_or(DbError::ResourceOutdated {
			kind: kind.as_str(),
			group_id,
		}))
	}

	#[tracing::instrument(skip(self), fields(kind = kind.as_str(), group_id))]
	pub async fn get_max_resource_index(
		&self,
		kind: ResourceIndexKind,
		group_id: i64,
	) -> Result<Option<i64>> {
		let sql = format!("SELECT max_index FROM {} WHERE group_id = ?", kind.table());
		let max = sqlx::query_scalar::<_, i64>(&sql)
			.bind(group_id)
			.fetch_optional(&self.pool)
			.await?;
		Ok(max)
	}

	/// Raise the stored maximum to `max_index`. Never lowers it.
	#[tracing::instrument(skip(self), fields(kind = kind.as_str(), group_id, max_index))]
	pub async fn sync_max_resource_index(
		&self,
		kind: ResourceIndexKind,
		group_id: i64,
		max_index: i64,
	) -> Result<()> {
		let sql = format!(
			r#"
			INSERT INTO {} (group_id, max_index) VALUES (?, ?)
			ON CONFLICT(group_id) DO UPDATE SET max_index = MAX(max_index, excluded.max_index)
			"#,
			kind.table()
		);
		sqlx::query(&sql)
			.bind(group_id)
			.bind(max_index)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(kind = kind.as_str(), group_id))]
	pub async fn delete_resource_index(&self, kind: ResourceIndexKind, group_id: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		delete_resource_index(&mut *conn, kind, group_id).await
	}
}

#[async_trait]
impl ResourceIndexStore for ResourceIndexRepository {
	async fn get_next_resource_index(&self, kind: ResourceIndexKind, group_id: i64) -> Result<i64> {
		ResourceIndexRepository::get_next_resource_index(self, kind, group_id).await
	}

	async fn get_max_resource_index(
		&self,
		kind: ResourceIndexKind,
		group_id: i64,
	) -> Result<Option<i64>> {
		ResourceIndexRepository::get_max_resource_index(self, kind, group_id).await
	}

	async fn sync_max_resource_index(
		&self,
		kind: ResourceIndexKind,
		group_id: i64,
		max_index: i64,
	) -> Result<()> {
		ResourceIndexRepository::sync_max_resource_index(self, kind, group_id, max_index).await
	}

	async fn delete_resource_index(&self, kind: ResourceIndexKind, group_id: i64) -> Result<bool> {
		ResourceIndexRepository::delete_resource_index(self, kind, group_id).await
	}
}

/// Allocate the next index on an open connection, normally inside the
/// caller's transaction. Does not retry.
pub(crate) async fn next_resource_index(
	conn: &mut SqliteConnection,
	kind: ResourceIndexKind,
	group_id: i64,
) -> Result<i64> {
	let select = format!("SELECT max_index FROM {} WHERE group_id = ?", kind.table());
	let prev = sqlx::query_scalar::<_, i64>(&select)
		.bind(group_id)
		.fetch_optional(&mut *conn)
		.await?
		.unwrap_or(0);

	let upsert = format!(
		r#"
		INSERT INTO {} (group_id, max_index) VALUES (?, 1)
		ON CONFLICT(group_id) DO UPDATE SET max_index = max_index + 1
		RETURNING max_index
		"#,
		kind.table()
	);
	let next = sqlx::query_scalar::<_, i64>(&upsert)
		.bind(group_id)
		.fetch_one(&mut *conn)
		.await?;

	if next != prev + 1 {
		return Err(DbError::ResourceOutdated {
			kind: kind.as_str(),
			group_id,
		});
	}

	tracing::debug!(kind = kind.as_str(), group_id, index = next, "resource index allocated");
	Ok(next)
}

pub(crate) async fn delete_resource_index(
	conn: &mut SqliteConnection,
	kind: ResourceIndexKind,
	group_id: i64,
) -> Result<bool> {
	let sql = format!("DELETE FROM {} WHERE group_id = ?", kind.table());
	let result = sqlx::query(&sql).bind(group_id).execute(&mut *conn).await?;
	Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	async fn make_repo() -> ResourceIndexRepository {
		ResourceIndexRepository::new(create_test_pool().await)
	}

	#[tokio::test]
	async fn test_sequential_allocation_starts_at_one() {
		let repo = make_repo().await;
		for expected in 1..=3 {
			let index = repo
				.get_next_resource_index(ResourceIndexKind::Issue, 10)
				.await
				.unwrap();
			assert_eq!(index, expected);
		}
		assert_eq!(
			repo.get_max_resource_index(ResourceIndexKind::Issue, 10)
				.await
				.unwrap(),
			Some(3)
		);
	}

	#[tokio::test]
	async fn test_groups_are_independent() {
		let repo = make_repo().await;
		repo.get_next_resource_index(ResourceIndexKind::Issue, 1)
			.await
			.unwrap();
		repo.get_next_resource_index(ResourceIndexKind::Issue, 1)
			.await
			.unwrap();
		let other = repo
			.get_next_resource_index(ResourceIndexKind::Issue, 2)
			.await
			.unwrap();
		assert_eq!(other, 1);
	}

	#[tokio::test]
	async fn test_sync_never_lowers() {
		let repo = make_repo().await;
		repo.sync_max_resource_index(ResourceIndexKind::Issue, 5, 20)
			.await
			.unwrap();
		repo.sync_max_resource_index(ResourceIndexKind::Issue, 5, 7)
			.await
			.unwrap();
		assert_eq!(
			repo.get_max_resource_index(ResourceIndexKind::Issue, 5)
				.await
				.unwrap(),
			Some(20)
		);
		let next = repo
			.get_next_resource_index(ResourceIndexKind::Issue, 5)
			.await
			.unwrap();
		assert_eq!(next, 21);
	}

	#[tokio::test]
	async fn test_delete_resets_group() {
		let repo = make_repo().await;
		repo.get_next_resource_index(ResourceIndexKind::Issue, 9)
			.await
			.unwrap();
		assert!(repo
			.delete_resource_index(ResourceIndexKind::Issue, 9)
			.await
			.unwrap());
		assert!(!repo
			.delete_resource_index(ResourceIndexKind::Issue, 9)
			.await
			.unwrap());
		assert_eq!(
			repo.get_max_resource_index(ResourceIndexKind::Issue, 9)
				.await
				.unwrap(),
			None
		);
	}

	#[tokio::test]
	async fn test_continues_from_externally_raised_max() {
		let pool = create_test_pool().await;
		let mut conn = pool.acquire().await.unwrap();
		next_resource_index(&mut *conn, ResourceIndexKind::Issue, 3)
			.await
			.unwrap();

		sqlx::query("UPDATE issue_index SET max_index = max_index + 5 WHERE group_id = 3")
			.execute(&mut *conn)
			.await
			.unwrap();
		let next = next_resource_index(&mut *conn, ResourceIndexKind::Issue, 3)
			.await
			.unwrap();
		assert_eq!(next, 7);
	}
}
