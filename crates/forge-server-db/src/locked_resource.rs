// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Advisory locks keyed by `(lock_type, lock_key)`.
//!
//! Taking a lock writes the row, which holds SQLite's write lock until the
//! surrounding transaction ends. The row also carries a counter that callers
//! may use as a small piece of shared state guarded by the lock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool},
	Row,
};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedResource {
	pub lock_type: String,
	pub lock_key: i64,
	pub counter: i64,
}

#[async_trait]
pub trait LockedResourceStore: Send + Sync {
	async fn get_locked_resource(&self, lock_type: &str, lock_key: i64) -> Result<LockedResource>;
	async fn update_locked_resource_value(
		&self,
		lock_type: &str,
		lock_key: i64,
		counter: i64,
	) -> Result<()>;
	async fn delete_locked_resource(&self, lock_type: &str, lock_key: i64) -> Result<bool>;
	async fn delete_locked_resource_type(&self, lock_type: &str) -> Result<u64>;
	async fn temporarily_lock(&self, lock_type: &str, lock_key: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct LockedResourceRepository {
	pool: SqlitePool,
}

impl LockedResourceRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self), fields(lock_type, lock_key))]
	pub async fn get_locked_resource(&self, lock_type: &str, lock_key: i64) -> Result<LockedResource> {
		let mut tx = self.pool.begin().await?;
		let resource = get_locked_resource(&mut *tx, lock_type, lock_key).await?;
		tx.commit().await?;
		Ok(resource)
	}

	#[tracing::instrument(skip(self), fields(lock_type, lock_key, counter))]
	pub async fn update_locked_resource_value(
		&self,
		lock_type: &str,
		lock_key: i64,
		counter: i64,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		get_locked_resource(&mut *tx, lock_type, lock_key).await?;
		update_locked_resource_value(&mut *tx, lock_type, lock_key, counter).await?;
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(lock_type, lock_key))]
	pub async fn delete_locked_resource(&self, lock_type: &str, lock_key: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		delete_locked_resource(&mut *conn, lock_type, lock_key).await
	}

	#[tracing::instrument(skip(self), fields(lock_type))]
	pub async fn delete_locked_resource_type(&self, lock_type: &str) -> Result<u64> {
		let result = sqlx::query("DELETE FROM locked_resources WHERE lock_type = ?")
			.bind(lock_type)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self), fields(lock_type, lock_key))]
	pub async fn temporarily_lock(&self, lock_type: &str, lock_key: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		temporarily_lock(&mut *tx, lock_type, lock_key).await?;
		tx.commit().await?;
		Ok(())
	}
}

#[async_trait]
impl LockedResourceStore for LockedResourceRepository {
	async fn get_locked_resource(&self, lock_type: &str, lock_key: i64) -> Result<LockedResource> {
		LockedResourceRepository::get_locked_resource(self, lock_type, lock_key).await
	}

	async fn update_locked_resource_value(
		&self,
		lock_type: &str,
		lock_key: i64,
		counter: i64,
	) -> Result<()> {
		LockedResourceRepository::update_locked_resource_value(self, lock_type, lock_key, counter)
			.await
	}

	async fn delete_locked_resource(&self, lock_type: &str, lock_key: i64) -> Result<bool> {
		LockedResourceRepository::delete_locked_resource(self, lock_type, lock_key).await
	}

	async fn delete_locked_resource_type(&self, lock_type: &str) -> Result<u64> {
		LockedResourceRepository::delete_locked_resource_type(self, lock_type).await
	}

	async fn temporarily_lock(&self, lock_type: &str, lock_key: i64) -> Result<()> {
		LockedResourceRepository::temporarily_lock(self, lock_type, lock_key).await
	}
}

/// Take the lock inside the caller's transaction and return the current row.
/// The no-op update on conflict makes the statement a write either way.
pub(crate) async fn get_locked_resource(
	conn: &mut SqliteConnection,
	lock_type: &str,
	lock_key: i64,
) -> Result<LockedResource> {
	let row = sqlx::query(
		r#"
		INSERT INTO locked_resources (lock_type, lock_key, counter) VALUES (?, ?, 0)
		ON CONFLICT(lock_type, lock_key) DO UPDATE SET counter = counter
		RETURNING lock_type, lock_key, counter
		"#,
	)
	.bind(lock_type)
	.bind(lock_key)
	.fetch_one(&mut *conn)
	.await?;

	Ok(LockedResource {
		lock_type: row.get("lock_type"),
		lock_key: row.get("lock_key"),
		counter: row.get("counter"),
	})
}

pub(crate) async fn update_locked_resource_value(
	conn: &mut SqliteConnection,
	lock_type: &str,
	lock_key: i64,
	counter: i64,
) -> Result<()> {
	sqlx::query("UPDATE locked_resources SET counter = ? WHERE lock_type = ? AND lock_key = ?")
		.bind(counter)
		.bind(lock_type)
		.bind(lock_key)
		.execute(&mut *conn)
		.await?;
	Ok(())
}

pub(crate) async fn delete_locked_resource(
	conn: &mut SqliteConnection,
	lock_type: &str,
	lock_key: i64,
) -> Result<bool> {
	let result = sqlx::query("DELETE FROM locked_resources WHERE lock_type = ? AND lock_key = ?")
		.bind(lock_type)
		.bind(lock_key)
		.execute(&mut *conn)
		.await?;
	Ok(result.rows_affected() > 0)
}

/// Hold the lock for the rest of the caller's transaction without leaving a
/// row behind once it commits.
pub(crate) async fn temporarily_lock(
	conn: &mut SqliteConnection,
	lock_type: &str,
	lock_key: i64,
) -> Result<()> {
	get_locked_resource(&mut *conn, lock_type, lock_key).await?;
	delete_locked_resource(&mut *conn, lock_type, lock_key).await?;
	tracing::debug!(lock_type, lock_key, "temporary lock taken");
	Ok(())
}
