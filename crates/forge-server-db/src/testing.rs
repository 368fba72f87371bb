// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::pool::run_migrations;
use crate::types::to_db_time;

/// In-memory database with the full schema. A single connection keeps every
/// query on the same in-memory database.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")
		.unwrap()
		.foreign_keys(true);
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

pub async fn insert_user(pool: &SqlitePool, name: &str) -> i64 {
	insert_account(pool, name, 0).await
}

pub async fn insert_org(pool: &SqlitePool, name: &str) -> i64 {
	insert_account(pool, name, 1).await
}

async fn insert_account(pool: &SqlitePool, name: &str, kind: i64) -> i64 {
	let now = to_db_time(&Utc::now());
	sqlx::query(
		r#"
		INSERT INTO users (name, lower_name, email, kind, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(name)
	.bind(name.to_lowercase())
	.bind(format!("{}@example.com", name.to_lowercase()))
	.bind(kind)
	.bind(&now)
	.bind(&now)
	.execute(pool)
	.await
	.unwrap()
	.last_insert_rowid()
}

pub async fn insert_repo(pool: &SqlitePool, owner_id: i64, name: &str, is_private: bool) -> i64 {
	let now = to_db_time(&Utc::now());
	let owner_name: String = sqlx::query_scalar("SELECT name FROM users WHERE id = ?")
		.bind(owner_id)
		.fetch_one(pool)
		.await
		.unwrap();
	sqlx::query(
		r#"
		INSERT INTO repos (owner_id, owner_name, lower_name, name, is_private, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(owner_id)
	.bind(owner_name)
	.bind(name.to_lowercase())
	.bind(name)
	.bind(is_private)
	.bind(&now)
	.bind(&now)
	.execute(pool)
	.await
	.unwrap()
	.last_insert_rowid()
}
