// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! CI statuses reported against commits.
//!
//! Each (repo, sha) pair has its own index sequence, kept in
//! `commit_status_indexes`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::error::{DbError, Result};
use crate::types::{from_db_time, now_db_time, ListOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatusState {
	Pending,
	Success,
	Error,
	Failure,
	Warning,
}

impl CommitStatusState {
	/// Lower is worse.
	pub fn priority(&self) -> u8 {
		match self {
			CommitStatusState::Error => 0,
			CommitStatusState::Failure => 1,
			CommitStatusState::Warning => 2,
			CommitStatusState::Pending => 3,
			CommitStatusState::Success => 4,
		}
	}

	pub fn no_better_than(&self, other: CommitStatusState) -> bool {
		self.priority() <= other.priority()
	}

	pub fn is_pending(&self) -> bool {
		*self == CommitStatusState::Pending
	}

	pub fn is_success(&self) -> bool {
		*self == CommitStatusState::Success
	}

	pub fn is_error(&self) -> bool {
		*self == CommitStatusState::Error
	}

	pub fn is_failure(&self) -> bool {
		*self == CommitStatusState::Failure
	}

	pub fn is_warning(&self) -> bool {
		*self == CommitStatusState::Warning
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			CommitStatusState::Pending => "pending",
			CommitStatusState::Success => "success",
			CommitStatusState::Error => "error",
			CommitStatusState::Failure => "failure",
			CommitStatusState::Warning => "warning",
		}
	}
}

impl fmt::Display for CommitStatusState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for CommitStatusState {
	type Err = DbError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"pending" => Ok(CommitStatusState::Pending),
			"success" => Ok(CommitStatusState::Success),
			"error" => Ok(CommitStatusState::Error),
			"failure" => Ok(CommitStatusState::Failure),
			"warning" => Ok(CommitStatusState::Warning),
			other => Err(DbError::InvalidInput(format!("unknown commit status state: {other}"))),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
	pub id: i64,
	pub index: i64,
	pub repo_id: i64,
	pub state: CommitStatusState,
	pub sha: String,
	pub target_url: String,
	pub description: String,
	pub context: String,
	pub context_hash: String,
	pub creator_id: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommitStatus {
	pub repo_id: i64,
	pub sha: String,
	pub creator_id: i64,
	pub state: CommitStatusState,
	pub target_url: String,
	pub description: String,
	pub context: String,
}

/// The worst state among `statuses`, or `None` when there are none.
pub fn calc_commit_status(statuses: &[CommitStatus]) -> Option<CommitStatusState> {
	statuses.iter().map(|s| s.state).min_by_key(|s| s.priority())
}

pub fn hash_context(context: &str) -> String {
	hex::encode(Sha256::digest(context.as_bytes()))
}

#[async_trait]
pub trait CommitStatusStore: Send + Sync {
	async fn new_commit_status(&self, status: &NewCommitStatus) -> Result<CommitStatus>;
	async fn get_latest_commit_statuses(&self, repo_id: i64, sha: &str) -> Result<Vec<CommitStatus>>;
	async fn list_commit_statuses(&self, repo_id: i64, sha: &str, opts: &ListOptions) -> Result<Vec<CommitStatus>>;
}

#[derive(Clone)]
pub struct CommitStatusRepository {
	pool: SqlitePool,
}

impl CommitStatusRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, status), fields(repo_id = status.repo_id, sha = %status.sha, state = %status.state))]
	pub async fn new_commit_status(&self, status: &NewCommitStatus) -> Result<CommitStatus> {
		let sha = status.sha.trim();
		if sha.is_empty() {
			return Err(DbError::InvalidInput("commit status requires a sha".to_string()));
		}

		let mut tx = self.pool.begin().await?;
		let index = next_commit_status_index(&mut *tx, status.repo_id, sha).await?;
		let now = now_db_time();
		let result = sqlx::query(
			r#"
			INSERT INTO commit_statuses (idx, repo_id, state, sha, target_url, description, context,
				context_hash, creator_id, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(index)
		.bind(status.repo_id)
		.bind(status.state.as_str())
		.bind(sha)
		.bind(&status.target_url)
		.bind(&status.description)
		.bind(&status.context)
		.bind(hash_context(&status.context))
		.bind(status.creator_id)
		.bind(&now)
		.bind(&now)
		.execute(&mut *tx)
		.await?;
		let id = result.last_insert_rowid();
		let row = sqlx::query(&format!("{SELECT_COMMIT_STATUS} WHERE id = ?"))
			.bind(id)
			.fetch_one(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::debug!(status_id = id, index, "commit status created");
		row_to_commit_status(&row)
	}

	/// The newest status for each distinct context, oldest context first.
	#[tracing::instrument(skip(self), fields(repo_id, sha))]
	pub async fn get_latest_commit_statuses(&self, repo_id: i64, sha: &str) -> Result<Vec<CommitStatus>> {
		let rows = sqlx::query(&format!(
			r#"{SELECT_COMMIT_STATUS}
			WHERE id IN (
				SELECT MAX(id) FROM commit_statuses WHERE repo_id = ?1 AND sha = ?2 GROUP BY context_hash
			)
			ORDER BY id ASC"#
		))
		.bind(repo_id)
		.bind(sha)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_commit_status).collect()
	}

	#[tracing::instrument(skip(self, opts), fields(repo_id, sha))]
	pub async fn list_commit_statuses(&self, repo_id: i64, sha: &str, opts: &ListOptions) -> Result<Vec<CommitStatus>> {
		let (limit, offset) = opts.limit_offset();
		let rows = sqlx::query(&format!(
			"{SELECT_COMMIT_STATUS} WHERE repo_id = ? AND sha = ? ORDER BY idx DESC LIMIT ? OFFSET ?"
		))
		.bind(repo_id)
		.bind(sha)
		.bind(limit)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_commit_status).collect()
	}
}

#[async_trait]
impl CommitStatusStore for CommitStatusRepository {
	async fn new_commit_status(&self, status: &NewCommitStatus) -> Result<CommitStatus> {
		CommitStatusRepository::new_commit_status(self, status).await
	}

	async fn get_latest_commit_statuses(&self, repo_id: i64, sha: &str) -> Result<Vec<CommitStatus>> {
		CommitStatusRepository::get_latest_commit_statuses(self, repo_id, sha).await
	}

	async fn list_commit_statuses(&self, repo_id: i64, sha: &str, opts: &ListOptions) -> Result<Vec<CommitStatus>> {
		CommitStatusRepository::list_commit_statuses(self, repo_id, sha, opts).await
	}
}

const SELECT_COMMIT_STATUS: &str = r#"
	SELECT id, idx, repo_id, state, sha, target_url, description, context, context_hash,
		creator_id, created_at, updated_at
	FROM commit_statuses"#;

async fn next_commit_status_index(conn: &mut SqliteConnection, repo_id: i64, sha: &str) -> Result<i64> {
	let index: i64 = sqlx::query_scalar(
		r#"
		INSERT INTO commit_status_indexes (repo_id, sha, max_index) VALUES (?, ?, 1)
		ON CONFLICT(repo_id, sha) DO UPDATE SET max_index = max_index + 1
		RETURNING max_index
		"#,
	)
	.bind(repo_id)
	.bind(sha)
	.fetch_one(&mut *conn)
	.await?;
	Ok(index)
}

fn row_to_commit_status(row: &SqliteRow) -> Result<CommitStatus> {
	let state: String = row.get("state");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(CommitStatus {
		id: row.get("id"),
		index: row.get("idx"),
		repo_id: row.get("repo_id"),
		state: state.parse()?,
		sha: row.get("sha"),
		target_url: row.get("target_url"),
		description: row.get("description"),
		context: row.get("context"),
		context_hash: row.get("context_hash"),
		creator_id: row.get("creator_id"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}
