// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Releases and the lightweight tag records that back them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqlitePool, SqliteRow},
	Row,
};

use crate::error::{map_unique_violation, DbError, Result};
use crate::types::{from_db_time, now_db_time, ListOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
	pub id: i64,
	pub repo_id: i64,
	pub publisher_id: i64,
	pub tag_name: String,
	pub lower_tag_name: String,
	pub target: String,
	pub title: String,
	pub sha1: String,
	pub num_commits: i64,
	pub note: String,
	pub is_draft: bool,
	pub is_prerelease: bool,
	/// A bare tag with no release notes attached.
	pub is_tag: bool,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewRelease {
	pub repo_id: i64,
	pub publisher_id: i64,
	pub tag_name: String,
	pub target: String,
	pub title: String,
	pub sha1: String,
	pub num_commits: i64,
	pub note: String,
	pub is_draft: bool,
	pub is_prerelease: bool,
	pub is_tag: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseListOptions {
	pub include_drafts: bool,
	pub include_tags: bool,
	pub is_prerelease: Option<bool>,
	pub list: ListOptions,
}

#[async_trait]
pub trait ReleaseStore: Send + Sync {
	async fn insert_release(&self, release: &NewRelease) -> Result<Release>;
	async fn get_release(&self, repo_id: i64, tag_name: &str) -> Result<Option<Release>>;
	async fn get_release_by_id(&self, id: i64) -> Result<Option<Release>>;
	async fn list_releases(&self, repo_id: i64, opts: &ReleaseListOptions) -> Result<Vec<Release>>;
	async fn count_releases(&self, repo_id: i64, opts: &ReleaseListOptions) -> Result<i64>;
	async fn update_release(&self, release: &Release) -> Result<Release>;
	async fn delete_release_by_id(&self, id: i64) -> Result<()>;
	async fn push_update_tag(
		&self,
		repo_id: i64,
		tag_name: &str,
		sha1: &str,
		publisher_id: i64,
		num_commits: i64,
	) -> Result<Release>;
}

#[derive(Clone)]
pub struct ReleaseRepository {
	pool: SqlitePool,
}

impl ReleaseRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, release), fields(repo_id = release.repo_id, tag = %release.tag_name))]
	pub async fn insert_release(&self, release: &NewRelease) -> Result<Release> {
		let tag_name = release.tag_name.trim();
		if tag_name.is_empty() {
			return Err(DbError::InvalidInput("release tag name is empty".to_string()));
		}

		let result = sqlx::query(
			r#"
			INSERT INTO releases (repo_id, publisher_id, tag_name, lower_tag_name, target, title, sha1,
				num_commits, note, is_draft, is_prerelease, is_tag, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(release.repo_id)
		.bind(release.publisher_id)
		.bind(tag_name)
		.bind(tag_name.to_lowercase())
		.bind(&release.target)
		.bind(&release.title)
		.bind(&release.sha1)
		.bind(release.num_commits)
		.bind(&release.note)
		.bind(release.is_draft)
		.bind(release.is_prerelease)
		.bind(release.is_tag)
		.bind(now_db_time())
		.execute(&self.pool)
		.await
		.map_err(|e| map_unique_violation(e, || DbError::ReleaseAlreadyExist(tag_name.to_string())))?;

		let id = result.last_insert_rowid();
		tracing::debug!(release_id = id, "release created");
		self.get_release_by_id(id)
			.await?
			.ok_or_else(|| DbError::Internal(format!("release {id} vanished after insert")))
	}

	/// Tag lookup is case-insensitive.
	#[tracing::instrument(skip(self), fields(repo_id, tag_name))]
	pub async fn get_release(&self, repo_id: i64, tag_name: &str) -> Result<Option<Release>> {
		let row = sqlx::query(&format!("{SELECT_RELEASE} WHERE repo_id = ? AND lower_tag_name = ?"))
			.bind(repo_id)
			.bind(tag_name.to_lowercase())
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_release(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(release_id = id))]
	pub async fn get_release_by_id(&self, id: i64) -> Result<Option<Release>> {
		let row = sqlx::query(&format!("{SELECT_RELEASE} WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_release(&r)).transpose()
	}

	#[tracing::instrument(skip(self, opts), fields(repo_id))]
	pub async fn list_releases(&self, repo_id: i64, opts: &ReleaseListOptions) -> Result<Vec<Release>> {
		let (limit, offset) = opts.list.limit_offset();
		let rows = sqlx::query(&format!(
			"{SELECT_RELEASE} {RELEASE_FILTER} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
		))
		.bind(repo_id)
		.bind(opts.include_drafts)
		.bind(opts.include_tags)
		.bind(opts.is_prerelease)
		.bind(opts.is_prerelease)
		.bind(limit)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_release).collect()
	}

	#[tracing::instrument(skip(self, opts), fields(repo_id))]
	pub async fn count_releases(&self, repo_id: i64, opts: &ReleaseListOptions) -> Result<i64> {
		let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM releases {RELEASE_FILTER}"))
			.bind(repo_id)
			.bind(opts.include_drafts)
			.bind(opts.include_tags)
			.bind(opts.is_prerelease)
			.bind(opts.is_prerelease)
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}

	#[tracing::instrument(skip(self, release), fields(release_id = release.id))]
	pub async fn update_release(&self, release: &Release) -> Result<Release> {
		let result = sqlx::query(
			r#"
			UPDATE releases SET tag_name = ?, lower_tag_name = ?, target = ?, title = ?, sha1 = ?,
				num_commits = ?, note = ?, is_draft = ?, is_prerelease = ?, is_tag = ?
			WHERE id = ?
			"#,
		)
		.bind(&release.tag_name)
		.bind(release.tag_name.to_lowercase())
		.bind(&release.target)
		.bind(&release.title)
		.bind(&release.sha1)
		.bind(release.num_commits)
		.bind(&release.note)
		.bind(release.is_draft)
		.bind(release.is_prerelease)
		.bind(release.is_tag)
		.bind(release.id)
		.execute(&self.pool)
		.await
		.map_err(|e| map_unique_violation(e, || DbError::ReleaseAlreadyExist(release.tag_name.clone())))?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("release {}", release.id)));
		}
		self.get_release_by_id(release.id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("release {}", release.id)))
	}

	#[tracing::instrument(skip(self), fields(release_id = id))]
	pub async fn delete_release_by_id(&self, id: i64) -> Result<()> {
		let result = sqlx::query("DELETE FROM releases WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("release {id}")));
		}
		tracing::debug!("release deleted");
		Ok(())
	}

	/// Record a pushed tag: refresh the commit of an existing release for the
	/// tag, or create a bare tag record.
	#[tracing::instrument(skip(self), fields(repo_id, tag_name, sha1))]
	pub async fn push_update_tag(
		&self,
		repo_id: i64,
		tag_name: &str,
		sha1: &str,
		publisher_id: i64,
		num_commits: i64,
	) -> Result<Release> {
		match self.get_release(repo_id, tag_name).await? {
			Some(existing) => {
				self.update_release(&Release {
					sha1: sha1.to_string(),
					num_commits,
					..existing
				})
				.await
			}
			None => {
				self.insert_release(&NewRelease {
					repo_id,
					publisher_id,
					tag_name: tag_name.to_string(),
					title: tag_name.to_string(),
					sha1: sha1.to_string(),
					num_commits,
					is_tag: true,
					..Default::default()
				})
				.await
			}
		}
	}
}

#[async_trait]
impl ReleaseStore for ReleaseRepository {
	async fn insert_release(&self, release: &NewRelease) -> Result<Release> {
		ReleaseRepository::insert_release(self, release).await
	}

	async fn get_release(&self, repo_id: i64, tag_name: &str) -> Result<Option<Release>> {
		ReleaseRepository::get_release(self, repo_id, tag_name).await
	}

	async fn get_release_by_id(&self, id: i64) -> Result<Option<Release>> {
		ReleaseRepository::get_release_by_id(self, id).await
	}

	async fn list_releases(&self, repo_id: i64, opts: &ReleaseListOptions) -> Result<Vec<Release>> {
		ReleaseRepository::list_releases(self, repo_id, opts).await
	}

	async fn count_releases(&self, repo_id: i64, opts: &ReleaseListOptions) -> Result<i64> {
		ReleaseRepository::count_releases(self, repo_id, opts).await
	}

	async fn update_release(&self, release: &Release) -> Result<Release> {
		ReleaseRepository::update_release(self, release).await
	}

	async fn delete_release_by_id(&self, id: i64) -> Result<()> {
		ReleaseRepository::delete_release_by_id(self, id).await
	}

	async fn push_update_tag(
		&self,
		repo_id: i64,
		tag_name: &str,
		sha1: &str,
		publisher_id: i64,
		num_commits: i64,
	) -> Result<Release> {
		ReleaseRepository::push_update_tag(self, repo_id, tag_name, sha1, publisher_id, num_commits).await
	}
}

const SELECT_RELEASE: &str = r#"
	SELECT id, repo_id, publisher_id, tag_name, lower_tag_name, target, title, sha1, num_commits,
		note, is_draft, is_prerelease, is_tag, created_at
	FROM releases"#;

const RELEASE_FILTER: &str = r#"
	WHERE repo_id = ? AND (? OR is_draft = 0) AND (? OR is_tag = 0)
		AND (? IS NULL OR is_prerelease = ?)"#;

fn row_to_release(row: &SqliteRow) -> Result<Release> {
	let created_at: String = row.get("created_at");
	Ok(Release {
		id: row.get("id"),
		repo_id: row.get("repo_id"),
		publisher_id: row.get("publisher_id"),
		tag_name: row.get("tag_name"),
		lower_tag_name: row.get("lower_tag_name"),
		target: row.get("target"),
		title: row.get("title"),
		sha1: row.get("sha1"),
		num_commits: row.get("num_commits"),
		note: row.get("note"),
		is_draft: row.get("is_draft"),
		is_prerelease: row.get("is_prerelease"),
		is_tag: row.get("is_tag"),
		created_at: from_db_time(&created_at)?,
	})
}
