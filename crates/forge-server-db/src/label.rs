// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repository and organization labels, and their attachment to issues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::comment::{create_comment, CommentType, CreateCommentOptions};
use crate::error::{DbError, Result};
use crate::issue::{fetch_issue, Issue};
use crate::types::{from_db_time, now_db_time};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
	pub id: i64,
	pub repo_id: Option<i64>,
	pub org_id: Option<i64>,
	pub name: String,
	pub description: String,
	pub color: String,
	pub num_issues: i64,
	pub num_closed_issues: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Label {
	pub fn num_open_issues(&self) -> i64 {
		self.num_issues - self.num_closed_issues
	}

	pub fn is_org_label(&self) -> bool {
		self.org_id.is_some()
	}
}

/// Exactly one of `repo_id` or `org_id` should be set.
#[derive(Debug, Clone, Default)]
pub struct NewLabel {
	pub repo_id: Option<i64>,
	pub org_id: Option<i64>,
	pub name: String,
	pub description: String,
	pub color: String,
}

#[derive(Debug, Clone, Default)]
pub struct LabelUpdate {
	pub name: Option<String>,
	pub description: Option<String>,
	pub color: Option<String>,
}

/// Normalize `#rgb`, `rgb`, `#rrggbb` or `rrggbb` to lowercase `#rrggbb`.
pub fn normalize_label_color(color: &str) -> Result<String> {
	let trimmed = color.trim();
	let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
	if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
		return Err(DbError::InvalidLabelColor(color.to_string()));
	}
	let hex = hex.to_ascii_lowercase();
	match hex.len() {
		6 => Ok(format!("#{hex}")),
		3 => Ok(hex.chars().fold(String::from("#"), |mut out, c| {
			out.push(c);
			out.push(c);
			out
		})),
		_ => Err(DbError::InvalidLabelColor(color.to_string())),
	}
}

#[async_trait]
pub trait LabelStore: Send + Sync {
	async fn new_label(&self, label: &NewLabel) -> Result<Label>;
	async fn get_label_in_repo_by_id(&self, repo_id: i64, id: i64) -> Result<Option<Label>>;
	async fn get_label_in_repo_by_name(&self, repo_id: i64, name: &str) -> Result<Option<Label>>;
	async fn list_labels_by_repo(&self, repo_id: i64) -> Result<Vec<Label>>;
	async fn list_labels_by_org(&self, org_id: i64) -> Result<Vec<Label>>;
	async fn update_label(&self, id: i64, update: &LabelUpdate) -> Result<Label>;
	async fn delete_label(&self, repo_id: i64, id: i64) -> Result<()>;
	async fn add_label_to_issue(&self, issue_id: i64, label_id: i64, doer_id: i64) -> Result<bool>;
	async fn remove_label_from_issue(&self, issue_id: i64, label_id: i64, doer_id: i64)
		-> Result<bool>;
	async fn replace_issue_labels(&self, issue_id: i64, label_ids: &[i64], doer_id: i64)
		-> Result<()>;
	async fn list_issue_labels(&self, issue_id: i64) -> Result<Vec<Label>>;
	async fn update_label_counters(&self, label_id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct LabelRepository {
	pool: SqlitePool,
}

impl LabelRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, label), fields(repo_id = ?label.repo_id, org_id = ?label.org_id, name = %label.name))]
	pub async fn new_label(&self, label: &NewLabel) -> Result<Label> {
		if label.repo_id.is_some() == label.org_id.is_some() {
			return Err(DbError::InvalidInput(
				"a label belongs to exactly one repository or organization".to_string(),
			));
		}
		let name = label.name.trim();
		if name.is_empty() {
			return Err(DbError::InvalidInput("label name cannot be empty".to_string()));
		}
		let color = normalize_label_color(&label.color)?;

		let now = now_db_time();
		let result = sqlx::query(
			r#"
			INSERT INTO labels (repo_id, org_id, name, description, color, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(label.repo_id)
		.bind(label.org_id)
		.bind(name)
		.bind(&label.description)
		.bind(&color)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;
		let id = result.last_insert_rowid();

		tracing::debug!(label_id = id, "label created");
		let mut conn = self.pool.acquire().await?;
		fetch_label(&mut *conn, id).await
	}

	#[tracing::instrument(skip(self), fields(repo_id, label_id = id))]
	pub async fn get_label_in_repo_by_id(&self, repo_id: i64, id: i64) -> Result<Option<Label>> {
		let row = sqlx::query(&format!("{SELECT_LABEL} WHERE id = ? AND repo_id = ?"))
			.bind(id)
			.bind(repo_id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_label(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(repo_id, name))]
	pub async fn get_label_in_repo_by_name(&self, repo_id: i64, name: &str) -> Result<Option<Label>> {
		let row = sqlx::query(&format!("{SELECT_LABEL} WHERE repo_id = ? AND name = ?"))
			.bind(repo_id)
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_label(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn list_labels_by_repo(&self, repo_id: i64) -> Result<Vec<Label>> {
		let rows = sqlx::query(&format!("{SELECT_LABEL} WHERE repo_id = ? ORDER BY name ASC"))
			.bind(repo_id)
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(row_to_label).collect()
	}

	#[tracing::instrument(skip(self), fields(org_id))]
	pub async fn list_labels_by_org(&self, org_id: i64) -> Result<Vec<Label>> {
		let rows = sqlx::query(&format!("{SELECT_LABEL} WHERE org_id = ? ORDER BY name ASC"))
			.bind(org_id)
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(row_to_label).collect()
	}

	#[tracing::instrument(skip(self, update), fields(label_id = id))]
	pub async fn update_label(&self, id: i64, update: &LabelUpdate) -> Result<Label> {
		let mut tx = self.pool.begin().await?;
		let mut label = fetch_label(&mut *tx, id).await?;
		if let Some(name) = &update.name {
			let name = name.trim();
			if name.is_empty() {
				return Err(DbError::InvalidInput("label name cannot be empty".to_string()));
			}
			label.name = name.to_string();
		}
		if let Some(description) = &update.description {
			label.description = description.clone();
		}
		if let Some(color) = &update.color {
			label.color = normalize_label_color(color)?;
		}
		sqlx::query(
			"UPDATE labels SET name = ?, description = ?, color = ?, updated_at = ? WHERE id = ?",
		)
		.bind(&label.name)
		.bind(&label.description)
		.bind(&label.color)
		.bind(now_db_time())
		.bind(id)
		.execute(&mut *tx)
		.await?;
		let label = fetch_label(&mut *tx, id).await?;
		tx.commit().await?;
		Ok(label)
	}

	#[tracing::instrument(skip(self), fields(repo_id, label_id = id))]
	pub async fn delete_label(&self, repo_id: i64, id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let result = sqlx::query("DELETE FROM labels WHERE id = ? AND repo_id = ?")
			.bind(id)
			.bind(repo_id)
			.execute(&mut *tx)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("label {id} in repository {repo_id}")));
		}
		sqlx::query("DELETE FROM issue_labels WHERE label_id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM comments WHERE comment_type = ? AND label_id = ?")
			.bind(CommentType::Label.as_i64())
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		tracing::debug!(label_id = id, repo_id, "label deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(issue_id, label_id, doer_id))]
	pub async fn add_label_to_issue(&self, issue_id: i64, label_id: i64, doer_id: i64) -> Result<bool> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		let added = add_label_to_issue(&mut *tx, &issue, label_id, doer_id).await?;
		tx.commit().await?;
		Ok(added)
	}

	#[tracing::instrument(skip(self), fields(issue_id, label_id, doer_id))]
	pub async fn remove_label_from_issue(
		&self,
		issue_id: i64,
		label_id: i64,
		doer_id: i64,
	) -> Result<bool> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		let removed = remove_label_from_issue(&mut *tx, &issue, label_id, doer_id).await?;
		tx.commit().await?;
		Ok(removed)
	}

	/// Make the issue carry exactly `label_ids`, recording a comment for every
	/// label added or removed.
	#[tracing::instrument(skip(self, label_ids), fields(issue_id, doer_id))]
	pub async fn replace_issue_labels(&self, issue_id: i64, label_ids: &[i64], doer_id: i64) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let issue = fetch_issue(&mut *tx, issue_id).await?;
		let current = list_issue_label_ids(&mut *tx, issue_id).await?;
		for label_id in current.iter().filter(|id| !label_ids.contains(id)) {
			remove_label_from_issue(&mut *tx, &issue, *label_id, doer_id).await?;
		}
		for label_id in label_ids.iter().filter(|id| !current.contains(id)) {
			add_label_to_issue(&mut *tx, &issue, *label_id, doer_id).await?;
		}
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(issue_id))]
	pub async fn list_issue_labels(&self, issue_id: i64) -> Result<Vec<Label>> {
		let rows = sqlx::query(&format!(
			r#"{SELECT_LABEL}
			WHERE id IN (SELECT label_id FROM issue_labels WHERE issue_id = ?)
			ORDER BY name ASC"#
		))
		.bind(issue_id)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_label).collect()
	}

	#[tracing::instrument(skip(self), fields(label_id))]
	pub async fn update_label_counters(&self, label_id: i64) -> Result<()> {
		let mut conn = self.pool.acquire().await?;
		update_label_counters(&mut *conn, label_id).await
	}
}

#[async_trait]
impl LabelStore for LabelRepository {
	async fn new_label(&self, label: &NewLabel) -> Result<Label> {
		LabelRepository::new_label(self, label).await
	}

	async fn get_label_in_repo_by_id(&self, repo_id: i64, id: i64) -> Result<Option<Label>> {
		LabelRepository::get_label_in_repo_by_id(self, repo_id, id).await
	}

	async fn get_label_in_repo_by_name(&self, repo_id: i64, name: &str) -> Result<Option<Label>> {
		LabelRepository::get_label_in_repo_by_name(self, repo_id, name).await
	}

	async fn list_labels_by_repo(&self, repo_id: i64) -> Result<Vec<Label>> {
		LabelRepository::list_labels_by_repo(self, repo_id).await
	}

	async fn list_labels_by_org(&self, org_id: i64) -> Result<Vec<Label>> {
		LabelRepository::list_labels_by_org(self, org_id).await
	}

	async fn update_label(&self, id: i64, update: &LabelUpdate) -> Result<Label> {
		LabelRepository::update_label(self, id, update).await
	}

	async fn delete_label(&self, repo_id: i64, id: i64) -> Result<()> {
		LabelRepository::delete_label(self, repo_id, id).await
	}

	async fn add_label_to_issue(&self, issue_id: i64, label_id: i64, doer_id: i64) -> Result<bool> {
		LabelRepository::add_label_to_issue(self, issue_id, label_id, doer_id).await
	}

	async fn remove_label_from_issue(
		&self,
		issue_id: i64,
		label_id: i64,
		doer_id: i64,
	) -> Result<bool> {
		LabelRepository::remove_label_from_issue(self, issue_id, label_id, doer_id).await
	}

	async fn replace_issue_labels(
		&self,
		issue_id: i64,
		label_ids: &[i64],
		doer_id: i64,
	) -> Result<()> {
		LabelRepository::replace_issue_labels(self, issue_id, label_ids, doer_id).await
	}

	async fn list_issue_labels(&self, issue_id: i64) -> Result<Vec<Label>> {
		LabelRepository::list_issue_labels(self, issue_id).await
	}

	async fn update_label_counters(&self, label_id: i64) -> Result<()> {
		LabelRepository::update_label_counters(self, label_id).await
	}
}

const SELECT_LABEL: &str = r#"
	SELECT id, repo_id, org_id, name, description, color, num_issues, num_closed_issues,
		created_at, updated_at
	FROM labels"#;

/// Attach a label. Labels that belong to neither the issue's repository nor
/// its owning organization are ignored and `false` is returned.
pub(crate) async fn add_label_to_issue(
	conn: &mut SqliteConnection,
	issue: &Issue,
	label_id: i64,
	doer_id: i64,
) -> Result<bool> {
	let Some(label) = get_label_by_id(&mut *conn, label_id).await? else {
		tracing::warn!(issue_id = issue.id, label_id, "dropping unknown label");
		return Ok(false);
	};
	let repo_owner: i64 = sqlx::query_scalar("SELECT owner_id FROM repos WHERE id = ?")
		.bind(issue.repo_id)
		.fetch_one(&mut *conn)
		.await?;
	let belongs = label.repo_id == Some(issue.repo_id) || label.org_id == Some(repo_owner);
	if !belongs {
		tracing::warn!(issue_id = issue.id, label_id, "dropping label from another repository");
		return Ok(false);
	}

	let inserted = sqlx::query("INSERT OR IGNORE INTO issue_labels (issue_id, label_id) VALUES (?, ?)")
		.bind(issue.id)
		.bind(label_id)
		.execute(&mut *conn)
		.await?;
	if inserted.rows_affected() == 0 {
		return Ok(false);
	}

	create_comment(
		&mut *conn,
		&CreateCommentOptions {
			label_id: Some(label_id),
			content: "1".to_string(),
			..CreateCommentOptions::new(CommentType::Label, doer_id, issue.id)
		},
	)
	.await?;
	update_label_counters(&mut *conn, label_id).await?;
	Ok(true)
}

pub(crate) async fn remove_label_from_issue(
	conn: &mut SqliteConnection,
	issue: &Issue,
	label_id: i64,
	doer_id: i64,
) -> Result<bool> {
	let removed = sqlx::query("DELETE FROM issue_labels WHERE issue_id = ? AND label_id = ?")
		.bind(issue.id)
		.bind(label_id)
		.execute(&mut *conn)
		.await?;
	if removed.rows_affected() == 0 {
		return Ok(false);
	}
	create_comment(
		&mut *conn,
		&CreateCommentOptions {
			label_id: Some(label_id),
			..CreateCommentOptions::new(CommentType::Label, doer_id, issue.id)
		},
	)
	.await?;
	update_label_counters(&mut *conn, label_id).await?;
	Ok(true)
}

pub(crate) async fn update_label_counters(conn: &mut SqliteConnection, label_id: i64) -> Result<()> {
	sqlx::query(
		r#"
		UPDATE labels SET
			num_issues = (
				SELECT COUNT(*) FROM issue_labels il
				JOIN issues i ON i.id = il.issue_id
				WHERE il.label_id = ?1
			),
			num_closed_issues = (
				SELECT COUNT(*) FROM issue_labels il
				JOIN issues i ON i.id = il.issue_id
				WHERE il.label_id = ?1 AND i.is_closed = 1
			)
		WHERE id = ?1
		"#,
	)
	.bind(label_id)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

pub(crate) async fn list_issue_label_ids(conn: &mut SqliteConnection, issue_id: i64) -> Result<Vec<i64>> {
	let ids = sqlx::query_scalar("SELECT label_id FROM issue_labels WHERE issue_id = ? ORDER BY label_id")
		.bind(issue_id)
		.fetch_all(&mut *conn)
		.await?;
	Ok(ids)
}

async fn get_label_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Label>> {
	let row = sqlx::query(&format!("{SELECT_LABEL} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_label(&r)).transpose()
}

async fn fetch_label(conn: &mut SqliteConnection, id: i64) -> Result<Label> {
	get_label_by_id(conn, id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("label {id}")))
}

fn row_to_label(row: &SqliteRow) -> Result<Label> {
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(Label {
		id: row.get("id"),
		repo_id: row.get("repo_id"),
		org_id: row.get("org_id"),
		name: row.get("name"),
		description: row.get("description"),
		color: row.get("color"),
		num_issues: row.get("num_issues"),
		num_closed_issues: row.get("num_closed_issues"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::issue::{IssueRepository, NewIssueOptions};
	use crate::testing::{create_test_pool, insert_org, insert_repo, insert_user};

	fn repo_label(repo_id: i64, name: &str) -> NewLabel {
		NewLabel {
			repo_id: Some(repo_id),
			name: name.to_string(),
			color: "#ee0701".to_string(),
			..Default::default()
		}
	}

	#[test]
	fn test_normalize_label_color() {
		assert_eq!(normalize_label_color("#ABCDEF").unwrap(), "#abcdef");
		assert_eq!(normalize_label_color("abcdef").unwrap(), "#abcdef");
		assert_eq!(normalize_label_color("#f0a").unwrap(), "#ff00aa");
		assert!(matches!(
			normalize_label_color("#abcd"),
			Err(DbError::InvalidLabelColor(_))
		));
		assert!(normalize_label_color("#gggggg").is_err());
		assert!(normalize_label_color("").is_err());
	}

	#[tokio::test]
	async fn test_label_lifecycle() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo = insert_repo(&pool, alice, "forge", false).await;
		let labels = LabelRepository::new(pool.clone());

		let bug = labels.new_label(&repo_label(repo, "bug")).await.unwrap();
		assert_eq!(bug.color, "#ee0701");
		assert!(labels
			.get_label_in_repo_by_name(repo, "bug")
			.await
			.unwrap()
			.is_some());

		let updated = labels
			.update_label(
				bug.id,
				&LabelUpdate {
					color: Some("0F0".to_string()),
					..Default::default()
				},
			)
			.await
			.unwrap();
		assert_eq!(updated.color, "#00ff00");

		labels.delete_label(repo, bug.id).await.unwrap();
		assert!(labels.list_labels_by_repo(repo).await.unwrap().is_empty());
		assert!(labels.delete_label(repo, bug.id).await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn test_labels_follow_issue_state() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo = insert_repo(&pool, alice, "forge", false).await;
		let labels = LabelRepository::new(pool.clone());
		let issues = IssueRepository::new(pool.clone());
		let bug = labels.new_label(&repo_label(repo, "bug")).await.unwrap();
		let issue = issues
			.new_issue(&NewIssueOptions::new(repo, alice, "crash"))
			.await
			.unwrap();

		assert!(labels.add_label_to_issue(issue.id, bug.id, alice).await.unwrap());
		assert!(!labels.add_label_to_issue(issue.id, bug.id, alice).await.unwrap());
		let bug_now = labels.get_label_in_repo_by_id(repo, bug.id).await.unwrap().unwrap();
		assert_eq!(bug_now.num_issues, 1);
		assert_eq!(bug_now.num_closed_issues, 0);

		issues.change_issue_status(issue.id, alice, true, false).await.unwrap();
		let bug_now = labels.get_label_in_repo_by_id(repo, bug.id).await.unwrap().unwrap();
		assert_eq!(bug_now.num_closed_issues, 1);

		assert!(labels.remove_label_from_issue(issue.id, bug.id, alice).await.unwrap());
		let bug_now = labels.get_label_in_repo_by_id(repo, bug.id).await.unwrap().unwrap();
		assert_eq!(bug_now.num_issues, 0);
	}

	#[tokio::test]
	async fn test_org_labels_and_foreign_labels() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let org = insert_org(&pool, "acme").await;
		let org_repo = insert_repo(&pool, org, "tools", false).await;
		let other_repo = insert_repo(&pool, alice, "forge", false).await;
		let labels = LabelRepository::new(pool.clone());
		let issues = IssueRepository::new(pool.clone());

		let org_label = labels
			.new_label(&NewLabel {
				org_id: Some(org),
				name: "triage".to_string(),
				color: "123".to_string(),
				..Default::default()
			})
			.await
			.unwrap();
		let foreign = labels.new_label(&repo_label(other_repo, "bug")).await.unwrap();
		let issue = issues
			.new_issue(&NewIssueOptions::new(org_repo, alice, "task"))
			.await
			.unwrap();

		labels
			.replace_issue_labels(issue.id, &[org_label.id, foreign.id], alice)
			.await
			.unwrap();
		let attached = labels.list_issue_labels(issue.id).await.unwrap();
		assert_eq!(attached.len(), 1);
		assert_eq!(attached[0].id, org_label.id);
		assert_eq!(labels.list_labels_by_org(org).await.unwrap().len(), 1);

		labels.replace_issue_labels(issue.id, &[], alice).await.unwrap();
		assert!(labels.list_issue_labels(issue.id).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_new_label_requires_single_owner() {
		let pool = create_test_pool().await;
		let labels = LabelRepository::new(pool);
		let err = labels
			.new_label(&NewLabel {
				name: "x".to_string(),
				color: "#fff".to_string(),
				..Default::default()
			})
			.await
			.unwrap_err();
		assert!(err.is_invalid_input());
	}
}
