// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Branch protection rules.
//!
//! A rule name is either a plain branch name, compared case-insensitively,
//! or a glob such as `release/*`, where `*` never crosses a `/`. Id lists
//! are stored as JSON arrays.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnection, SqlitePool, SqliteRow},
	Row,
};

use crate::access::access_mode_by_id;
use crate::error::{map_unique_violation, DbError, Result};
use crate::pattern::{self, glob_match};
use crate::pull::PullRequest;
use crate::repo::fetch_repository;
use crate::review::{Review, ReviewType};
use crate::types::{from_db_time, now_db_time, AccessMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedBranch {
	pub id: i64,
	pub repo_id: i64,
	pub rule_name: String,
	pub can_push: bool,
	pub enable_whitelist: bool,
	pub whitelist_user_ids: Vec<i64>,
	pub whitelist_team_ids: Vec<i64>,
	pub enable_merge_whitelist: bool,
	pub merge_whitelist_user_ids: Vec<i64>,
	pub merge_whitelist_team_ids: Vec<i64>,
	pub enable_status_check: bool,
	pub status_check_contexts: Vec<String>,
	pub enable_approvals_whitelist: bool,
	pub approvals_whitelist_user_ids: Vec<i64>,
	pub approvals_whitelist_team_ids: Vec<i64>,
	pub required_approvals: i64,
	pub block_on_rejected_reviews: bool,
	pub block_on_official_review_requests: bool,
	pub block_on_outdated_branch: bool,
	pub dismiss_stale_approvals: bool,
	pub ignore_stale_approvals: bool,
	pub require_signed_commits: bool,
	/// `;`-separated globs.
	pub protected_file_patterns: String,
	/// `;`-separated globs.
	pub unprotected_file_patterns: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl ProtectedBranch {
	/// An unsaved rule with everything disabled.
	pub fn new(repo_id: i64, rule_name: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: 0,
			repo_id,
			rule_name: rule_name.into(),
			can_push: false,
			enable_whitelist: false,
			whitelist_user_ids: Vec::new(),
			whitelist_team_ids: Vec::new(),
			enable_merge_whitelist: false,
			merge_whitelist_user_ids: Vec::new(),
			merge_whitelist_team_ids: Vec::new(),
			enable_status_check: false,
			status_check_contexts: Vec::new(),
			enable_approvals_whitelist: false,
			approvals_whitelist_user_ids: Vec::new(),
			approvals_whitelist_team_ids: Vec::new(),
			required_approvals: 0,
			block_on_rejected_reviews: false,
			block_on_official_review_requests: false,
			block_on_outdated_branch: false,
			dismiss_stale_approvals: false,
			ignore_stale_approvals: false,
			require_signed_commits: false,
			protected_file_patterns: String::new(),
			unprotected_file_patterns: String::new(),
			created_at: now,
			updated_at: now,
		}
	}

	pub fn is_plain_name(&self) -> bool {
		pattern::is_plain_name(&self.rule_name)
	}

	/// Does this rule cover `branch`? An invalid glob only matches itself.
	pub fn matches(&self, branch: &str) -> bool {
		if self.is_plain_name() {
			return self.rule_name.eq_ignore_ascii_case(branch);
		}
		if pattern::compile(&self.rule_name).is_empty() {
			return self.rule_name == branch;
		}
		glob_match(&self.rule_name, branch, true)
	}

	/// Count official, undismissed approvals (ignoring stale ones when
	/// configured) against `required_approvals`.
	pub fn has_enough_approvals(&self, reviews: &[Review]) -> bool {
		if self.required_approvals == 0 {
			return true;
		}
		let approvals = reviews
			.iter()
			.filter(|r| r.review_type == ReviewType::Approve && r.official && !r.dismissed)
			.filter(|r| !(self.ignore_stale_approvals && r.stale))
			.count() as i64;
		approvals >= self.required_approvals
	}

	pub fn merge_blocked_by_rejected_review(&self, reviews: &[Review]) -> bool {
		self.block_on_rejected_reviews
			&& reviews
				.iter()
				.any(|r| r.review_type == ReviewType::Reject && r.official && !r.dismissed)
	}

	pub fn merge_blocked_by_official_review_requests(&self, reviews: &[Review]) -> bool {
		self.block_on_official_review_requests
			&& reviews
				.iter()
				.any(|r| r.review_type == ReviewType::Request && r.official && !r.dismissed)
	}

	pub fn merge_blocked_by_outdated_branch(&self, pr: &PullRequest) -> bool {
		self.block_on_outdated_branch && pr.commits_behind > 0
	}

	pub fn get_protected_file_patterns(&self) -> Vec<Pattern> {
		file_patterns(&self.protected_file_patterns)
	}

	pub fn get_unprotected_file_patterns(&self) -> Vec<Pattern> {
		file_patterns(&self.unprotected_file_patterns)
	}

	pub fn is_protected_file(&self, path: &str) -> bool {
		matches_any(&self.get_protected_file_patterns(), path)
	}

	pub fn is_unprotected_file(&self, path: &str) -> bool {
		matches_any(&self.get_unprotected_file_patterns(), path)
	}
}

fn file_patterns(patterns: &str) -> Vec<Pattern> {
	patterns
		.to_lowercase()
		.split(';')
		.map(str::trim)
		.filter(|p| !p.is_empty())
		.flat_map(pattern::compile)
		.collect()
}

fn matches_any(patterns: &[Pattern], path: &str) -> bool {
	let path = path.trim().to_lowercase();
	let options = MatchOptions {
		case_sensitive: true,
		require_literal_separator: true,
		require_literal_leading_dot: false,
	};
	patterns.iter().any(|p| p.matches_with(&path, options))
}

#[async_trait]
pub trait ProtectedBranchStore: Send + Sync {
	async fn update_protect_branch(&self, rule: &ProtectedBranch) -> Result<ProtectedBranch>;
	async fn get_protected_branch_rule_by_name(&self, repo_id: i64, rule_name: &str)
		-> Result<Option<ProtectedBranch>>;
	async fn get_protected_branch_rule_by_id(&self, repo_id: i64, id: i64) -> Result<Option<ProtectedBranch>>;
	async fn find_repo_protected_branch_rules(&self, repo_id: i64) -> Result<Vec<ProtectedBranch>>;
	async fn get_first_matching_protected_branch_rule(
		&self,
		repo_id: i64,
		branch: &str,
	) -> Result<Option<ProtectedBranch>>;
	async fn delete_protected_branch(&self, repo_id: i64, id: i64) -> Result<()>;
	async fn can_user_push(&self, rule: &ProtectedBranch, user_id: i64) -> Result<bool>;
	async fn is_user_merge_whitelisted(&self, rule: &ProtectedBranch, user_id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct ProtectedBranchRepository {
	pool: SqlitePool,
}

impl ProtectedBranchRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert (`id == 0`) or update a rule. Whitelisted users without write
	/// access and teams outside the owning organization are dropped.
	#[tracing::instrument(skip(self, rule), fields(repo_id = rule.repo_id, rule_name = %rule.rule_name))]
	pub async fn update_protect_branch(&self, rule: &ProtectedBranch) -> Result<ProtectedBranch> {
		let rule_name = rule.rule_name.trim();
		if rule_name.is_empty() {
			return Err(DbError::InvalidInput("rule name cannot be empty".to_string()));
		}

		let mut tx = self.pool.begin().await?;
		let repo = fetch_repository(&mut *tx, rule.repo_id).await?;

		let whitelist_user_ids = writers_only(&mut *tx, repo.id, &rule.whitelist_user_ids).await?;
		let merge_whitelist_user_ids = writers_only(&mut *tx, repo.id, &rule.merge_whitelist_user_ids).await?;
		let approvals_whitelist_user_ids =
			writers_only(&mut *tx, repo.id, &rule.approvals_whitelist_user_ids).await?;
		let whitelist_team_ids = org_teams_only(&mut *tx, repo.owner_id, &rule.whitelist_team_ids).await?;
		let merge_whitelist_team_ids = org_teams_only(&mut *tx, repo.owner_id, &rule.merge_whitelist_team_ids).await?;
		let approvals_whitelist_team_ids =
			org_teams_only(&mut *tx, repo.owner_id, &rule.approvals_whitelist_team_ids).await?;

		let now = now_db_time();
		let id = if rule.id == 0 {
			sqlx::query("INSERT INTO protected_branches (repo_id, rule_name, created_at, updated_at) VALUES (?, ?, ?, ?)")
				.bind(rule.repo_id)
				.bind(rule_name)
				.bind(&now)
				.bind(&now)
				.execute(&mut *tx)
				.await
				.map_err(|e| rule_exists(e, rule.repo_id, rule_name))?
				.last_insert_rowid()
		} else {
			rule.id
		};

		let result = sqlx::query(
			r#"
			UPDATE protected_branches SET
				rule_name = ?, can_push = ?, enable_whitelist = ?, whitelist_user_ids = ?,
				whitelist_team_ids = ?, enable_merge_whitelist = ?, merge_whitelist_user_ids = ?,
				merge_whitelist_team_ids = ?, enable_status_check = ?, status_check_contexts = ?,
				enable_approvals_whitelist = ?, approvals_whitelist_user_ids = ?,
				approvals_whitelist_team_ids = ?, required_approvals = ?,
				block_on_rejected_reviews = ?, block_on_official_review_requests = ?,
				block_on_outdated_branch = ?, dismiss_stale_approvals = ?,
				ignore_stale_approvals = ?, require_signed_commits = ?,
				protected_file_patterns = ?, unprotected_file_patterns = ?, updated_at = ?
			WHERE id = ? AND repo_id = ?
			"#,
		)
		.bind(rule_name)
		.bind(rule.can_push)
		.bind(rule.enable_whitelist)
		.bind(serde_json::to_string(&whitelist_user_ids)?)
		.bind(serde_json::to_string(&whitelist_team_ids)?)
		.bind(rule.enable_merge_whitelist)
		.bind(serde_json::to_string(&merge_whitelist_user_ids)?)
		.bind(serde_json::to_string(&merge_whitelist_team_ids)?)
		.bind(rule.enable_status_check)
		.bind(serde_json::to_string(&rule.status_check_contexts)?)
		.bind(rule.enable_approvals_whitelist)
		.bind(serde_json::to_string(&approvals_whitelist_user_ids)?)
		.bind(serde_json::to_string(&approvals_whitelist_team_ids)?)
		.bind(rule.required_approvals.max(0))
		.bind(rule.block_on_rejected_reviews)
		.bind(rule.block_on_official_review_requests)
		.bind(rule.block_on_outdated_branch)
		.bind(rule.dismiss_stale_approvals)
		.bind(rule.ignore_stale_approvals)
		.bind(rule.require_signed_commits)
		.bind(&rule.protected_file_patterns)
		.bind(&rule.unprotected_file_patterns)
		.bind(&now)
		.bind(id)
		.bind(rule.repo_id)
		.execute(&mut *tx)
		.await
		.map_err(|e| rule_exists(e, rule.repo_id, rule_name))?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("protected branch rule {id}")));
		}

		let saved = fetch_rule(&mut *tx, id).await?;
		tx.commit().await?;

		tracing::debug!(rule_id = id, repo_id = rule.repo_id, "protected branch rule saved");
		Ok(saved)
	}

	#[tracing::instrument(skip(self), fields(repo_id, rule_name))]
	pub async fn get_protected_branch_rule_by_name(
		&self,
		repo_id: i64,
		rule_name: &str,
	) -> Result<Option<ProtectedBranch>> {
		let row = sqlx::query(&format!("{SELECT_RULE} WHERE repo_id = ? AND rule_name = ?"))
			.bind(repo_id)
			.bind(rule_name)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_rule(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(repo_id, rule_id = id))]
	pub async fn get_protected_branch_rule_by_id(&self, repo_id: i64, id: i64) -> Result<Option<ProtectedBranch>> {
		let row = sqlx::query(&format!("{SELECT_RULE} WHERE repo_id = ? AND id = ?"))
			.bind(repo_id)
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| row_to_rule(&r)).transpose()
	}

	/// Plain-name rules first, then globs, each group by id.
	#[tracing::instrument(skip(self), fields(repo_id))]
	pub async fn find_repo_protected_branch_rules(&self, repo_id: i64) -> Result<Vec<ProtectedBranch>> {
		let mut conn = self.pool.acquire().await?;
		find_repo_protected_branch_rules(&mut *conn, repo_id).await
	}

	#[tracing::instrument(skip(self), fields(repo_id, branch))]
	pub async fn get_first_matching_protected_branch_rule(
		&self,
		repo_id: i64,
		branch: &str,
	) -> Result<Option<ProtectedBranch>> {
		let mut conn = self.pool.acquire().await?;
		get_first_matching_protected_branch_rule(&mut *conn, repo_id, branch).await
	}

	#[tracing::instrument(skip(self), fields(repo_id, rule_id = id))]
	pub async fn delete_protected_branch(&self, repo_id: i64, id: i64) -> Result<()> {
		let result = sqlx::query("DELETE FROM protected_branches WHERE repo_id = ? AND id = ?")
			.bind(repo_id)
			.bind(id)
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("protected branch rule {id}")));
		}
		tracing::debug!(rule_id = id, repo_id, "protected branch rule deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self, rule), fields(rule_id = rule.id, user_id))]
	pub async fn can_user_push(&self, rule: &ProtectedBranch, user_id: i64) -> Result<bool> {
		if !rule.can_push {
			return Ok(false);
		}
		let mut conn = self.pool.acquire().await?;
		if !rule.enable_whitelist {
			return Ok(access_mode_by_id(&mut *conn, user_id, rule.repo_id).await? >= AccessMode::Write);
		}
		whitelisted(&mut *conn, user_id, &rule.whitelist_user_ids, &rule.whitelist_team_ids).await
	}

	#[tracing::instrument(skip(self, rule), fields(rule_id = rule.id, user_id))]
	pub async fn is_user_merge_whitelisted(&self, rule: &ProtectedBranch, user_id: i64) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		if !rule.enable_merge_whitelist {
			return Ok(access_mode_by_id(&mut *conn, user_id, rule.repo_id).await? >= AccessMode::Write);
		}
		whitelisted(
			&mut *conn,
			user_id,
			&rule.merge_whitelist_user_ids,
			&rule.merge_whitelist_team_ids,
		)
		.await
	}
}

#[async_trait]
impl ProtectedBranchStore for ProtectedBranchRepository {
	async fn update_protect_branch(&self, rule: &ProtectedBranch) -> Result<ProtectedBranch> {
		ProtectedBranchRepository::update_protect_branch(self, rule).await
	}

	async fn get_protected_branch_rule_by_name(
		&self,
		repo_id: i64,
		rule_name: &str,
	) -> Result<Option<ProtectedBranch>> {
		ProtectedBranchRepository::get_protected_branch_rule_by_name(self, repo_id, rule_name).await
	}

	async fn get_protected_branch_rule_by_id(&self, repo_id: i64, id: i64) -> Result<Option<ProtectedBranch>> {
		ProtectedBranchRepository::get_protected_branch_rule_by_id(self, repo_id, id).await
	}

	async fn find_repo_protected_branch_rules(&self, repo_id: i64) -> Result<Vec<ProtectedBranch>> {
		ProtectedBranchRepository::find_repo_protected_branch_rules(self, repo_id).await
	}

	async fn get_first_matching_protected_branch_rule(
		&self,
		repo_id: i64,
		branch: &str,
	) -> Result<Option<ProtectedBranch>> {
		ProtectedBranchRepository::get_first_matching_protected_branch_rule(self, repo_id, branch).await
	}

	async fn delete_protected_branch(&self, repo_id: i64, id: i64) -> Result<()> {
		ProtectedBranchRepository::delete_protected_branch(self, repo_id, id).await
	}

	async fn can_user_push(&self, rule: &ProtectedBranch, user_id: i64) -> Result<bool> {
		ProtectedBranchRepository::can_user_push(self, rule, user_id).await
	}

	async fn is_user_merge_whitelisted(&self, rule: &ProtectedBranch, user_id: i64) -> Result<bool> {
		ProtectedBranchRepository::is_user_merge_whitelisted(self, rule, user_id).await
	}
}

const SELECT_RULE: &str = r#"
	SELECT id, repo_id, rule_name, can_push, enable_whitelist, whitelist_user_ids,
		whitelist_team_ids, enable_merge_whitelist, merge_whitelist_user_ids,
		merge_whitelist_team_ids, enable_status_check, status_check_contexts,
		enable_approvals_whitelist, approvals_whitelist_user_ids, approvals_whitelist_team_ids,
		required_approvals, block_on_rejected_reviews, block_on_official_review_requests,
		block_on_outdated_branch, dismiss_stale_approvals, ignore_stale_approvals,
		require_signed_commits, protected_file_patterns, unprotected_file_patterns,
		created_at, updated_at
	FROM protected_branches"#;

pub(crate) async fn find_repo_protected_branch_rules(
	conn: &mut SqliteConnection,
	repo_id: i64,
) -> Result<Vec<ProtectedBranch>> {
	let rows = sqlx::query(&format!("{SELECT_RULE} WHERE repo_id = ? ORDER BY id ASC"))
		.bind(repo_id)
		.fetch_all(&mut *conn)
		.await?;
	let mut rules = rows.iter().map(row_to_rule).collect::<Result<Vec<_>>>()?;
	rules.sort_by_key(|r| (!r.is_plain_name(), r.id));
	Ok(rules)
}

pub(crate) async fn get_first_matching_protected_branch_rule(
	conn: &mut SqliteConnection,
	repo_id: i64,
	branch: &str,
) -> Result<Option<ProtectedBranch>> {
	let rules = find_repo_protected_branch_rules(conn, repo_id).await?;
	Ok(rules.into_iter().find(|r| r.matches(branch)))
}

/// Is the user listed directly or through one of the teams?
pub(crate) async fn whitelisted(
	conn: &mut SqliteConnection,
	user_id: i64,
	user_ids: &[i64],
	team_ids: &[i64],
) -> Result<bool> {
	if user_ids.contains(&user_id) {
		return Ok(true);
	}
	for team_id in team_ids {
		let member: Option<i64> = sqlx::query_scalar("SELECT id FROM team_users WHERE team_id = ? AND user_id = ?")
			.bind(team_id)
			.bind(user_id)
			.fetch_optional(&mut *conn)
			.await?;
		if member.is_some() {
			return Ok(true);
		}
	}
	Ok(false)
}

async fn writers_only(conn: &mut SqliteConnection, repo_id: i64, user_ids: &[i64]) -> Result<Vec<i64>> {
	let mut kept = Vec::with_capacity(user_ids.len());
	for &user_id in user_ids {
		if kept.contains(&user_id) {
			continue;
		}
		if access_mode_by_id(&mut *conn, user_id, repo_id).await? >= AccessMode::Write {
			kept.push(user_id);
		} else {
			tracing::debug!(user_id, repo_id, "dropping whitelisted user without write access");
		}
	}
	Ok(kept)
}

async fn org_teams_only(conn: &mut SqliteConnection, org_id: i64, team_ids: &[i64]) -> Result<Vec<i64>> {
	let mut kept = Vec::with_capacity(team_ids.len());
	for &team_id in team_ids {
		let found: Option<i64> = sqlx::query_scalar("SELECT id FROM teams WHERE id = ? AND org_id = ?")
			.bind(team_id)
			.bind(org_id)
			.fetch_optional(&mut *conn)
			.await?;
		if found.is_some() && !kept.contains(&team_id) {
			kept.push(team_id);
		}
	}
	Ok(kept)
}

fn rule_exists(e: sqlx::Error, repo_id: i64, rule_name: &str) -> DbError {
	map_unique_violation(e, || DbError::ProtectedBranchRuleExists {
		repo_id,
		rule_name: rule_name.to_string(),
	})
}

async fn fetch_rule(conn: &mut SqliteConnection, id: i64) -> Result<ProtectedBranch> {
	let row = sqlx::query(&format!("{SELECT_RULE} WHERE id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(|r| row_to_rule(&r))
		.transpose()?
		.ok_or_else(|| DbError::NotFound(format!("protected branch rule {id}")))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
	let raw: String = row.get(column);
	Ok(serde_json::from_str(&raw)?)
}

fn row_to_rule(row: &SqliteRow) -> Result<ProtectedBranch> {
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	Ok(ProtectedBranch {
		id: row.get("id"),
		repo_id: row.get("repo_id"),
		rule_name: row.get("rule_name"),
		can_push: row.get("can_push"),
		enable_whitelist: row.get("enable_whitelist"),
		whitelist_user_ids: json_column(row, "whitelist_user_ids")?,
		whitelist_team_ids: json_column(row, "whitelist_team_ids")?,
		enable_merge_whitelist: row.get("enable_merge_whitelist"),
		merge_whitelist_user_ids: json_column(row, "merge_whitelist_user_ids")?,
		merge_whitelist_team_ids: json_column(row, "merge_whitelist_team_ids")?,
		enable_status_check: row.get("enable_status_check"),
		status_check_contexts: json_column(row, "status_check_contexts")?,
		enable_approvals_whitelist: row.get("enable_approvals_whitelist"),
		approvals_whitelist_user_ids: json_column(row, "approvals_whitelist_user_ids")?,
		approvals_whitelist_team_ids: json_column(row, "approvals_whitelist_team_ids")?,
		required_approvals: row.get("required_approvals"),
		block_on_rejected_reviews: row.get("block_on_rejected_reviews"),
		block_on_official_review_requests: row.get("block_on_official_review_requests"),
		block_on_outdated_branch: row.get("block_on_outdated_branch"),
		dismiss_stale_approvals: row.get("dismiss_stale_approvals"),
		ignore_stale_approvals: row.get("ignore_stale_approvals"),
		require_signed_commits: row.get("require_signed_commits"),
		protected_file_patterns: row.get("protected_file_patterns"),
		unprotected_file_patterns: row.get("unprotected_file_patterns"),
		created_at: from_db_time(&created_at)?,
		updated_at: from_db_time(&updated_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::access::AccessRepository;
	use crate::org::{NewOrganization, OrgRepository};
	use crate::team::{NewTeam, TeamRepository};
	use crate::testing::{create_test_pool, insert_repo, insert_user};
	use crate::types::Visibility;

	fn review(review_type: ReviewType, official: bool, dismissed: bool, stale: bool) -> Review {
		let now = Utc::now();
		Review {
			id: 0,
			review_type,
			reviewer_id: 1,
			reviewer_team_id: 0,
			original_author: String::new(),
			issue_id: 1,
			content: String::new(),
			official,
			commit_id: String::new(),
			stale,
			dismissed,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn test_rule_matching() {
		let plain = ProtectedBranch::new(1, "Main");
		assert!(plain.is_plain_name());
		assert!(plain.matches("main"));
		assert!(!plain.matches("main2"));

		let glob = ProtectedBranch::new(1, "release/*");
		assert!(!glob.is_plain_name());
		assert!(glob.matches("release/v1"));
		assert!(!glob.matches("release/v1/hotfix"));
		assert!(!glob.matches("Release/v1"));

		let alternation = ProtectedBranch::new(1, "{main,stable/*}");
		assert!(alternation.matches("stable/2"));
		assert!(!alternation.matches("dev"));
	}

	#[test]
	fn test_approval_gates() {
		let mut rule = ProtectedBranch::new(1, "main");
		assert!(rule.has_enough_approvals(&[]));

		rule.required_approvals = 2;
		let reviews = vec![
			review(ReviewType::Approve, true, false, false),
			review(ReviewType::Approve, true, false, true),
			review(ReviewType::Approve, false, false, false),
			review(ReviewType::Approve, true, true, false),
		];
		assert!(rule.has_enough_approvals(&reviews));
		rule.ignore_stale_approvals = true;
		assert!(!rule.has_enough_approvals(&reviews));

		let rejected = vec![review(ReviewType::Reject, true, false, false)];
		assert!(!rule.merge_blocked_by_rejected_review(&rejected));
		rule.block_on_rejected_reviews = true;
		assert!(rule.merge_blocked_by_rejected_review(&rejected));
		assert!(!rule.merge_blocked_by_rejected_review(&[review(ReviewType::Reject, true, true, false)]));

		rule.block_on_official_review_requests = true;
		assert!(rule.merge_blocked_by_official_review_requests(&[review(ReviewType::Request, true, false, false)]));
		assert!(!rule.merge_blocked_by_official_review_requests(&[review(ReviewType::Request, false, false, false)]));
	}

	#[test]
	fn test_file_patterns() {
		let mut rule = ProtectedBranch::new(1, "main");
		rule.protected_file_patterns = " *.LOCK ; docs/** ;;".to_string();
		rule.unprotected_file_patterns = "README.md".to_string();

		assert_eq!(rule.get_protected_file_patterns().len(), 2);
		assert!(rule.is_protected_file("Cargo.lock"));
		assert!(rule.is_protected_file("docs/guide/intro.md"));
		assert!(!rule.is_protected_file("src/Cargo.lock"));
		assert!(rule.is_unprotected_file("readme.md"));
		assert!(!ProtectedBranch::new(1, "main").is_protected_file("anything"));
	}

	#[tokio::test]
	async fn test_rules_ordered_plain_first() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let repo_id = insert_repo(&pool, alice, "forge", false).await;
		let rules = ProtectedBranchRepository::new(pool.clone());

		let glob = rules.update_protect_branch(&ProtectedBranch::new(repo_id, "*")).await.unwrap();
		let main = rules.update_protect_branch(&ProtectedBranch::new(repo_id, "main")).await.unwrap();

		let ordered: Vec<i64> = rules
			.find_repo_protected_branch_rules(repo_id)
			.await
			.unwrap()
			.iter()
			.map(|r| r.id)
			.collect();
		assert_eq!(ordered, vec![main.id, glob.id]);

		let first = rules
			.get_first_matching_protected_branch_rule(repo_id, "main")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(first.id, main.id);
		let other = rules
			.get_first_matching_protected_branch_rule(repo_id, "dev")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(other.id, glob.id);

		let err = rules
			.update_protect_branch(&ProtectedBranch::new(repo_id, "main"))
			.await
			.unwrap_err();
		assert!(err.is_conflict());

		rules.delete_protected_branch(repo_id, glob.id).await.unwrap();
		assert!(rules
			.get_protected_branch_rule_by_id(repo_id, glob.id)
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_whitelists_filtered_and_enforced() {
		let pool = create_test_pool().await;
		let alice = insert_user(&pool, "alice").await;
		let bob = insert_user(&pool, "bob").await;
		let carol = insert_user(&pool, "carol").await;
		let orgs = OrgRepository::new(pool.clone());
		let org = orgs
			.create_organization(
				&NewOrganization {
					name: "acme".to_string(),
					full_name: String::new(),
					email: "acme@example.com".to_string(),
					visibility: Visibility::Public,
				},
				alice,
			)
			.await
			.unwrap();
		let repo_id = insert_repo(&pool, org.id, "tools", false).await;
		let teams = TeamRepository::new(pool.clone());
		let devs = teams
			.new_team(&NewTeam {
				org_id: org.id,
				name: "devs".to_string(),
				description: String::new(),
				authorize: AccessMode::Write,
				includes_all_repositories: true,
				can_create_org_repo: false,
			})
			.await
			.unwrap();
		teams.add_team_member(devs.id, carol).await.unwrap();
		AccessRepository::new(pool.clone())
			.add_collaborator(repo_id, bob, AccessMode::Read)
			.await
			.unwrap();

		let rules = ProtectedBranchRepository::new(pool.clone());
		let saved = rules
			.update_protect_branch(&ProtectedBranch {
				can_push: true,
				enable_whitelist: true,
				whitelist_user_ids: vec![alice, bob],
				whitelist_team_ids: vec![devs.id, 9999],
				..ProtectedBranch::new(repo_id, "main")
			})
			.await
			.unwrap();
		assert_eq!(saved.whitelist_user_ids, vec![alice]);
		assert_eq!(saved.whitelist_team_ids, vec![devs.id]);

		assert!(rules.can_user_push(&saved, alice).await.unwrap());
		assert!(rules.can_user_push(&saved, carol).await.unwrap());
		assert!(!rules.can_user_push(&saved, bob).await.unwrap());

		assert!(rules.is_user_merge_whitelisted(&saved, carol).await.unwrap());
		assert!(!rules.is_user_merge_whitelisted(&saved, bob).await.unwrap());

		let locked = ProtectedBranch {
			can_push: false,
			..saved.clone()
		};
		assert!(!rules.can_user_push(&locked, alice).await.unwrap());
	}
}
