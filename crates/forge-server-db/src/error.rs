// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error type shared by every store in this crate.
//!
//! Generic failures (`NotFound`, `Conflict`, ...) carry a message. Business
//! rule failures get their own variant so callers can branch on them with the
//! `is_*` predicates instead of string matching.

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("Permission denied: {0}")]
	PermissionDenied(String),

	#[error("resource index is outdated [kind: {kind}, group_id: {group_id}]")]
	ResourceOutdated { kind: &'static str, group_id: i64 },

	#[error("name is reserved [name: {0}]")]
	NameReserved(String),

	#[error("name pattern is not allowed [pattern: {0}]")]
	NamePatternNotAllowed(String),

	#[error("name is invalid [name: {0}]")]
	InvalidName(String),

	#[error("user already exists [name: {0}]")]
	UserAlreadyExist(String),

	#[error("e-mail already in use [email: {0}]")]
	EmailAlreadyUsed(String),

	#[error("primary e-mail address cannot be deleted [email: {0}]")]
	PrimaryEmailCannotDelete(String),

	#[error("user is the last owner of the organization [org_id: {org_id}, user_id: {user_id}]")]
	LastOrgOwner { org_id: i64, user_id: i64 },

	#[error("team already exists [org_id: {org_id}, name: {name}]")]
	TeamAlreadyExist { org_id: i64, name: String },

	#[error("repository already exists [owner_id: {owner_id}, name: {name}]")]
	RepoAlreadyExist { owner_id: i64, name: String },

	#[error("label color is invalid [color: {0}]")]
	InvalidLabelColor(String),

	#[error("issue is already in the requested state [issue_id: {issue_id}]")]
	IssueWasClosed { issue_id: i64 },

	#[error("pull request is already in the requested state [issue_id: {issue_id}]")]
	PullWasClosed { issue_id: i64 },

	#[error("issue still has open dependencies [issue_id: {issue_id}]")]
	DependenciesLeft { issue_id: i64 },

	#[error("circular dependency [issue_id: {issue_id}, dependency_id: {dependency_id}]")]
	CircularDependency { issue_id: i64, dependency_id: i64 },

	#[error("dependency already exists [issue_id: {issue_id}, dependency_id: {dependency_id}]")]
	DependencyExists { issue_id: i64, dependency_id: i64 },

	#[error("dependency does not exist [issue_id: {issue_id}, dependency_id: {dependency_id}]")]
	DependencyNotExists { issue_id: i64, dependency_id: i64 },

	#[error("dependency crosses repositories [issue_id: {issue_id}, dependency_id: {dependency_id}]")]
	DependencyCrossRepo { issue_id: i64, dependency_id: i64 },

	#[error("pull request has already been merged [pull_id: {pull_id}]")]
	PullAlreadyMerged { pull_id: i64 },

	#[error("review content is empty")]
	ReviewContentEmpty,

	#[error("review request is not valid [user_id: {user_id}, issue_id: {issue_id}]: {reason}")]
	NotValidReviewRequest {
		reason: String,
		user_id: i64,
		issue_id: i64,
	},

	#[error("cannot request review on a closed or merged pull request [issue_id: {issue_id}]")]
	ReviewRequestOnClosedPr { issue_id: i64 },

	#[error("branch already exists [repo_id: {repo_id}, name: {name}]")]
	BranchAlreadyExists { repo_id: i64, name: String },

	#[error("branch does not exist [repo_id: {repo_id}, name: {name}]")]
	BranchNotExist { repo_id: i64, name: String },

	#[error("protected branch rule already exists [repo_id: {repo_id}, rule_name: {rule_name}]")]
	ProtectedBranchRuleExists { repo_id: i64, rule_name: String },

	#[error("release already exists [tag_name: {0}]")]
	ReleaseAlreadyExist(String),

	#[error("public key already exists [fingerprint: {0}]")]
	KeyAlreadyExist(String),

	#[error("public key name already used [owner_id: {owner_id}, name: {name}]")]
	KeyNameAlreadyUsed { owner_id: i64, name: String },

	#[error("deploy key already exists [key_id: {key_id}, repo_id: {repo_id}]")]
	DeployKeyAlreadyExist { key_id: i64, repo_id: i64 },

	#[error("public key is invalid: {0}")]
	InvalidKey(String),
}

impl DbError {
	/// True for every "row does not exist" flavour.
	pub fn is_not_found(&self) -> bool {
		matches!(
			self,
			DbError::NotFound(_)
				| DbError::BranchNotExist { .. }
				| DbError::DependencyNotExists { .. }
				| DbError::Sqlx(sqlx::Error::RowNotFound)
		)
	}

	/// True for every uniqueness failure.
	pub fn is_conflict(&self) -> bool {
		matches!(
			self,
			DbError::Conflict(_)
				| DbError::UserAlreadyExist(_)
				| DbError::EmailAlreadyUsed(_)
				| DbError::TeamAlreadyExist { .. }
				| DbError::RepoAlreadyExist { .. }
				| DbError::DependencyExists { .. }
				| DbError::BranchAlreadyExists { .. }
				| DbError::ProtectedBranchRuleExists { .. }
				| DbError::ReleaseAlreadyExist(_)
				| DbError::KeyAlreadyExist(_)
				| DbError::KeyNameAlreadyUsed { .. }
				| DbError::DeployKeyAlreadyExist { .. }
		)
	}

	/// True when the caller supplied something that can never succeed as-is.
	pub fn is_invalid_input(&self) -> bool {
		matches!(
			self,
			DbError::InvalidInput(_)
				| DbError::NameReserved(_)
				| DbError::NamePatternNotAllowed(_)
				| DbError::InvalidName(_)
				| DbError::InvalidLabelColor(_)
				| DbError::InvalidKey(_)
				| DbError::ReviewContentEmpty
				| DbError::NotValidReviewRequest { .. }
		)
	}

	pub fn is_permission_denied(&self) -> bool {
		matches!(
			self,
			DbError::PermissionDenied(_) | DbError::LastOrgOwner { .. }
		)
	}

	pub fn is_resource_outdated(&self) -> bool {
		matches!(self, DbError::ResourceOutdated { .. })
	}

	pub fn is_issue_was_closed(&self) -> bool {
		matches!(self, DbError::IssueWasClosed { .. })
	}

	pub fn is_pull_was_closed(&self) -> bool {
		matches!(self, DbError::PullWasClosed { .. })
	}

	pub fn is_dependencies_left(&self) -> bool {
		matches!(self, DbError::DependenciesLeft { .. })
	}

	pub fn is_circular_dependency(&self) -> bool {
		matches!(self, DbError::CircularDependency { .. })
	}

	pub fn is_pull_already_merged(&self) -> bool {
		matches!(self, DbError::PullAlreadyMerged { .. })
	}

	pub fn is_review_request_on_closed_pr(&self) -> bool {
		matches!(self, DbError::ReviewRequestOnClosedPr { .. })
	}

	pub fn is_last_org_owner(&self) -> bool {
		matches!(self, DbError::LastOrgOwner { .. })
	}
}

/// Turn a unique-constraint violation into `conflict`, leaving other errors as-is.
pub(crate) fn map_unique_violation(e: sqlx::Error, conflict: impl FnOnce() -> DbError) -> DbError {
	match e {
		sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => conflict(),
		_ => DbError::Sqlx(e),
	}
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn predicates_group_variants() {
		assert!(DbError::NotFound("x".into()).is_not_found());
		assert!(DbError::BranchNotExist {
			repo_id: 1,
			name: "main".into()
		}
		.is_not_found());
		assert!(DbError::ReleaseAlreadyExist("v1".into()).is_conflict());
		assert!(DbError::ReviewContentEmpty.is_invalid_input());
		assert!(DbError::LastOrgOwner {
			org_id: 1,
			user_id: 2
		}
		.is_permission_denied());
		assert!(!DbError::Internal("x".into()).is_conflict());
	}

	#[test]
	fn display_includes_identifiers() {
		let err = DbError::CircularDependency {
			issue_id: 3,
			dependency_id: 7,
		};
		assert_eq!(
			err.to_string(),
			"circular dependency [issue_id: 3, dependency_id: 7]"
		);
	}
}
