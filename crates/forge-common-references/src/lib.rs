// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsing of `@mentions`, `#issue` references and `owner/repo@sha` commit
//! references in free text.
//!
//! Nothing here touches the database. References are returned unverified and
//! callers resolve them against real repositories and issues.
//!
//! ```
//! use forge_common_references::{find_all_issue_references, KeywordSet, RefAction};
//!
//! let refs = find_all_issue_references("Fixes #12 and see acme/tools#3", &KeywordSet::default(), None);
//! assert_eq!(refs.len(), 2);
//! assert_eq!(refs[0].index, 12);
//! assert_eq!(refs[0].action, RefAction::Closes);
//! assert_eq!(refs[1].owner.as_deref(), Some("acme"));
//! ```

mod commit;
mod issue;
mod keywords;
mod mention;

use serde::{Deserialize, Serialize};

pub use commit::find_commit_cross_reference;
pub use issue::find_all_issue_references;
pub use keywords::{KeywordSet, DEFAULT_CLOSE_KEYWORDS, DEFAULT_REOPEN_KEYWORDS};
pub use mention::find_all_mentions;

/// Effect a reference has on its target once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefAction {
	#[default]
	None = 0,
	Closes = 1,
	Reopens = 2,
	Neutered = 3,
}

impl RefAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			RefAction::None => "none",
			RefAction::Closes => "closes",
			RefAction::Reopens => "reopens",
			RefAction::Neutered => "neutered",
		}
	}

	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Self {
		match v {
			1 => RefAction::Closes,
			2 => RefAction::Reopens,
			3 => RefAction::Neutered,
			_ => RefAction::None,
		}
	}
}

impl std::fmt::Display for RefAction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Byte range within the parsed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefSpan {
	pub start: usize,
	pub end: usize,
}

/// An unverified reference to an issue or pull request.
///
/// `owner` and `name` are `None` for references local to the repository the
/// text belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReference {
	pub index: i64,
	pub owner: Option<String>,
	pub name: Option<String>,
	pub action: RefAction,
	/// Written with `!` rather than `#`.
	pub is_pull: bool,
	pub ref_span: RefSpan,
	pub action_span: Option<RefSpan>,
}

impl IssueReference {
	pub fn is_cross_repo(&self) -> bool {
		self.owner.is_some()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReference {
	pub owner: String,
	pub name: String,
	pub sha: String,
	pub span: RefSpan,
}

/// Whether resolving the reference changes the target's state.
pub fn is_actionable(reference: &IssueReference) -> bool {
	matches!(reference.action, RefAction::Closes | RefAction::Reopens)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ref_action_strings() {
		assert_eq!(RefAction::None.as_str(), "none");
		assert_eq!(RefAction::Closes.to_string(), "closes");
		assert_eq!(RefAction::from_i64(2), RefAction::Reopens);
		assert_eq!(RefAction::from_i64(99), RefAction::None);
	}

	#[test]
	fn test_is_actionable() {
		let mut reference = IssueReference {
			index: 1,
			owner: None,
			name: None,
			action: RefAction::None,
			is_pull: false,
			ref_span: RefSpan { start: 0, end: 2 },
			action_span: None,
		};
		assert!(!is_actionable(&reference));
		reference.action = RefAction::Closes;
		assert!(is_actionable(&reference));
		reference.action = RefAction::Neutered;
		assert!(!is_actionable(&reference));
	}
}
