// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Payloads sent to webhook receivers.
//!
//! Field names follow the JSON wire format consumers already parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadUser {
	pub id: i64,
	#[serde(rename = "login")]
	pub username: String,
	pub full_name: String,
	pub email: String,
	pub html_url: String,
	pub avatar_url: String,
}

impl PayloadUser {
	/// Full name when set, otherwise the login.
	pub fn display_name(&self) -> &str {
		if self.full_name.is_empty() {
			&self.username
		} else {
			&self.full_name
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRepository {
	pub id: i64,
	pub owner: PayloadUser,
	pub name: String,
	pub full_name: String,
	pub description: String,
	pub html_url: String,
	pub private: bool,
	pub fork: bool,
	pub default_branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadCommitUser {
	pub name: String,
	pub email: String,
	pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadCommit {
	pub id: String,
	pub message: String,
	pub url: String,
	pub author: PayloadCommitUser,
	pub committer: PayloadCommitUser,
	pub timestamp: DateTime<Utc>,
	#[serde(default)]
	pub added: Vec<String>,
	#[serde(default)]
	pub removed: Vec<String>,
	#[serde(default)]
	pub modified: Vec<String>,
}

impl PayloadCommit {
	pub fn short_id(&self) -> &str {
		let end = self.id.char_indices().nth(7).map_or(self.id.len(), |(i, _)| i);
		&self.id[..end]
	}

	pub fn first_line(&self) -> &str {
		self.message.lines().next().unwrap_or_default()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMilestone {
	pub id: i64,
	pub title: String,
	pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadIssue {
	pub id: i64,
	pub number: i64,
	pub title: String,
	pub body: String,
	pub html_url: String,
	pub user: PayloadUser,
	/// `open` or `closed`.
	pub state: String,
	#[serde(default)]
	pub labels: Vec<String>,
	pub milestone: Option<PayloadMilestone>,
	#[serde(default)]
	pub assignees: Vec<PayloadUser>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadPullRequest {
	pub id: i64,
	pub number: i64,
	pub title: String,
	pub body: String,
	pub html_url: String,
	pub user: PayloadUser,
	pub state: String,
	pub merged: bool,
	pub merged_at: Option<DateTime<Utc>>,
	pub head_branch: String,
	pub base_branch: String,
	#[serde(default)]
	pub labels: Vec<String>,
	pub milestone: Option<PayloadMilestone>,
	#[serde(default)]
	pub assignees: Vec<PayloadUser>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRelease {
	pub id: i64,
	pub tag_name: String,
	pub target_commitish: String,
	pub name: String,
	pub body: String,
	pub html_url: String,
	pub draft: bool,
	pub prerelease: bool,
	pub author: PayloadUser,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadComment {
	pub id: i64,
	pub html_url: String,
	pub user: PayloadUser,
	pub body: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesFrom {
	pub from: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub title: Option<ChangesFrom>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub body: Option<ChangesFrom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadReview {
	/// The hook event name of the review, e.g. `pull_request_review_approved`.
	#[serde(rename = "type")]
	pub review_type: String,
	pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookIssueAction {
	Opened,
	Closed,
	#[serde(rename = "reopened")]
	ReOpened,
	Edited,
	Assigned,
	Unassigned,
	LabelUpdated,
	LabelCleared,
	Synchronized,
	Milestoned,
	Demilestoned,
	Reviewed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookIssueCommentAction {
	Created,
	Edited,
	Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookReleaseAction {
	Published,
	Updated,
	Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookRepoAction {
	Created,
	Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayload {
	pub sha: String,
	#[serde(rename = "ref")]
	pub ref_name: String,
	/// `branch` or `tag`.
	pub ref_type: String,
	pub repository: PayloadRepository,
	pub sender: PayloadUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {
	#[serde(rename = "ref")]
	pub ref_name: String,
	pub ref_type: String,
	pub pusher_type: String,
	pub repository: PayloadRepository,
	pub sender: PayloadUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkPayload {
	/// The repository that was forked.
	pub forkee: PayloadRepository,
	/// The new fork.
	pub repository: PayloadRepository,
	pub sender: PayloadUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
	#[serde(rename = "ref")]
	pub ref_name: String,
	pub before: String,
	pub after: String,
	pub compare_url: String,
	pub commits: Vec<PayloadCommit>,
	pub total_commits: usize,
	pub head_commit: Option<PayloadCommit>,
	pub repository: PayloadRepository,
	pub pusher: PayloadUser,
	pub sender: PayloadUser,
}

impl PushPayload {
	/// The ref with `refs/heads/` or `refs/tags/` removed.
	pub fn branch(&self) -> &str {
		self.ref_name
			.strip_prefix("refs/heads/")
			.or_else(|| self.ref_name.strip_prefix("refs/tags/"))
			.unwrap_or(&self.ref_name)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePayload {
	pub action: HookIssueAction,
	pub number: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub changes: Option<Changes>,
	pub issue: PayloadIssue,
	pub repository: PayloadRepository,
	pub sender: PayloadUser,
	pub commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommentPayload {
	pub action: HookIssueCommentAction,
	pub issue: PayloadIssue,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pull_request: Option<PayloadPullRequest>,
	pub comment: PayloadComment,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub changes: Option<Changes>,
	pub repository: PayloadRepository,
	pub sender: PayloadUser,
	pub is_pull: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestPayload {
	pub action: HookIssueAction,
	pub number: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub changes: Option<Changes>,
	pub pull_request: PayloadPullRequest,
	pub requested_reviewer: Option<PayloadUser>,
	pub repository: PayloadRepository,
	pub sender: PayloadUser,
	pub commit_id: String,
	pub review: Option<PayloadReview>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPayload {
	pub action: HookRepoAction,
	pub repository: PayloadRepository,
	pub organization: Option<PayloadUser>,
	pub sender: PayloadUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePayload {
	pub action: HookReleaseAction,
	pub release: PayloadRelease,
	pub repository: PayloadRepository,
	pub sender: PayloadUser,
}

/// Any payload a hook task can carry. Serializes as the inner payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
	Create(CreatePayload),
	Delete(DeletePayload),
	Fork(ForkPayload),
	Push(PushPayload),
	Issues(IssuePayload),
	IssueComment(IssueCommentPayload),
	PullRequest(PullRequestPayload),
	Repository(RepositoryPayload),
	Release(ReleasePayload),
}

impl Payload {
	pub fn repository(&self) -> &PayloadRepository {
		match self {
			Payload::Create(p) => &p.repository,
			Payload::Delete(p) => &p.repository,
			Payload::Fork(p) => &p.repository,
			Payload::Push(p) => &p.repository,
			Payload::Issues(p) => &p.repository,
			Payload::IssueComment(p) => &p.repository,
			Payload::PullRequest(p) => &p.repository,
			Payload::Repository(p) => &p.repository,
			Payload::Release(p) => &p.repository,
		}
	}

	pub fn sender(&self) -> &PayloadUser {
		match self {
			Payload::Create(p) => &p.sender,
			Payload::Delete(p) => &p.sender,
			Payload::Fork(p) => &p.sender,
			Payload::Push(p) => &p.sender,
			Payload::Issues(p) => &p.sender,
			Payload::IssueComment(p) => &p.sender,
			Payload::PullRequest(p) => &p.sender,
			Payload::Repository(p) => &p.sender,
			Payload::Release(p) => &p.sender,
		}
	}

	/// Branch used against webhook branch filters, for the payloads that
	/// have one.
	pub fn filter_branch(&self) -> Option<&str> {
		match self {
			Payload::Push(p) => Some(p.branch()),
			Payload::Create(p) => Some(&p.ref_name),
			Payload::Delete(p) => Some(&p.ref_name),
			Payload::PullRequest(p) => Some(&p.pull_request.base_branch),
			_ => None,
		}
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string_pretty(self)
	}
}

#[cfg(test)]
pub(crate) mod fixtures {
	//! Sample payloads shared by the converter tests.

	use super::*;
	use chrono::TimeZone;

	pub fn when() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
	}

	pub fn user() -> PayloadUser {
		PayloadUser {
			id: 1,
			username: "user1".to_string(),
			full_name: "User One".to_string(),
			email: "user1@example.com".to_string(),
			html_url: "http://localhost:3000/user1".to_string(),
			avatar_url: "http://localhost:3000/avatars/1".to_string(),
		}
	}

	pub fn repo() -> PayloadRepository {
		PayloadRepository {
			id: 1,
			owner: user(),
			name: "repo".to_string(),
			full_name: "test/repo".to_string(),
			description: String::new(),
			html_url: "http://localhost:3000/test/repo".to_string(),
			private: false,
			fork: false,
			default_branch: "main".to_string(),
		}
	}

	pub fn commit() -> PayloadCommit {
		let author = PayloadCommitUser {
			name: "user1".to_string(),
			email: "user1@example.com".to_string(),
			username: "user1".to_string(),
		};
		PayloadCommit {
			id: "2020558fe2e34debb818a514715839cabd25e778".to_string(),
			message: "commit message\n\nbody text".to_string(),
			url: "http://localhost:3000/test/repo/commit/2020558fe2e34debb818a514715839cabd25e778".to_string(),
			author: author.clone(),
			committer: author,
			timestamp: when(),
			added: Vec::new(),
			removed: Vec::new(),
			modified: Vec::new(),
		}
	}

	pub fn push(count: usize) -> PushPayload {
		PushPayload {
			ref_name: "refs/heads/test".to_string(),
			before: "0000000000000000000000000000000000000000".to_string(),
			after: commit().id,
			compare_url: "http://localhost:3000/test/repo/compare/abc...def".to_string(),
			commits: vec![commit(); count],
			total_commits: count,
			head_commit: Some(commit()),
			repository: repo(),
			pusher: user(),
			sender: user(),
		}
	}

	pub fn issue() -> PayloadIssue {
		PayloadIssue {
			id: 2,
			number: 2,
			title: "crash".to_string(),
			body: "issue body".to_string(),
			html_url: "http://localhost:3000/test/repo/issues/2".to_string(),
			user: user(),
			state: "open".to_string(),
			labels: Vec::new(),
			milestone: None,
			assignees: Vec::new(),
			created_at: when(),
			updated_at: when(),
		}
	}

	pub fn issue_payload(action: HookIssueAction) -> IssuePayload {
		IssuePayload {
			action,
			number: 2,
			changes: None,
			issue: issue(),
			repository: repo(),
			sender: user(),
			commit_id: String::new(),
		}
	}

	pub fn pull_request() -> PayloadPullRequest {
		PayloadPullRequest {
			id: 12,
			number: 12,
			title: "Fix bug".to_string(),
			body: "fixes bug #2".to_string(),
			html_url: "http://localhost:3000/test/repo/pulls/12".to_string(),
			user: user(),
			state: "open".to_string(),
			merged: false,
			merged_at: None,
			head_branch: "fix".to_string(),
			base_branch: "main".to_string(),
			labels: Vec::new(),
			milestone: None,
			assignees: Vec::new(),
			created_at: when(),
			updated_at: when(),
		}
	}

	pub fn pull_payload(action: HookIssueAction) -> PullRequestPayload {
		PullRequestPayload {
			action,
			number: 12,
			changes: None,
			pull_request: pull_request(),
			requested_reviewer: None,
			repository: repo(),
			sender: user(),
			commit_id: String::new(),
			review: None,
		}
	}

	pub fn comment_payload() -> IssueCommentPayload {
		IssueCommentPayload {
			action: HookIssueCommentAction::Created,
			issue: issue(),
			pull_request: None,
			comment: PayloadComment {
				id: 4,
				html_url: "http://localhost:3000/test/repo/issues/2#issuecomment-4".to_string(),
				user: user(),
				body: "more info needed".to_string(),
				created_at: when(),
				updated_at: when(),
			},
			changes: None,
			repository: repo(),
			sender: user(),
			is_pull: false,
		}
	}

	pub fn release_payload(action: HookReleaseAction) -> ReleasePayload {
		ReleasePayload {
			action,
			release: PayloadRelease {
				id: 1,
				tag_name: "v1.0".to_string(),
				target_commitish: "main".to_string(),
				name: "First".to_string(),
				body: "notes".to_string(),
				html_url: "http://localhost:3000/test/repo/releases/tag/v1.0".to_string(),
				draft: false,
				prerelease: false,
				author: user(),
				created_at: when(),
			},
			repository: repo(),
			sender: user(),
		}
	}
}
