// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Titles, links and colors shared by the chat converters.

use forge_server_db::HookEventType;

use crate::api::{
	CreatePayload, DeletePayload, ForkPayload, HookIssueAction, HookIssueCommentAction, HookReleaseAction,
	HookRepoAction, IssueCommentPayload, IssuePayload, Payload, PayloadIssue, PayloadMilestone, PayloadPullRequest,
	PayloadUser, PullRequestPayload, PushPayload, ReleasePayload, RepositoryPayload,
};

pub const SUCCESS_COLOR: u32 = 0x1ac600;
pub const WARN_COLOR: u32 = 0xffd930;
pub const FAILED_COLOR: u32 = 0xff3232;
pub const PURPLE_COLOR: u32 = 0x7289da;

/// A rendered event: a one-line title, optional body text, the page it links
/// to and a color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
	pub title: String,
	pub text: String,
	pub url: String,
	pub color: u32,
}

pub fn ref_url(repo_url: &str, ref_type: &str, ref_name: &str) -> String {
	format!("{repo_url}/src/{ref_type}/{ref_name}")
}

pub fn create_summary(p: &CreatePayload) -> Summary {
	Summary {
		title: format!("[{}] {} {} created", p.repository.full_name, p.ref_type, p.ref_name),
		text: String::new(),
		url: ref_url(&p.repository.html_url, &p.ref_type, &p.ref_name),
		color: SUCCESS_COLOR,
	}
}

pub fn delete_summary(p: &DeletePayload) -> Summary {
	Summary {
		title: format!("[{}] {} {} deleted", p.repository.full_name, p.ref_type, p.ref_name),
		text: String::new(),
		url: p.repository.html_url.clone(),
		color: FAILED_COLOR,
	}
}

pub fn fork_summary(p: &ForkPayload) -> Summary {
	Summary {
		title: format!("{} is forked to {}", p.forkee.full_name, p.repository.full_name),
		text: String::new(),
		url: p.repository.html_url.clone(),
		color: PURPLE_COLOR,
	}
}

pub fn commit_count_text(count: usize) -> String {
	if count == 1 {
		"1 new commit".to_string()
	} else {
		format!("{count} new commits")
	}
}

/// One markdown line per commit: `[sha7](url) first line - author`.
pub fn commit_lines(p: &PushPayload, separator: &str) -> String {
	p.commits
		.iter()
		.map(|c| format!("[{}]({}) {} - {}", c.short_id(), c.url, c.first_line(), c.author.name))
		.collect::<Vec<_>>()
		.join(separator)
}

pub fn push_summary(p: &PushPayload, separator: &str) -> Summary {
	Summary {
		title: format!(
			"[{}:{}] {}",
			p.repository.full_name,
			p.branch(),
			commit_count_text(p.total_commits.max(p.commits.len()))
		),
		text: commit_lines(p, separator),
		url: ref_url(&p.repository.html_url, "branch", p.branch()),
		color: SUCCESS_COLOR,
	}
}

/// Verb phrase for an issue or pull request action, with its color.
fn action_phrase(
	action: HookIssueAction,
	assignees: &[PayloadUser],
	milestone: Option<&PayloadMilestone>,
	merged: bool,
) -> (String, u32) {
	match action {
		HookIssueAction::Opened => ("opened".to_string(), SUCCESS_COLOR),
		HookIssueAction::Closed if merged => ("merged".to_string(), PURPLE_COLOR),
		HookIssueAction::Closed => ("closed".to_string(), FAILED_COLOR),
		HookIssueAction::ReOpened => ("re-opened".to_string(), WARN_COLOR),
		HookIssueAction::Edited => ("edited".to_string(), WARN_COLOR),
		HookIssueAction::Assigned => {
			let names: Vec<&str> = assignees.iter().map(|u| u.username.as_str()).collect();
			(format!("assigned to {}", names.join(", ")), SUCCESS_COLOR)
		}
		HookIssueAction::Unassigned => ("unassigned".to_string(), WARN_COLOR),
		HookIssueAction::LabelUpdated => ("labels updated".to_string(), WARN_COLOR),
		HookIssueAction::LabelCleared => ("labels cleared".to_string(), WARN_COLOR),
		HookIssueAction::Synchronized => ("synchronized".to_string(), WARN_COLOR),
		HookIssueAction::Milestoned => (
			format!("milestoned to {}", milestone.map(|m| m.title.as_str()).unwrap_or_default()),
			WARN_COLOR,
		),
		HookIssueAction::Demilestoned => ("milestone cleared".to_string(), WARN_COLOR),
		HookIssueAction::Reviewed => ("reviewed".to_string(), PURPLE_COLOR),
	}
}

pub fn issue_phrase(action: HookIssueAction, issue: &PayloadIssue) -> (String, u32) {
	action_phrase(action, &issue.assignees, issue.milestone.as_ref(), false)
}

pub fn pull_phrase(action: HookIssueAction, pr: &PayloadPullRequest) -> (String, u32) {
	action_phrase(action, &pr.assignees, pr.milestone.as_ref(), pr.merged)
}

pub fn issue_summary(p: &IssuePayload) -> Summary {
	let (phrase, color) = issue_phrase(p.action, &p.issue);
	Summary {
		title: format!(
			"[{}] Issue {}: #{} {}",
			p.repository.full_name, phrase, p.issue.number, p.issue.title
		),
		text: if p.action == HookIssueAction::Opened {
			p.issue.body.clone()
		} else {
			String::new()
		},
		url: p.issue.html_url.clone(),
		color,
	}
}

pub fn comment_phrase(action: HookIssueCommentAction) -> (&'static str, u32) {
	match action {
		HookIssueCommentAction::Created => ("New comment", PURPLE_COLOR),
		HookIssueCommentAction::Edited => ("Comment edited", WARN_COLOR),
		HookIssueCommentAction::Deleted => ("Comment deleted", FAILED_COLOR),
	}
}

pub fn issue_comment_summary(p: &IssueCommentPayload) -> Summary {
	let (phrase, color) = comment_phrase(p.action);
	let kind = if p.is_pull { "pull request" } else { "issue" };
	Summary {
		title: format!(
			"[{}] {} on {} #{} {}",
			p.repository.full_name, phrase, kind, p.issue.number, p.issue.title
		),
		text: if p.action == HookIssueCommentAction::Deleted {
			String::new()
		} else {
			p.comment.body.clone()
		},
		url: p.comment.html_url.clone(),
		color,
	}
}

/// Review verdict word for a review event, if it is one.
pub fn review_word(event: HookEventType) -> Option<(&'static str, u32)> {
	match event {
		HookEventType::PullRequestReviewApproved => Some(("approved", SUCCESS_COLOR)),
		HookEventType::PullRequestReviewRejected => Some(("rejected", FAILED_COLOR)),
		HookEventType::PullRequestReviewComment => Some(("comment", PURPLE_COLOR)),
		_ => None,
	}
}

pub fn pull_request_summary(p: &PullRequestPayload, event: HookEventType) -> Summary {
	if let Some((word, color)) = review_word(event) {
		return Summary {
			title: format!(
				"[{}] Pull request review {}: #{} {}",
				p.repository.full_name, word, p.pull_request.number, p.pull_request.title
			),
			text: p.review.as_ref().map(|r| r.content.clone()).unwrap_or_default(),
			url: p.pull_request.html_url.clone(),
			color,
		};
	}

	let (phrase, color) = pull_phrase(p.action, &p.pull_request);
	Summary {
		title: format!(
			"[{}] Pull request {}: #{} {}",
			p.repository.full_name, phrase, p.pull_request.number, p.pull_request.title
		),
		text: if p.action == HookIssueAction::Opened {
			p.pull_request.body.clone()
		} else {
			String::new()
		},
		url: p.pull_request.html_url.clone(),
		color,
	}
}

pub fn repository_summary(p: &RepositoryPayload) -> Summary {
	let (word, color) = match p.action {
		HookRepoAction::Created => ("created", SUCCESS_COLOR),
		HookRepoAction::Deleted => ("deleted", FAILED_COLOR),
	};
	Summary {
		title: format!("[{}] Repository {}", p.repository.full_name, word),
		text: String::new(),
		url: p.repository.html_url.clone(),
		color,
	}
}

pub fn release_word(action: HookReleaseAction) -> (&'static str, u32) {
	match action {
		HookReleaseAction::Published => ("published", SUCCESS_COLOR),
		HookReleaseAction::Updated => ("updated", WARN_COLOR),
		HookReleaseAction::Deleted => ("deleted", FAILED_COLOR),
	}
}

pub fn release_summary(p: &ReleasePayload) -> Summary {
	let (word, color) = release_word(p.action);
	Summary {
		title: format!(
			"[{}] Release {}: {}",
			p.repository.full_name, word, p.release.tag_name
		),
		text: if p.action == HookReleaseAction::Published {
			p.release.body.clone()
		} else {
			String::new()
		},
		url: p.release.html_url.clone(),
		color,
	}
}

/// Render any payload with the shared titles. `push_separator` joins the
/// per-commit lines of a push.
pub fn summarize(payload: &Payload, event: HookEventType, push_separator: &str) -> Summary {
	match payload {
		Payload::Create(p) => create_summary(p),
		Payload::Delete(p) => delete_summary(p),
		Payload::Fork(p) => fork_summary(p),
		Payload::Push(p) => push_summary(p, push_separator),
		Payload::Issues(p) => issue_summary(p),
		Payload::IssueComment(p) => issue_comment_summary(p),
		Payload::PullRequest(p) => pull_request_summary(p, event),
		Payload::Repository(p) => repository_summary(p),
		Payload::Release(p) => release_summary(p),
	}
}
