// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Slack incoming-webhook messages.

use forge_server_db::HookEventType;
use serde::{Deserialize, Serialize};

use crate::api::{HookIssueAction, HookIssueCommentAction, HookRepoAction, Payload, PayloadUser};
use crate::error::{Result, WebhookError};
use crate::general::{commit_count_text, comment_phrase, issue_phrase, pull_phrase, release_word, review_word};

/// Stored in the webhook's `meta` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackMeta {
	pub channel: String,
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub icon_url: String,
	#[serde(default)]
	pub color: String,
}

impl SlackMeta {
	pub fn parse(meta: &str) -> Result<Self> {
		let meta: SlackMeta = serde_json::from_str(meta).map_err(|e| WebhookError::InvalidMeta {
			hook_type: "slack",
			message: e.to_string(),
		})?;
		if meta.channel.trim().trim_start_matches('#').is_empty() {
			return Err(WebhookError::InvalidMeta {
				hook_type: "slack",
				message: "channel is required".to_string(),
			});
		}
		Ok(meta)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackAttachment {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub fallback: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub color: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub title: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub title_link: String,
	pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackPayload {
	pub channel: String,
	pub text: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub username: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub icon_url: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub attachments: Vec<SlackAttachment>,
}

/// Escape the three characters Slack treats as control characters.
pub fn text_formatter(s: &str) -> String {
	s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// First line only, escaped.
pub fn short_text_formatter(s: &str) -> String {
	let first = s.lines().next().unwrap_or_default().trim();
	text_formatter(first)
}

pub fn link_formatter(url: &str, text: &str) -> String {
	format!("<{url}|{text}>")
}

/// Link to a ref page: branches and tags get their own path, anything else
/// is treated as a commit.
pub fn link_to_ref(repo_url: &str, git_ref: &str) -> String {
	let (path, name) = if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
		("branch", branch)
	} else if let Some(tag) = git_ref.strip_prefix("refs/tags/") {
		("tag", tag)
	} else {
		("commit", git_ref)
	};
	link_formatter(&format!("{repo_url}/src/{path}/{name}"), name)
}

fn user_link(user: &PayloadUser) -> String {
	link_formatter(&user.html_url, &user.username)
}

pub fn convert(payload: &Payload, event: HookEventType, meta: &str) -> Result<SlackPayload> {
	let meta = SlackMeta::parse(meta)?;
	let repo = payload.repository();
	let repo_link = link_formatter(&repo.html_url, &repo.full_name);
	let sender = user_link(payload.sender());
	let mut attachments = Vec::new();

	let text = match payload {
		Payload::Create(p) => {
			let full_ref = if p.ref_type == "tag" {
				format!("refs/tags/{}", p.ref_name)
			} else {
				format!("refs/heads/{}", p.ref_name)
			};
			format!(
				"[{repo_link}:{}] {} created by {sender}",
				link_to_ref(&repo.html_url, &full_ref),
				p.ref_type
			)
		}
		Payload::Delete(p) => format!("[{repo_link}:{}] {} deleted by {sender}", p.ref_name, p.ref_type),
		Payload::Fork(p) => format!(
			"{} is forked to {}",
			link_formatter(&p.forkee.html_url, &p.forkee.full_name),
			link_formatter(&p.repository.html_url, &p.repository.full_name)
		),
		Payload::Push(p) => {
			let count = commit_count_text(p.total_commits.max(p.commits.len()));
			let count = if p.compare_url.is_empty() {
				count
			} else {
				link_formatter(&p.compare_url, &count)
			};
			let lines: Vec<String> = p
				.commits
				.iter()
				.map(|c| {
					format!(
						"{}: {} - {}",
						link_formatter(&c.url, c.short_id()),
						short_text_formatter(&c.message),
						short_text_formatter(&c.author.name)
					)
				})
				.collect();
			attachments.push(SlackAttachment {
				color: meta.color.clone(),
				text: lines.join("\n"),
				..Default::default()
			});
			format!(
				"[{repo_link}:{}] {count} pushed by {}",
				link_to_ref(&repo.html_url, &p.ref_name),
				user_link(&p.pusher)
			)
		}
		Payload::Issues(p) => {
			let (phrase, _) = issue_phrase(p.action, &p.issue);
			let title = format!("#{} {}", p.issue.number, p.issue.title);
			if p.action == HookIssueAction::Opened {
				attachments.push(SlackAttachment {
					color: meta.color.clone(),
					title: text_formatter(&title),
					title_link: p.issue.html_url.clone(),
					text: text_formatter(&p.issue.body),
					..Default::default()
				});
				format!("[{repo_link}] Issue opened by {sender}")
			} else {
				format!(
					"[{repo_link}] Issue {phrase}: {} by {sender}",
					link_formatter(&p.issue.html_url, &text_formatter(&title))
				)
			}
		}
		Payload::IssueComment(p) => {
			let (phrase, _) = comment_phrase(p.action);
			let verb = match p.action {
				HookIssueCommentAction::Created => "New comment created",
				_ => phrase,
			};
			attachments.push(SlackAttachment {
				color: meta.color.clone(),
				title: text_formatter(&format!("#{} {}", p.issue.number, p.issue.title)),
				title_link: p.comment.html_url.clone(),
				text: text_formatter(&p.comment.body),
				..Default::default()
			});
			format!("[{repo_link}] {verb} by {sender}")
		}
		Payload::PullRequest(p) => {
			let title = text_formatter(&format!("#{} {}", p.pull_request.number, p.pull_request.title));
			let title_link = link_formatter(&p.pull_request.html_url, &title);
			if let Some((word, _)) = review_word(event) {
				if let Some(review) = p.review.as_ref().filter(|r| !r.content.is_empty()) {
					attachments.push(SlackAttachment {
						color: meta.color.clone(),
						text: text_formatter(&review.content),
						..Default::default()
					});
				}
				format!("[{repo_link}] Pull request review {word}: {title_link} by {sender}")
			} else {
				let (phrase, _) = pull_phrase(p.action, &p.pull_request);
				if p.action == HookIssueAction::Opened {
					attachments.push(SlackAttachment {
						color: meta.color.clone(),
						title: title.clone(),
						title_link: p.pull_request.html_url.clone(),
						text: text_formatter(&p.pull_request.body),
						..Default::default()
					});
				}
				format!("[{repo_link}] Pull request {phrase}: {title_link} by {sender}")
			}
		}
		Payload::Repository(p) => {
			let word = match p.action {
				HookRepoAction::Created => "created",
				HookRepoAction::Deleted => "deleted",
			};
			format!("[{repo_link}] Repository {word} by {sender}")
		}
		Payload::Release(p) => {
			let (word, _) = release_word(p.action);
			format!(
				"[{repo_link}] new release {} {word} by {sender}",
				link_formatter(&p.release.html_url, &p.release.tag_name)
			)
		}
	};

	Ok(SlackPayload {
		channel: meta.channel,
		text,
		username: meta.username,
		icon_url: meta.icon_url,
		attachments,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::fixtures::*;
	use crate::api::HookReleaseAction;
	use proptest::prelude::*;

	const META: &str = r##"{"channel":"#dev","username":"forge","icon_url":"","color":"good"}"##;

	#[test]
	fn test_text_formatters() {
		assert_eq!(text_formatter("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
		assert_eq!(short_text_formatter("fix <x>\nsecond line"), "fix &lt;x&gt;");
		assert_eq!(link_formatter("http://x", "y"), "<http://x|y>");
	}

	#[test]
	fn test_link_to_ref() {
		let repo = "http://localhost:3000/test/repo";
		assert_eq!(
			link_to_ref(repo, "refs/heads/main"),
			"<http://localhost:3000/test/repo/src/branch/main|main>"
		);
		assert_eq!(
			link_to_ref(repo, "refs/tags/v1.0"),
			"<http://localhost:3000/test/repo/src/tag/v1.0|v1.0>"
		);
		assert_eq!(
			link_to_ref(repo, "2020558"),
			"<http://localhost:3000/test/repo/src/commit/2020558|2020558>"
		);
	}

	#[test]
	fn test_push_text_singular_and_plural() {
		let one = convert(&Payload::Push(push(1)), HookEventType::Push, META).unwrap();
		assert_eq!(
			one.text,
			"[<http://localhost:3000/test/repo|test/repo>:<http://localhost:3000/test/repo/src/branch/test|test>] \
			 <http://localhost:3000/test/repo/compare/abc...def|1 new commit> pushed by <http://localhost:3000/user1|user1>"
		);
		let two = convert(&Payload::Push(push(2)), HookEventType::Push, META).unwrap();
		assert!(two.text.contains("|2 new commits>"));
		assert_eq!(two.attachments.len(), 1);
		assert_eq!(
			two.attachments[0].text.lines().next().unwrap(),
			"<http://localhost:3000/test/repo/commit/2020558fe2e34debb818a514715839cabd25e778|2020558>: commit message - user1"
		);
		assert_eq!(two.attachments[0].color, "good");
		assert_eq!(two.channel, "#dev");
	}

	#[test]
	fn test_push_without_compare_url_is_plain() {
		let mut p = push(3);
		p.compare_url.clear();
		let out = convert(&Payload::Push(p), HookEventType::Push, META).unwrap();
		assert!(out.text.contains("] 3 new commits pushed by"));
	}

	#[test]
	fn test_issue_and_review_texts() {
		let closed = convert(
			&Payload::Issues(issue_payload(HookIssueAction::Closed)),
			HookEventType::Issues,
			META,
		)
		.unwrap();
		assert!(closed
			.text
			.contains("Issue closed: <http://localhost:3000/test/repo/issues/2|#2 crash> by"));

		let mut review = pull_payload(HookIssueAction::Reviewed);
		review.review = Some(crate::api::PayloadReview {
			review_type: "pull_request_review_approved".to_string(),
			content: "LGTM".to_string(),
		});
		let out = convert(
			&Payload::PullRequest(review),
			HookEventType::PullRequestReviewApproved,
			META,
		)
		.unwrap();
		assert!(out.text.contains("Pull request review approved: "));
		assert_eq!(out.attachments[0].text, "LGTM");
	}

	#[test]
	fn test_release_and_comment_texts() {
		let out = convert(
			&Payload::Release(release_payload(HookReleaseAction::Published)),
			HookEventType::Release,
			META,
		)
		.unwrap();
		assert!(out
			.text
			.contains("new release <http://localhost:3000/test/repo/releases/tag/v1.0|v1.0> published by"));

		let out = convert(&Payload::IssueComment(comment_payload()), HookEventType::IssueComment, META).unwrap();
		assert!(out.text.ends_with("New comment created by <http://localhost:3000/user1|user1>"));
	}

	#[test]
	fn test_meta_requires_channel() {
		assert!(SlackMeta::parse(r##"{"channel":"#"}"##).is_err());
		assert!(SlackMeta::parse("not json").is_err());
		assert_eq!(SlackMeta::parse(r#"{"channel":"ops"}"#).unwrap().channel, "ops");
	}

	proptest! {
		#[test]
		fn formatted_text_has_no_raw_brackets(s in ".*") {
			let out = text_formatter(&s);
			prop_assert!(!out.contains('<'));
			prop_assert!(!out.contains('>'));
		}

		#[test]
		fn short_text_is_single_line(s in ".*") {
			prop_assert!(!short_text_formatter(&s).contains('\n'));
		}
	}
}
