// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Discord webhook messages: one embed per event.

use forge_server_db::HookEventType;
use serde::{Deserialize, Serialize};

use crate::api::Payload;
use crate::error::{Result, WebhookError};
use crate::general::summarize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordMeta {
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub icon_url: String,
}

impl DiscordMeta {
	/// Empty meta means no overrides.
	pub fn parse(meta: &str) -> Result<Self> {
		if meta.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_json::from_str(meta).map_err(|e| WebhookError::InvalidMeta {
			hook_type: "discord",
			message: e.to_string(),
		})
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordEmbedAuthor {
	pub name: String,
	pub url: String,
	pub icon_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordEmbed {
	pub title: String,
	pub description: String,
	pub url: String,
	pub color: u32,
	pub author: DiscordEmbedAuthor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordPayload {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub username: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub avatar_url: String,
	pub content: String,
	pub embeds: Vec<DiscordEmbed>,
}

/// Discord caps embed descriptions; long push lists are cut.
const MAX_DESCRIPTION: usize = 2000;

fn truncate(s: String) -> String {
	if s.chars().count() <= MAX_DESCRIPTION {
		return s;
	}
	let mut cut: String = s.chars().take(MAX_DESCRIPTION - 3).collect();
	cut.push_str("...");
	cut
}

pub fn convert(payload: &Payload, event: HookEventType, meta: &str) -> Result<DiscordPayload> {
	let meta = DiscordMeta::parse(meta)?;
	let summary = summarize(payload, event, "\n");
	let sender = payload.sender();

	Ok(DiscordPayload {
		username: meta.username,
		avatar_url: meta.icon_url,
		content: String::new(),
		embeds: vec![DiscordEmbed {
			title: summary.title,
			description: truncate(summary.text),
			url: summary.url,
			color: summary.color,
			author: DiscordEmbedAuthor {
				name: sender.username.clone(),
				url: sender.html_url.clone(),
				icon_url: sender.avatar_url.clone(),
			},
		}],
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::fixtures::*;
	use crate::api::{HookIssueAction, HookReleaseAction};
	use crate::general::{FAILED_COLOR, PURPLE_COLOR, SUCCESS_COLOR, WARN_COLOR};

	fn embed(payload: Payload, event: HookEventType) -> DiscordEmbed {
		convert(&payload, event, "").unwrap().embeds.remove(0)
	}

	#[test]
	fn test_colors() {
		assert_eq!(embed(Payload::Push(push(2)), HookEventType::Push).color, SUCCESS_COLOR);
		assert_eq!(
			embed(Payload::Issues(issue_payload(HookIssueAction::Closed)), HookEventType::Issues).color,
			FAILED_COLOR
		);
		assert_eq!(
			embed(Payload::Issues(issue_payload(HookIssueAction::Edited)), HookEventType::Issues).color,
			WARN_COLOR
		);
		assert_eq!(
			embed(Payload::IssueComment(comment_payload()), HookEventType::IssueComment).color,
			PURPLE_COLOR
		);
		assert_eq!(
			embed(
				Payload::PullRequest(pull_payload(HookIssueAction::Reviewed)),
				HookEventType::PullRequestReviewApproved
			)
			.color,
			SUCCESS_COLOR
		);
	}

	#[test]
	fn test_embed_contents() {
		let e = embed(Payload::Release(release_payload(HookReleaseAction::Published)), HookEventType::Release);
		assert_eq!(e.title, "[test/repo] Release published: v1.0");
		assert_eq!(e.description, "notes");
		assert_eq!(e.url, "http://localhost:3000/test/repo/releases/tag/v1.0");
		assert_eq!(e.author.name, "user1");
	}

	#[test]
	fn test_meta_overrides() {
		let out = convert(
			&Payload::Push(push(1)),
			HookEventType::Push,
			r#"{"username":"forge-bot","icon_url":"http://img"}"#,
		)
		.unwrap();
		assert_eq!(out.username, "forge-bot");
		assert_eq!(out.avatar_url, "http://img");
		assert!(convert(&Payload::Push(push(1)), HookEventType::Push, "{").is_err());
	}

	#[test]
	fn test_long_description_is_truncated() {
		let mut p = push(1);
		p.commits[0].message = "x".repeat(5000);
		let e = embed(Payload::Push(p), HookEventType::Push);
		assert_eq!(e.description.chars().count(), MAX_DESCRIPTION);
		assert!(e.description.ends_with("..."));
	}
}
