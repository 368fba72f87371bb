// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Microsoft Teams connector cards.

use forge_server_db::HookEventType;
use serde::{Deserialize, Serialize};

use crate::api::Payload;
use crate::error::Result;
use crate::general::summarize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsTeamsFact {
	pub name: String,
	pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsTeamsSection {
	pub activity_title: String,
	pub activity_subtitle: String,
	pub activity_image: String,
	pub facts: Vec<MsTeamsFact>,
	pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsTeamsActionTarget {
	pub os: String,
	pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsTeamsAction {
	#[serde(rename = "@type")]
	pub action_type: String,
	pub name: String,
	pub targets: Vec<MsTeamsActionTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsTeamsPayload {
	#[serde(rename = "@type")]
	pub card_type: String,
	#[serde(rename = "@context")]
	pub context: String,
	pub theme_color: String,
	pub title: String,
	pub summary: String,
	pub sections: Vec<MsTeamsSection>,
	pub potential_action: Vec<MsTeamsAction>,
}

fn fact(name: &str, value: impl Into<String>) -> MsTeamsFact {
	MsTeamsFact {
		name: name.to_string(),
		value: value.into(),
	}
}

/// The second fact names what the event is about.
fn subject_fact(payload: &Payload) -> MsTeamsFact {
	match payload {
		Payload::Create(p) => fact(&format!("{}:", p.ref_type), p.ref_name.clone()),
		Payload::Delete(p) => fact(&format!("{}:", p.ref_type), p.ref_name.clone()),
		Payload::Fork(p) => fact("Forkee:", p.forkee.full_name.clone()),
		Payload::Push(p) => fact("Commit count:", p.total_commits.max(p.commits.len()).to_string()),
		Payload::Issues(p) => fact("Issue #:", p.issue.number.to_string()),
		Payload::IssueComment(p) if p.is_pull => fact("Pull request #:", p.issue.number.to_string()),
		Payload::IssueComment(p) => fact("Issue #:", p.issue.number.to_string()),
		Payload::PullRequest(p) => fact("Pull request #:", p.pull_request.number.to_string()),
		Payload::Repository(p) => fact("Visibility:", if p.repository.private { "private" } else { "public" }),
		Payload::Release(p) => fact("Tag:", p.release.tag_name.clone()),
	}
}

/// MS Teams has no per-hook settings, so `meta` is ignored.
pub fn convert(payload: &Payload, event: HookEventType, _meta: &str) -> Result<MsTeamsPayload> {
	let summary = summarize(payload, event, "\n\n");
	let sender = payload.sender();
	let repo = payload.repository();

	Ok(MsTeamsPayload {
		card_type: "MessageCard".to_string(),
		context: "https://schema.org/extensions".to_string(),
		theme_color: format!("{:x}", summary.color),
		title: summary.title.clone(),
		summary: summary.title,
		sections: vec![MsTeamsSection {
			activity_title: sender.display_name().to_string(),
			activity_subtitle: sender.username.clone(),
			activity_image: sender.avatar_url.clone(),
			facts: vec![fact("Repository:", repo.full_name.clone()), subject_fact(payload)],
			text: summary.text,
		}],
		potential_action: vec![MsTeamsAction {
			action_type: "OpenUri".to_string(),
			name: "View in Forge".to_string(),
			targets: vec![MsTeamsActionTarget {
				os: "default".to_string(),
				uri: summary.url,
			}],
		}],
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::fixtures::*;
	use crate::api::HookIssueAction;

	#[test]
	fn test_issue_card() {
		let card = convert(
			&Payload::Issues(issue_payload(HookIssueAction::Opened)),
			HookEventType::Issues,
			"",
		)
		.unwrap();
		assert_eq!(card.title, "[test/repo] Issue opened: #2 crash");
		assert_eq!(card.summary, card.title);
		assert_eq!(card.theme_color, "1ac600");
		let section = &card.sections[0];
		assert_eq!(section.activity_subtitle, "user1");
		assert_eq!(section.text, "issue body");
		assert_eq!(section.facts[0].value, "test/repo");
		assert_eq!(section.facts[1].name, "Issue #:");
		assert_eq!(section.facts[1].value, "2");
		assert_eq!(
			card.potential_action[0].targets[0].uri,
			"http://localhost:3000/test/repo/issues/2"
		);
	}

	#[test]
	fn test_push_card_lists_commits() {
		let card = convert(&Payload::Push(push(2)), HookEventType::Push, "").unwrap();
		assert_eq!(card.title, "[test/repo:test] 2 new commits");
		let line = "[2020558](http://localhost:3000/test/repo/commit/2020558fe2e34debb818a514715839cabd25e778) commit message - user1";
		assert_eq!(card.sections[0].text, format!("{line}\n\n{line}"));
		assert_eq!(card.sections[0].facts[1].value, "2");
	}

	#[test]
	fn test_wire_field_names() {
		let card = convert(&Payload::Push(push(1)), HookEventType::Push, "").unwrap();
		let value = serde_json::to_value(&card).unwrap();
		assert_eq!(value["@type"], "MessageCard");
		assert!(value.get("themeColor").is_some());
		assert_eq!(value["potentialAction"][0]["@type"], "OpenUri");
		assert!(value["sections"][0].get("activitySubtitle").is_some());
	}
}
