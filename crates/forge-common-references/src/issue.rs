// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::LazyLock;

use regex::Regex;

use crate::{IssueReference, KeywordSet, RefSpan};

static VALID_NAME_PATTERN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[a-z0-9_.-]+$").unwrap());

static ISSUE_NUMERIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r#"(?:\s|^|\(|\[|'|")([#!][0-9]+)(?:\s|$|\)|\]|'|"|[:;,.?!]\s|[:;,.?!]$)"#).unwrap()
});

static CROSS_REFERENCE_ISSUE_NUMERIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?:\s|^|\(|\[)([-0-9a-zA-Z_.]+/[-0-9a-zA-Z_.]+[#!][0-9]+)(?:\s|$|\)|\]|[:;,.?!]\s|[:;,.?!]$)",
	)
	.unwrap()
});

/// All issue and pull references in `content`: local `#N`/`!N` first, then
/// cross-repository `owner/repo#N`.
///
/// When `app_url` is given, full links such as
/// `{app_url}owner/repo/issues/N` are treated as `owner/repo#N`. Spans then
/// refer to the rewritten text.
pub fn find_all_issue_references(
	content: &str,
	keywords: &KeywordSet,
	app_url: Option<&str>,
) -> Vec<IssueReference> {
	let content = match app_url.and_then(issue_link_pattern) {
		Some(pattern) => shorten_issue_links(&pattern, content),
		None => content.to_string(),
	};

	let mut references = Vec::new();
	for pattern in [&*ISSUE_NUMERIC_PATTERN, &*CROSS_REFERENCE_ISSUE_NUMERIC_PATTERN] {
		let mut pos = 0;
		while pos <= content.len() {
			let Some(found) = pattern.captures(&content[pos..]).and_then(|c| c.get(1)) else {
				break;
			};
			let (start, end) = (found.start() + pos, found.end() + pos);
			if let Some(reference) = parse_reference(&content, start, end, keywords) {
				references.push(reference);
			}
			pos = end;
		}
	}
	references
}

fn issue_link_pattern(app_url: &str) -> Option<Regex> {
	let app_url = app_url.trim();
	if app_url.is_empty() {
		return None;
	}
	let base = if app_url.ends_with('/') {
		app_url.to_string()
	} else {
		format!("{app_url}/")
	};
	Regex::new(&format!(
		r"(\s|^|\(|\[){}([-0-9a-zA-Z_.]+/[-0-9a-zA-Z_.]+)/(issues|pulls)/([0-9]+)(?:\s|$|\)|\]|[:;,.?!]\s|[:;,.?!]$)",
		regex::escape(&base)
	))
	.ok()
}

/// Rewrite `{app_url}owner/repo/issues/N` into `owner/repo#N` and
/// `{app_url}owner/repo/pulls/N` into `owner/repo!N`.
fn shorten_issue_links(pattern: &Regex, content: &str) -> String {
	let mut out = content.to_string();
	let mut pos = 0;
	while pos <= out.len() {
		let Some(caps) = pattern.captures(&out[pos..]) else {
			break;
		};
		let (Some(preamble), Some(repo), Some(kind), Some(number)) =
			(caps.get(1), caps.get(2), caps.get(3), caps.get(4))
		else {
			break;
		};
		let marker = if kind.as_str() == "pulls" { '!' } else { '#' };
		let short = format!("{}{marker}{}", repo.as_str(), number.as_str());
		let (replace_start, replace_end) = (preamble.end() + pos, number.end() + pos);
		out.replace_range(replace_start..replace_end, &short);
		pos = replace_start + short.len();
	}
	out
}

fn parse_reference(
	content: &str,
	start: usize,
	end: usize,
	keywords: &KeywordSet,
) -> Option<IssueReference> {
	let text = &content[start..end];
	let sep = text.find(['#', '!'])?;
	let is_pull = text.as_bytes()[sep] == b'!';
	let index: i64 = text[sep + 1..].parse().ok()?;
	let repo = &text[..sep];

	let (owner, name) = if repo.is_empty() {
		(None, None)
	} else {
		let lowered = repo.to_lowercase();
		let (owner, name) = lowered.split_once('/')?;
		if name.contains('/')
			|| !VALID_NAME_PATTERN.is_match(owner)
			|| !VALID_NAME_PATTERN.is_match(name)
		{
			return None;
		}
		(Some(owner.to_string()), Some(name.to_string()))
	};

	let (action, action_span) = keywords.find_action(content, start);
	Some(IssueReference {
		index,
		owner,
		name,
		action,
		is_pull,
		ref_span: RefSpan { start, end },
		action_span,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::RefAction;
	use proptest::prelude::*;

	fn find(content: &str) -> Vec<IssueReference> {
		find_all_issue_references(content, &KeywordSet::default(), None)
	}

	#[test]
	fn test_local_references() {
		let refs = find("see #1 and !2.");
		assert_eq!(refs.len(), 2);
		assert_eq!(refs[0].index, 1);
		assert!(!refs[0].is_pull);
		assert_eq!(refs[1].index, 2);
		assert!(refs[1].is_pull);
		assert!(!refs[0].is_cross_repo());
	}

	#[test]
	fn test_adjacent_local_references() {
		let refs = find("#1 #2 #3");
		let indices: Vec<i64> = refs.iter().map(|r| r.index).collect();
		assert_eq!(indices, vec![1, 2, 3]);
	}

	#[test]
	fn test_cross_reference_is_lowercased() {
		let refs = find("Duplicate of Acme/Tools#42");
		assert_eq!(refs.len(), 1);
		assert_eq!(refs[0].owner.as_deref(), Some("acme"));
		assert_eq!(refs[0].name.as_deref(), Some("tools"));
		assert_eq!(refs[0].index, 42);
	}

	#[test]
	fn test_close_keyword_sets_action() {
		let refs = find("Closes #7, relates to #8");
		assert_eq!(refs[0].action, RefAction::Closes);
		let span = refs[0].action_span.unwrap();
		assert_eq!(span, RefSpan { start: 0, end: 6 });
		assert_eq!(refs[1].action, RefAction::None);
	}

	#[test]
	fn test_reopen_keyword_on_cross_reference() {
		let refs = find("reopens acme/tools!5");
		assert_eq!(refs[0].action, RefAction::Reopens);
		assert!(refs[0].is_pull);
	}

	#[test]
	fn test_embedded_hash_is_not_a_reference() {
		assert!(find("color:#123 and abc#4").is_empty());
	}

	#[test]
	fn test_full_links_are_shortened() {
		let content = "fixes https://forge.example.com/acme/tools/issues/9 and https://forge.example.com/acme/tools/pulls/10";
		let refs =
			find_all_issue_references(content, &KeywordSet::default(), Some("https://forge.example.com"));
		assert_eq!(refs.len(), 2);
		assert_eq!(refs[0].index, 9);
		assert!(!refs[0].is_pull);
		assert_eq!(refs[0].action, RefAction::Closes);
		assert_eq!(refs[1].index, 10);
		assert!(refs[1].is_pull);
	}

	#[test]
	fn test_links_to_other_hosts_are_ignored() {
		let refs = find_all_issue_references(
			"https://elsewhere.example/acme/tools/issues/9",
			&KeywordSet::default(),
			Some("https://forge.example.com/"),
		);
		assert!(refs.is_empty());
	}

	proptest! {
		#[test]
		fn any_local_index_is_found(index in 1i64..1_000_000) {
			let refs = find(&format!("see #{index}"));
			prop_assert_eq!(refs.len(), 1);
			prop_assert_eq!(refs[0].index, index);
		}
	}
}
