// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::LazyLock;

use regex::Regex;

static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?:\s|^|\(|\[)(@[-0-9A-Za-z_][-.0-9A-Za-z_]*?|@[-0-9A-Za-z_][-.0-9A-Za-z_]*?/[-0-9A-Za-z_][-.0-9A-Za-z_]*?)(?:\s|$|[:,;.?!](?:\s|$)|'|\)|\])",
	)
	.unwrap()
});

/// User and `org/team` names mentioned in `content`, without the `@`.
///
/// The trailing separator of one mention may be the leading separator of the
/// next, so matching restarts right after each name.
pub fn find_all_mentions(content: &str) -> Vec<String> {
	let mut mentions = Vec::new();
	let mut pos = 0;
	while pos <= content.len() {
		let Some(name) = MENTION_PATTERN
			.captures(&content[pos..])
			.and_then(|c| c.get(1))
		else {
			break;
		};
		mentions.push(name.as_str()[1..].to_string());
		pos += name.end();
	}
	mentions
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_single_mention() {
		assert_eq!(find_all_mentions("hello @alice!"), vec!["alice"]);
	}

	#[test]
	fn test_adjacent_mentions() {
		assert_eq!(
			find_all_mentions("@alice @bob @carol"),
			vec!["alice", "bob", "carol"]
		);
	}

	#[test]
	fn test_team_mention() {
		assert_eq!(find_all_mentions("ping @acme/devs."), vec!["acme/devs"]);
	}

	#[test]
	fn test_email_is_not_a_mention() {
		assert!(find_all_mentions("mail alice@example.com").is_empty());
	}

	#[test]
	fn test_mention_in_parens() {
		assert_eq!(find_all_mentions("(cc @dave)"), vec!["dave"]);
	}
}
