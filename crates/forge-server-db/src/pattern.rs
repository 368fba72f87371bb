// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Glob matching for branch rules, branch filters and file patterns.
//!
//! `glob::Pattern` has no `{a,b}` alternation, so alternations are expanded
//! first and the text matches when any expansion does.

use glob::{MatchOptions, Pattern};

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '\\'];

/// True when `s` contains no glob metacharacter and therefore names exactly
/// one branch.
pub fn is_plain_name(s: &str) -> bool {
	!s.contains(GLOB_META)
}

/// Expand `{a,b}` alternations, innermost groups included.
pub(crate) fn expand_braces(pattern: &str) -> Vec<String> {
	let Some(open) = pattern.find('{') else {
		return vec![pattern.to_string()];
	};

	let mut depth = 0usize;
	let mut bounds = vec![open];
	let mut close = None;
	for (offset, c) in pattern[open..].char_indices() {
		let i = open + offset;
		match c {
			'{' => depth += 1,
			'}' => {
				depth -= 1;
				if depth == 0 {
					close = Some(i);
					break;
				}
			}
			',' if depth == 1 => bounds.push(i),
			_ => {}
		}
	}
	let Some(close) = close else {
		return vec![pattern.to_string()];
	};
	bounds.push(close);

	let prefix = &pattern[..open];
	let suffix = &pattern[close + 1..];
	bounds
		.windows(2)
		.flat_map(|w| expand_braces(&format!("{prefix}{}{suffix}", &pattern[w[0] + 1..w[1]])))
		.collect()
}

/// Compile every expansion of `pattern`. Expansions that are not valid globs
/// are skipped.
pub(crate) fn compile(pattern: &str) -> Vec<Pattern> {
	expand_braces(pattern)
		.iter()
		.filter_map(|p| match Pattern::new(p) {
			Ok(compiled) => Some(compiled),
			Err(e) => {
				tracing::warn!(pattern = %p, error = %e, "skipping invalid glob");
				None
			}
		})
		.collect()
}

/// Match `text` against `pattern`. With `literal_separator`, `*` and `?`
/// never cross a `/`.
pub(crate) fn glob_match(pattern: &str, text: &str, literal_separator: bool) -> bool {
	let options = MatchOptions {
		case_sensitive: true,
		require_literal_separator: literal_separator,
		require_literal_leading_dot: false,
	};
	compile(pattern).iter().any(|p| p.matches_with(text, options))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_expand_braces() {
		assert_eq!(expand_braces("main"), vec!["main"]);
		assert_eq!(expand_braces("{main,dev}"), vec!["main", "dev"]);
		assert_eq!(
			expand_braces("release/{v1,v2}/*"),
			vec!["release/v1/*", "release/v2/*"]
		);
		assert_eq!(expand_braces("{a,{b,c}}"), vec!["a", "b", "c"]);
		assert_eq!(expand_braces("{unclosed"), vec!["{unclosed"]);
	}

	#[test]
	fn test_glob_match_separators() {
		assert!(glob_match("release/*", "release/v1", true));
		assert!(!glob_match("release/*", "release/v1/hotfix", true));
		assert!(glob_match("release/*", "release/v1/hotfix", false));
		assert!(glob_match("{main,release/*}", "main", true));
		assert!(!glob_match("{main,release/*}", "develop", true));
	}

	#[test]
	fn test_is_plain_name() {
		assert!(is_plain_name("main"));
		assert!(is_plain_name("release/v1.0"));
		assert!(!is_plain_name("release/*"));
		assert!(!is_plain_name("{a,b}"));
	}
}
