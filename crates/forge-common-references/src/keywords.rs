// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use regex::Regex;

use crate::{RefAction, RefSpan};

pub const DEFAULT_CLOSE_KEYWORDS: &[&str] = &[
	"close", "closes", "closed", "fix", "fixes", "fixed", "resolve", "resolves", "resolved",
];

pub const DEFAULT_REOPEN_KEYWORDS: &[&str] = &["reopen", "reopens", "reopened"];

/// Words that, placed right before a reference, close or reopen its target.
#[derive(Debug, Clone)]
pub struct KeywordSet {
	close: Option<Regex>,
	reopen: Option<Regex>,
}

impl KeywordSet {
	/// Words containing anything other than letters are ignored. An empty
	/// list never matches.
	pub fn new<S: AsRef<str>>(close: &[S], reopen: &[S]) -> Self {
		Self {
			close: keyword_pattern(close),
			reopen: keyword_pattern(reopen),
		}
	}

	/// Look for a keyword ending right where the reference starts.
	pub(crate) fn find_action(&self, content: &str, start: usize) -> (RefAction, Option<RefSpan>) {
		let before = &content[..start];
		for (pattern, action) in [
			(&self.close, RefAction::Closes),
			(&self.reopen, RefAction::Reopens),
		] {
			let Some(pattern) = pattern else {
				continue;
			};
			if let Some(word) = pattern.captures(before).and_then(|c| c.get(1)) {
				return (
					action,
					Some(RefSpan {
						start: word.start(),
						end: word.end(),
					}),
				);
			}
		}
		(RefAction::None, None)
	}
}

impl Default for KeywordSet {
	fn default() -> Self {
		Self::new(DEFAULT_CLOSE_KEYWORDS, DEFAULT_REOPEN_KEYWORDS)
	}
}

fn keyword_pattern<S: AsRef<str>>(words: &[S]) -> Option<Regex> {
	let accepted: Vec<String> = words
		.iter()
		.map(|w| w.as_ref().trim().to_lowercase())
		.filter(|w| {
			let ok = !w.is_empty() && w.chars().all(char::is_alphabetic);
			if !ok {
				tracing::info!(keyword = %w, "ignoring invalid reference keyword");
			}
			ok
		})
		.collect();
	if accepted.is_empty() {
		return None;
	}
	Regex::new(&format!(r"(?i)(?:\s|^|\(|\[)({}):? $", accepted.join("|"))).ok()
}
