// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::LazyLock;

use regex::Regex;

use crate::{CommitReference, RefSpan};

static COMMIT_CROSS_REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?:\s|^|\(|\[)([-0-9a-zA-Z_.]+)/([-0-9a-zA-Z_.]+)@([0-9a-f]{7,64})(?:\s|$|\)|\]|[:;,.?!]\s|[:;,.?!]$)",
	)
	.unwrap()
});

/// First `owner/repo@sha` reference in `content`.
pub fn find_commit_cross_reference(content: &str) -> Option<CommitReference> {
	let caps = COMMIT_CROSS_REFERENCE_PATTERN.captures(content)?;
	let owner = caps.get(1)?;
	let name = caps.get(2)?;
	let sha = caps.get(3)?;
	Some(CommitReference {
		owner: owner.as_str().to_string(),
		name: name.as_str().to_string(),
		sha: sha.as_str().to_string(),
		span: RefSpan {
			start: owner.start(),
			end: sha.end(),
		},
	})
}
