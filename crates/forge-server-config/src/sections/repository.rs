// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Issue and pull request behavior.

use serde::Deserialize;

const DEFAULT_WIP_PREFIXES: &[&str] = &["WIP:", "[WIP]"];
const DEFAULT_CLOSE_KEYWORDS: &[&str] = &[
	"close", "closes", "closed", "fix", "fixes", "fixed", "resolve", "resolves", "resolved",
];
const DEFAULT_REOPEN_KEYWORDS: &[&str] = &["reopen", "reopens", "reopened"];
const DEFAULT_APP_URL: &str = "http://localhost:3000/";

fn owned(words: &[&str]) -> Vec<String> {
	words.iter().map(|w| w.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryConfig {
	/// Pull requests whose title starts with one of these are drafts.
	pub work_in_progress_prefixes: Vec<String>,
	pub close_keywords: Vec<String>,
	pub reopen_keywords: Vec<String>,
	pub enable_dependencies: bool,
	pub allow_cross_repo_dependencies: bool,
	/// Public base URL, used to recognise full issue links in comments.
	pub app_url: String,
}

impl Default for RepositoryConfig {
	fn default() -> Self {
		Self {
			work_in_progress_prefixes: owned(DEFAULT_WIP_PREFIXES),
			close_keywords: owned(DEFAULT_CLOSE_KEYWORDS),
			reopen_keywords: owned(DEFAULT_REOPEN_KEYWORDS),
			enable_dependencies: true,
			allow_cross_repo_dependencies: false,
			app_url: DEFAULT_APP_URL.to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryConfigLayer {
	#[serde(default)]
	pub work_in_progress_prefixes: Option<Vec<String>>,
	#[serde(default)]
	pub close_keywords: Option<Vec<String>>,
	#[serde(default)]
	pub reopen_keywords: Option<Vec<String>>,
	#[serde(default)]
	pub enable_dependencies: Option<bool>,
	#[serde(default)]
	pub allow_cross_repo_dependencies: Option<bool>,
	#[serde(default)]
	pub app_url: Option<String>,
}

impl RepositoryConfigLayer {
	pub fn merge(&mut self, other: RepositoryConfigLayer) {
		if other.work_in_progress_prefixes.is_some() {
			self.work_in_progress_prefixes = other.work_in_progress_prefixes;
		}
		if other.close_keywords.is_some() {
			self.close_keywords = other.close_keywords;
		}
		if other.reopen_keywords.is_some() {
			self.reopen_keywords = other.reopen_keywords;
		}
		if other.enable_dependencies.is_some() {
			self.enable_dependencies = other.enable_dependencies;
		}
		if other.allow_cross_repo_dependencies.is_some() {
			self.allow_cross_repo_dependencies = other.allow_cross_repo_dependencies;
		}
		if other.app_url.is_some() {
			self.app_url = other.app_url;
		}
	}

	pub fn finalize(self) -> RepositoryConfig {
		let defaults = RepositoryConfig::default();
		RepositoryConfig {
			work_in_progress_prefixes: self
				.work_in_progress_prefixes
				.unwrap_or(defaults.work_in_progress_prefixes),
			close_keywords: self.close_keywords.unwrap_or(defaults.close_keywords),
			reopen_keywords: self.reopen_keywords.unwrap_or(defaults.reopen_keywords),
			enable_dependencies: self.enable_dependencies.unwrap_or(defaults.enable_dependencies),
			allow_cross_repo_dependencies: self
				.allow_cross_repo_dependencies
				.unwrap_or(defaults.allow_cross_repo_dependencies),
			app_url: self.app_url.unwrap_or(defaults.app_url),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = RepositoryConfigLayer::default().finalize();
		assert_eq!(config.work_in_progress_prefixes, vec!["WIP:", "[WIP]"]);
		assert_eq!(config.close_keywords.len(), 9);
		assert_eq!(config.reopen_keywords, vec!["reopen", "reopens", "reopened"]);
		assert!(config.enable_dependencies);
		assert!(!config.allow_cross_repo_dependencies);
		assert_eq!(config.app_url, "http://localhost:3000/");
	}

	#[test]
	fn test_empty_list_is_kept() {
		let config = RepositoryConfigLayer {
			work_in_progress_prefixes: Some(Vec::new()),
			..Default::default()
		}
		.finalize();
		assert!(config.work_in_progress_prefixes.is_empty());
	}
}
