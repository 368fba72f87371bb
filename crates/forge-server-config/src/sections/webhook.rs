// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook delivery and hook task retention.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How old hook tasks are pruned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupType {
	/// Delete delivered tasks older than `cleanup_older_than_days`.
	#[default]
	OlderThan,
	/// Keep the newest `cleanup_keep_number` delivered tasks per webhook.
	PerWebhook,
}

impl fmt::Display for CleanupType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CleanupType::OlderThan => write!(f, "older_than"),
			CleanupType::PerWebhook => write!(f, "per_webhook"),
		}
	}
}

impl FromStr for CleanupType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"older_than" => Ok(CleanupType::OlderThan),
			"per_webhook" => Ok(CleanupType::PerWebhook),
			other => Err(format!("unknown cleanup type '{other}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
	pub deliver_timeout_secs: u64,
	pub skip_tls_verify: bool,
	pub paging_num: u32,
	pub cleanup_type: CleanupType,
	pub cleanup_older_than_days: u32,
	pub cleanup_keep_number: u32,
}

impl Default for WebhookConfig {
	fn default() -> Self {
		Self {
			deliver_timeout_secs: 5,
			skip_tls_verify: false,
			paging_num: 10,
			cleanup_type: CleanupType::OlderThan,
			cleanup_older_than_days: 7,
			cleanup_keep_number: 10,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfigLayer {
	#[serde(default)]
	pub deliver_timeout_secs: Option<u64>,
	#[serde(default)]
	pub skip_tls_verify: Option<bool>,
	#[serde(default)]
	pub paging_num: Option<u32>,
	#[serde(default)]
	pub cleanup_type: Option<CleanupType>,
	#[serde(default)]
	pub cleanup_older_than_days: Option<u32>,
	#[serde(default)]
	pub cleanup_keep_number: Option<u32>,
}

impl WebhookConfigLayer {
	pub fn merge(&mut self, other: WebhookConfigLayer) {
		if other.deliver_timeout_secs.is_some() {
			self.deliver_timeout_secs = other.deliver_timeout_secs;
		}
		if other.skip_tls_verify.is_some() {
			self.skip_tls_verify = other.skip_tls_verify;
		}
		if other.paging_num.is_some() {
			self.paging_num = other.paging_num;
		}
		if other.cleanup_type.is_some() {
			self.cleanup_type = other.cleanup_type;
		}
		if other.cleanup_older_than_days.is_some() {
			self.cleanup_older_than_days = other.cleanup_older_than_days;
		}
		if other.cleanup_keep_number.is_some() {
			self.cleanup_keep_number = other.cleanup_keep_number;
		}
	}

	pub fn finalize(self) -> WebhookConfig {
		let defaults = WebhookConfig::default();
		WebhookConfig {
			deliver_timeout_secs: self.deliver_timeout_secs.unwrap_or(defaults.deliver_timeout_secs),
			skip_tls_verify: self.skip_tls_verify.unwrap_or(defaults.skip_tls_verify),
			paging_num: self.paging_num.unwrap_or(defaults.paging_num),
			cleanup_type: self.cleanup_type.unwrap_or(defaults.cleanup_type),
			cleanup_older_than_days: self
				.cleanup_older_than_days
				.unwrap_or(defaults.cleanup_older_than_days),
			cleanup_keep_number: self.cleanup_keep_number.unwrap_or(defaults.cleanup_keep_number),
		}
	}
}
