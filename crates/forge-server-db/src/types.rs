// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Types shared across stores.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// Permission level a user holds on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
	None = 0,
	Read = 1,
	Write = 2,
	Admin = 3,
	Owner = 4,
}

impl AccessMode {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Self {
		match v {
			1 => AccessMode::Read,
			2 => AccessMode::Write,
			3 => AccessMode::Admin,
			4 => AccessMode::Owner,
			_ => AccessMode::None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			AccessMode::None => "none",
			AccessMode::Read => "read",
			AccessMode::Write => "write",
			AccessMode::Admin => "admin",
			AccessMode::Owner => "owner",
		}
	}
}

impl std::str::FromStr for AccessMode {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"none" => Ok(AccessMode::None),
			"read" => Ok(AccessMode::Read),
			"write" => Ok(AccessMode::Write),
			"admin" => Ok(AccessMode::Admin),
			"owner" => Ok(AccessMode::Owner),
			_ => Err(()),
		}
	}
}

/// Account visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
	Public = 0,
	Limited = 1,
	Private = 2,
}

impl Visibility {
	pub fn as_i64(&self) -> i64 {
		*self as i64
	}

	pub fn from_i64(v: i64) -> Self {
		match v {
			1 => Visibility::Limited,
			2 => Visibility::Private,
			_ => Visibility::Public,
		}
	}
}

/// Pagination for list queries. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
	pub page: i64,
	pub page_size: i64,
}

impl Default for ListOptions {
	fn default() -> Self {
		Self {
			page: 1,
			page_size: 50,
		}
	}
}

impl ListOptions {
	pub fn new(page: i64, page_size: i64) -> Self {
		Self { page, page_size }
	}

	/// `(limit, offset)` with page and size clamped to sane values.
	pub fn limit_offset(&self) -> (i64, i64) {
		let size = self.page_size.clamp(1, 500);
		let page = self.page.max(1);
		(size, page.saturating_sub(1).saturating_mul(size))
	}
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string order
/// matches time order.
pub(crate) fn to_db_time(t: &DateTime<Utc>) -> String {
	t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_db_time() -> String {
	to_db_time(&Utc::now())
}

pub(crate) fn from_db_time(s: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(s)
		.map(|d| d.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp '{s}': {e}")))
}

pub(crate) fn from_opt_db_time(s: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
	s.as_deref().map(from_db_time).transpose()
}
