// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use forge_server_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
	#[error("database error: {0}")]
	Db(#[from] DbError),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("invalid URL: {0}")]
	InvalidUrl(#[from] url::ParseError),

	/// The webhook's per-type settings are missing or malformed.
	#[error("invalid {hook_type} webhook settings: {message}")]
	InvalidMeta { hook_type: &'static str, message: String },

	#[error("unsupported HTTP method: {0}")]
	UnsupportedMethod(String),

	#[error("webhook {0} not found")]
	WebhookNotFound(i64),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
