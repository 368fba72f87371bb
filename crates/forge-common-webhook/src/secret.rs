// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

pub const REDACTED: &str = "[REDACTED]";

/// Shared secret of a webhook. Redacted in `Debug`, `Display` and
/// serialized output, and zeroed on drop.
#[derive(Clone, Default, Zeroize)]
#[zeroize(drop)]
pub struct SigningSecret {
	inner: String,
}

impl SigningSecret {
	pub fn new(inner: impl Into<String>) -> Self {
		Self {
			inner: inner.into(),
		}
	}

	pub fn expose(&self) -> &str {
		&self.inner
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}
}

impl fmt::Debug for SigningSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SigningSecret").field(&REDACTED).finish()
	}
}

impl fmt::Display for SigningSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl PartialEq for SigningSecret {
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl Eq for SigningSecret {}

impl Serialize for SigningSecret {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(REDACTED)
	}
}

impl<'de> Deserialize<'de> for SigningSecret {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		String::deserialize(deserializer).map(SigningSecret::new)
	}
}

impl From<String> for SigningSecret {
	fn from(value: String) -> Self {
		SigningSecret::new(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_redacted_output() {
		let secret = SigningSecret::new("hunter2");
		assert_eq!(format!("{secret:?}"), "SigningSecret(\"[REDACTED]\")");
		assert_eq!(secret.to_string(), REDACTED);
		assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[REDACTED]\"");
		assert_eq!(secret.expose(), "hunter2");
	}

	#[test]
	fn test_deserialize_keeps_value() {
		let secret: SigningSecret = serde_json::from_str("\"hunter2\"").unwrap();
		assert_eq!(secret.expose(), "hunter2");
		assert!(!secret.is_empty());
		assert!(SigningSecret::default().is_empty());
	}
}
