// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Signing of outgoing webhook deliveries.
//!
//! Receivers verify the `X-Forge-Signature` header (bare hex) or the
//! `X-Hub-Signature-256` header (`sha256=` prefixed) against the request body.

mod secret;

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub use secret::{SigningSecret, REDACTED};

type HmacSha256 = Hmac<Sha256>;

/// Prefix used by the `X-Hub-Signature-256` header.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// HMAC-SHA256 of `payload`, hex-encoded without any prefix.
pub fn compute_hmac_sha256(secret: &[u8], payload: &[u8]) -> String {
	let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
	mac.update(payload);
	hex::encode(mac.finalize().into_bytes())
}

/// Check a signature produced by [`compute_hmac_sha256`]. A leading
/// `sha256=` is accepted.
pub fn verify_hmac_sha256(secret: &[u8], payload: &[u8], signature: &str) -> bool {
	let signature = signature
		.strip_prefix(SIGNATURE_PREFIX)
		.unwrap_or(signature);
	let Ok(expected) = hex::decode(signature) else {
		return false;
	};
	let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
		return false;
	};
	mac.update(payload);
	mac.verify_slice(&expected).is_ok()
}

/// The two signature header values for a delivery body, or `None` when no
/// secret is configured.
pub fn signature_headers(secret: &SigningSecret, payload: &[u8]) -> Option<(String, String)> {
	if secret.is_empty() {
		return None;
	}
	let signature = compute_hmac_sha256(secret.expose().as_bytes(), payload);
	let prefixed = format!("{SIGNATURE_PREFIX}{signature}");
	Some((signature, prefixed))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_signature_is_hex() {
		let sig = compute_hmac_sha256(b"hook-secret", b"{\"ref\":\"refs/heads/main\"}");
		assert_eq!(sig.len(), 64);
		assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
	}

	#[test]
	fn test_verify_accepts_prefix() {
		let sig = compute_hmac_sha256(b"hook-secret", b"body");
		assert!(verify_hmac_sha256(b"hook-secret", b"body", &sig));
		assert!(verify_hmac_sha256(
			b"hook-secret",
			b"body",
			&format!("sha256={sig}")
		));
	}

	#[test]
	fn test_verify_rejects_tampering() {
		let sig = compute_hmac_sha256(b"hook-secret", b"body");
		assert!(!verify_hmac_sha256(b"hook-secret", b"bodies", &sig));
		assert!(!verify_hmac_sha256(b"other-secret", b"body", &sig));
		assert!(!verify_hmac_sha256(b"hook-secret", b"body", "zz-not-hex"));
	}

	#[test]
	fn test_signature_headers() {
		assert!(signature_headers(&SigningSecret::new(""), b"body").is_none());

		let (bare, prefixed) = signature_headers(&SigningSecret::new("s3cret"), b"body").unwrap();
		assert_eq!(prefixed, format!("sha256={bare}"));
		assert!(verify_hmac_sha256(b"s3cret", b"body", &prefixed));
	}
}
