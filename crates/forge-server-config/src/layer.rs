// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The partial configuration every source produces.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, RepositoryConfigLayer, WebhookConfigLayer};

/// One source's view of the configuration. Absent sections and fields leave
/// lower-precedence values untouched when merged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfigLayer {
	pub database: Option<DatabaseConfigLayer>,
	pub logging: Option<LoggingConfigLayer>,
	pub repository: Option<RepositoryConfigLayer>,
	pub webhook: Option<WebhookConfigLayer>,
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_section(&mut self.repository, other.repository, RepositoryConfigLayer::merge);
		merge_section(&mut self.webhook, other.webhook, WebhookConfigLayer::merge);
	}
}

fn merge_section<T>(slot: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (slot.as_mut(), other) {
		(Some(current), Some(other)) => merge(current, other),
		(None, Some(other)) => *slot = Some(other),
		(_, None) => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_fills_missing_sections() {
		let mut base = ServerConfigLayer::default();
		base.merge(ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: Some("sqlite:/tmp/a.db".to_string()),
				max_connections: None,
			}),
			..Default::default()
		});
		base.merge(ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: None,
				max_connections: Some(9),
			}),
			..Default::default()
		});

		let database = base.database.unwrap();
		assert_eq!(database.url.as_deref(), Some("sqlite:/tmp/a.db"));
		assert_eq!(database.max_connections, Some(9));
		assert!(base.webhook.is_none());
	}
}
