// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod database;
mod logging;
mod repository;
mod webhook;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use repository::{RepositoryConfig, RepositoryConfigLayer};
pub use webhook::{CleanupType, WebhookConfig, WebhookConfigLayer};
