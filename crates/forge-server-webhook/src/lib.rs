// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outgoing webhooks for the forge server.
//!
//! Events are rendered into [`api::Payload`] values, converted into the body
//! format of each interested webhook and stored as hook tasks by
//! [`prepare_webhooks`]. [`HookDeliverer`] sends stored tasks, once each.

pub mod api;
pub mod deliver;
pub mod discord;
pub mod error;
pub mod general;
pub mod msteams;
pub mod prepare;
pub mod slack;

pub use api::{
	HookIssueAction, HookIssueCommentAction, HookReleaseAction, HookRepoAction, Payload, PayloadComment,
	PayloadCommit, PayloadIssue, PayloadPullRequest, PayloadRelease, PayloadRepository, PayloadUser,
};
pub use deliver::{build_client, prepare_request, HookDeliverer, PreparedRequest};
pub use error::{Result, WebhookError};
pub use prepare::{convert_payload, prepare_webhooks, should_deliver};
