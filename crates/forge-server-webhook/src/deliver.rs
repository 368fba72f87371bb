// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-attempt delivery of stored hook tasks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use forge_common_webhook::signature_headers;
use forge_server_config::WebhookConfig;
use forge_server_db::{
	HookContentType, HookRequest, HookResponse, HookStatus, HookTask, HookTaskStore, Webhook, WebhookStore,
};
use reqwest::Method;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, WebhookError};

pub const DELIVERY_HEADER: &str = "X-Forge-Delivery";
pub const EVENT_HEADER: &str = "X-Forge-Event";
pub const EVENT_TYPE_HEADER: &str = "X-Forge-Event-Type";
pub const SIGNATURE_HEADER: &str = "X-Forge-Signature";
pub const HUB_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const USER_AGENT: &str = "Forge-Webhook/1.0";

/// A request ready to send, kept separate so it can be recorded on the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
	pub method: Method,
	pub url: Url,
	pub headers: BTreeMap<String, String>,
	pub body: Option<String>,
}

impl PreparedRequest {
	fn record(&self) -> HookRequest {
		HookRequest {
			url: self.url.to_string(),
			http_method: self.method.to_string(),
			headers: self.headers.clone(),
		}
	}
}

/// Build the HTTP request for `task` as configured on `webhook`.
///
/// Signatures cover the stored payload content, which is the request body
/// for JSON webhooks.
pub fn prepare_request(webhook: &Webhook, task: &HookTask) -> Result<PreparedRequest> {
	let mut url = Url::parse(&webhook.url)?;
	let mut headers = BTreeMap::new();
	let payload = task.payload_content.as_str();

	let (method, body) = match webhook.http_method.to_ascii_uppercase().as_str() {
		"" | "POST" | "PUT" => {
			let method = if webhook.http_method.eq_ignore_ascii_case("PUT") {
				Method::PUT
			} else {
				Method::POST
			};
			let body = match webhook.content_type {
				HookContentType::Json => {
					headers.insert("Content-Type".to_string(), "application/json".to_string());
					payload.to_string()
				}
				HookContentType::Form => {
					headers.insert(
						"Content-Type".to_string(),
						"application/x-www-form-urlencoded".to_string(),
					);
					url::form_urlencoded::Serializer::new(String::new())
						.append_pair("payload", payload)
						.finish()
				}
			};
			(method, Some(body))
		}
		"GET" => {
			url.query_pairs_mut().append_pair("payload", payload);
			(Method::GET, None)
		}
		other => return Err(WebhookError::UnsupportedMethod(other.to_string())),
	};

	headers.insert(DELIVERY_HEADER.to_string(), task.uuid.clone());
	headers.insert(EVENT_HEADER.to_string(), task.event_type.event().to_string());
	headers.insert(EVENT_TYPE_HEADER.to_string(), task.event_type.as_str().to_string());
	if let Some((signature, prefixed)) = signature_headers(&webhook.secret, payload.as_bytes()) {
		headers.insert(SIGNATURE_HEADER.to_string(), signature);
		headers.insert(HUB_SIGNATURE_HEADER.to_string(), prefixed);
	}

	Ok(PreparedRequest {
		method,
		url,
		headers,
		body,
	})
}

pub fn build_client(config: &WebhookConfig) -> Result<reqwest::Client> {
	let client = reqwest::Client::builder()
		.timeout(Duration::from_secs(config.deliver_timeout_secs))
		.danger_accept_invalid_certs(config.skip_tls_verify)
		.user_agent(USER_AGENT)
		.build()?;
	Ok(client)
}

/// Sends hook tasks and records the outcome on the task and its webhook.
#[derive(Clone)]
pub struct HookDeliverer {
	client: reqwest::Client,
	hooks: Arc<dyn WebhookStore>,
	tasks: Arc<dyn HookTaskStore>,
}

impl HookDeliverer {
	pub fn new(client: reqwest::Client, hooks: Arc<dyn WebhookStore>, tasks: Arc<dyn HookTaskStore>) -> Self {
		Self { client, hooks, tasks }
	}

	/// Deliver `task` once. Transport failures are recorded as a failed
	/// delivery with status 0 rather than returned.
	#[tracing::instrument(skip(self, webhook, task), fields(hook_id = webhook.id, task_id = task.id))]
	pub async fn deliver(&self, webhook: &Webhook, task: &mut HookTask) -> Result<()> {
		let request = prepare_request(webhook, task)?;
		task.request_content = Some(request.record());

		let mut builder = self.client.request(request.method, request.url);
		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		if let Some(body) = request.body {
			builder = builder.body(body);
		}

		let response = match builder.send().await {
			Ok(resp) => {
				let status = resp.status().as_u16();
				let headers = resp
					.headers()
					.iter()
					.map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
					.collect();
				let body = match resp.text().await {
					Ok(body) => body,
					Err(e) => format!("unable to read response body: {e}"),
				};
				HookResponse { status, headers, body }
			}
			Err(e) => {
				warn!(error = %e, "webhook delivery failed");
				HookResponse {
					status: 0,
					headers: BTreeMap::new(),
					body: e.to_string(),
				}
			}
		};

		task.is_succeed = (200..300).contains(&response.status);
		task.is_delivered = true;
		task.delivered_at = Some(Utc::now());
		task.response_content = Some(response);
		self.tasks.update_hook_task(task).await?;

		let status = if task.is_succeed {
			HookStatus::Succeed
		} else {
			HookStatus::Fail
		};
		self.hooks.update_webhook_last_status(webhook.id, status).await?;

		debug!(is_succeed = task.is_succeed, "hook task delivered");
		Ok(())
	}

	/// Look up the task's webhook and deliver it.
	pub async fn deliver_task(&self, task: &mut HookTask) -> Result<()> {
		let webhook = match self.hooks.get_webhook_by_id(task.hook_id).await {
			Ok(webhook) => webhook,
			Err(e) if e.is_not_found() => return Err(WebhookError::WebhookNotFound(task.hook_id)),
			Err(e) => return Err(e.into()),
		};
		self.deliver(&webhook, task).await
	}

	/// Deliver every undelivered task one after another. Returns how many
	/// were attempted; tasks whose webhook is gone are skipped.
	#[tracing::instrument(skip(self))]
	pub async fn deliver_undelivered(&self) -> Result<usize> {
		let pending = self.tasks.find_undelivered_hook_tasks().await?;
		let mut attempted = 0;
		for mut task in pending {
			match self.deliver_task(&mut task).await {
				Ok(()) => attempted += 1,
				Err(e @ (WebhookError::WebhookNotFound(_) | WebhookError::UnsupportedMethod(_))) => {
					warn!(task_id = task.id, error = %e, "skipping hook task");
				}
				Err(e) => return Err(e),
			}
		}
		info!(attempted, "undelivered hook tasks processed");
		Ok(attempted)
	}
}
