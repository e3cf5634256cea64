// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Newline-delimited JSON protocol spoken between `runq-daemon` and its
//! clients.
//!
//! Requests carry an `id`; responses echo it with either `result` or
//! `error`. Server-pushed events carry only `method` and `params`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CancelOutcome, ExecutionOptions, JobId, JobStatus, OutputEvent};

pub const DEFAULT_LIST_LIMIT: usize = 50;

/// JSON-RPC style request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Success response.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
	pub id: u64,
	pub result: Value,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub id: u64,
	pub error: RpcError,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
	pub code: &'static str,
	pub message: String,
}

/// Any line received by a client: a response or a pushed event.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
	#[serde(default)]
	pub id: Option<u64>,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<IncomingError>,
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingError {
	pub code: String,
	pub message: String,
}

/// Server to client event.
#[derive(Debug, Serialize)]
pub struct Event {
	pub method: &'static str,
	pub params: Value,
}

impl SuccessResponse {
	pub fn new<T: Serialize>(id: u64, result: T) -> Self {
		Self {
			id,
			result: serde_json::to_value(result).unwrap_or(Value::Null),
		}
	}
}

impl ErrorResponse {
	pub fn new(id: u64, code: &'static str, message: impl Into<String>) -> Self {
		Self {
			id,
			error: RpcError {
				code,
				message: message.into(),
			},
		}
	}
}

impl Event {
	pub fn new<T: Serialize>(method: &'static str, params: T) -> Self {
		Self {
			method,
			params: serde_json::to_value(params).unwrap_or(Value::Null),
		}
	}
}

// Error codes
pub const AUTH_REQUIRED: &str = "auth_required";
pub const AUTH_FAILED: &str = "auth_failed";
pub const INVALID_PARAMS: &str = "invalid_params";
pub const JOB_NOT_FOUND: &str = "job_not_found";
pub const INVALID_SUBMISSION: &str = "invalid_submission";
pub const SHUTTING_DOWN: &str = "shutting_down";
pub const INTERNAL_ERROR: &str = "internal_error";

// Method names
pub const METHOD_AUTH: &str = "auth";
pub const METHOD_SUBMIT: &str = "submit";
pub const METHOD_STATUS: &str = "status";
pub const METHOD_OUTPUT: &str = "output";
pub const METHOD_CANCEL: &str = "cancel";
pub const METHOD_LIST: &str = "list";
pub const METHOD_SUBSCRIBE: &str = "subscribe";
pub const METHOD_UNSUBSCRIBE: &str = "unsubscribe";
pub const METHOD_STATS: &str = "stats";

// Event names
pub const EVENT_JOB_OUTPUT: &str = "job_output";
pub const EVENT_JOB_SUBSCRIPTION_END: &str = "job_subscription_end";

// --- Request params ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthParams {
	pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub options: ExecutionOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdParams {
	pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputParams {
	pub job_id: JobId,
	#[serde(default)]
	pub since: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListParams {
	#[serde(default = "default_list_limit")]
	pub limit: usize,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<JobStatus>,
}

fn default_list_limit() -> usize {
	DEFAULT_LIST_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeParams {
	pub job_id: JobId,
	#[serde(default)]
	pub since: u64,
}

// --- Results ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
	pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
	pub job_id: JobId,
	pub status: JobStatus,
	pub queue_position: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResult {
	pub outcome: CancelOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResult {
	pub job_id: JobId,
	pub since: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeResult {
	pub job_id: JobId,
	/// `false` if no subscription for this job was active.
	pub removed: bool,
}

// --- Event params ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutputParams {
	pub job_id: JobId,
	pub event: OutputEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubscriptionEndParams {
	pub job_id: JobId,
	/// Status at the moment the stream ended; `None` if the job was evicted.
	pub status: Option<JobStatus>,
}
