// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job identity, status and record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for JobId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Lifecycle status of a job.
///
/// `Queued` and `Running` are the only non-terminal states. Every other
/// status is absorbing: once a job reaches it, no further transition occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	/// Waiting for a free concurrency slot.
	Queued,
	/// Child process is alive.
	Running,
	/// Process exited with code 0.
	Completed,
	/// Process exited with a non-zero code.
	Failed,
	/// Terminated by the watchdog after exceeding its maximum duration.
	Timeout,
	/// Cancelled by a caller, either while queued or while running.
	Cancelled,
	/// Launch failure or internal fault.
	Error,
}

impl JobStatus {
	pub fn is_terminal(self) -> bool {
		!matches!(self, Self::Queued | Self::Running)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Queued => "queued",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Failed => "failed",
			Self::Timeout => "timeout",
			Self::Cancelled => "cancelled",
			Self::Error => "error",
		}
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"queued" => Ok(Self::Queued),
			"running" => Ok(Self::Running),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			"timeout" => Ok(Self::Timeout),
			"cancelled" => Ok(Self::Cancelled),
			"error" => Ok(Self::Error),
			_ => Err(format!("unknown job status: {}", s)),
		}
	}
}

/// Per-submission execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
	/// Overrides the engine-wide maximum duration for this job.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_duration_secs: Option<u64>,
	/// Working directory of the child process.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub working_dir: Option<PathBuf>,
	/// Extra environment variables for the child process.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub env: BTreeMap<String, String>,
}

/// Full state of one job as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
	pub id: JobId,
	pub command: String,
	pub args: Vec<String>,
	pub options: ExecutionOptions,
	pub status: JobStatus,
	/// Index in the wait queue; only set while `status == Queued`.
	pub queue_position: Option<usize>,
	pub created_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	/// Exit code; only set when the process exited on its own.
	pub return_code: Option<i32>,
	pub error_message: Option<String>,
}

impl JobRecord {
	pub fn new(command: String, args: Vec<String>, options: ExecutionOptions) -> Self {
		Self {
			id: JobId::new(),
			command,
			args,
			options,
			status: JobStatus::Queued,
			queue_position: None,
			created_at: Utc::now(),
			started_at: None,
			completed_at: None,
			return_code: None,
			error_message: None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// Wall-clock runtime, if the job has started.
	pub fn duration_ms(&self) -> Option<i64> {
		let started = self.started_at?;
		let end = self.completed_at.unwrap_or_else(Utc::now);
		Some((end - started).num_milliseconds())
	}

	pub fn summary(&self) -> JobSummary {
		JobSummary {
			id: self.id,
			command: self.command.clone(),
			args: self.args.clone(),
			status: self.status,
			created_at: self.created_at,
			completed_at: self.completed_at,
			return_code: self.return_code,
		}
	}
}

/// Condensed view of a job used by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
	pub id: JobId,
	pub command: String,
	pub args: Vec<String>,
	pub status: JobStatus,
	pub created_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub return_code: Option<i32>,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
	/// A queued job was removed from the queue and is now `cancelled`.
	Cancelled,
	/// A running job was signalled; it becomes `cancelled` once the runner
	/// observes termination.
	CancelRequested,
	/// The job had already reached a terminal status. Nothing changed.
	AlreadyTerminal,
}

/// Point-in-time counters of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
	pub running: usize,
	pub queued: usize,
	pub retained: usize,
	/// Number of child processes actually spawned since startup.
	pub launched_total: u64,
	pub max_concurrent_jobs: usize,
	/// Advisory polling interval for clients.
	pub poll_interval_ms: u64,
}
