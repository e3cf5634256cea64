// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authoritative store of job records and their output logs.
//!
//! Each job lives in a [`JobEntry`] whose record is guarded by its own lock.
//! State transitions are exposed as a closed set of methods on the entry, so
//! a record can only move forward through the lifecycle and a terminal
//! status is written exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use runq_core::{
	EngineError, ExecutionOptions, JobId, JobRecord, JobStatus, JobSummary, OutputEventKind,
	Result,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::output_log::OutputLog;
use crate::runner::TerminationReason;

/// How the registry bounds the set of terminal jobs it keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
	pub max_jobs: usize,
	pub max_age: Duration,
}

/// Final state written to a job when it leaves the running set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
	pub status: JobStatus,
	pub return_code: Option<i32>,
	pub error_message: Option<String>,
	pub event_kind: OutputEventKind,
	pub event_payload: String,
}

impl Completion {
	pub fn exited(code: i32) -> Self {
		if code == 0 {
			Self {
				status: JobStatus::Completed,
				return_code: Some(0),
				error_message: None,
				event_kind: OutputEventKind::Status,
				event_payload: "completed exit_code=0".to_string(),
			}
		} else {
			Self {
				status: JobStatus::Failed,
				return_code: Some(code),
				error_message: Some(format!("process exited with code {code}")),
				event_kind: OutputEventKind::Status,
				event_payload: format!("failed exit_code={code}"),
			}
		}
	}

	pub fn killed(description: String) -> Self {
		Self {
			status: JobStatus::Failed,
			return_code: None,
			event_kind: OutputEventKind::Status,
			event_payload: format!("failed {description}"),
			error_message: Some(description),
		}
	}

	pub fn error(message: impl Into<String>) -> Self {
		let message = message.into();
		Self {
			status: JobStatus::Error,
			return_code: None,
			error_message: Some(message.clone()),
			event_kind: OutputEventKind::Error,
			event_payload: message,
		}
	}

	pub fn terminated(reason: TerminationReason) -> Self {
		match reason {
			TerminationReason::Cancelled => Self::cancelled("execution cancelled by user"),
			TerminationReason::Shutdown => Self::cancelled("engine shutting down"),
			TerminationReason::Timeout { limit } => {
				let message = format!("exceeded maximum duration of {}s", limit.as_secs());
				Self {
					status: JobStatus::Timeout,
					return_code: None,
					error_message: Some(message.clone()),
					event_kind: OutputEventKind::Error,
					event_payload: message,
				}
			}
		}
	}

	pub fn cancelled(message: &str) -> Self {
		Self {
			status: JobStatus::Cancelled,
			return_code: None,
			error_message: Some(message.to_string()),
			event_kind: OutputEventKind::Status,
			event_payload: message.to_string(),
		}
	}
}

/// One job: its record, its output log and, while running, the handle used
/// to ask its supervisor to stop.
pub struct JobEntry {
	id: JobId,
	state: Mutex<JobState>,
	log: OutputLog,
}

struct JobState {
	record: JobRecord,
	terminate: Option<watch::Sender<Option<TerminationReason>>>,
}

impl JobEntry {
	fn new(record: JobRecord) -> Self {
		let id = record.id;
		Self {
			id,
			state: Mutex::new(JobState {
				record,
				terminate: None,
			}),
			log: OutputLog::new(id),
		}
	}

	pub fn id(&self) -> JobId {
		self.id
	}

	pub fn log(&self) -> &OutputLog {
		&self.log
	}

	pub fn snapshot(&self) -> JobRecord {
		self.state.lock().record.clone()
	}

	pub fn status(&self) -> JobStatus {
		self.state.lock().record.status
	}

	pub fn started_at(&self) -> Option<DateTime<Utc>> {
		self.state.lock().record.started_at
	}

	pub fn options(&self) -> ExecutionOptions {
		self.state.lock().record.options.clone()
	}

	/// Move a queued job to running. The `started` event is appended before
	/// the status changes so readers never see `running` with an empty log.
	pub(crate) fn mark_running(
		&self,
		pid: Option<u32>,
		terminate: watch::Sender<Option<TerminationReason>>,
	) -> Result<()> {
		let mut state = self.state.lock();
		if state.record.status != JobStatus::Queued {
			return Err(EngineError::Internal(format!(
				"job {} cannot start from status {}",
				self.id, state.record.status
			)));
		}

		let payload = match pid {
			Some(pid) => format!("started pid={pid}"),
			None => "started".to_string(),
		};
		self.log.append(OutputEventKind::Status, payload)?;

		state.record.status = JobStatus::Running;
		state.record.started_at = Some(Utc::now());
		state.terminate = Some(terminate);
		Ok(())
	}

	/// Ask the supervisor of a running job to stop it. The first reason
	/// recorded wins; returns `true` only if this call recorded it.
	pub(crate) fn request_termination(&self, reason: TerminationReason) -> bool {
		let state = self.state.lock();
		if state.record.status != JobStatus::Running {
			return false;
		}
		let Some(sender) = &state.terminate else {
			return false;
		};
		sender.send_if_modified(|current| {
			if current.is_some() {
				return false;
			}
			*current = Some(reason);
			true
		})
	}

	/// Write the terminal state. The final event is appended, then the status
	/// set, then the log sealed, all under the entry lock, so a reader that
	/// sees a terminal status also sees the complete log.
	///
	/// Returns `false` if the job was already terminal.
	pub(crate) fn finish(&self, completion: Completion) -> bool {
		let mut state = self.state.lock();
		if state.record.status.is_terminal() {
			return false;
		}

		if let Err(e) = self
			.log
			.append(completion.event_kind, completion.event_payload)
		{
			warn!(job_id = %self.id, error = %e, "failed to append final event");
		}

		let record = &mut state.record;
		record.status = completion.status;
		record.return_code = completion.return_code;
		record.error_message = completion.error_message;
		record.completed_at = Some(Utc::now());
		state.terminate = None;
		self.log.seal();
		true
	}
}

/// Thread-safe map of job id to [`JobEntry`].
pub struct JobRegistry {
	state: RwLock<RegistryState>,
	retention: RetentionPolicy,
}

#[derive(Default)]
struct RegistryState {
	jobs: HashMap<JobId, Arc<JobEntry>>,
	/// Submission order, oldest first.
	order: VecDeque<JobId>,
}

impl JobRegistry {
	pub fn new(retention: RetentionPolicy) -> Self {
		Self {
			state: RwLock::new(RegistryState::default()),
			retention,
		}
	}

	pub fn retention(&self) -> RetentionPolicy {
		self.retention
	}

	/// Create a queued job with a fresh id.
	pub fn create(
		&self,
		command: String,
		args: Vec<String>,
		options: ExecutionOptions,
	) -> Arc<JobEntry> {
		let entry = Arc::new(JobEntry::new(JobRecord::new(command, args, options)));
		let mut state = self.state.write();
		state.jobs.insert(entry.id(), Arc::clone(&entry));
		state.order.push_back(entry.id());
		entry
	}

	pub fn entry(&self, id: JobId) -> Result<Arc<JobEntry>> {
		self.state
			.read()
			.jobs
			.get(&id)
			.cloned()
			.ok_or(EngineError::NotFound(id))
	}

	pub fn get(&self, id: JobId) -> Result<JobRecord> {
		Ok(self.entry(id)?.snapshot())
	}

	/// Most recently submitted first, optionally filtered by status.
	pub fn list(&self, limit: usize, status: Option<JobStatus>) -> Vec<JobSummary> {
		let entries: Vec<Arc<JobEntry>> = {
			let state = self.state.read();
			state
				.order
				.iter()
				.rev()
				.filter_map(|id| state.jobs.get(id).cloned())
				.collect()
		};

		entries
			.iter()
			.map(|entry| entry.snapshot())
			.filter(|record| status.map_or(true, |s| record.status == s))
			.take(limit)
			.map(|record| record.summary())
			.collect()
	}

	pub fn running_entries(&self) -> Vec<Arc<JobEntry>> {
		let entries: Vec<Arc<JobEntry>> = self.state.read().jobs.values().cloned().collect();
		entries
			.into_iter()
			.filter(|entry| entry.status() == JobStatus::Running)
			.collect()
	}

	pub fn len(&self) -> usize {
		self.state.read().jobs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.read().jobs.is_empty()
	}

	/// Evict terminal jobs older than the retention age, then the oldest
	/// terminal jobs beyond the retention count. Queued and running jobs are
	/// never evicted. Returns the number of jobs removed.
	pub fn prune(&self, now: DateTime<Utc>) -> usize {
		let max_age = chrono::Duration::from_std(self.retention.max_age)
			.unwrap_or_else(|_| chrono::Duration::days(365 * 100));
		let mut state = self.state.write();

		let mut terminal: Vec<(DateTime<Utc>, JobId)> = state
			.jobs
			.values()
			.filter_map(|entry| {
				let completed_at = entry.state.lock().record.completed_at;
				completed_at.map(|at| (at, entry.id()))
			})
			.collect();
		terminal.sort();

		let mut evict: Vec<JobId> = Vec::new();
		let mut kept: Vec<JobId> = Vec::new();
		for (completed_at, id) in terminal {
			if now.signed_duration_since(completed_at) > max_age {
				evict.push(id);
			} else {
				kept.push(id);
			}
		}
		if kept.len() > self.retention.max_jobs {
			let excess = kept.len() - self.retention.max_jobs;
			evict.extend(kept.drain(..excess));
		}

		if evict.is_empty() {
			return 0;
		}
		let RegistryState { jobs, order } = &mut *state;
		for id in &evict {
			jobs.remove(id);
		}
		order.retain(|id| jobs.contains_key(id));

		debug!(evicted = evict.len(), retained = state.jobs.len(), "pruned job registry");
		evict.len()
	}
}
