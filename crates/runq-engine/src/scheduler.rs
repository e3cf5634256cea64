// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Concurrency-limited FIFO admission of queued jobs.
//!
//! The queue and the running count live under one lock, and launching a job
//! happens while holding it, so the running count can never exceed the limit
//! and a slot freed by one job goes to the head of the queue.
//!
//! Lock order: scheduler, then registry, then job entry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use runq_core::{EngineError, ExecutionOptions, JobId, JobRecord, JobStatus, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::registry::{Completion, JobEntry, JobRegistry};
use crate::runner::{self, TerminationReason};

#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
	state: Mutex<SchedulerState>,
	registry: Arc<JobRegistry>,
	max_concurrent: usize,
	kill_grace: Duration,
	launched_total: AtomicU64,
	/// Mirrors `state.running` for waiters.
	running_tx: watch::Sender<usize>,
}

struct SchedulerState {
	queue: VecDeque<Arc<JobEntry>>,
	running: usize,
	accepting: bool,
}

impl Scheduler {
	pub fn new(registry: Arc<JobRegistry>, max_concurrent: usize, kill_grace: Duration) -> Self {
		let (running_tx, _) = watch::channel(0);
		Self {
			inner: Arc::new(SchedulerInner {
				state: Mutex::new(SchedulerState {
					queue: VecDeque::new(),
					running: 0,
					accepting: true,
				}),
				registry,
				max_concurrent: max_concurrent.max(1),
				kill_grace,
				launched_total: AtomicU64::new(0),
				running_tx,
			}),
		}
	}

	/// Create a job, enqueue it and admit as many queued jobs as the limit
	/// allows. The returned record reflects the job's state after admission.
	pub fn submit(
		&self,
		command: String,
		args: Vec<String>,
		options: ExecutionOptions,
	) -> Result<JobRecord> {
		let mut state = self.inner.state.lock();
		if !state.accepting {
			return Err(EngineError::ShuttingDown);
		}

		let entry = self.inner.registry.create(command, args, options);
		debug!(job_id = %entry.id(), queue_len = state.queue.len(), "job queued");
		state.queue.push_back(Arc::clone(&entry));
		let failed = self.pump(&mut state);

		let record = Self::record_with_position(&state, &entry);
		drop(state);

		if failed > 0 {
			self.inner.registry.prune(Utc::now());
		}
		Ok(record)
	}

	/// Called by a job's supervisor once it has written the terminal state.
	pub fn release(&self, job_id: JobId) {
		let mut state = self.inner.state.lock();
		state.running = state.running.saturating_sub(1);
		debug!(%job_id, running = state.running, queued = state.queue.len(), "slot released");
		self.pump(&mut state);
		drop(state);

		self.inner.registry.prune(Utc::now());
	}

	/// Remove a job from the queue and mark it cancelled. Returns `false`
	/// if the job was not queued.
	pub fn cancel_queued(&self, entry: &Arc<JobEntry>) -> bool {
		let mut state = self.inner.state.lock();
		let Some(position) = state.queue.iter().position(|e| e.id() == entry.id()) else {
			return false;
		};
		state.queue.remove(position);
		let finished = entry.finish(Completion::cancelled("cancelled while queued"));
		drop(state);

		if finished {
			info!(job_id = %entry.id(), position, "queued job cancelled");
			self.inner.registry.prune(Utc::now());
		}
		finished
	}

	/// Snapshot of a job with its current queue position filled in.
	pub fn record(&self, entry: &Arc<JobEntry>) -> JobRecord {
		let state = self.inner.state.lock();
		Self::record_with_position(&state, entry)
	}

	pub fn running(&self) -> usize {
		self.inner.state.lock().running
	}

	pub fn queued(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	pub fn launched_total(&self) -> u64 {
		self.inner.launched_total.load(Ordering::Relaxed)
	}

	pub fn max_concurrent(&self) -> usize {
		self.inner.max_concurrent
	}

	/// Stop admitting work: reject new submissions, cancel every queued job
	/// and ask running jobs to stop. Waits up to `wait` for running jobs to
	/// finish and returns how many were still running.
	pub async fn shutdown(&self, wait: Duration) -> usize {
		self.close();
		self.wait_idle(wait).await
	}

	/// Reject new submissions, cancel every queued job and ask running jobs
	/// to stop. Slots released afterwards admit nothing.
	pub fn close(&self) {
		let drained: Vec<Arc<JobEntry>> = {
			let mut state = self.inner.state.lock();
			if !state.accepting {
				return;
			}
			state.accepting = false;
			state.queue.drain(..).collect()
		};
		for entry in &drained {
			entry.finish(Completion::cancelled("engine shutting down"));
		}

		let running = self.inner.registry.running_entries();
		info!(
			cancelled_queued = drained.len(),
			running = running.len(),
			"scheduler shutting down"
		);
		for entry in &running {
			entry.request_termination(TerminationReason::Shutdown);
		}
	}

	/// Wait up to `wait` for the running count to reach zero. Returns how
	/// many jobs were still running.
	pub async fn wait_idle(&self, wait: Duration) -> usize {
		let mut rx = self.inner.running_tx.subscribe();
		let remaining = match tokio::time::timeout(wait, rx.wait_for(|n| *n == 0)).await {
			Ok(_) => 0,
			Err(_) => self.running(),
		};
		if remaining > 0 {
			warn!(remaining, "jobs still running after shutdown wait");
		}
		remaining
	}

	/// Admit queued jobs while below the limit. Launch failures are recorded
	/// on the job and admission moves on. Returns the number of failures.
	fn pump(&self, state: &mut SchedulerState) -> usize {
		let mut failed = 0;
		while state.accepting && state.running < self.inner.max_concurrent {
			let Some(entry) = state.queue.pop_front() else {
				break;
			};
			match runner::launch(&entry, self.clone(), self.inner.kill_grace) {
				Ok(()) => {
					state.running += 1;
					self.inner.launched_total.fetch_add(1, Ordering::Relaxed);
				}
				Err(e) => {
					warn!(job_id = %entry.id(), error = %e, "job failed to launch");
					entry.finish(Completion::error(e.to_string()));
					failed += 1;
				}
			}
		}
		self.inner.running_tx.send_replace(state.running);
		failed
	}

	fn record_with_position(state: &SchedulerState, entry: &Arc<JobEntry>) -> JobRecord {
		let mut record = entry.snapshot();
		if record.status == JobStatus::Queued {
			record.queue_position = state.queue.iter().position(|e| e.id() == entry.id());
		}
		record
	}
}
