// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Public entry point tying the registry, scheduler and watchdog together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use runq_config::EngineConfig;
use runq_core::{
	CancelOutcome, EngineError, EngineStats, ExecutionOptions, JobId, JobRecord, JobStatus,
	JobSummary, OutputPage, Result,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::output_log::LogSubscription;
use crate::registry::{JobRegistry, RetentionPolicy};
use crate::runner::TerminationReason;
use crate::scheduler::Scheduler;
use crate::watchdog;

/// Background job execution engine.
///
/// Must be started and used from within a Tokio runtime. Cloning is cheap
/// and every clone drives the same engine.
#[derive(Clone)]
pub struct Engine {
	inner: Arc<EngineInner>,
}

struct EngineInner {
	config: EngineConfig,
	registry: Arc<JobRegistry>,
	scheduler: Scheduler,
	shutdown_tx: broadcast::Sender<()>,
	shutting_down: AtomicBool,
	watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
	#[instrument(skip_all, fields(max_concurrent_jobs = config.max_concurrent_jobs))]
	pub fn start(config: EngineConfig) -> Self {
		let registry = Arc::new(JobRegistry::new(RetentionPolicy {
			max_jobs: config.retention_max_jobs,
			max_age: config.retention_max_age(),
		}));
		let scheduler = Scheduler::new(
			Arc::clone(&registry),
			config.max_concurrent_jobs,
			config.kill_grace_period(),
		);
		let (shutdown_tx, _) = broadcast::channel(1);
		let watchdog = watchdog::spawn(
			Arc::clone(&registry),
			config.max_job_duration(),
			config.watchdog_interval(),
			shutdown_tx.subscribe(),
		);

		info!("engine started");
		Self {
			inner: Arc::new(EngineInner {
				config,
				registry,
				scheduler,
				shutdown_tx,
				shutting_down: AtomicBool::new(false),
				watchdog: Mutex::new(Some(watchdog)),
			}),
		}
	}

	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}

	/// Accept a command for background execution. The job starts immediately
	/// when a slot is free, otherwise it waits in FIFO order.
	#[instrument(skip(self, args, options), fields(job_id = tracing::field::Empty))]
	pub fn submit(
		&self,
		command: &str,
		args: Vec<String>,
		options: ExecutionOptions,
	) -> Result<JobRecord> {
		if self.inner.shutting_down.load(Ordering::Acquire) {
			return Err(EngineError::ShuttingDown);
		}
		validate_submission(command, &options)?;

		let record = self
			.inner
			.scheduler
			.submit(command.to_string(), args, options)?;
		tracing::Span::current().record("job_id", tracing::field::display(record.id));
		info!(
			status = %record.status,
			queue_position = ?record.queue_position,
			"job submitted"
		);
		Ok(record)
	}

	pub fn status(&self, job_id: JobId) -> Result<JobRecord> {
		let entry = self.inner.registry.entry(job_id)?;
		Ok(self.inner.scheduler.record(&entry))
	}

	/// Events with `sequence_index >= since` and the index to resume from.
	pub fn output(&self, job_id: JobId, since: u64) -> Result<OutputPage> {
		let entry = self.inner.registry.entry(job_id)?;
		Ok(entry.log().read_since(since))
	}

	pub fn subscribe(&self, job_id: JobId, since: u64) -> Result<LogSubscription> {
		let entry = self.inner.registry.entry(job_id)?;
		Ok(entry.log().subscribe(since))
	}

	/// Cancel a queued job outright or ask a running one to stop. A running
	/// job reaches `cancelled` asynchronously once its process is gone.
	#[instrument(skip(self))]
	pub fn cancel(&self, job_id: JobId) -> Result<CancelOutcome> {
		let entry = self.inner.registry.entry(job_id)?;

		if self.inner.scheduler.cancel_queued(&entry) {
			return Ok(CancelOutcome::Cancelled);
		}
		if entry.request_termination(TerminationReason::Cancelled) {
			info!("cancellation requested");
			return Ok(CancelOutcome::CancelRequested);
		}

		// A stop was already requested, or the job finished concurrently.
		match entry.status() {
			JobStatus::Running => Ok(CancelOutcome::CancelRequested),
			status if status.is_terminal() => Ok(CancelOutcome::AlreadyTerminal),
			status => Err(EngineError::Internal(format!(
				"job {job_id} in unexpected status {status} during cancel"
			))),
		}
	}

	pub fn list(&self, limit: usize, status: Option<JobStatus>) -> Vec<JobSummary> {
		self.inner.registry.list(limit, status)
	}

	pub fn stats(&self) -> EngineStats {
		EngineStats {
			running: self.inner.scheduler.running(),
			queued: self.inner.scheduler.queued(),
			retained: self.inner.registry.len(),
			launched_total: self.inner.scheduler.launched_total(),
			max_concurrent_jobs: self.inner.scheduler.max_concurrent(),
			poll_interval_ms: self.inner.config.poll_interval_ms,
		}
	}

	pub fn is_shutting_down(&self) -> bool {
		self.inner.shutting_down.load(Ordering::Acquire)
	}

	/// Stop accepting work, cancel queued jobs, terminate running ones and
	/// wait for their supervisors to finish. Idempotent.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
			return;
		}
		info!("engine shutting down");

		self.inner.scheduler.close();
		let _ = self.inner.shutdown_tx.send(());
		let watchdog = self.inner.watchdog.lock().take();
		if let Some(handle) = watchdog {
			if let Err(e) = handle.await {
				warn!(error = %e, "watchdog task failed");
			}
		}

		let wait = self.inner.config.kill_grace_period() + Duration::from_secs(5);
		let remaining = self.inner.scheduler.wait_idle(wait).await;
		info!(remaining, "engine stopped");
	}
}

fn validate_submission(command: &str, options: &ExecutionOptions) -> Result<()> {
	if command.trim().is_empty() {
		return Err(EngineError::InvalidSubmission(
			"command must not be empty".to_string(),
		));
	}
	if command.contains('\0') {
		return Err(EngineError::InvalidSubmission(
			"command must not contain NUL bytes".to_string(),
		));
	}
	if options.max_duration_secs == Some(0) {
		return Err(EngineError::InvalidSubmission(
			"max_duration_secs must be at least 1".to_string(),
		));
	}
	if let Some(dir) = &options.working_dir {
		if !dir.is_dir() {
			return Err(EngineError::InvalidSubmission(format!(
				"working directory does not exist: {}",
				dir.display()
			)));
		}
	}
	Ok(())
}
