// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Launches job processes and supervises them to completion.
//!
//! Commands are executed directly (no shell) with stdin closed and both
//! output streams piped. Each stream is read line by line into the job's
//! output log by its own task. The supervisor waits for the process to exit
//! or for a termination request, then writes the terminal state.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use runq_core::{EngineError, OutputEventKind, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::output_log::OutputLog;
use crate::registry::{Completion, JobEntry};
use crate::scheduler::Scheduler;

/// Upper bound on waiting for output readers after the process exits.
/// Descendants that inherited the pipes can otherwise hold them open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a running job is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
	Cancelled,
	Timeout { limit: Duration },
	Shutdown,
}

impl std::fmt::Display for TerminationReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Cancelled => write!(f, "cancelled"),
			Self::Timeout { limit } => write!(f, "timeout after {}s", limit.as_secs()),
			Self::Shutdown => write!(f, "shutdown"),
		}
	}
}

/// Spawn the job's process and hand it to a supervising task.
///
/// On success the job is `running` before this returns. On failure the job
/// is untouched and the caller decides how to record the error.
#[instrument(skip_all, fields(job_id = %entry.id()))]
pub(crate) fn launch(entry: &Arc<JobEntry>, scheduler: Scheduler, kill_grace: Duration) -> Result<()> {
	let record = entry.snapshot();

	let mut cmd = Command::new(&record.command);
	cmd.args(&record.args)
		.envs(&record.options.env)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true);
	if let Some(dir) = &record.options.working_dir {
		cmd.current_dir(dir);
	}
	#[cfg(unix)]
	cmd.process_group(0);

	let mut child = cmd
		.spawn()
		.map_err(|e| EngineError::Launch(describe_spawn_error(&record.command, &e)))?;
	let pid = child.id();

	let (terminate_tx, terminate_rx) = watch::channel(None);
	if let Err(e) = entry.mark_running(pid, terminate_tx) {
		let _ = child.start_kill();
		return Err(e);
	}

	info!(
		command = %record.command,
		args = ?record.args,
		pid = ?pid,
		"job started"
	);

	let log = entry.log().clone();
	let mut readers = Vec::with_capacity(2);
	if let Some(stdout) = child.stdout.take() {
		readers.push(tokio::spawn(read_lines(stdout, log.clone(), OutputEventKind::Stdout)));
	}
	if let Some(stderr) = child.stderr.take() {
		readers.push(tokio::spawn(read_lines(stderr, log, OutputEventKind::Stderr)));
	}

	tokio::spawn(supervise(
		Arc::clone(entry),
		child,
		readers,
		terminate_rx,
		kill_grace,
		scheduler,
	));
	Ok(())
}

fn describe_spawn_error(command: &str, err: &std::io::Error) -> String {
	match err.kind() {
		std::io::ErrorKind::NotFound => format!("command not found: {command}"),
		std::io::ErrorKind::PermissionDenied => format!("permission denied: {command}"),
		_ => format!("failed to start {command}: {err}"),
	}
}

enum Outcome {
	Exited(std::io::Result<ExitStatus>),
	Terminated(TerminationReason),
}

async fn supervise(
	entry: Arc<JobEntry>,
	mut child: Child,
	readers: Vec<JoinHandle<Result<()>>>,
	mut terminate_rx: watch::Receiver<Option<TerminationReason>>,
	kill_grace: Duration,
	scheduler: Scheduler,
) {
	let job_id = entry.id();

	let outcome = tokio::select! {
		status = child.wait() => Outcome::Exited(status),
		reason = termination_requested(&mut terminate_rx) => Outcome::Terminated(reason),
	};

	let completion = match outcome {
		Outcome::Exited(status) => {
			let fault = drain_readers(readers).await;
			exit_completion(status, fault)
		}
		Outcome::Terminated(reason) => {
			info!(%job_id, %reason, "terminating job");
			if let Err(e) = terminate(&mut child, kill_grace).await {
				warn!(%job_id, error = %e, "failed to reap terminated process");
			}
			if let Some(fault) = drain_readers(readers).await {
				error!(%job_id, %fault, "output capture failed during termination");
				let _ = entry
					.log()
					.append(OutputEventKind::Error, format!("output capture failed: {fault}"));
			}
			Completion::terminated(reason)
		}
	};

	let status = completion.status;
	if entry.finish(completion) {
		let record = entry.snapshot();
		info!(
			%job_id,
			%status,
			return_code = ?record.return_code,
			duration_ms = ?record.duration_ms(),
			"job finished"
		);
	}

	scheduler.release(job_id);
}

async fn termination_requested(
	rx: &mut watch::Receiver<Option<TerminationReason>>,
) -> TerminationReason {
	loop {
		if let Some(reason) = *rx.borrow_and_update() {
			return reason;
		}
		if rx.changed().await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}

fn exit_completion(status: std::io::Result<ExitStatus>, fault: Option<String>) -> Completion {
	match (status, fault) {
		(Ok(_), Some(fault)) => Completion::error(format!("output capture failed: {fault}")),
		(Ok(status), None) => completion_for_exit(status),
		(Err(e), _) => Completion::error(format!("failed to wait for process: {e}")),
	}
}

fn completion_for_exit(status: ExitStatus) -> Completion {
	if let Some(code) = status.code() {
		return Completion::exited(code);
	}
	#[cfg(unix)]
	{
		use std::os::unix::process::ExitStatusExt;
		if let Some(signal) = status.signal() {
			return Completion::killed(format!("terminated by signal {signal}"));
		}
	}
	Completion::killed("terminated by signal".to_string())
}

/// Polite stop, then forced kill once the grace period elapses. Signals go
/// to the whole process group so descendants stop with the job, including
/// those that ignored SIGTERM after the leader exited.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
	// `Child::id` is `None` once the leader is reaped.
	let pid = child.id();
	signal_group(pid, Signal::Terminate, child);

	let started = Instant::now();
	let status = match timeout(grace, child.wait()).await {
		Ok(status) => {
			debug!(elapsed_ms = started.elapsed().as_millis() as u64, "process exited after SIGTERM");
			status
		}
		Err(_) => {
			warn!(grace_secs = grace.as_secs(), "process ignored SIGTERM, killing");
			signal_group(pid, Signal::Kill, child);
			child.kill().await?;
			child.wait().await
		}
	};
	signal_group(pid, Signal::Kill, child);
	status
}

#[derive(Debug, Clone, Copy)]
enum Signal {
	Terminate,
	Kill,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: Signal, _child: &mut Child) {
	let Some(pid) = pid else {
		return;
	};
	let signo = match signal {
		Signal::Terminate => libc::SIGTERM,
		Signal::Kill => libc::SIGKILL,
	};
	// The child leads its own process group; a negative pid targets the group.
	let rc = unsafe { libc::kill(-(pid as libc::pid_t), signo) };
	if rc != 0 {
		// ESRCH once every member of the group is gone.
		debug!(
			pid,
			?signal,
			error = %std::io::Error::last_os_error(),
			"failed to signal process group"
		);
	}
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: Signal, child: &mut Child) {
	let _ = child.start_kill();
}

async fn read_lines<R>(reader: R, log: OutputLog, kind: OutputEventKind) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		let n = reader
			.read_until(b'\n', &mut buf)
			.await
			.map_err(|e| EngineError::Internal(format!("reading {kind}: {e}")))?;
		if n == 0 {
			return Ok(());
		}
		let line = String::from_utf8_lossy(strip_line_ending(&buf)).into_owned();
		trace!(job_id = %log.job_id(), %kind, len = line.len(), "captured line");
		log.append(kind, line)?;
	}
}

fn strip_line_ending(mut line: &[u8]) -> &[u8] {
	if let Some(rest) = line.strip_suffix(b"\n") {
		line = rest;
	}
	if let Some(rest) = line.strip_suffix(b"\r") {
		line = rest;
	}
	line
}

/// Wait for the readers to hit end of stream, abandoning any that are still
/// blocked after [`OUTPUT_DRAIN_TIMEOUT`]. Returns the first reader fault.
async fn drain_readers(readers: Vec<JoinHandle<Result<()>>>) -> Option<String> {
	let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
	let mut fault = None;
	for mut handle in readers {
		match tokio::time::timeout_at(deadline, &mut handle).await {
			Ok(Ok(Ok(()))) => {}
			Ok(Ok(Err(e))) => {
				fault.get_or_insert_with(|| e.to_string());
			}
			Ok(Err(join_err)) => {
				fault.get_or_insert_with(|| join_err.to_string());
			}
			Err(_) => {
				debug!("output stream still open after exit, abandoning reader");
				handle.abort();
				let _ = handle.await;
			}
		}
	}
	fault
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_strip_line_ending() {
		assert_eq!(strip_line_ending(b"hello\n"), b"hello");
		assert_eq!(strip_line_ending(b"hello\r\n"), b"hello");
		assert_eq!(strip_line_ending(b"partial"), b"partial");
		assert_eq!(strip_line_ending(b"\n"), b"");
	}

	#[test]
	fn test_describe_spawn_error() {
		let err = std::io::Error::from(std::io::ErrorKind::NotFound);
		assert_eq!(
			describe_spawn_error("nope", &err),
			"command not found: nope"
		);
		let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
		assert_eq!(
			describe_spawn_error("/etc/passwd", &err),
			"permission denied: /etc/passwd"
		);
	}

	#[test]
	fn test_termination_reason_display() {
		assert_eq!(TerminationReason::Cancelled.to_string(), "cancelled");
		assert_eq!(
			TerminationReason::Timeout {
				limit: Duration::from_secs(5)
			}
			.to_string(),
			"timeout after 5s"
		);
	}

	#[tokio::test]
	async fn test_read_lines_keeps_partial_last_line() {
		let log = OutputLog::new(runq_core::JobId::new());
		let input: &[u8] = b"one\r\ntwo\nthree";
		read_lines(input, log.clone(), OutputEventKind::Stdout)
			.await
			.unwrap();
		let payloads: Vec<String> = log
			.read_since(0)
			.events
			.into_iter()
			.map(|e| e.payload)
			.collect();
		assert_eq!(payloads, vec!["one", "two", "three"]);
	}

	#[tokio::test]
	async fn test_read_lines_lossy_utf8() {
		let log = OutputLog::new(runq_core::JobId::new());
		let input: &[u8] = b"ok \xff\n";
		read_lines(input, log.clone(), OutputEventKind::Stderr)
			.await
			.unwrap();
		let event = &log.read_since(0).events[0];
		assert_eq!(event.kind, OutputEventKind::Stderr);
		assert_eq!(event.payload, "ok \u{fffd}");
	}

	#[tokio::test]
	async fn test_termination_requested_waits_for_reason() {
		let (tx, mut rx) = watch::channel(None);
		let waiter = tokio::spawn(async move { termination_requested(&mut rx).await });
		tx.send_replace(Some(TerminationReason::Shutdown));
		assert_eq!(waiter.await.unwrap(), TerminationReason::Shutdown);
	}

	#[cfg(unix)]
	#[test]
	fn test_completion_for_exit_codes() {
		use std::os::unix::process::ExitStatusExt;
		let ok = completion_for_exit(ExitStatus::from_raw(0));
		assert_eq!(ok.status, runq_core::JobStatus::Completed);
		let failed = completion_for_exit(ExitStatus::from_raw(3 << 8));
		assert_eq!(failed.return_code, Some(3));
		let signalled = completion_for_exit(ExitStatus::from_raw(9));
		assert_eq!(signalled.status, runq_core::JobStatus::Failed);
		assert_eq!(signalled.return_code, None);
		assert_eq!(
			signalled.error_message.as_deref(),
			Some("terminated by signal 9")
		);
	}

	#[tokio::test]
	async fn test_reader_fault_turns_exit_into_error() {
		let failing: JoinHandle<Result<()>> = tokio::spawn(async {
			Err(EngineError::Internal("reading stdout: broken pipe".to_string()))
		});
		let clean: JoinHandle<Result<()>> = tokio::spawn(async { Ok(()) });

		let fault = drain_readers(vec![clean, failing]).await;
		assert_eq!(
			fault.as_deref(),
			Some("internal error: reading stdout: broken pipe")
		);

		#[cfg(unix)]
		{
			use std::os::unix::process::ExitStatusExt;
			let completion = exit_completion(Ok(ExitStatus::from_raw(0)), fault);
			assert_eq!(completion.status, runq_core::JobStatus::Error);
			assert_eq!(completion.event_kind, OutputEventKind::Error);
			assert_eq!(
				completion.error_message.as_deref(),
				Some("output capture failed: internal error: reading stdout: broken pipe")
			);
		}
	}

	#[tokio::test]
	async fn test_drain_readers_without_fault() {
		let readers: Vec<JoinHandle<Result<()>>> =
			vec![tokio::spawn(async { Ok(()) }), tokio::spawn(async { Ok(()) })];
		assert_eq!(drain_readers(readers).await, None);
	}
}
