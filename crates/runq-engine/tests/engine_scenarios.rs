// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end scenarios against real processes.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::Duration;

use runq_config::EngineConfig;
use runq_core::{
	CancelOutcome, EngineError, ExecutionOptions, JobId, JobRecord, JobStatus, OutputEventKind,
};
use runq_engine::Engine;

fn config(max_concurrent_jobs: usize) -> EngineConfig {
	EngineConfig {
		max_concurrent_jobs,
		watchdog_interval_secs: 1,
		kill_grace_period_secs: 1,
		..Default::default()
	}
}

fn args(values: &[&str]) -> Vec<String> {
	values.iter().map(|s| s.to_string()).collect()
}

fn sh(script: &str) -> (&'static str, Vec<String>) {
	("sh", args(&["-c", script]))
}

async fn wait_for_terminal(engine: &Engine, id: JobId, within: Duration) -> JobRecord {
	let deadline = tokio::time::Instant::now() + within;
	loop {
		let record = engine.status(id).unwrap();
		if record.is_terminal() {
			return record;
		}
		assert!(
			tokio::time::Instant::now() < deadline,
			"job {id} still {} after {within:?}",
			record.status
		);
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

async fn wait_for_status(engine: &Engine, id: JobId, status: JobStatus) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
	while engine.status(id).unwrap().status != status {
		assert!(tokio::time::Instant::now() < deadline, "job {id} never reached {status}");
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

fn stdout_lines(engine: &Engine, id: JobId) -> Vec<String> {
	engine
		.output(id, 0)
		.unwrap()
		.events
		.into_iter()
		.filter(|e| e.kind == OutputEventKind::Stdout)
		.map(|e| e.payload)
		.collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_runs_to_completion() {
	let engine = Engine::start(config(2));
	let job = engine
		.submit("echo", args(&["hello"]), ExecutionOptions::default())
		.unwrap();
	assert_eq!(job.status, JobStatus::Running);
	assert!(job.started_at.is_some());

	let done = wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;
	assert_eq!(done.status, JobStatus::Completed);
	assert_eq!(done.return_code, Some(0));
	assert!(done.completed_at.is_some());
	assert_eq!(stdout_lines(&engine, job.id), vec!["hello"]);

	let page = engine.output(job.id, 0).unwrap();
	assert!(page.events[0].payload.starts_with("started pid="));
	let last = page.events.last().unwrap();
	assert_eq!(last.kind, OutputEventKind::Status);
	assert_eq!(last.payload, "completed exit_code=0");
	for (i, event) in page.events.iter().enumerate() {
		assert_eq!(event.sequence_index, i as u64);
	}
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_job_waits_for_free_slot() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("sleep 0.5; echo first");
	let first = engine.submit(cmd, a, ExecutionOptions::default()).unwrap();
	let second = engine
		.submit("echo", args(&["second"]), ExecutionOptions::default())
		.unwrap();

	assert_eq!(first.status, JobStatus::Running);
	assert_eq!(second.status, JobStatus::Queued);
	assert_eq!(second.queue_position, Some(0));
	assert!(engine.output(second.id, 0).unwrap().events.is_empty());

	let first_done = wait_for_terminal(&engine, first.id, Duration::from_secs(10)).await;
	let second_done = wait_for_terminal(&engine, second.id, Duration::from_secs(10)).await;
	assert_eq!(first_done.status, JobStatus::Completed);
	assert_eq!(second_done.status, JobStatus::Completed);
	assert!(second_done.started_at.unwrap() >= first_done.completed_at.unwrap());
	assert_eq!(engine.stats().launched_total, 2);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn running_count_never_exceeds_limit() {
	let limit = 3;
	let engine = Engine::start(config(limit));
	let ids: Vec<JobId> = (0..limit + 1)
		.map(|_| {
			engine
				.submit("sleep", args(&["5"]), ExecutionOptions::default())
				.unwrap()
				.id
		})
		.collect();

	let stats = engine.stats();
	assert_eq!(stats.running, limit);
	assert_eq!(stats.queued, 1);
	let running = engine.list(10, Some(JobStatus::Running));
	assert_eq!(running.len(), limit);
	assert_eq!(engine.status(ids[limit]).unwrap().status, JobStatus::Queued);

	for id in &ids {
		engine.cancel(*id).unwrap();
	}
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_queued_job_never_launches_it() {
	let engine = Engine::start(config(1));
	let blocker = engine
		.submit("sleep", args(&["5"]), ExecutionOptions::default())
		.unwrap();
	let queued = engine
		.submit("echo", args(&["never"]), ExecutionOptions::default())
		.unwrap();
	let launched_before = engine.stats().launched_total;

	assert_eq!(engine.cancel(queued.id).unwrap(), CancelOutcome::Cancelled);
	let record = engine.status(queued.id).unwrap();
	assert_eq!(record.status, JobStatus::Cancelled);
	assert!(record.started_at.is_none());
	assert_eq!(engine.stats().launched_total, launched_before);

	let events = engine.output(queued.id, 0).unwrap().events;
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].payload, "cancelled while queued");

	assert_eq!(engine.cancel(queued.id).unwrap(), CancelOutcome::AlreadyTerminal);
	assert_eq!(engine.cancel(blocker.id).unwrap(), CancelOutcome::CancelRequested);
	let blocker_done = wait_for_terminal(&engine, blocker.id, Duration::from_secs(10)).await;
	assert_eq!(blocker_done.status, JobStatus::Cancelled);
	assert_eq!(blocker_done.return_code, None);
	assert_eq!(engine.stats().launched_total, launched_before);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn overlong_job_times_out_and_is_killed() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("echo $$; exec sleep 30");
	let options = ExecutionOptions {
		max_duration_secs: Some(1),
		..Default::default()
	};
	let job = engine.submit(cmd, a, options).unwrap();

	let done = wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;
	assert_eq!(done.status, JobStatus::Timeout);
	assert_eq!(done.return_code, None);
	assert_eq!(
		done.error_message.as_deref(),
		Some("exceeded maximum duration of 1s")
	);

	let pid: libc::pid_t = stdout_lines(&engine, job.id)[0].parse().unwrap();
	let alive = unsafe { libc::kill(pid, 0) } == 0;
	assert!(!alive, "process {pid} survived timeout");

	let last = engine.output(job.id, 0).unwrap().events.pop().unwrap();
	assert_eq!(last.kind, OutputEventKind::Error);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sigterm_ignoring_job_is_killed_after_grace() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("trap '' TERM; echo ready; sleep 30");
	let job = engine.submit(cmd, a, ExecutionOptions::default()).unwrap();

	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while stdout_lines(&engine, job.id).is_empty() {
		assert!(tokio::time::Instant::now() < deadline);
		tokio::time::sleep(Duration::from_millis(20)).await;
	}

	let requested_at = tokio::time::Instant::now();
	assert_eq!(engine.cancel(job.id).unwrap(), CancelOutcome::CancelRequested);
	let done = wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;
	assert_eq!(done.status, JobStatus::Cancelled);
	assert!(requested_at.elapsed() >= Duration::from_secs(1));
	assert!(requested_at.elapsed() < Duration::from_secs(6));
	engine.shutdown().await;
}

/// Alive and not a zombie awaiting reaping by whichever process adopted it.
fn process_alive(pid: libc::pid_t) -> bool {
	if unsafe { libc::kill(pid, 0) } != 0 {
		return false;
	}
	match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
		Ok(stat) => stat
			.rsplit_once(") ")
			.map_or(true, |(_, rest)| !rest.starts_with('Z')),
		Err(_) => true,
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_kills_descendants_that_ignore_sigterm() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("sh -c 'trap \"\" TERM; echo $$; exec sleep 30' & sleep 0.2; exec sleep 30");
	let job = engine.submit(cmd, a, ExecutionOptions::default()).unwrap();

	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while stdout_lines(&engine, job.id).is_empty() {
		assert!(tokio::time::Instant::now() < deadline);
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	let grandchild: libc::pid_t = stdout_lines(&engine, job.id)[0].parse().unwrap();
	assert!(process_alive(grandchild));

	assert_eq!(engine.cancel(job.id).unwrap(), CancelOutcome::CancelRequested);
	let done = wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;
	assert_eq!(done.status, JobStatus::Cancelled);

	let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
	while process_alive(grandchild) {
		assert!(
			tokio::time::Instant::now() < deadline,
			"descendant {grandchild} survived cancellation"
		);
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_reads_are_identical() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("echo out; echo err >&2; echo out2");
	let job = engine.submit(cmd, a, ExecutionOptions::default()).unwrap();
	wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;

	let first = engine.output(job.id, 1).unwrap();
	let second = engine.output(job.id, 1).unwrap();
	assert_eq!(first, second);

	let resumed = engine.output(job.id, first.new_index).unwrap();
	assert!(resumed.events.is_empty());
	assert_eq!(resumed.new_index, first.new_index);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn per_channel_order_is_preserved() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("for i in 1 2 3 4 5; do echo out$i; echo err$i >&2; done");
	let job = engine.submit(cmd, a, ExecutionOptions::default()).unwrap();
	wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;

	let events = engine.output(job.id, 0).unwrap().events;
	let channel = |kind| -> Vec<String> {
		events
			.iter()
			.filter(|e| e.kind == kind)
			.map(|e| e.payload.clone())
			.collect()
	};
	assert_eq!(channel(OutputEventKind::Stdout), vec!["out1", "out2", "out3", "out4", "out5"]);
	assert_eq!(channel(OutputEventKind::Stderr), vec!["err1", "err2", "err3", "err4", "err5"]);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_binary_errors_without_running() {
	let engine = Engine::start(config(1));
	let job = engine
		.submit("/nonexistent/runq-binary", vec![], ExecutionOptions::default())
		.unwrap();
	assert_eq!(job.status, JobStatus::Error);
	assert!(job.started_at.is_none());
	assert!(job.error_message.unwrap().contains("command not found"));

	let events = engine.output(job.id, 0).unwrap().events;
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].kind, OutputEventKind::Error);

	// The slot is free again.
	let next = engine
		.submit("true", vec![], ExecutionOptions::default())
		.unwrap();
	assert_eq!(next.status, JobStatus::Running);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn nonzero_exit_is_failed() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("echo oops >&2; exit 3");
	let job = engine.submit(cmd, a, ExecutionOptions::default()).unwrap();
	let done = wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;
	assert_eq!(done.status, JobStatus::Failed);
	assert_eq!(done.return_code, Some(3));
	assert_eq!(engine.cancel(job.id).unwrap(), CancelOutcome::AlreadyTerminal);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn environment_and_working_dir_applied() {
	let dir = std::env::temp_dir();
	let engine = Engine::start(config(1));
	let mut env = BTreeMap::new();
	env.insert("RUNQ_TEST_VALUE".to_string(), "forty-two".to_string());
	let (cmd, a) = sh("echo $RUNQ_TEST_VALUE; pwd");
	let job = engine
		.submit(
			cmd,
			a,
			ExecutionOptions {
				working_dir: Some(dir.clone()),
				env,
				..Default::default()
			},
		)
		.unwrap();
	wait_for_terminal(&engine, job.id, Duration::from_secs(10)).await;
	let lines = stdout_lines(&engine, job.id);
	assert_eq!(lines[0], "forty-two");
	assert_eq!(
		std::fs::canonicalize(&lines[1]).unwrap(),
		std::fs::canonicalize(&dir).unwrap()
	);
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn evicted_job_is_not_found() {
	let engine = Engine::start(EngineConfig {
		retention_max_jobs: 1,
		..config(1)
	});
	let first = engine
		.submit("true", vec![], ExecutionOptions::default())
		.unwrap();
	wait_for_terminal(&engine, first.id, Duration::from_secs(10)).await;
	tokio::time::sleep(Duration::from_millis(10)).await;
	let second = engine
		.submit("true", vec![], ExecutionOptions::default())
		.unwrap();
	wait_for_terminal(&engine, second.id, Duration::from_secs(10)).await;

	// Eviction runs when the supervisor releases its slot.
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while engine.status(first.id).is_ok() {
		assert!(tokio::time::Instant::now() < deadline, "first job never evicted");
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	assert_eq!(engine.status(first.id).unwrap_err(), EngineError::NotFound(first.id));
	assert_eq!(engine.output(first.id, 0).unwrap_err(), EngineError::NotFound(first.id));
	assert!(engine.status(second.id).is_ok());
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_command_rejected_without_record() {
	let engine = Engine::start(config(1));
	let err = engine
		.submit("", vec![], ExecutionOptions::default())
		.unwrap_err();
	assert!(matches!(err, EngineError::InvalidSubmission(_)));
	assert!(engine.list(10, None).is_empty());
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_delivers_every_event() {
	let engine = Engine::start(config(1));
	let (cmd, a) = sh("for i in 1 2 3; do echo line$i; sleep 0.05; done");
	let job = engine.submit(cmd, a, ExecutionOptions::default()).unwrap();
	let mut subscription = engine.subscribe(job.id, 0).unwrap();

	let mut received = Vec::new();
	let collect = async {
		while let Some(event) = subscription.next().await {
			received.push(event);
		}
	};
	tokio::time::timeout(Duration::from_secs(10), collect)
		.await
		.unwrap();

	assert_eq!(received, engine.output(job.id, 0).unwrap().events);
	assert_eq!(received.last().unwrap().payload, "completed exit_code=0");
	engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cancels_everything() {
	let engine = Engine::start(config(1));
	let running = engine
		.submit("sleep", args(&["30"]), ExecutionOptions::default())
		.unwrap();
	let queued = engine
		.submit("sleep", args(&["30"]), ExecutionOptions::default())
		.unwrap();
	wait_for_status(&engine, running.id, JobStatus::Running).await;

	engine.shutdown().await;
	for id in [running.id, queued.id] {
		let record = engine.status(id).unwrap();
		assert_eq!(record.status, JobStatus::Cancelled);
		assert_eq!(record.error_message.as_deref(), Some("engine shutting down"));
	}
	assert_eq!(
		engine
			.submit("true", vec![], ExecutionOptions::default())
			.unwrap_err(),
		EngineError::ShuttingDown
	);
}
