// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use runq_core::protocol::DEFAULT_LIST_LIMIT;
use runq_core::{
	ExecutionOptions, JobId, JobRecord, JobStatus, JobSummary, OutputEvent, OutputEventKind,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::client::DaemonClient;

#[derive(Debug, Subcommand)]
pub enum Commands {
	/// Submit a command for background execution
	Submit(SubmitArgs),
	/// Show the status of a job
	Status(JobArgs),
	/// Print captured output of a job
	Output(OutputArgs),
	/// Cancel a queued or running job
	Cancel(JobArgs),
	/// List retained jobs, most recent first
	List(ListArgs),
	/// Show engine counters
	Stats,
}

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
	/// Maximum runtime in seconds, overriding the daemon default
	#[arg(long, value_name = "SECS")]
	pub max_duration: Option<u64>,

	/// Working directory of the job
	#[arg(long)]
	pub cwd: Option<PathBuf>,

	/// Extra environment variable (repeatable)
	#[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
	pub env: Vec<(String, String)>,

	/// Stream output until the job finishes
	#[arg(long, short)]
	pub follow: bool,

	/// Program to run
	pub command: String,

	/// Arguments passed to the program
	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	pub args: Vec<String>,
}

impl SubmitArgs {
	fn options(&self) -> ExecutionOptions {
		ExecutionOptions {
			max_duration_secs: self.max_duration,
			working_dir: self.cwd.clone(),
			env: self.env.iter().cloned().collect::<BTreeMap<_, _>>(),
		}
	}
}

#[derive(Debug, Clone, Args)]
pub struct JobArgs {
	pub job_id: JobId,
}

#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
	pub job_id: JobId,

	/// First sequence index to print
	#[arg(long, default_value_t = 0)]
	pub since: u64,

	/// Keep polling until the job finishes
	#[arg(long, short)]
	pub follow: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
	#[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
	pub limit: usize,

	/// Only show jobs with this status
	#[arg(long)]
	pub status: Option<JobStatus>,
}

pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
	if key.is_empty() {
		return Err(format!("empty variable name in '{raw}'"));
	}
	Ok((key.to_string(), value.to_string()))
}

/// Everything a command needs besides its own arguments.
pub struct CliContext {
	pub client: DaemonClient,
	pub json: bool,
}

impl CliContext {
	fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> anyhow::Result<()> {
		if self.json {
			println!("{}", serde_json::to_string_pretty(value)?);
		} else {
			println!("{}", human());
		}
		Ok(())
	}
}

/// Run one command. Returns `false` when a followed job did not complete.
pub async fn run(command: Commands, ctx: &CliContext) -> anyhow::Result<bool> {
	match command {
		Commands::Submit(args) => handle_submit(args, ctx).await,
		Commands::Status(args) => {
			let record = ctx.client.status(args.job_id).await?;
			ctx.emit(&record, || format_record(&record))?;
			Ok(true)
		}
		Commands::Output(args) => {
			if args.follow {
				let status = follow(ctx, args.job_id, args.since).await?;
				Ok(status == JobStatus::Completed)
			} else {
				let page = ctx.client.output(args.job_id, args.since).await?;
				if ctx.json {
					println!("{}", serde_json::to_string_pretty(&page)?);
				} else {
					page.events.iter().for_each(print_event);
				}
				Ok(true)
			}
		}
		Commands::Cancel(args) => {
			let outcome = ctx.client.cancel(args.job_id).await?;
			ctx.emit(&outcome, || format!("{}: {:?}", args.job_id, outcome))?;
			Ok(true)
		}
		Commands::List(args) => {
			let jobs = ctx.client.list(args.limit, args.status).await?;
			ctx.emit(&jobs, || format_listing(&jobs))?;
			Ok(true)
		}
		Commands::Stats => {
			let stats = ctx.client.stats().await?;
			ctx.emit(&stats, || {
				format!(
					"running:  {}/{}\nqueued:   {}\nretained: {}\nlaunched: {}",
					stats.running,
					stats.max_concurrent_jobs,
					stats.queued,
					stats.retained,
					stats.launched_total
				)
			})?;
			Ok(true)
		}
	}
}

#[instrument(skip(ctx), fields(command = %args.command))]
async fn handle_submit(args: SubmitArgs, ctx: &CliContext) -> anyhow::Result<bool> {
	let options = args.options();
	let submitted = ctx
		.client
		.submit(args.command.clone(), args.args.clone(), options)
		.await?;

	if !args.follow {
		ctx.emit(&submitted, || match submitted.queue_position {
			Some(position) => format!(
				"{} {} (queue position {})",
				submitted.job_id, submitted.status, position
			),
			None => format!("{} {}", submitted.job_id, submitted.status),
		})?;
		return Ok(true);
	}

	eprintln!("job {}", submitted.job_id);
	let status = follow(ctx, submitted.job_id, 0).await?;
	Ok(status == JobStatus::Completed)
}

/// Poll output until the job reaches a terminal status.
///
/// Status is read before output on every round so the last page read after
/// a terminal status is guaranteed to contain the final event.
async fn follow(ctx: &CliContext, job_id: JobId, since: u64) -> anyhow::Result<JobStatus> {
	let interval = Duration::from_millis(ctx.client.stats().await?.poll_interval_ms.max(50));
	let mut next = since;

	loop {
		let record = ctx
			.client
			.status(job_id)
			.await
			.with_context(|| format!("lost track of job {job_id}"))?;
		let page = ctx.client.output(job_id, next).await?;
		for event in &page.events {
			if ctx.json {
				println!("{}", serde_json::to_string(event)?);
			} else {
				print_event(event);
			}
		}
		next = page.new_index;

		if record.is_terminal() {
			debug!(%job_id, status = %record.status, "job finished");
			if let Some(message) = &record.error_message {
				if !ctx.json {
					eprintln!("{}: {}", record.status, message);
				}
			}
			return Ok(record.status);
		}
		tokio::time::sleep(interval).await;
	}
}

fn print_event(event: &OutputEvent) {
	match event.kind {
		OutputEventKind::Stdout => println!("{}", event.payload),
		OutputEventKind::Stderr => eprintln!("{}", event.payload),
		OutputEventKind::Status | OutputEventKind::Error => {
			eprintln!("[{}] {}", event.kind, event.payload)
		}
	}
}

fn format_record(record: &JobRecord) -> String {
	let mut lines = vec![
		format!("id:       {}", record.id),
		format!("command:  {}", command_line(&record.command, &record.args)),
		format!("status:   {}", record.status),
		format!("created:  {}", record.created_at.to_rfc3339()),
	];
	if let Some(position) = record.queue_position {
		lines.push(format!("position: {position}"));
	}
	if let Some(started) = record.started_at {
		lines.push(format!("started:  {}", started.to_rfc3339()));
	}
	if let Some(completed) = record.completed_at {
		lines.push(format!("finished: {}", completed.to_rfc3339()));
	}
	if let Some(ms) = record.duration_ms() {
		lines.push(format!("duration: {ms}ms"));
	}
	if let Some(code) = record.return_code {
		lines.push(format!("exit:     {code}"));
	}
	if let Some(message) = &record.error_message {
		lines.push(format!("error:    {message}"));
	}
	lines.join("\n")
}

fn format_listing(jobs: &[JobSummary]) -> String {
	if jobs.is_empty() {
		return "no jobs".to_string();
	}
	jobs.iter()
		.map(|job| {
			format!(
				"{}  {:<9}  {}",
				job.id,
				job.status.as_str(),
				command_line(&job.command, &job.args)
			)
		})
		.collect::<Vec<_>>()
		.join("\n")
}

fn command_line(command: &str, args: &[String]) -> String {
	std::iter::once(command)
		.chain(args.iter().map(String::as_str))
		.collect::<Vec<_>>()
		.join(" ")
}
