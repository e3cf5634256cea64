// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `runq`: submit and inspect background jobs on a running `runq-daemon`.

mod client;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::client::DaemonClient;
use crate::commands::{CliContext, Commands};

#[derive(Debug, Parser)]
#[command(name = "runq", version, about = "Background job runner client")]
struct Cli {
	/// Daemon address
	#[arg(long, env = "RUNQ_ADDR", default_value = "127.0.0.1:4860", global = true)]
	addr: String,

	/// Auth token; omit for daemons started with --insecure-no-auth
	#[arg(long, env = "RUNQ_DAEMON_TOKEN", hide_env_values = true, global = true)]
	token: Option<String>,

	/// Print machine-readable JSON
	#[arg(long, global = true)]
	json: bool,

	#[command(subcommand)]
	command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
		.with_writer(std::io::stderr)
		.init();

	match run(cli).await {
		Ok(true) => ExitCode::SUCCESS,
		Ok(false) => ExitCode::from(1),
		Err(e) => {
			eprintln!("error: {e:#}");
			ExitCode::from(2)
		}
	}
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
	let client = DaemonClient::connect(&cli.addr, cli.token.as_deref()).await?;
	let ctx = CliContext {
		client,
		json: cli.json,
	};
	commands::run(cli.command, &ctx).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;
	use runq_core::JobStatus;

	#[test]
	fn test_cli_definition_is_valid() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_submit_keeps_hyphenated_args() {
		let cli = Cli::try_parse_from([
			"runq", "submit", "--env", "A=1", "--follow", "ls", "-la", "/tmp",
		])
		.unwrap();
		let Commands::Submit(args) = cli.command else {
			panic!("expected submit");
		};
		assert_eq!(args.command, "ls");
		assert_eq!(args.args, vec!["-la", "/tmp"]);
		assert!(args.follow);
		assert_eq!(args.env, vec![("A".to_string(), "1".to_string())]);
	}

	#[test]
	fn test_list_parses_status_filter() {
		let cli = Cli::try_parse_from(["runq", "list", "--status", "failed", "--limit", "3"]).unwrap();
		let Commands::List(args) = cli.command else {
			panic!("expected list");
		};
		assert_eq!(args.status, Some(JobStatus::Failed));
		assert_eq!(args.limit, 3);
	}

	#[test]
	fn test_invalid_job_id_rejected() {
		assert!(Cli::try_parse_from(["runq", "status", "not-a-uuid"]).is_err());
	}
}
