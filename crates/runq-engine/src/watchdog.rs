// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic sweep that times out overlong jobs and prunes the registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::JobRegistry;
use crate::runner::TerminationReason;

pub(crate) fn spawn(
	registry: Arc<JobRegistry>,
	default_limit: Duration,
	interval: Duration,
	mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		info!(
			interval_secs = interval.as_secs(),
			default_limit_secs = default_limit.as_secs(),
			"watchdog started"
		);
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					let now = Utc::now();
					sweep(&registry, default_limit, now);
					registry.prune(now);
				}
				_ = shutdown_rx.recv() => {
					info!("watchdog stopping");
					break;
				}
			}
		}
	})
}

/// Request a timeout for every running job past its duration limit.
/// Returns the number of jobs signalled.
pub(crate) fn sweep(registry: &JobRegistry, default_limit: Duration, now: DateTime<Utc>) -> usize {
	let mut signalled = 0;
	for entry in registry.running_entries() {
		let Some(started_at) = entry.started_at() else {
			continue;
		};
		let limit = entry
			.options()
			.max_duration_secs
			.map(Duration::from_secs)
			.unwrap_or(default_limit);
		let elapsed = now
			.signed_duration_since(started_at)
			.to_std()
			.unwrap_or_default();
		if elapsed <= limit {
			continue;
		}
		if entry.request_termination(TerminationReason::Timeout { limit }) {
			warn!(
				job_id = %entry.id(),
				elapsed_secs = elapsed.as_secs(),
				limit_secs = limit.as_secs(),
				"job exceeded maximum duration"
			);
			signalled += 1;
		}
	}
	if signalled > 0 {
		debug!(signalled, "watchdog sweep complete");
	}
	signalled
}
