// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Engine configuration section.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;
pub const DEFAULT_MAX_JOB_DURATION_SECS: u64 = 7200; // 2 hours
pub const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_KILL_GRACE_PERIOD_SECS: u64 = 5;
pub const DEFAULT_RETENTION_MAX_JOBS: usize = 100;
pub const DEFAULT_RETENTION_MAX_AGE_SECS: u64 = 86400; // 24 hours
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfigLayer {
	pub max_concurrent_jobs: Option<usize>,
	pub max_job_duration_secs: Option<u64>,
	pub watchdog_interval_secs: Option<u64>,
	pub kill_grace_period_secs: Option<u64>,
	pub retention_max_jobs: Option<usize>,
	pub retention_max_age_secs: Option<u64>,
	pub poll_interval_ms: Option<u64>,
}

impl EngineConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_concurrent_jobs.is_some() {
			self.max_concurrent_jobs = other.max_concurrent_jobs;
		}
		if other.max_job_duration_secs.is_some() {
			self.max_job_duration_secs = other.max_job_duration_secs;
		}
		if other.watchdog_interval_secs.is_some() {
			self.watchdog_interval_secs = other.watchdog_interval_secs;
		}
		if other.kill_grace_period_secs.is_some() {
			self.kill_grace_period_secs = other.kill_grace_period_secs;
		}
		if other.retention_max_jobs.is_some() {
			self.retention_max_jobs = other.retention_max_jobs;
		}
		if other.retention_max_age_secs.is_some() {
			self.retention_max_age_secs = other.retention_max_age_secs;
		}
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
	}

	pub fn finalize(self) -> EngineConfig {
		EngineConfig {
			max_concurrent_jobs: self
				.max_concurrent_jobs
				.unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS),
			max_job_duration_secs: self
				.max_job_duration_secs
				.unwrap_or(DEFAULT_MAX_JOB_DURATION_SECS),
			watchdog_interval_secs: self
				.watchdog_interval_secs
				.unwrap_or(DEFAULT_WATCHDOG_INTERVAL_SECS),
			kill_grace_period_secs: self
				.kill_grace_period_secs
				.unwrap_or(DEFAULT_KILL_GRACE_PERIOD_SECS),
			retention_max_jobs: self.retention_max_jobs.unwrap_or(DEFAULT_RETENTION_MAX_JOBS),
			retention_max_age_secs: self
				.retention_max_age_secs
				.unwrap_or(DEFAULT_RETENTION_MAX_AGE_SECS),
			poll_interval_ms: self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
	pub max_concurrent_jobs: usize,
	pub max_job_duration_secs: u64,
	pub watchdog_interval_secs: u64,
	/// Time between SIGTERM and SIGKILL when terminating a job.
	pub kill_grace_period_secs: u64,
	pub retention_max_jobs: usize,
	pub retention_max_age_secs: u64,
	/// Advisory only; handed to clients, never enforced.
	pub poll_interval_ms: u64,
}

impl EngineConfig {
	pub fn max_job_duration(&self) -> Duration {
		Duration::from_secs(self.max_job_duration_secs)
	}

	pub fn watchdog_interval(&self) -> Duration {
		Duration::from_secs(self.watchdog_interval_secs)
	}

	pub fn kill_grace_period(&self) -> Duration {
		Duration::from_secs(self.kill_grace_period_secs)
	}

	pub fn retention_max_age(&self) -> Duration {
		Duration::from_secs(self.retention_max_age_secs)
	}
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfigLayer::default().finalize()
	}
}
