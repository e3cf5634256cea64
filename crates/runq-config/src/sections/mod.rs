// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod daemon;
mod engine;
mod logging;

pub use daemon::{DaemonConfig, DaemonConfigLayer, DEFAULT_LISTEN};
pub use engine::{
	EngineConfig, EngineConfigLayer, DEFAULT_KILL_GRACE_PERIOD_SECS, DEFAULT_MAX_CONCURRENT_JOBS,
	DEFAULT_MAX_JOB_DURATION_SECS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RETENTION_MAX_AGE_SECS,
	DEFAULT_RETENTION_MAX_JOBS, DEFAULT_WATCHDOG_INTERVAL_SECS,
};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
