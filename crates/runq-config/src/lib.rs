// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration for the runq engine and daemon.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`RUNQ_*`)
//!
//! # Usage
//!
//! ```ignore
//! use runq_config::load_config;
//!
//! let config = load_config(None, RunqConfigLayer::default())?;
//! println!("max concurrent jobs: {}", config.engine.max_concurrent_jobs);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::RunqConfigLayer;
pub use sections::*;
pub use sources::{
	ConfigSource, DefaultsSource, EnvSource, OverrideSource, Precedence, TomlSource,
};

use std::path::PathBuf;

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct RunqConfig {
	pub engine: EngineConfig,
	pub daemon: DaemonConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. `overrides` (command-line flags)
/// 2. Environment variables (`RUNQ_*`)
/// 3. Config file (`config_path`, or `/etc/runq/runq.toml`)
/// 4. Built-in defaults
pub fn load_config(
	config_path: Option<PathBuf>,
	overrides: RunqConfigLayer,
) -> Result<RunqConfig, ConfigError> {
	let file = match config_path {
		Some(path) => TomlSource::new(path),
		None => TomlSource::system(),
	};
	load_from_sources(vec![
		Box::new(OverrideSource::new(overrides)),
		Box::new(EnvSource),
		Box::new(file),
		Box::new(DefaultsSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<RunqConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = RunqConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: RunqConfigLayer) -> Result<RunqConfig, ConfigError> {
	let engine = layer.engine.unwrap_or_default().finalize();
	let daemon = layer.daemon.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_engine(&engine)?;

	info!(
		max_concurrent_jobs = engine.max_concurrent_jobs,
		max_job_duration_secs = engine.max_job_duration_secs,
		retention_max_jobs = engine.retention_max_jobs,
		retention_max_age_secs = engine.retention_max_age_secs,
		listen = %daemon.listen,
		auth_required = daemon.require_auth(),
		"Configuration loaded"
	);

	Ok(RunqConfig {
		engine,
		daemon,
		logging,
	})
}

/// Validate engine limits.
fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
	let checks: [(&str, u64); 4] = [
		("engine.max_concurrent_jobs", engine.max_concurrent_jobs as u64),
		("engine.max_job_duration_secs", engine.max_job_duration_secs),
		("engine.watchdog_interval_secs", engine.watchdog_interval_secs),
		("engine.retention_max_jobs", engine.retention_max_jobs as u64),
	];
	for (key, value) in checks {
		if value == 0 {
			return Err(ConfigError::InvalidValue {
				key: key.to_string(),
				message: "must be at least 1".to_string(),
			});
		}
	}
	Ok(())
}

/// Validate daemon auth settings.
pub fn validate_daemon(daemon: &DaemonConfig) -> Result<(), ConfigError> {
	if daemon.require_auth() && daemon.token.is_none() {
		return Err(ConfigError::Validation(
			"RUNQ_DAEMON_TOKEN (or daemon.token) is required unless \
			 RUNQ_DAEMON_INSECURE_NO_AUTH=1 is set."
				.to_string(),
		));
	}
	Ok(())
}
