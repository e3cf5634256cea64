// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::RunqConfigLayer;
use crate::sections::{DaemonConfigLayer, EngineConfigLayer, LogFormat, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
	CommandLine = 60,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<RunqConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<RunqConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(RunqConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/runq/runq.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<RunqConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(RunqConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: RunqConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Explicit overrides, typically parsed from command-line flags.
pub struct OverrideSource {
	layer: RunqConfigLayer,
}

impl OverrideSource {
	pub fn new(layer: RunqConfigLayer) -> Self {
		Self { layer }
	}
}

impl ConfigSource for OverrideSource {
	fn name(&self) -> &'static str {
		"command-line"
	}

	fn precedence(&self) -> Precedence {
		Precedence::CommandLine
	}

	fn load(&self) -> Result<RunqConfigLayer, ConfigError> {
		Ok(self.layer.clone())
	}
}

/// Environment variable source.
///
/// Convention: RUNQ_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<RunqConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_from_lookup(|name| std::env::var(name).ok())
	}
}

/// Builds a layer from an arbitrary variable lookup.
pub(crate) fn load_from_lookup<F>(lookup: F) -> Result<RunqConfigLayer, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let env = Env { lookup };
	Ok(RunqConfigLayer {
		engine: Some(EngineConfigLayer {
			max_concurrent_jobs: env.parsed("RUNQ_ENGINE_MAX_CONCURRENT_JOBS")?,
			max_job_duration_secs: env.parsed("RUNQ_ENGINE_MAX_JOB_DURATION_SECS")?,
			watchdog_interval_secs: env.parsed("RUNQ_ENGINE_WATCHDOG_INTERVAL_SECS")?,
			kill_grace_period_secs: env.parsed("RUNQ_ENGINE_KILL_GRACE_PERIOD_SECS")?,
			retention_max_jobs: env.parsed("RUNQ_ENGINE_RETENTION_MAX_JOBS")?,
			retention_max_age_secs: env.parsed("RUNQ_ENGINE_RETENTION_MAX_AGE_SECS")?,
			poll_interval_ms: env.parsed("RUNQ_ENGINE_POLL_INTERVAL_MS")?,
		}),
		daemon: Some(DaemonConfigLayer {
			listen: env.var("RUNQ_DAEMON_LISTEN"),
			token: env.var("RUNQ_DAEMON_TOKEN"),
			insecure_no_auth: env.bool("RUNQ_DAEMON_INSECURE_NO_AUTH"),
		}),
		logging: Some(LoggingConfigLayer {
			level: env.var("RUNQ_LOG_LEVEL"),
			format: env.parsed::<LogFormat>("RUNQ_LOG_FORMAT")?,
		}),
	})
}

struct Env<F> {
	lookup: F,
}

impl<F> Env<F>
where
	F: Fn(&str) -> Option<String>,
{
	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parsed<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
	where
		T: FromStr,
	{
		match self.var(name) {
			Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid value '{v}'"),
			}),
			None => Ok(None),
		}
	}
}
