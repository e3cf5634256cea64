// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{DaemonConfigLayer, EngineConfigLayer, LoggingConfigLayer};

/// Root configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunqConfigLayer {
	#[serde(default)]
	pub engine: Option<EngineConfigLayer>,
	#[serde(default)]
	pub daemon: Option<DaemonConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl RunqConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: RunqConfigLayer) {
		merge_option(&mut self.engine, other.engine, EngineConfigLayer::merge);
		merge_option(&mut self.daemon, other.daemon, DaemonConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_merge_empty_layers() {
		let mut base = RunqConfigLayer::default();
		base.merge(RunqConfigLayer::default());
		assert!(base.engine.is_none());
		assert!(base.daemon.is_none());
	}

	#[test]
	fn test_merge_other_overwrites() {
		let mut base = RunqConfigLayer {
			engine: Some(EngineConfigLayer {
				max_concurrent_jobs: Some(1),
				poll_interval_ms: Some(500),
				..Default::default()
			}),
			..Default::default()
		};
		let other = RunqConfigLayer {
			engine: Some(EngineConfigLayer {
				max_concurrent_jobs: Some(6),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(other);
		let engine = base.engine.as_ref().unwrap();
		assert_eq!(engine.max_concurrent_jobs, Some(6));
		assert_eq!(engine.poll_interval_ms, Some(500));
	}

	#[test]
	fn test_merge_adds_missing_sections() {
		let mut base = RunqConfigLayer::default();
		let other = RunqConfigLayer {
			daemon: Some(DaemonConfigLayer {
				listen: Some("0.0.0.0:9000".to_string()),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(other);
		assert_eq!(
			base.daemon.as_ref().unwrap().listen,
			Some("0.0.0.0:9000".to_string())
		);
	}

	proptest! {
		#[test]
		fn merge_prefers_later_values(
			a in proptest::option::of(1usize..64),
			b in proptest::option::of(1usize..64),
		) {
			let mut base = RunqConfigLayer {
				engine: Some(EngineConfigLayer { max_concurrent_jobs: a, ..Default::default() }),
				..Default::default()
			};
			base.merge(RunqConfigLayer {
				engine: Some(EngineConfigLayer { max_concurrent_jobs: b, ..Default::default() }),
				..Default::default()
			});
			let merged = base.engine.unwrap().max_concurrent_jobs;
			prop_assert_eq!(merged, b.or(a));
		}
	}
}
