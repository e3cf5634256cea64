// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Output events captured for a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel an output event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputEventKind {
	Stdout,
	Stderr,
	/// Lifecycle notices written by the engine itself.
	Status,
	/// Launch failures, timeouts and internal faults.
	Error,
}

impl fmt::Display for OutputEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Stdout => write!(f, "stdout"),
			Self::Stderr => write!(f, "stderr"),
			Self::Status => write!(f, "status"),
			Self::Error => write!(f, "error"),
		}
	}
}

/// One ordered unit of captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
	/// Position in the job's log, gapless from 0.
	pub sequence_index: u64,
	#[serde(rename = "type")]
	pub kind: OutputEventKind,
	pub payload: String,
	pub emitted_at: DateTime<Utc>,
}

/// Result of a resumable read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPage {
	pub events: Vec<OutputEvent>,
	/// Value to pass as `since` on the next read.
	pub new_index: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_event_serializes_kind_as_type() {
		let event = OutputEvent {
			sequence_index: 3,
			kind: OutputEventKind::Stderr,
			payload: "boom".to_string(),
			emitted_at: Utc::now(),
		};
		let value = serde_json::to_value(&event).unwrap();
		assert_eq!(value["type"], "stderr");
		assert_eq!(value["sequence_index"], 3);
		assert!(value.get("kind").is_none());
	}
}
