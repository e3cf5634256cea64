// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for engine operations.

use thiserror::Error;

use crate::JobId;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine to its callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
	/// Unknown or evicted job id.
	#[error("job not found: {0}")]
	NotFound(JobId),

	/// Rejected at submit; no job record was created.
	#[error("invalid submission: {0}")]
	InvalidSubmission(String),

	#[error("engine is shutting down")]
	ShuttingDown,

	/// Append attempted after the job reached a terminal status.
	#[error("output log for job {0} is sealed")]
	LogSealed(JobId),

	#[error("failed to launch process: {0}")]
	Launch(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl EngineError {
	/// Stable machine-readable code used on the wire.
	pub fn code(&self) -> &'static str {
		match self {
			Self::NotFound(_) => crate::protocol::JOB_NOT_FOUND,
			Self::InvalidSubmission(_) => crate::protocol::INVALID_SUBMISSION,
			Self::ShuttingDown => crate::protocol::SHUTTING_DOWN,
			Self::LogSealed(_) | Self::Launch(_) | Self::Internal(_) => {
				crate::protocol::INTERNAL_ERROR
			}
		}
	}
}
