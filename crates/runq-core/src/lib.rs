// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the runq background job engine.
//!
//! This crate provides:
//! - [`JobRecord`], [`JobStatus`] and [`JobId`] - the state of one submitted job
//! - [`OutputEvent`] and [`OutputPage`] - ordered, resumable job output
//! - [`EngineError`] - the error taxonomy shared by every engine operation
//! - [`protocol`] - the line-delimited JSON protocol spoken by `runq-daemon`

pub mod error;
pub mod event;
pub mod job;
pub mod protocol;

pub use error::{EngineError, Result};
pub use event::{OutputEvent, OutputEventKind, OutputPage};
pub use job::{
	CancelOutcome, EngineStats, ExecutionOptions, JobId, JobRecord, JobStatus, JobSummary,
};
