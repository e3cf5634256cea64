// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job execution engine.
//!
//! Jobs are external commands submitted for asynchronous execution. The
//! engine admits them in FIFO order under a concurrency limit, captures
//! their stdout and stderr into a per-job append-only log that callers read
//! incrementally, and enforces a maximum duration through a watchdog.
//!
//! ```ignore
//! let engine = Engine::start(EngineConfig::default());
//! let job = engine.submit("echo", vec!["hello".into()], ExecutionOptions::default())?;
//! let page = engine.output(job.id, 0)?;
//! ```

pub mod engine;
pub mod output_log;
pub mod registry;
pub mod runner;
pub mod scheduler;
mod watchdog;

pub use engine::Engine;
pub use output_log::{LogSubscription, OutputLog};
pub use registry::{JobEntry, JobRegistry, RetentionPolicy};
pub use runner::TerminationReason;
pub use scheduler::Scheduler;
