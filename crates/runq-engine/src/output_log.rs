// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only, per-job output log with resumable reads.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use runq_core::{EngineError, JobId, OutputEvent, OutputEventKind, OutputPage, Result};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the live broadcast channel. Slow subscribers that fall
/// further behind recover from the stored events.
const BROADCAST_CAPACITY: usize = 1024;

/// Ordered log of every output event emitted by one job.
///
/// Sequence indexes are assigned under the write lock, so they are gapless
/// from 0. Readers never observe a partially appended event. Once sealed the
/// log rejects further appends and live subscribers are released.
#[derive(Clone)]
pub struct OutputLog {
	inner: Arc<OutputLogInner>,
}

struct OutputLogInner {
	job_id: JobId,
	state: RwLock<LogState>,
}

struct LogState {
	events: Vec<OutputEvent>,
	/// `None` once the log is sealed.
	sender: Option<broadcast::Sender<OutputEvent>>,
}

impl OutputLog {
	pub fn new(job_id: JobId) -> Self {
		let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
		Self {
			inner: Arc::new(OutputLogInner {
				job_id,
				state: RwLock::new(LogState {
					events: Vec::new(),
					sender: Some(sender),
				}),
			}),
		}
	}

	pub fn job_id(&self) -> JobId {
		self.inner.job_id
	}

	/// Append an event and return its sequence index.
	pub fn append(&self, kind: OutputEventKind, payload: impl Into<String>) -> Result<u64> {
		let mut state = self.inner.state.write();
		if state.sender.is_none() {
			return Err(EngineError::LogSealed(self.inner.job_id));
		}

		let sequence_index = state.events.len() as u64;
		let event = OutputEvent {
			sequence_index,
			kind,
			payload: payload.into(),
			emitted_at: Utc::now(),
		};

		// Sent while holding the lock so `subscribe` never sees a gap.
		if let Some(sender) = &state.sender {
			let _ = sender.send(event.clone());
		}
		state.events.push(event);
		Ok(sequence_index)
	}

	/// Events with `sequence_index >= since`, plus the index to resume from.
	pub fn read_since(&self, since: u64) -> OutputPage {
		let state = self.inner.state.read();
		let len = state.events.len() as u64;
		if since >= len {
			return OutputPage {
				events: Vec::new(),
				new_index: since,
			};
		}
		OutputPage {
			events: state.events[since as usize..].to_vec(),
			new_index: len,
		}
	}

	/// Make the log immutable. Returns `false` if it was already sealed.
	pub fn seal(&self) -> bool {
		self.inner.state.write().sender.take().is_some()
	}

	pub fn is_sealed(&self) -> bool {
		self.inner.state.read().sender.is_none()
	}

	pub fn len(&self) -> usize {
		self.inner.state.read().events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.state.read().events.is_empty()
	}

	/// Stream events from `since` onwards: the stored backlog first, then
	/// live events as they are appended.
	pub fn subscribe(&self, since: u64) -> LogSubscription {
		let state = self.inner.state.read();
		let start = (since as usize).min(state.events.len());
		LogSubscription {
			log: self.clone(),
			backlog: state.events[start..].iter().cloned().collect(),
			receiver: state.sender.as_ref().map(|s| s.subscribe()),
			next_index: since,
		}
	}
}

/// Push-based reader over one job's [`OutputLog`].
///
/// Yields every event from the requested index in order, without gaps or
/// duplicates, and ends once the log is sealed and fully delivered.
pub struct LogSubscription {
	log: OutputLog,
	backlog: VecDeque<OutputEvent>,
	receiver: Option<broadcast::Receiver<OutputEvent>>,
	next_index: u64,
}

impl LogSubscription {
	pub fn job_id(&self) -> JobId {
		self.log.job_id()
	}

	/// Index of the next event this subscription will yield.
	pub fn next_index(&self) -> u64 {
		self.next_index
	}

	pub async fn next(&mut self) -> Option<OutputEvent> {
		loop {
			if let Some(event) = self.backlog.pop_front() {
				self.next_index = event.sequence_index + 1;
				return Some(event);
			}

			let receiver = self.receiver.as_mut()?;
			match receiver.recv().await {
				Ok(event) => {
					if event.sequence_index < self.next_index {
						continue;
					}
					self.next_index = event.sequence_index + 1;
					return Some(event);
				}
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					debug!(
						job_id = %self.log.job_id(),
						skipped,
						next_index = self.next_index,
						"subscriber lagged, refilling from log"
					);
					self.refill();
				}
				Err(broadcast::error::RecvError::Closed) => {
					self.receiver = None;
					self.refill();
				}
			}
		}
	}

	fn refill(&mut self) {
		let page = self.log.read_since(self.next_index);
		self.backlog.extend(page.events);
	}
}
