// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Line-delimited JSON client for `runq-daemon`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use runq_core::protocol::*;
use runq_core::{
	CancelOutcome, EngineStats, ExecutionOptions, JobId, JobRecord, JobStatus, JobSummary,
	OutputPage,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("failed to connect to {addr}: {reason}")]
	Connect { addr: String, reason: String },

	#[error("request timed out")]
	Timeout,

	#[error("daemon closed the connection")]
	Disconnected,

	#[error("{code}: {message}")]
	Rpc { code: String, message: String },

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl ClientError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::Rpc { code, .. } if code == JOB_NOT_FOUND)
	}
}

type PendingRequests = HashMap<u64, oneshot::Sender<Result<Value, ClientError>>>;

/// Connection to a running daemon.
pub struct DaemonClient {
	writer: Mutex<BufWriter<OwnedWriteHalf>>,
	pending: Arc<Mutex<PendingRequests>>,
	next_id: AtomicU64,
}

impl DaemonClient {
	/// Connect and, when a token is given, authenticate.
	pub async fn connect(addr: &str, token: Option<&str>) -> Result<Self, ClientError> {
		let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
			.await
			.map_err(|_| ClientError::Connect {
				addr: addr.to_string(),
				reason: "timeout".to_string(),
			})?
			.map_err(|e| ClientError::Connect {
				addr: addr.to_string(),
				reason: e.to_string(),
			})?;
		debug!(addr, "connected to daemon");

		let (reader, writer) = stream.into_split();
		let pending: Arc<Mutex<PendingRequests>> = Arc::new(Mutex::new(HashMap::new()));
		let client = Self {
			writer: Mutex::new(BufWriter::new(writer)),
			pending: Arc::clone(&pending),
			next_id: AtomicU64::new(1),
		};
		Self::spawn_reader(BufReader::new(reader), pending);

		if let Some(token) = token {
			let result: AuthResult = client
				.call(
					METHOD_AUTH,
					AuthParams {
						token: token.to_string(),
					},
				)
				.await?;
			if !result.ok {
				return Err(ClientError::Rpc {
					code: AUTH_FAILED.to_string(),
					message: "authentication rejected".to_string(),
				});
			}
		}

		Ok(client)
	}

	fn spawn_reader(mut reader: BufReader<OwnedReadHalf>, pending: Arc<Mutex<PendingRequests>>) {
		tokio::spawn(async move {
			let mut line = String::new();
			loop {
				line.clear();
				match reader.read_line(&mut line).await {
					Ok(0) => break,
					Ok(_) => {
						let trimmed = line.trim();
						if trimmed.is_empty() {
							continue;
						}
						match serde_json::from_str::<IncomingMessage>(trimmed) {
							Ok(message) => Self::handle_message(&pending, message).await,
							Err(e) => debug!(error = %e, "ignoring unparseable line"),
						}
					}
					Err(e) => {
						debug!(error = %e, "read error");
						break;
					}
				}
			}

			// Fail all pending requests
			let mut pending = pending.lock().await;
			for (_, sender) in pending.drain() {
				let _ = sender.send(Err(ClientError::Disconnected));
			}
		});
	}

	async fn handle_message(pending: &Mutex<PendingRequests>, message: IncomingMessage) {
		let Some(id) = message.id else {
			trace!(method = ?message.method, "ignoring server event");
			return;
		};

		let Some(sender) = pending.lock().await.remove(&id) else {
			debug!(id, "response for unknown request");
			return;
		};

		let result = match (message.result, message.error) {
			(_, Some(error)) => Err(ClientError::Rpc {
				code: error.code,
				message: error.message,
			}),
			(Some(result), None) => Ok(result),
			(None, None) => Err(ClientError::Protocol(format!(
				"response {id} has neither result nor error"
			))),
		};
		let _ = sender.send(result);
	}

	/// Send a request and wait for its response.
	pub async fn call<P, R>(&self, method: &'static str, params: P) -> Result<R, ClientError>
	where
		P: Serialize,
		R: DeserializeOwned,
	{
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let params = serde_json::to_value(params).map_err(|e| ClientError::Protocol(e.to_string()))?;
		let request = Request {
			id,
			method: method.to_string(),
			params,
		};
		let json = serde_json::to_string(&request).map_err(|e| ClientError::Protocol(e.to_string()))?;

		let (tx, rx) = oneshot::channel();
		self.pending.lock().await.insert(id, tx);

		{
			let mut writer = self.writer.lock().await;
			writer.write_all(json.as_bytes()).await?;
			writer.write_all(b"\n").await?;
			writer.flush().await?;
		}
		trace!(id, method, "request sent");

		let result = match timeout(REQUEST_TIMEOUT, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(ClientError::Disconnected),
			Err(_) => {
				self.pending.lock().await.remove(&id);
				Err(ClientError::Timeout)
			}
		};

		serde_json::from_value(result?).map_err(|e| ClientError::Protocol(e.to_string()))
	}

	pub async fn submit(
		&self,
		command: String,
		args: Vec<String>,
		options: ExecutionOptions,
	) -> Result<SubmitResult, ClientError> {
		self.call(
			METHOD_SUBMIT,
			SubmitParams {
				command,
				args,
				options,
			},
		)
		.await
	}

	pub async fn status(&self, job_id: JobId) -> Result<JobRecord, ClientError> {
		self.call(METHOD_STATUS, JobIdParams { job_id }).await
	}

	pub async fn output(&self, job_id: JobId, since: u64) -> Result<OutputPage, ClientError> {
		self.call(METHOD_OUTPUT, OutputParams { job_id, since }).await
	}

	pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, ClientError> {
		let result: CancelResult = self.call(METHOD_CANCEL, JobIdParams { job_id }).await?;
		Ok(result.outcome)
	}

	pub async fn list(
		&self,
		limit: usize,
		status: Option<JobStatus>,
	) -> Result<Vec<JobSummary>, ClientError> {
		self.call(METHOD_LIST, ListParams { limit, status }).await
	}

	pub async fn stats(&self) -> Result<EngineStats, ClientError> {
		self.call(METHOD_STATS, Value::Null).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use tokio::net::TcpListener;

	/// Accepts one connection and answers each request via `respond`.
	async fn fake_daemon<F>(respond: F) -> String
	where
		F: Fn(Request) -> Option<Value> + Send + 'static,
	{
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let (reader, mut writer) = stream.into_split();
			let mut lines = BufReader::new(reader).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				let request: Request = serde_json::from_str(&line).unwrap();
				match respond(request) {
					Some(reply) => {
						writer.write_all(reply.to_string().as_bytes()).await.unwrap();
						writer.write_all(b"\n").await.unwrap();
					}
					None => return,
				}
			}
		});
		addr
	}

	#[tokio::test]
	async fn test_auth_then_call() {
		let addr = fake_daemon(|request| {
			Some(match request.method.as_str() {
				METHOD_AUTH => {
					assert_eq!(request.params["token"], json!("secret"));
					json!({"id": request.id, "result": {"ok": true}})
				}
				_ => json!({"method": "job_output", "params": {}}),
			})
		})
		.await;
		let client = DaemonClient::connect(&addr, Some("secret")).await.unwrap();
		assert_eq!(client.next_id.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_rpc_error_mapped() {
		let addr = fake_daemon(|request| {
			Some(json!({
				"id": request.id,
				"error": {"code": "job_not_found", "message": "job not found: x"}
			}))
		})
		.await;
		let client = DaemonClient::connect(&addr, None).await.unwrap();
		let err = client.status(JobId::new()).await.unwrap_err();
		assert!(err.is_not_found());
		assert_eq!(err.to_string(), "job_not_found: job not found: x");
	}

	#[tokio::test]
	async fn test_disconnect_fails_pending() {
		let addr = fake_daemon(|_| None).await;
		let client = DaemonClient::connect(&addr, None).await.unwrap();
		let err = client.stats().await.unwrap_err();
		assert!(matches!(err, ClientError::Disconnected));
	}

	#[tokio::test]
	async fn test_cancel_outcome_decoded() {
		let addr = fake_daemon(|request| {
			Some(json!({"id": request.id, "result": {"outcome": "cancel_requested"}}))
		})
		.await;
		let client = DaemonClient::connect(&addr, None).await.unwrap();
		assert_eq!(
			client.cancel(JobId::new()).await.unwrap(),
			CancelOutcome::CancelRequested
		);
	}

	#[tokio::test]
	async fn test_connect_refused() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		drop(listener);
		let err = DaemonClient::connect(&addr, None).await.err().unwrap();
		assert!(matches!(err, ClientError::Connect { .. }));
	}
}
