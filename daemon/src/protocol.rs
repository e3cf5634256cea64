//! Wire protocol types shared with clients, plus response helpers.

pub use runq_core::protocol::*;

use runq_core::EngineError;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

/// Serialize a message to one protocol line.
pub fn to_line<T: Serialize>(message: &T) -> String {
    match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize message: {e}");
            r#"{"id":0,"error":{"code":"internal_error","message":"serialization failed"}}"#
                .to_string()
        }
    }
}

pub fn success<T: Serialize>(id: u64, result: T) -> String {
    to_line(&SuccessResponse::new(id, result))
}

pub fn failure(id: u64, code: &'static str, message: impl Into<String>) -> String {
    to_line(&ErrorResponse::new(id, code, message))
}

pub fn engine_failure(id: u64, err: &EngineError) -> String {
    match err {
        EngineError::NotFound(_) => debug!("id={id} {err}"),
        EngineError::Internal(_) | EngineError::LogSealed(_) => error!("id={id} {err}"),
        _ => debug!("id={id} rejected: {err}"),
    }
    failure(id, err.code(), err.to_string())
}

/// Whether a response line carries a top-level `error` member. Nested
/// `"error"` strings, such as output events of type error, do not count.
pub fn is_error_response(line: &str) -> bool {
    #[derive(Deserialize)]
    struct TopLevel {
        #[serde(default)]
        error: Option<IgnoredAny>,
    }

    serde_json::from_str::<TopLevel>(line)
        .map(|top| top.error.is_some())
        .unwrap_or(true)
}

/// Decode request params. A missing `params` field decodes as `{}`.
pub fn parse_params<T: DeserializeOwned>(request: &Request) -> Result<T, String> {
    let params = match &request.params {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(params)
        .map_err(|e| failure(request.id, INVALID_PARAMS, format!("Invalid params: {e}")))
}
