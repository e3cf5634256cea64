// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Daemon transport configuration section.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:4860";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfigLayer {
	pub listen: Option<String>,
	pub token: Option<String>,
	pub insecure_no_auth: Option<bool>,
}

impl DaemonConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.listen.is_some() {
			self.listen = other.listen;
		}
		if other.token.is_some() {
			self.token = other.token;
		}
		if other.insecure_no_auth.is_some() {
			self.insecure_no_auth = other.insecure_no_auth;
		}
	}

	pub fn finalize(self) -> DaemonConfig {
		DaemonConfig {
			listen: self.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
			token: self.token,
			insecure_no_auth: self.insecure_no_auth.unwrap_or(false),
		}
	}
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
	pub listen: String,
	pub token: Option<String>,
	/// Disables token auth. Development only.
	pub insecure_no_auth: bool,
}

impl DaemonConfig {
	pub fn require_auth(&self) -> bool {
		!self.insecure_no_auth
	}
}

impl Default for DaemonConfig {
	fn default() -> Self {
		DaemonConfigLayer::default().finalize()
	}
}

// Keeps the token out of logs.
impl std::fmt::Debug for DaemonConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DaemonConfig")
			.field("listen", &self.listen)
			.field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
			.field("insecure_no_auth", &self.insecure_no_auth)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_require_auth() {
		let config = DaemonConfig::default();
		assert_eq!(config.listen, DEFAULT_LISTEN);
		assert!(config.token.is_none());
		assert!(config.require_auth());
	}

	#[test]
	fn test_debug_redacts_token() {
		let config = DaemonConfigLayer {
			token: Some("hunter2".to_string()),
			..Default::default()
		}
		.finalize();
		let debug = format!("{config:?}");
		assert!(!debug.contains("hunter2"));
		assert!(debug.contains("REDACTED"));
	}
}
