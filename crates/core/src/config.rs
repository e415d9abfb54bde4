// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::time::Duration;

use quill_type::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Prefix for environment overrides: dotted config keys map to
/// `QUILL_` + upper snake, e.g. `server.port` -> `QUILL_SERVER_PORT`,
/// `auth.sessionTimeout` -> `QUILL_AUTH_SESSION_TIMEOUT`.
pub const ENV_PREFIX: &str = "QUILL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
	#[serde(default)]
	pub server: ServerSection,
	#[serde(default)]
	pub auth: AuthSection,
	#[serde(default)]
	pub documents: DocumentsSection,
	#[serde(default)]
	pub features: FeaturesSection,
	#[serde(default)]
	pub rate_limit: RateLimitSection,
	/// Passed through to the upload collaborator untouched.
	#[serde(default, skip_serializing_if = "Json::is_null")]
	pub uploads: Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerSection {
	#[serde(default = "default_host")]
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthSection {
	/// Session lifetime from issuance, in seconds. Fixed, not sliding.
	#[serde(default = "default_session_timeout")]
	pub session_timeout: u64,
	/// Reserved for signed-token variants.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DocumentsSection {
	/// Bound on path depth and on the permission inheritance walk.
	#[serde(default = "default_max_nesting_depth")]
	pub max_nesting_depth: usize,
	/// Writes above this many bytes are rejected.
	#[serde(default = "default_max_document_size")]
	pub max_document_size: usize,
	/// Bound on editors + commenters + viewers per document.
	#[serde(default = "default_max_collaborators")]
	pub max_collaborators_per_doc: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FeaturesSection {
	#[serde(default = "default_true")]
	pub enable_public_documents: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitSection {
	#[serde(default = "default_rate_window_ms")]
	pub window_ms: u64,
	#[serde(default = "default_rate_max_requests")]
	pub max_requests: u32,
}

fn default_host() -> String {
	"127.0.0.1".to_string()
}
fn default_port() -> u16 {
	8727
}
fn default_session_timeout() -> u64 {
	86_400
}
fn default_max_nesting_depth() -> usize {
	10
}
fn default_max_document_size() -> usize {
	10 * 1024 * 1024
}
fn default_max_collaborators() -> usize {
	50
}
fn default_true() -> bool {
	true
}
fn default_rate_window_ms() -> u64 {
	60_000
}
fn default_rate_max_requests() -> u32 {
	120
}

impl Default for ServerSection {
	fn default() -> Self {
		ServerSection { host: default_host(), port: default_port() }
	}
}

impl Default for AuthSection {
	fn default() -> Self {
		AuthSection { session_timeout: default_session_timeout(), jwt_secret: None }
	}
}

impl Default for DocumentsSection {
	fn default() -> Self {
		DocumentsSection {
			max_nesting_depth: default_max_nesting_depth(),
			max_document_size: default_max_document_size(),
			max_collaborators_per_doc: default_max_collaborators(),
		}
	}
}

impl Default for FeaturesSection {
	fn default() -> Self {
		FeaturesSection { enable_public_documents: true }
	}
}

impl Default for RateLimitSection {
	fn default() -> Self {
		RateLimitSection {
			window_ms: default_rate_window_ms(),
			max_requests: default_rate_max_requests(),
		}
	}
}

impl ServerConfig {
	pub fn from_json(json: Json) -> Result<ServerConfig> {
		serde_json::from_value(json)
			.map_err(|err| Error::InvalidInput(format!("invalid configuration: {err}")))
	}

	pub fn load(path: &std::path::Path) -> Result<ServerConfig> {
		let raw = std::fs::read_to_string(path)?;
		let json: Json = serde_json::from_str(&raw)
			.map_err(|err| Error::InvalidInput(format!("invalid configuration file: {err}")))?;
		ServerConfig::from_json(json)
	}

	/// Overlay `QUILL_*` variables from the process environment.
	pub fn apply_env(&mut self) -> Result<()> {
		self.apply_env_from(std::env::vars())
	}

	/// Overlay variables from an explicit iterator; split out for tests.
	pub fn apply_env_from(
		&mut self,
		vars: impl IntoIterator<Item = (String, String)>,
	) -> Result<()> {
		for (name, value) in vars {
			let Some(key) = name.strip_prefix(ENV_PREFIX) else {
				continue;
			};
			match key {
				"SERVER_HOST" => self.server.host = value,
				"SERVER_PORT" => self.server.port = parse(key, &value)?,
				"AUTH_SESSION_TIMEOUT" => self.auth.session_timeout = parse(key, &value)?,
				"AUTH_JWT_SECRET" => self.auth.jwt_secret = Some(value),
				"DOCUMENTS_MAX_NESTING_DEPTH" => {
					self.documents.max_nesting_depth = parse(key, &value)?
				}
				"DOCUMENTS_MAX_DOCUMENT_SIZE" => {
					self.documents.max_document_size = parse(key, &value)?
				}
				"DOCUMENTS_MAX_COLLABORATORS_PER_DOC" => {
					self.documents.max_collaborators_per_doc = parse(key, &value)?
				}
				"FEATURES_ENABLE_PUBLIC_DOCUMENTS" => {
					self.features.enable_public_documents = parse_bool(key, &value)?
				}
				"RATE_LIMIT_WINDOW_MS" => self.rate_limit.window_ms = parse(key, &value)?,
				"RATE_LIMIT_MAX_REQUESTS" => self.rate_limit.max_requests = parse(key, &value)?,
				_ => {
					tracing::warn!(variable = %name, "ignoring unknown configuration override")
				}
			}
		}
		Ok(())
	}

	pub fn session_timeout(&self) -> Duration {
		Duration::from_secs(self.auth.session_timeout)
	}
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
	value
		.parse()
		.map_err(|_| Error::InvalidInput(format!("{ENV_PREFIX}{key}: cannot parse {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
	match value {
		"1" | "true" | "TRUE" => Ok(true),
		"0" | "false" | "FALSE" => Ok(false),
		other => {
			Err(Error::InvalidInput(format!("{ENV_PREFIX}{key}: cannot parse {other:?} as bool")))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = ServerConfig::default();
		assert_eq!(config.server.port, 8727);
		assert_eq!(config.auth.session_timeout, 86_400);
		assert_eq!(config.documents.max_nesting_depth, 10);
		assert!(config.features.enable_public_documents);
	}

	#[test]
	fn test_from_json_rejects_unknown_keys() {
		let json = serde_json::json!({ "server": { "port": 9000, "bogus": 1 } });
		assert!(ServerConfig::from_json(json).is_err());
	}

	#[test]
	fn test_env_overrides() {
		let mut config = ServerConfig::default();
		config
			.apply_env_from([
				("QUILL_SERVER_PORT".to_string(), "9001".to_string()),
				("QUILL_AUTH_SESSION_TIMEOUT".to_string(), "60".to_string()),
				("QUILL_FEATURES_ENABLE_PUBLIC_DOCUMENTS".to_string(), "false".to_string()),
				("UNRELATED".to_string(), "x".to_string()),
			])
			.unwrap();
		assert_eq!(config.server.port, 9001);
		assert_eq!(config.session_timeout(), Duration::from_secs(60));
		assert!(!config.features.enable_public_documents);
	}

	#[test]
	fn test_env_override_rejects_garbage() {
		let mut config = ServerConfig::default();
		let result = config
			.apply_env_from([("QUILL_SERVER_PORT".to_string(), "not-a-port".to_string())]);
		assert!(matches!(result, Err(Error::InvalidInput(_))));
	}

	#[test]
	fn test_uploads_pass_through() {
		let json = serde_json::json!({ "uploads": { "dir": "/var/quill", "maxSize": 5 } });
		let config = ServerConfig::from_json(json).unwrap();
		assert_eq!(config.uploads["dir"], "/var/quill");
	}
}
