// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use serde::Serialize;
use serde_json::Value as Json;

pub type Result<T> = std::result::Result<T, Error>;

/// The failure taxonomy shared by every layer of the server.
///
/// Kinds, not types: lower-level faults (sqlite, I/O, codec) are folded into
/// `Backend` at the store boundary and keep their detail as the message.
/// Foreground operations either return a value or exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("backend error: {0}")]
	Backend(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("invalid path: {0}")]
	InvalidPath(String),

	#[error("authentication required")]
	AuthenticationRequired,

	/// Deliberately opaque: login failures never reveal which step failed.
	#[error("invalid credentials")]
	InvalidCredentials,

	#[error("permission denied: {0}")]
	PermissionDenied(String),

	#[error("{0} not found")]
	NotFound(String),

	#[error("duplicate resource: {0}")]
	DuplicateResource(String),

	#[error("path depth {depth} exceeds maximum nesting depth {max}")]
	MaxDepthExceeded { depth: usize, max: usize },

	#[error("rate limit exceeded")]
	RateLimitExceeded,

	#[error("service unavailable: {0}")]
	ServiceUnavailable(String),
}

impl Error {
	/// Shorthand for wrapping a lower-layer fault.
	pub fn backend(err: impl std::fmt::Display) -> Self {
		Error::Backend(err.to_string())
	}

	/// Stable wire code, used in the edge response envelope.
	pub fn code(&self) -> &'static str {
		match self {
			Error::Backend(_) => "INTERNAL_ERROR",
			Error::InvalidInput(_) => "INVALID_INPUT",
			Error::InvalidPath(_) => "INVALID_PATH",
			Error::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
			Error::InvalidCredentials => "INVALID_CREDENTIALS",
			Error::PermissionDenied(_) => "PERMISSION_DENIED",
			Error::NotFound(_) => "NOT_FOUND",
			Error::DuplicateResource(_) => "DUPLICATE_RESOURCE",
			Error::MaxDepthExceeded { .. } => "MAX_DEPTH_EXCEEDED",
			Error::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
			Error::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
		}
	}

	/// Status mapping consumed by the HTTP edge.
	pub fn http_status(&self) -> u16 {
		match self {
			Error::AuthenticationRequired | Error::InvalidCredentials => 401,
			Error::PermissionDenied(_) => 403,
			Error::NotFound(_) => 404,
			Error::DuplicateResource(_) => 409,
			Error::InvalidInput(_) | Error::InvalidPath(_) | Error::MaxDepthExceeded { .. } => 400,
			Error::RateLimitExceeded => 429,
			Error::Backend(_) => 500,
			Error::ServiceUnavailable(_) => 503,
		}
	}

	/// Transient faults may be retried by best-effort background work.
	pub fn is_transient(&self) -> bool {
		matches!(self, Error::Backend(_) | Error::ServiceUnavailable(_))
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Backend(err.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Backend(err.to_string())
	}
}

/// Success envelope counterpart: payloads travel to clients as
/// `{ "data": ... }`.
pub fn data_body<T: Serialize>(data: T) -> std::result::Result<Json, serde_json::Error> {
	Ok(serde_json::json!({ "data": serde_json::to_value(data)? }))
}

/// The failure envelope the edge serializes for clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
	pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
	pub code: &'static str,
	pub message: String,
	/// Unix millis at which the failure was surfaced.
	pub timestamp: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<Json>,
}

impl ErrorBody {
	pub fn new(err: &Error) -> Self {
		Self::with_details(err, None)
	}

	pub fn with_details(err: &Error, details: Option<Json>) -> Self {
		ErrorBody {
			error: ErrorDetail {
				code: err.code(),
				message: err.to_string(),
				timestamp: crate::time::now_millis(),
				details,
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_mapping() {
		assert_eq!(Error::AuthenticationRequired.http_status(), 401);
		assert_eq!(Error::PermissionDenied("x".into()).http_status(), 403);
		assert_eq!(Error::NotFound("user".into()).http_status(), 404);
		assert_eq!(Error::DuplicateResource("username".into()).http_status(), 409);
		assert_eq!(Error::InvalidInput("short".into()).http_status(), 400);
		assert_eq!(Error::Backend("boom".into()).http_status(), 500);
	}

	#[test]
	fn test_envelope_shape() {
		let body = ErrorBody::new(&Error::NotFound("document".into()));
		let json = serde_json::to_value(&body).unwrap();
		assert_eq!(json["error"]["code"], "NOT_FOUND");
		assert_eq!(json["error"]["message"], "document not found");
		assert!(json["error"]["timestamp"].as_u64().unwrap() > 0);
		assert!(json["error"].get("details").is_none());
	}

	#[test]
	fn test_invalid_credentials_is_opaque() {
		assert_eq!(Error::InvalidCredentials.to_string(), "invalid credentials");
	}

	#[test]
	fn test_success_envelope() {
		let body = data_body(serde_json::json!({ "id": 7 })).unwrap();
		assert_eq!(body["data"]["id"], 7);
	}
}
