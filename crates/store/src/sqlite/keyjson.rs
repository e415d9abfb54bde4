// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Structured-JSON form of composite keys for the relational backend's
//! `key_path` column. Text, integer and boolean parts map to their native
//! JSON forms; bytes and big integers use single-key marker objects since
//! JSON has neither.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use quill_core::{Key, KeyPart};
use quill_type::{Error, Result};
use serde_json::{Value as Json, json};

const BYTES_MARKER: &str = "__bytes__";
const BIGINT_MARKER: &str = "__bigint__";

/// The canonical `key_path` column text for a key.
pub(crate) fn key_path(key: &Key) -> String {
	let parts: Vec<Json> = key.parts().iter().map(part_to_json).collect();
	Json::Array(parts).to_string()
}

fn part_to_json(part: &KeyPart) -> Json {
	match part {
		KeyPart::Text(v) => Json::String(v.clone()),
		KeyPart::Int(v) => Json::from(*v),
		KeyPart::Bool(v) => Json::Bool(*v),
		KeyPart::Bytes(v) => json!({ BYTES_MARKER: BASE64.encode(v) }),
		KeyPart::BigInt(v) => json!({ BIGINT_MARKER: v.to_string() }),
	}
}

/// Parse a `key_path` column back into a key. Fails on anything that is not
/// a structured list of valid parts; callers treat that as legacy format.
pub(crate) fn parse_key_path(text: &str) -> Result<Key> {
	let json: Json = serde_json::from_str(text)
		.map_err(|_| Error::backend(format!("unstructured key_path {text:?}")))?;
	let Json::Array(parts) = json else {
		return Err(Error::backend(format!("key_path is not a list: {text:?}")));
	};
	if parts.is_empty() {
		return Err(Error::backend("empty key_path list"));
	}
	parts.into_iter().map(part_from_json).collect::<Result<Vec<_>>>().map(Key::new)
}

fn part_from_json(json: Json) -> Result<KeyPart> {
	match json {
		Json::String(v) => Ok(KeyPart::Text(v)),
		Json::Bool(v) => Ok(KeyPart::Bool(v)),
		Json::Number(n) => n
			.as_i64()
			.map(KeyPart::Int)
			.ok_or_else(|| Error::backend(format!("non-integer key part {n}"))),
		Json::Object(fields) if fields.len() == 1 => {
			if let Some(Json::String(b64)) = fields.get(BYTES_MARKER) {
				let bytes = BASE64
					.decode(b64)
					.map_err(|_| Error::backend("invalid base64 in bytes key part"))?;
				return Ok(KeyPart::Bytes(bytes));
			}
			if let Some(Json::String(digits)) = fields.get(BIGINT_MARKER) {
				let value: i128 = digits
					.parse()
					.map_err(|_| Error::backend("invalid bigint key part"))?;
				return Ok(KeyPart::BigInt(value));
			}
			Err(Error::backend("unknown marker object in key part"))
		}
		other => Err(Error::backend(format!("invalid key part {other}"))),
	}
}

/// The immediate successor of a part in the total part order, or `None` for
/// the global maximum.
fn part_successor(part: &KeyPart) -> Option<KeyPart> {
	match part {
		KeyPart::Bytes(v) => {
			let mut next = v.clone();
			next.push(0x00);
			Some(KeyPart::Bytes(next))
		}
		KeyPart::Text(v) => {
			let mut next = v.clone();
			next.push('\u{0}');
			Some(KeyPart::Text(next))
		}
		KeyPart::Int(v) => {
			if *v < i64::MAX {
				Some(KeyPart::Int(v + 1))
			} else {
				Some(KeyPart::BigInt(i128::MIN))
			}
		}
		KeyPart::BigInt(v) => {
			if *v < i128::MAX {
				Some(KeyPart::BigInt(v + 1))
			} else {
				Some(KeyPart::Bool(false))
			}
		}
		KeyPart::Bool(false) => Some(KeyPart::Bool(true)),
		KeyPart::Bool(true) => None,
	}
}

/// Smallest key strictly greater than every key with the given structural
/// prefix; `None` when the prefix is all maximal parts (unbounded scan).
pub(crate) fn prefix_upper_bound(prefix: &Key) -> Option<Key> {
	let parts = prefix.parts();
	for cut in (0..parts.len()).rev() {
		if let Some(successor) = part_successor(&parts[cut]) {
			let mut bounded = parts[..cut].to_vec();
			bounded.push(successor);
			return Some(Key::new(bounded));
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use quill_core::key;

	use super::*;

	#[test]
	fn test_key_path_round_trip() {
		let key = key!["uploads", "by_user", 42i64, true, vec![1u8, 2], i128::MAX];
		assert_eq!(parse_key_path(&key_path(&key)).unwrap(), key);
	}

	#[test]
	fn test_key_path_is_plain_json_for_scalar_parts() {
		let key = key!["users", "by_id", "42"];
		assert_eq!(key_path(&key), r#"["users","by_id","42"]"#);
	}

	#[test]
	fn test_legacy_formats_fail_parse() {
		assert!(parse_key_path("users,by_id,42").is_err());
		assert!(parse_key_path("\"users,by_id,42\"").is_err());
		assert!(parse_key_path("[]").is_err());
	}

	#[test]
	fn test_prefix_upper_bound_brackets_the_run() {
		let prefix = key!["documents", "metadata"];
		let bound = prefix_upper_bound(&prefix).unwrap();
		let inside = key!["documents", "metadata", "/z"];
		let outside = key!["documents", "permissions"];
		assert!(prefix < inside && inside < bound);
		assert!(bound <= outside);
	}

	#[test]
	fn test_prefix_upper_bound_carries_past_maximal_parts() {
		let bound = prefix_upper_bound(&key!["a", true]).unwrap();
		assert_eq!(bound, key!["a\u{0}"]);
		assert_eq!(prefix_upper_bound(&key![true]), None);
	}
}
