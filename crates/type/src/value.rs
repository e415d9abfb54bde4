// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Marker key for byte payloads in the relational backend's JSON columns.
/// JSON has no native byte string, so `Bytes` round-trips through an object
/// with this single key holding base64.
const BYTES_MARKER: &str = "__bytes__";

/// A structured value: the unit stored against a key in the KV layer.
///
/// Arbitrarily nested; the derive serialization is what the embedded
/// backend's log frames use (postcard), while the relational backend goes
/// through [`Value::to_json`] / [`Value::from_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Text(String),
	Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
	List(Vec<Value>),
	Map(BTreeMap<String, Value>),
}

impl Value {
	pub fn text(value: impl Into<String>) -> Self {
		Value::Text(value.into())
	}

	pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
		Value::Bytes(value.into())
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			Value::Text(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(v) => Some(*v),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(v) => Some(*v),
			_ => None,
		}
	}

	pub fn as_bytes(&self) -> Option<&[u8]> {
		match self {
			Value::Bytes(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[Value]> {
		match self {
			Value::List(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
		match self {
			Value::Map(v) => Some(v),
			_ => None,
		}
	}

	/// Field lookup on a map value; `None` for anything else.
	pub fn get(&self, field: &str) -> Option<&Value> {
		self.as_map().and_then(|m| m.get(field))
	}

	/// Render as the structured-JSON column representation.
	pub fn to_json(&self) -> Json {
		match self {
			Value::Null => Json::Null,
			Value::Bool(v) => Json::Bool(*v),
			Value::Int(v) => Json::from(*v),
			Value::Float(v) => serde_json::Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null),
			Value::Text(v) => Json::String(v.clone()),
			Value::Bytes(v) => {
				let mut obj = serde_json::Map::with_capacity(1);
				obj.insert(BYTES_MARKER.to_string(), Json::String(BASE64.encode(v)));
				Json::Object(obj)
			}
			Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
			Value::Map(fields) => {
				Json::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
			}
		}
	}

	/// Inverse of [`Value::to_json`]. Total: legacy rows may hold arbitrary
	/// JSON, so unknown shapes degrade to the nearest structured form
	/// instead of failing.
	pub fn from_json(json: Json) -> Value {
		match json {
			Json::Null => Value::Null,
			Json::Bool(v) => Value::Bool(v),
			Json::Number(n) => {
				if let Some(v) = n.as_i64() {
					Value::Int(v)
				} else {
					Value::Float(n.as_f64().unwrap_or(f64::NAN))
				}
			}
			Json::String(v) => Value::Text(v),
			Json::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
			Json::Object(fields) => {
				if fields.len() == 1 {
					if let Some(Json::String(b64)) = fields.get(BYTES_MARKER) {
						if let Ok(bytes) = BASE64.decode(b64) {
							return Value::Bytes(bytes);
						}
					}
				}
				Value::Map(fields.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
			}
		}
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Text(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Text(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Int(value)
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<Vec<u8>> for Value {
	fn from(value: Vec<u8>) -> Self {
		Value::Bytes(value)
	}
}

impl<V: Into<Value>> FromIterator<(String, V)> for Value {
	fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
		Value::Map(iter.into_iter().map(|(k, v)| (k, v.into())).collect())
	}
}
