// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Bridging between typed records and the structured values the KV layer
//! stores. Records serialize through their JSON representation, so byte
//! fields use the same marker object the relational backend's columns use.

use quill_type::{Error, Result, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn encode_record<T: Serialize>(record: &T) -> Result<Value> {
	Ok(Value::from_json(serde_json::to_value(record)?))
}

pub fn decode_record<T: DeserializeOwned>(value: &Value) -> Result<T> {
	serde_json::from_value(value.to_json())
		.map_err(|err| Error::backend(format!("corrupt stored record: {err}")))
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use super::*;
	use crate::model::{PermissionLevel, User, UserSettings};
	use quill_type::time::now_millis;

	#[test]
	fn test_user_record_round_trip() {
		let now = now_millis();
		let user = User {
			id: Uuid::new_v4(),
			username: "alice".into(),
			email: Some("alice@example.com".into()),
			display_name: "Alice".into(),
			password_hash: Some("100000$c2FsdA$aGFzaA".into()),
			is_active: true,
			created_at: now,
			updated_at: now,
			settings: UserSettings::default(),
		};
		let value = encode_record(&user).unwrap();
		assert_eq!(value.get("username").and_then(Value::as_text), Some("alice"));
		let back: User = decode_record(&value).unwrap();
		assert_eq!(back, user);
	}

	#[test]
	fn test_decode_rejects_mismatched_shape() {
		let value = Value::text("not a record");
		assert!(decode_record::<User>(&value).is_err());
		let missing = encode_record(&serde_json::json!({ "id": Uuid::new_v4() })).unwrap();
		assert!(decode_record::<User>(&missing).is_err());
	}

	#[test]
	fn test_enum_fields_round_trip() {
		let value = encode_record(&PermissionLevel::Editor).unwrap();
		assert_eq!(value, Value::text("EDITOR"));
		let back: PermissionLevel = decode_record(&value).unwrap();
		assert_eq!(back, PermissionLevel::Editor);
	}
}
