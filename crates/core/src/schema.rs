// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! The canonical key schema over the KV store. Every persistent record the
//! server owns lives under one of these prefixes; building keys through
//! this module keeps the layout in one place.

use uuid::Uuid;

use crate::key;
use crate::key::Key;
use crate::path::DocPath;

pub fn user_by_id(id: Uuid) -> Key {
	key!["users", "by_id", id.to_string()]
}

pub fn user_by_username(username: &str) -> Key {
	key!["users", "by_username", username]
}

pub fn user_by_email(email: &str) -> Key {
	key!["users", "by_email", email]
}

pub fn users_prefix() -> Key {
	key!["users", "by_id"]
}

pub fn session(token: &str) -> Key {
	key!["sessions", token]
}

pub fn sessions_prefix() -> Key {
	key!["sessions"]
}

pub fn document_metadata(path: &DocPath) -> Key {
	key!["documents", "metadata", path.as_str()]
}

pub fn document_metadata_prefix() -> Key {
	key!["documents", "metadata"]
}

pub fn document_permissions(path: &DocPath) -> Key {
	key!["documents", "permissions", path.as_str()]
}

/// Opaque CRDT state payload for a document.
pub fn document_state(path: &DocPath) -> Key {
	key!["documents", "yjs_state", path.as_str()]
}

/// Names of a document's direct children.
pub fn document_children(path: &DocPath) -> Key {
	key!["documents", "children", path.as_str()]
}

/// Names of the top-level documents.
pub fn root_children() -> Key {
	key!["documents", "children", "/"]
}

/// Paths owned by a user.
pub fn documents_by_user(user: Uuid) -> Key {
	key!["documents", "by_user", user.to_string()]
}

pub fn upload_file(file_id: &str) -> Key {
	key!["uploads", "files", file_id]
}

pub fn uploads_by_user(user: Uuid, file_id: &str) -> Key {
	key!["uploads", "by_user", user.to_string(), file_id]
}

pub fn uploads_by_document(path: &DocPath, file_id: &str) -> Key {
	key!["uploads", "by_document", path.as_str(), file_id]
}

pub fn config(dotted: &str) -> Key {
	key!["config", dotted]
}
