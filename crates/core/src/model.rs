// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Persistent records of the document model. Field names serialize in
//! camelCase, matching the structured values stored in the KV layer and the
//! JSON bodies the edge exchanges with clients.

use quill_type::time::UnixMillis;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::path::DocPath;

/// Totally ordered permission levels. The derived `Ord` follows declaration
/// order, so `hasLevel` is a plain comparison.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionLevel {
	#[default]
	None,
	Viewer,
	Commenter,
	Editor,
	Admin,
	Owner,
}

impl PermissionLevel {
	pub fn rank(self) -> u8 {
		self as u8
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
	pub theme: String,
	pub language: String,
	pub notifications_enabled: bool,
}

impl Default for UserSettings {
	fn default() -> Self {
		UserSettings {
			theme: "system".to_string(),
			language: "en".to_string(),
			notifications_enabled: true,
		}
	}
}

/// Field-wise patch for [`UserSettings`]; absent fields keep their current
/// value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettingsPatch {
	pub theme: Option<String>,
	pub language: Option<String>,
	pub notifications_enabled: Option<bool>,
}

impl UserSettings {
	pub fn apply(&mut self, patch: UserSettingsPatch) {
		if let Some(theme) = patch.theme {
			self.theme = theme;
		}
		if let Some(language) = patch.language {
			self.language = language;
		}
		if let Some(enabled) = patch.notifications_enabled {
			self.notifications_enabled = enabled;
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub id: Uuid,
	pub username: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	pub display_name: String,
	/// `iterations$salt$hash` triple; absent for externally authenticated
	/// accounts.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password_hash: Option<String>,
	pub is_active: bool,
	pub created_at: UnixMillis,
	pub updated_at: UnixMillis,
	#[serde(default)]
	pub settings: UserSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
	/// Opaque random token, also the key under `["sessions", id]`.
	pub id: String,
	pub user_id: Uuid,
	pub expires_at: UnixMillis,
	pub created_at: UnixMillis,
	pub updated_at: UnixMillis,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
}

impl Session {
	pub fn is_expired(&self, now: UnixMillis) -> bool {
		self.expires_at <= now
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
	pub id: Uuid,
	pub name: String,
	pub path: DocPath,
	pub owner_id: Uuid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parent_path: Option<DocPath>,
	pub depth: usize,
	pub title: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub tags: Vec<String>,
	/// Size in bytes of the last persisted CRDT state.
	#[serde(default)]
	pub size: u64,
	/// Incremented on every persisted save.
	#[serde(default)]
	pub version: u64,
	#[serde(default)]
	pub is_public: bool,
	#[serde(default)]
	pub is_archived: bool,
	pub created_at: UnixMillis,
	pub updated_at: UnixMillis,
	pub last_accessed_at: UnixMillis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPermissions {
	pub owner: Uuid,
	#[serde(default)]
	pub editors: Vec<Uuid>,
	#[serde(default)]
	pub commenters: Vec<Uuid>,
	#[serde(default)]
	pub viewers: Vec<Uuid>,
	#[serde(default)]
	pub public_access: PermissionLevel,
	#[serde(default)]
	pub inherit_from_parent: bool,
}

impl DocumentPermissions {
	pub fn new(owner: Uuid) -> Self {
		DocumentPermissions {
			owner,
			editors: Vec::new(),
			commenters: Vec::new(),
			viewers: Vec::new(),
			public_access: PermissionLevel::None,
			inherit_from_parent: true,
		}
	}

	/// Explicit level for a user: ownership, then the role lists. The role
	/// lists are disjoint by invariant, so at most one can match.
	pub fn explicit_level(&self, user: Uuid) -> PermissionLevel {
		if self.owner == user {
			PermissionLevel::Owner
		} else if self.editors.contains(&user) {
			PermissionLevel::Editor
		} else if self.commenters.contains(&user) {
			PermissionLevel::Commenter
		} else if self.viewers.contains(&user) {
			PermissionLevel::Viewer
		} else {
			PermissionLevel::None
		}
	}

	/// Drop the user from every role list; used before re-inserting into a
	/// single targeted list to keep the lists disjoint.
	pub fn remove_everywhere(&mut self, user: Uuid) {
		self.editors.retain(|u| *u != user);
		self.commenters.retain(|u| *u != user);
		self.viewers.retain(|u| *u != user);
	}

	pub fn collaborator_count(&self) -> usize {
		self.editors.len() + self.commenters.len() + self.viewers.len()
	}
}
