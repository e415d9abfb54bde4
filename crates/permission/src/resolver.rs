// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use quill_core::DocPath;
use quill_core::model::PermissionLevel;
use uuid::Uuid;

/// The caller on whose behalf an authorization question is asked. The
/// system-admin flag is established outside this crate (an operations
/// concern, not a document permission) and short-circuits every check.
#[derive(Debug, Clone, Copy, Default)]
pub struct Actor {
	pub user_id: Option<Uuid>,
	pub system_admin: bool,
}

impl Actor {
	pub fn user(user_id: Uuid) -> Actor {
		Actor { user_id: Some(user_id), system_admin: false }
	}

	pub fn anonymous() -> Actor {
		Actor::default()
	}
}

/// Operations the edge asks about, mapped to the minimum level they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	Read,
	Comment,
	Update,
	Collaborate,
	Share,
	Delete,
	Admin,
	Manage,
	/// Creating a child document; checked against the parent path.
	CreateChild,
}

impl Action {
	pub fn required_level(self) -> PermissionLevel {
		match self {
			Action::Read => PermissionLevel::Viewer,
			Action::Comment => PermissionLevel::Commenter,
			Action::Update | Action::Collaborate | Action::CreateChild => PermissionLevel::Editor,
			Action::Share => PermissionLevel::Admin,
			Action::Delete | Action::Admin | Action::Manage => PermissionLevel::Owner,
		}
	}
}

/// The outcome of a resolution: the effective level plus how it was
/// obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
	pub level: PermissionLevel,
	/// Came from an ancestor rather than the document itself.
	pub inherited: bool,
	/// The ancestor that actually granted the level.
	pub inherited_from: Option<DocPath>,
	/// Granted by ownership or role-list membership.
	pub explicit: bool,
	/// Granted by the document's public access setting.
	pub public_access: bool,
}

impl Resolved {
	pub fn none() -> Resolved {
		Resolved {
			level: PermissionLevel::None,
			inherited: false,
			inherited_from: None,
			explicit: false,
			public_access: false,
		}
	}

	pub fn explicit(level: PermissionLevel) -> Resolved {
		Resolved { level, explicit: true, ..Resolved::none() }
	}

	pub fn public(level: PermissionLevel) -> Resolved {
		Resolved { level, public_access: true, ..Resolved::none() }
	}

	pub fn has_level(&self, required: PermissionLevel) -> bool {
		self.level >= required
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_action_minimums() {
		assert_eq!(Action::Read.required_level(), PermissionLevel::Viewer);
		assert_eq!(Action::Comment.required_level(), PermissionLevel::Commenter);
		assert_eq!(Action::Update.required_level(), PermissionLevel::Editor);
		assert_eq!(Action::CreateChild.required_level(), PermissionLevel::Editor);
		assert_eq!(Action::Share.required_level(), PermissionLevel::Admin);
		assert_eq!(Action::Delete.required_level(), PermissionLevel::Owner);
	}

	#[test]
	fn test_has_level_is_numeric_ordering() {
		let resolved = Resolved::explicit(PermissionLevel::Commenter);
		assert!(resolved.has_level(PermissionLevel::Viewer));
		assert!(resolved.has_level(PermissionLevel::Commenter));
		assert!(!resolved.has_level(PermissionLevel::Editor));
	}
}
