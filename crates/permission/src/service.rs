// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::future::Future;
use std::pin::Pin;

use quill_core::config::{DocumentsSection, FeaturesSection};
use quill_core::model::{DocumentMetadata, DocumentPermissions, PermissionLevel};
use quill_core::record::{decode_record, encode_record};
use quill_core::{DocPath, schema};
use quill_store::KvStore;
use quill_type::time::now_millis;
use quill_type::{Error, Result};
use tracing::{instrument, trace};
use uuid::Uuid;

use crate::resolver::{Action, Actor, Resolved};

const COMMIT_ATTEMPTS: usize = 3;

/// Role-list patch. A provided list replaces that list; members are pulled
/// out of every other list first so a user ends up in at most one role.
#[derive(Debug, Clone, Default)]
pub struct PermissionsPatch {
	pub editors: Option<Vec<Uuid>>,
	pub commenters: Option<Vec<Uuid>>,
	pub viewers: Option<Vec<Uuid>>,
	pub public_access: Option<PermissionLevel>,
	pub inherit_from_parent: Option<bool>,
}

#[derive(Clone)]
pub struct PermissionService {
	kv: KvStore,
	documents: DocumentsSection,
	features: FeaturesSection,
}

impl PermissionService {
	pub fn new(
		kv: KvStore,
		documents: DocumentsSection,
		features: FeaturesSection,
	) -> PermissionService {
		PermissionService { kv, documents, features }
	}

	/// Resolve the effective level of `user` on `path`.
	///
	/// Order: explicit membership on the document, public access for
	/// authenticated callers, the inheritance walk, public access for
	/// anonymous callers. The walk is bounded by the configured nesting
	/// depth and stops at the first record with `inheritFromParent` off.
	#[instrument(name = "permission::resolve", level = "trace", skip(self))]
	pub async fn resolve(&self, user: Option<Uuid>, path: &DocPath) -> Result<Resolved> {
		self.resolve_bounded(user, path.clone(), self.documents.max_nesting_depth).await
	}

	fn resolve_bounded<'a>(
		&'a self,
		user: Option<Uuid>,
		path: DocPath,
		hops_left: usize,
	) -> Pin<Box<dyn Future<Output = Result<Resolved>> + Send + 'a>> {
		Box::pin(async move {
			let permissions = self.load(&path).await?;

			if let (Some(perms), Some(uid)) = (&permissions, user) {
				let explicit = perms.explicit_level(uid);
				if explicit != PermissionLevel::None {
					return Ok(Resolved::explicit(explicit));
				}
				// For a signed-in caller, the document's own public setting
				// wins over anything an ancestor might grant.
				if perms.public_access != PermissionLevel::None {
					return Ok(Resolved::public(perms.public_access));
				}
			}

			let inherits =
				permissions.as_ref().map_or(true, |perms| perms.inherit_from_parent);
			if inherits && hops_left > 0 {
				if let Some(parent) = path.parent() {
					let up = self.resolve_bounded(user, parent.clone(), hops_left - 1).await?;
					if up.level != PermissionLevel::None {
						// Ownership is not inheritable.
						let level = if up.level == PermissionLevel::Owner {
							PermissionLevel::Admin
						} else {
							up.level
						};
						return Ok(Resolved {
							level,
							inherited: true,
							inherited_from: up.inherited_from.or(Some(parent)),
							explicit: false,
							public_access: up.public_access,
						});
					}
				}
			}

			if let Some(perms) = &permissions {
				if perms.public_access != PermissionLevel::None {
					return Ok(Resolved::public(perms.public_access));
				}
			}
			trace!(%path, "no permission path found");
			Ok(Resolved::none())
		})
	}

	/// Whether `actor` may perform `action` on `path`. The system-admin
	/// flag short-circuits; `CreateChild` checks the parent, and creating
	/// at the root only needs an authenticated caller.
	pub async fn can(&self, actor: Actor, action: Action, path: &DocPath) -> Result<bool> {
		if actor.system_admin {
			return Ok(true);
		}
		let target = match action {
			Action::CreateChild => match path.parent() {
				Some(parent) => parent,
				None => return Ok(actor.user_id.is_some()),
			},
			_ => path.clone(),
		};
		let resolved = self.resolve(actor.user_id, &target).await?;
		Ok(resolved.has_level(action.required_level()))
	}

	pub async fn require(&self, actor: Actor, action: Action, path: &DocPath) -> Result<()> {
		if self.can(actor, action, path).await? {
			Ok(())
		} else if actor.user_id.is_none() {
			Err(Error::AuthenticationRequired)
		} else {
			Err(Error::PermissionDenied(format!("{action:?} on {path}")))
		}
	}

	/// Replace parts of a document's permission record. Requires ADMIN on
	/// the path; ownership cannot change here (see ownership transfer).
	#[instrument(name = "permission::set", level = "debug", skip(self, patch))]
	pub async fn set_permissions(
		&self,
		path: &DocPath,
		patch: PermissionsPatch,
		actor: Actor,
	) -> Result<DocumentPermissions> {
		if !actor.system_admin {
			let resolved = self.resolve(actor.user_id, path).await?;
			if !resolved.has_level(PermissionLevel::Admin) {
				return Err(Error::PermissionDenied(format!("sharing on {path}")));
			}
		}
		if let Some(public) = patch.public_access {
			if public > PermissionLevel::Editor {
				return Err(Error::InvalidInput(format!(
					"public access cannot grant {public:?}"
				)));
			}
			if public != PermissionLevel::None && !self.features.enable_public_documents {
				return Err(Error::InvalidInput("public documents are disabled".into()));
			}
		}

		for _ in 0..COMMIT_ATTEMPTS {
			let perm_entry = self
				.kv
				.get(&schema::document_permissions(path))
				.await?
				.ok_or_else(|| Error::NotFound(format!("document {path}")))?;
			let mut perms: DocumentPermissions = decode_record(&perm_entry.value)?;
			let meta_entry = self
				.kv
				.get(&schema::document_metadata(path))
				.await?
				.ok_or_else(|| Error::NotFound(format!("document {path}")))?;
			let mut metadata: DocumentMetadata = decode_record(&meta_entry.value)?;

			if let Some(editors) = &patch.editors {
				assign_role(&mut perms, editors, RoleList::Editors);
			}
			if let Some(commenters) = &patch.commenters {
				assign_role(&mut perms, commenters, RoleList::Commenters);
			}
			if let Some(viewers) = &patch.viewers {
				assign_role(&mut perms, viewers, RoleList::Viewers);
			}
			if let Some(public) = patch.public_access {
				perms.public_access = public;
			}
			if let Some(inherit) = patch.inherit_from_parent {
				perms.inherit_from_parent = inherit;
			}
			if perms.collaborator_count() > self.documents.max_collaborators_per_doc {
				return Err(Error::InvalidInput(format!(
					"collaborator limit of {} exceeded",
					self.documents.max_collaborators_per_doc
				)));
			}

			metadata.is_public = perms.public_access != PermissionLevel::None;
			metadata.updated_at = now_millis();

			let commit = self
				.kv
				.atomic()
				.check(schema::document_permissions(path), Some(perm_entry.versionstamp))
				.check(schema::document_metadata(path), Some(meta_entry.versionstamp))
				.set(schema::document_permissions(path), encode_record(&perms)?)
				.set(schema::document_metadata(path), encode_record(&metadata)?)
				.commit()
				.await?;
			if commit.is_ok() {
				return Ok(perms);
			}
		}
		Err(Error::backend(format!("permission contention on {path}")))
	}

	async fn load(&self, path: &DocPath) -> Result<Option<DocumentPermissions>> {
		match self.kv.get(&schema::document_permissions(path)).await? {
			None => Ok(None),
			Some(entry) => Ok(Some(decode_record(&entry.value)?)),
		}
	}
}

enum RoleList {
	Editors,
	Commenters,
	Viewers,
}

fn assign_role(perms: &mut DocumentPermissions, members: &[Uuid], role: RoleList) {
	match role {
		RoleList::Editors => perms.editors.clear(),
		RoleList::Commenters => perms.commenters.clear(),
		RoleList::Viewers => perms.viewers.clear(),
	}
	for &user in members {
		if user == perms.owner {
			continue;
		}
		perms.remove_everywhere(user);
		match role {
			RoleList::Editors => perms.editors.push(user),
			RoleList::Commenters => perms.commenters.push(user),
			RoleList::Viewers => perms.viewers.push(user),
		}
	}
}
