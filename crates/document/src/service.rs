// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use quill_core::config::DocumentsSection;
use quill_core::model::{DocumentMetadata, DocumentPermissions};
use quill_core::record::{decode_record, encode_record};
use quill_core::{DocPath, Key, Versionstamp, schema};
use quill_store::KvStore;
use quill_type::time::now_millis;
use quill_type::{Error, Result, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Attempts for read-check-write cycles that can lose races against
/// concurrent writers of the same sibling entries.
const COMMIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct CreateDocument {
	pub title: Option<String>,
	pub description: String,
	pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
	pub title: Option<String>,
	pub description: Option<String>,
	pub tags: Option<Vec<String>>,
	pub is_archived: Option<bool>,
}

#[derive(Clone)]
pub struct DocumentService {
	kv: KvStore,
	config: DocumentsSection,
}

impl DocumentService {
	pub fn new(kv: KvStore, config: DocumentsSection) -> DocumentService {
		DocumentService { kv, config }
	}

	#[instrument(name = "document::create", level = "debug", skip(self, attrs))]
	pub async fn create(
		&self,
		path: &DocPath,
		owner: Uuid,
		attrs: CreateDocument,
	) -> Result<DocumentMetadata> {
		if path.depth() > self.config.max_nesting_depth {
			return Err(Error::MaxDepthExceeded {
				depth: path.depth(),
				max: self.config.max_nesting_depth,
			});
		}
		let parent = path.parent();
		if let Some(parent) = &parent {
			if self.kv.get(&schema::document_metadata(parent)).await?.is_none() {
				return Err(Error::NotFound("parent document".into()));
			}
		}

		let now = now_millis();
		let metadata = DocumentMetadata {
			id: Uuid::new_v4(),
			name: path.name().to_string(),
			path: path.clone(),
			owner_id: owner,
			parent_path: parent.clone(),
			depth: path.depth(),
			title: attrs.title.unwrap_or_else(|| path.name().to_string()),
			description: attrs.description,
			tags: attrs.tags,
			size: 0,
			version: 0,
			is_public: false,
			is_archived: false,
			created_at: now,
			updated_at: now,
			last_accessed_at: now,
		};
		let permissions = DocumentPermissions::new(owner);

		let children_key = match &parent {
			Some(parent) => schema::document_children(parent),
			None => schema::root_children(),
		};
		let by_user_key = schema::documents_by_user(owner);
		let name = path.name().to_string();

		// The metadata check detects duplicate paths; the list checks lose
		// only to concurrent sibling activity, which is worth a few retries.
		for attempt in 0..COMMIT_ATTEMPTS {
			if attempt > 0 && self.kv.get(&schema::document_metadata(path)).await?.is_some() {
				return Err(Error::DuplicateResource(format!("document {path}")));
			}
			let (mut siblings, siblings_stamp) = self.read_list(&children_key).await?;
			if !siblings.contains(&name) {
				siblings.push(name.clone());
			}
			let (mut owned, owned_stamp) = self.read_list(&by_user_key).await?;
			if !owned.contains(&path.as_str().to_string()) {
				owned.push(path.as_str().to_string());
			}

			let commit = self
				.kv
				.atomic()
				.check(schema::document_metadata(path), None)
				.check(children_key.clone(), siblings_stamp)
				.check(by_user_key.clone(), owned_stamp)
				.set(schema::document_metadata(path), encode_record(&metadata)?)
				.set(schema::document_permissions(path), encode_record(&permissions)?)
				.set(children_key.clone(), text_list(&siblings))
				.set(by_user_key.clone(), text_list(&owned))
				.commit()
				.await?;
			if commit.is_ok() {
				info!(path = %path, owner = %owner, "document created");
				return Ok(metadata);
			}
		}
		Err(Error::DuplicateResource(format!("document {path}")))
	}

	pub async fn get(&self, path: &DocPath) -> Result<DocumentMetadata> {
		let entry = self
			.kv
			.get(&schema::document_metadata(path))
			.await?
			.ok_or_else(|| Error::NotFound(format!("document {path}")))?;
		decode_record(&entry.value)
	}

	pub async fn exists(&self, path: &DocPath) -> Result<bool> {
		Ok(self.kv.get(&schema::document_metadata(path)).await?.is_some())
	}

	#[instrument(name = "document::update", level = "debug", skip(self, patch))]
	pub async fn update(&self, path: &DocPath, patch: DocumentPatch) -> Result<DocumentMetadata> {
		let mut metadata = self.get(path).await?;
		if let Some(title) = patch.title {
			metadata.title = title;
		}
		if let Some(description) = patch.description {
			metadata.description = description;
		}
		if let Some(tags) = patch.tags {
			metadata.tags = tags;
		}
		if let Some(archived) = patch.is_archived {
			metadata.is_archived = archived;
		}
		metadata.updated_at = now_millis();
		self.kv
			.set(&schema::document_metadata(path), encode_record(&metadata)?, Default::default())
			.await?;
		Ok(metadata)
	}

	/// Advisory read timestamp; last writer wins.
	pub async fn mark_accessed(&self, path: &DocPath) -> Result<()> {
		let mut metadata = self.get(path).await?;
		metadata.last_accessed_at = now_millis();
		self.kv
			.set(&schema::document_metadata(path), encode_record(&metadata)?, Default::default())
			.await?;
		Ok(())
	}

	/// The persisted CRDT state, if any.
	pub async fn load_state(&self, path: &DocPath) -> Result<Option<Vec<u8>>> {
		match self.kv.get(&schema::document_state(path)).await? {
			None => Ok(None),
			Some(entry) => match entry.value {
				Value::Bytes(bytes) => Ok(Some(bytes)),
				other => Err(Error::backend(format!(
					"document state at {path} is not a byte payload: {other:?}"
				))),
			},
		}
	}

	/// Write the CRDT snapshot and bump the metadata version/size in one
	/// atomic op.
	#[instrument(name = "document::persist_state", level = "trace", skip(self, state))]
	pub async fn persist_state(&self, path: &DocPath, state: Vec<u8>) -> Result<DocumentMetadata> {
		if state.len() > self.config.max_document_size {
			return Err(Error::InvalidInput(format!(
				"document state of {} bytes exceeds the {} byte limit",
				state.len(),
				self.config.max_document_size
			)));
		}
		for _ in 0..COMMIT_ATTEMPTS {
			let entry = self
				.kv
				.get(&schema::document_metadata(path))
				.await?
				.ok_or_else(|| Error::NotFound(format!("document {path}")))?;
			let mut metadata: DocumentMetadata = decode_record(&entry.value)?;
			metadata.size = state.len() as u64;
			metadata.version += 1;
			metadata.updated_at = now_millis();

			let commit = self
				.kv
				.atomic()
				.check(schema::document_metadata(path), Some(entry.versionstamp))
				.set(schema::document_state(path), Value::Bytes(state.clone()))
				.set(schema::document_metadata(path), encode_record(&metadata)?)
				.commit()
				.await?;
			if commit.is_ok() {
				return Ok(metadata);
			}
		}
		Err(Error::backend(format!("persistent metadata contention on {path}")))
	}

	/// Delete the document and every descendant, deepest first. Each
	/// document's four sibling entries go in one atomic op; the parent's
	/// children list and the owner's index are updated alongside.
	#[instrument(name = "document::delete", level = "debug", skip(self))]
	pub async fn delete(&self, path: &DocPath) -> Result<u64> {
		// Make sure it exists before walking.
		self.get(path).await?;

		let mut subtree = vec![path.clone()];
		let mut frontier = vec![path.clone()];
		while let Some(current) = frontier.pop() {
			for name in self.children(&current).await? {
				let child = current.join(&name)?;
				subtree.push(child.clone());
				frontier.push(child);
			}
		}

		let mut deleted = 0;
		for doc in subtree.iter().rev() {
			// Descendants' parent links die with their parent; only the
			// root of the deleted subtree updates its parent's list.
			self.delete_one(doc, doc == path).await?;
			deleted += 1;
		}
		info!(path = %path, deleted, "document subtree deleted");
		Ok(deleted)
	}

	async fn delete_one(&self, path: &DocPath, update_parent: bool) -> Result<()> {
		let children_key = match path.parent() {
			Some(parent) => schema::document_children(&parent),
			None => schema::root_children(),
		};
		for _ in 0..COMMIT_ATTEMPTS {
			let Some(entry) = self.kv.get(&schema::document_metadata(path)).await? else {
				return Ok(());
			};
			let metadata: DocumentMetadata = decode_record(&entry.value)?;
			let by_user_key = schema::documents_by_user(metadata.owner_id);
			let (mut owned, owned_stamp) = self.read_list(&by_user_key).await?;
			owned.retain(|p| p != path.as_str());

			let mut op = self
				.kv
				.atomic()
				.check(schema::document_metadata(path), Some(entry.versionstamp))
				.check(by_user_key.clone(), owned_stamp)
				.delete(schema::document_metadata(path))
				.delete(schema::document_permissions(path))
				.delete(schema::document_state(path))
				.delete(schema::document_children(path))
				.set(by_user_key.clone(), text_list(&owned));
			if update_parent {
				let (mut siblings, siblings_stamp) = self.read_list(&children_key).await?;
				siblings.retain(|name| name != path.name());
				op = op
					.check(children_key.clone(), siblings_stamp)
					.set(children_key.clone(), text_list(&siblings));
			}
			if op.commit().await?.is_ok() {
				debug!(path = %path, "document deleted");
				return Ok(());
			}
		}
		Err(Error::backend(format!("delete contention on {path}")))
	}

	pub async fn children(&self, path: &DocPath) -> Result<Vec<String>> {
		Ok(self.read_list(&schema::document_children(path)).await?.0)
	}

	pub async fn list_owned(&self, owner: Uuid) -> Result<Vec<DocPath>> {
		let (paths, _) = self.read_list(&schema::documents_by_user(owner)).await?;
		paths.iter().map(|raw| DocPath::parse(raw)).collect()
	}

	/// Atomic metadata + permissions rewrite. The previous owner keeps
	/// editor access; the new owner leaves whatever role list they were in.
	#[instrument(name = "document::transfer_ownership", level = "debug", skip(self))]
	pub async fn transfer_ownership(&self, path: &DocPath, new_owner: Uuid) -> Result<()> {
		for _ in 0..COMMIT_ATTEMPTS {
			let meta_entry = self
				.kv
				.get(&schema::document_metadata(path))
				.await?
				.ok_or_else(|| Error::NotFound(format!("document {path}")))?;
			let mut metadata: DocumentMetadata = decode_record(&meta_entry.value)?;
			let perm_entry = self
				.kv
				.get(&schema::document_permissions(path))
				.await?
				.ok_or_else(|| Error::NotFound(format!("permissions for {path}")))?;
			let mut permissions: DocumentPermissions = decode_record(&perm_entry.value)?;

			let previous = metadata.owner_id;
			if previous == new_owner {
				return Ok(());
			}
			metadata.owner_id = new_owner;
			metadata.updated_at = now_millis();
			permissions.owner = new_owner;
			permissions.remove_everywhere(new_owner);
			permissions.remove_everywhere(previous);
			permissions.editors.push(previous);

			let (mut prev_owned, prev_stamp) =
				self.read_list(&schema::documents_by_user(previous)).await?;
			prev_owned.retain(|p| p != path.as_str());
			let (mut next_owned, next_stamp) =
				self.read_list(&schema::documents_by_user(new_owner)).await?;
			if !next_owned.contains(&path.as_str().to_string()) {
				next_owned.push(path.as_str().to_string());
			}

			let commit = self
				.kv
				.atomic()
				.check(schema::document_metadata(path), Some(meta_entry.versionstamp))
				.check(schema::document_permissions(path), Some(perm_entry.versionstamp))
				.check(schema::documents_by_user(previous), prev_stamp)
				.check(schema::documents_by_user(new_owner), next_stamp)
				.set(schema::document_metadata(path), encode_record(&metadata)?)
				.set(schema::document_permissions(path), encode_record(&permissions)?)
				.set(schema::documents_by_user(previous), text_list(&prev_owned))
				.set(schema::documents_by_user(new_owner), text_list(&next_owned))
				.commit()
				.await?;
			if commit.is_ok() {
				info!(path = %path, from = %previous, to = %new_owner, "ownership transferred");
				return Ok(());
			}
		}
		Err(Error::backend(format!("ownership transfer contention on {path}")))
	}

	async fn read_list(&self, key: &Key) -> Result<(Vec<String>, Option<Versionstamp>)> {
		match self.kv.get(key).await? {
			None => Ok((Vec::new(), None)),
			Some(entry) => {
				let items = entry
					.value
					.as_list()
					.ok_or_else(|| Error::backend(format!("list entry expected at {key}")))?
					.iter()
					.map(|item| {
						item.as_text().map(str::to_string).ok_or_else(|| {
							Error::backend(format!("non-text list item at {key}"))
						})
					})
					.collect::<Result<Vec<_>>>()?;
				Ok((items, Some(entry.versionstamp)))
			}
		}
	}
}

fn text_list(items: &[String]) -> Value {
	Value::List(items.iter().map(|item| Value::text(item.clone())).collect())
}
