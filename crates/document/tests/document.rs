// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use quill_core::config::DocumentsSection;
use quill_core::model::PermissionLevel;
use quill_core::record::decode_record;
use quill_core::{DocPath, schema};
use quill_document::{CreateDocument, DocumentPatch, DocumentService};
use quill_store::KvStore;
use quill_type::Error;
use uuid::Uuid;

fn docs() -> (KvStore, DocumentService) {
	let kv = KvStore::in_memory();
	let service = DocumentService::new(kv.clone(), DocumentsSection::default());
	(kv, service)
}

fn path(raw: &str) -> DocPath {
	DocPath::parse(raw).unwrap()
}

#[tokio::test]
async fn test_create_writes_all_siblings_atomically() {
	let (kv, docs) = docs();
	let alice = Uuid::new_v4();
	docs.create(&path("/alice"), alice, CreateDocument::default()).await.unwrap();
	let metadata =
		docs.create(&path("/alice/notes"), alice, CreateDocument::default()).await.unwrap();

	assert_eq!(metadata.name, "notes");
	assert_eq!(metadata.depth, 1);
	assert_eq!(metadata.parent_path, Some(path("/alice")));

	// Permissions exist with the creator as owner.
	let perms = kv.get(&schema::document_permissions(&path("/alice/notes"))).await.unwrap().unwrap();
	let perms: quill_core::DocumentPermissions = decode_record(&perms.value).unwrap();
	assert_eq!(perms.owner, alice);
	assert_eq!(perms.public_access, PermissionLevel::None);
	assert!(perms.inherit_from_parent);

	assert_eq!(docs.children(&path("/alice")).await.unwrap(), vec!["notes"]);
	let owned = docs.list_owned(alice).await.unwrap();
	assert!(owned.contains(&path("/alice/notes")));
}

#[tokio::test]
async fn test_create_requires_existing_parent() {
	let (_, docs) = docs();
	let result = docs.create(&path("/ghost/child"), Uuid::new_v4(), Default::default()).await;
	assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_create_rejects_duplicates_and_depth() {
	let (_, docs) = docs();
	let alice = Uuid::new_v4();
	docs.create(&path("/alice"), alice, Default::default()).await.unwrap();
	let duplicate = docs.create(&path("/alice"), alice, Default::default()).await;
	assert!(matches!(duplicate, Err(Error::DuplicateResource(_))));

	let mut deep = "/r".to_string();
	let service = DocumentService::new(
		KvStore::in_memory(),
		DocumentsSection { max_nesting_depth: 3, ..Default::default() },
	);
	service.create(&path("/r"), alice, Default::default()).await.unwrap();
	for segment in ["a", "b", "c"] {
		deep.push('/');
		deep.push_str(segment);
		service.create(&path(&deep), alice, Default::default()).await.unwrap();
	}
	deep.push_str("/d");
	let too_deep = service.create(&path(&deep), alice, Default::default()).await;
	assert!(matches!(too_deep, Err(Error::MaxDepthExceeded { depth: 4, max: 3 })));
}

#[tokio::test]
async fn test_update_patch_touches_updated_at() {
	let (_, docs) = docs();
	let alice = Uuid::new_v4();
	let created = docs.create(&path("/alice"), alice, Default::default()).await.unwrap();
	let updated = docs
		.update(
			&path("/alice"),
			DocumentPatch {
				title: Some("Workspace".into()),
				tags: Some(vec!["home".into()]),
				..Default::default()
			},
		)
		.await
		.unwrap();
	assert_eq!(updated.title, "Workspace");
	assert_eq!(updated.tags, vec!["home"]);
	assert!(updated.updated_at >= created.updated_at);
	assert_eq!(updated.version, created.version);
}

#[tokio::test]
async fn test_state_round_trip_bumps_version_and_size() {
	let (_, docs) = docs();
	let alice = Uuid::new_v4();
	docs.create(&path("/doc"), alice, Default::default()).await.unwrap();

	assert!(docs.load_state(&path("/doc")).await.unwrap().is_none());
	let state = vec![1u8, 2, 3, 4, 5];
	let metadata = docs.persist_state(&path("/doc"), state.clone()).await.unwrap();
	assert_eq!(metadata.version, 1);
	assert_eq!(metadata.size, 5);
	assert_eq!(docs.load_state(&path("/doc")).await.unwrap().unwrap(), state);

	let metadata = docs.persist_state(&path("/doc"), vec![9u8; 3]).await.unwrap();
	assert_eq!(metadata.version, 2);
	assert_eq!(metadata.size, 3);
}

#[tokio::test]
async fn test_persist_state_honors_size_limit() {
	let alice = Uuid::new_v4();
	let docs = DocumentService::new(
		KvStore::in_memory(),
		DocumentsSection { max_document_size: 16, ..Default::default() },
	);
	docs.create(&path("/doc"), alice, Default::default()).await.unwrap();
	let result = docs.persist_state(&path("/doc"), vec![0u8; 17]).await;
	assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_delete_removes_subtree_and_indices() {
	let (kv, docs) = docs();
	let alice = Uuid::new_v4();
	for p in ["/a", "/a/b", "/a/b/c", "/a/d"] {
		docs.create(&path(p), alice, Default::default()).await.unwrap();
	}
	docs.persist_state(&path("/a/b"), vec![1, 2, 3]).await.unwrap();

	let deleted = docs.delete(&path("/a/b")).await.unwrap();
	assert_eq!(deleted, 2);

	assert!(matches!(docs.get(&path("/a/b")).await, Err(Error::NotFound(_))));
	assert!(matches!(docs.get(&path("/a/b/c")).await, Err(Error::NotFound(_))));
	assert!(docs.get(&path("/a/d")).await.is_ok());
	assert_eq!(docs.children(&path("/a")).await.unwrap(), vec!["d"]);

	// Sibling entries are gone.
	assert!(kv.get(&schema::document_state(&path("/a/b"))).await.unwrap().is_none());
	assert!(kv.get(&schema::document_permissions(&path("/a/b"))).await.unwrap().is_none());

	let owned = docs.list_owned(alice).await.unwrap();
	assert!(!owned.contains(&path("/a/b")) && !owned.contains(&path("/a/b/c")));
	assert!(owned.contains(&path("/a/d")));
}

#[tokio::test]
async fn test_delete_missing_document_is_not_found() {
	let (_, docs) = docs();
	assert!(matches!(docs.delete(&path("/nope")).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_transfer_ownership_rewrites_both_records() {
	let (kv, docs) = docs();
	let alice = Uuid::new_v4();
	let bob = Uuid::new_v4();
	docs.create(&path("/shared"), alice, Default::default()).await.unwrap();

	docs.transfer_ownership(&path("/shared"), bob).await.unwrap();

	let metadata = docs.get(&path("/shared")).await.unwrap();
	assert_eq!(metadata.owner_id, bob);

	let perms = kv.get(&schema::document_permissions(&path("/shared"))).await.unwrap().unwrap();
	let perms: quill_core::DocumentPermissions = decode_record(&perms.value).unwrap();
	assert_eq!(perms.owner, bob);
	assert!(perms.editors.contains(&alice));

	assert!(docs.list_owned(bob).await.unwrap().contains(&path("/shared")));
	assert!(!docs.list_owned(alice).await.unwrap().contains(&path("/shared")));
}
