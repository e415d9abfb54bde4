// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Fixtures shared by the crate-level integration tests: a fully wired
//! in-memory service stack plus seeding helpers. Production code never
//! depends on this crate.

use std::time::Duration;

use quill_auth::{AuthService, ClientInfo, RegisterRequest, SessionStore};
use quill_core::DocPath;
use quill_core::config::{DocumentsSection, FeaturesSection};
use quill_document::DocumentService;
use quill_permission::PermissionService;
use quill_store::KvStore;
use uuid::Uuid;

/// Every service wired over one shared in-memory store, the way the server
/// binary wires them over a persistent one.
pub struct TestStack {
	pub kv: KvStore,
	pub auth: AuthService,
	pub docs: DocumentService,
	pub perms: PermissionService,
}

impl TestStack {
	pub fn new() -> TestStack {
		TestStack::with_config(DocumentsSection::default(), FeaturesSection::default())
	}

	pub fn with_config(documents: DocumentsSection, features: FeaturesSection) -> TestStack {
		let kv = KvStore::in_memory();
		let sessions = SessionStore::new(kv.clone(), Duration::from_secs(3600));
		TestStack {
			auth: AuthService::new(kv.clone(), sessions),
			docs: DocumentService::new(kv.clone(), documents.clone()),
			perms: PermissionService::new(kv.clone(), documents, features),
			kv,
		}
	}

	/// Register a user with a valid password; returns the id and a live
	/// session token.
	pub async fn register(&self, username: &str) -> (Uuid, String) {
		let (user, session) = self
			.auth
			.register(
				RegisterRequest {
					username: username.to_string(),
					email: None,
					password: "test123abc".to_string(),
					display_name: None,
				},
				ClientInfo::default(),
			)
			.await
			.expect("fixture registration");
		(user.id, session.id)
	}

	/// Create a document owned by `owner`; parents must already exist.
	pub async fn seed_document(&self, path: &str, owner: Uuid) -> DocPath {
		let path = DocPath::parse(path).expect("fixture path");
		self.docs.create(&path, owner, Default::default()).await.expect("fixture document");
		path
	}
}

impl Default for TestStack {
	fn default() -> Self {
		TestStack::new()
	}
}

/// A temp directory that lives as long as the returned guard.
pub fn temp_dir() -> tempfile::TempDir {
	tempfile::tempdir().expect("temp dir")
}
