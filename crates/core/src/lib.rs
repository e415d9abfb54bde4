// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Core vocabulary of the server: composite keys with an order-preserving
//! byte encoding, versionstamps, KV entries and selectors, the canonical key
//! schema, the document/user/session model, path handling and configuration.
//!
//! Nothing here talks to storage; the backends live in `quill-store`.

pub mod config;
pub mod entry;
pub mod key;
pub mod keycode;
pub mod model;
pub mod path;
pub mod record;
pub mod schema;
pub mod version;

pub use entry::{Commit, Consistency, Entry, KeySelector, ListOptions, ListPage, SetOptions};
pub use key::{Key, KeyPart};
pub use model::{
	DocumentMetadata, DocumentPermissions, PermissionLevel, Session, User, UserSettings,
};
pub use path::DocPath;
pub use version::Versionstamp;
