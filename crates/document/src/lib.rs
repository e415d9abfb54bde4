// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Document lifecycle over the canonical key schema.
//!
//! A document is four sibling entries under `["documents", ...]`: metadata,
//! permissions, the opaque CRDT state, and the children list. This crate
//! keeps them consistent: creation and deletion touch all siblings plus the
//! parent's children list and the owner's index in single atomic ops, so
//! observers never see a half-created document.

mod service;

pub use service::{CreateDocument, DocumentPatch, DocumentService};
