// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Hierarchical authorization.
//!
//! A permission request resolves against the document's own record first
//! (owner, then the disjoint role lists), then public access for
//! authenticated callers, then the ancestor chain while `inheritFromParent`
//! allows it, and finally public access for anonymous callers. Ownership
//! never crosses an inheritance hop: it demotes to admin.

mod resolver;
mod service;

pub use resolver::{Action, Actor, Resolved};
pub use service::{PermissionService, PermissionsPatch};
