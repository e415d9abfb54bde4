// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Shared primitives for the Quill workspace: the kinded error taxonomy,
//! the structured value representation stored in the KV layer, and time
//! helpers. Every other crate builds on these types.

pub mod error;
pub mod time;
pub mod value;

pub use error::{Error, ErrorBody, Result};
pub use value::Value;
