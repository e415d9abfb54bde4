// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// One part of a composite key.
///
/// Parts order across types first (the declaration order below is the fixed
/// total order) and by value within a type. This matches the byte order
/// produced by [`crate::keycode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPart {
	Bytes(Vec<u8>),
	Text(String),
	Int(i64),
	BigInt(i128),
	Bool(bool),
}

impl KeyPart {
	fn type_rank(&self) -> u8 {
		match self {
			KeyPart::Bytes(_) => 0,
			KeyPart::Text(_) => 1,
			KeyPart::Int(_) => 2,
			KeyPart::BigInt(_) => 3,
			KeyPart::Bool(_) => 4,
		}
	}
}

impl PartialOrd for KeyPart {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for KeyPart {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(KeyPart::Bytes(l), KeyPart::Bytes(r)) => l.cmp(r),
			(KeyPart::Text(l), KeyPart::Text(r)) => l.cmp(r),
			(KeyPart::Int(l), KeyPart::Int(r)) => l.cmp(r),
			(KeyPart::BigInt(l), KeyPart::BigInt(r)) => l.cmp(r),
			(KeyPart::Bool(l), KeyPart::Bool(r)) => l.cmp(r),
			(l, r) => l.type_rank().cmp(&r.type_rank()),
		}
	}
}

impl From<&str> for KeyPart {
	fn from(value: &str) -> Self {
		KeyPart::Text(value.to_string())
	}
}

impl From<String> for KeyPart {
	fn from(value: String) -> Self {
		KeyPart::Text(value)
	}
}

impl From<i64> for KeyPart {
	fn from(value: i64) -> Self {
		KeyPart::Int(value)
	}
}

impl From<i128> for KeyPart {
	fn from(value: i128) -> Self {
		KeyPart::BigInt(value)
	}
}

impl From<bool> for KeyPart {
	fn from(value: bool) -> Self {
		KeyPart::Bool(value)
	}
}

impl From<Vec<u8>> for KeyPart {
	fn from(value: Vec<u8>) -> Self {
		KeyPart::Bytes(value)
	}
}

impl Display for KeyPart {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			KeyPart::Bytes(v) => {
				write!(f, "0x")?;
				for b in v {
					write!(f, "{b:02x}")?;
				}
				Ok(())
			}
			KeyPart::Text(v) => write!(f, "{v:?}"),
			KeyPart::Int(v) => write!(f, "{v}"),
			KeyPart::BigInt(v) => write!(f, "{v}n"),
			KeyPart::Bool(v) => write!(f, "{v}"),
		}
	}
}

/// A composite key: a non-empty ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<KeyPart>);

impl Key {
	pub fn new(parts: Vec<KeyPart>) -> Self {
		debug_assert!(!parts.is_empty(), "composite keys have at least one part");
		Key(parts)
	}

	pub fn parts(&self) -> &[KeyPart] {
		&self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Structural prefix relation: every part of `prefix` equals the
	/// corresponding leading part of `self`. A key is a prefix of itself.
	pub fn has_prefix(&self, prefix: &Key) -> bool {
		self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
	}

	/// Extend with one more part, e.g. a child id under an index prefix.
	pub fn append(&self, part: impl Into<KeyPart>) -> Key {
		let mut parts = self.0.clone();
		parts.push(part.into());
		Key(parts)
	}

	/// The last part, useful for index keys of the form `[prefix..., id]`.
	pub fn last(&self) -> &KeyPart {
		self.0.last().expect("keys are non-empty")
	}
}

impl Display for Key {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "[")?;
		for (i, part) in self.0.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{part}")?;
		}
		write!(f, "]")
	}
}

/// Build a key from heterogeneous parts: `key!["users", "by_id", id]`.
#[macro_export]
macro_rules! key {
	($($part:expr),+ $(,)?) => {
		$crate::key::Key::new(vec![$($crate::key::KeyPart::from($part)),+])
	};
}
