// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::fmt::{self, Display, Formatter};

use quill_type::{Error, Result};
use serde::{Deserialize, Serialize};

/// A canonical document path: leading `/`, single internal separators, no
/// trailing separator. Construction is the only way to obtain one, so every
/// `DocPath` in the system is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
	pub fn parse(input: &str) -> Result<DocPath> {
		if input.trim().is_empty() {
			return Err(Error::InvalidPath("empty path".into()));
		}
		let mut segments = Vec::new();
		for segment in input.split('/') {
			if segment.is_empty() {
				continue;
			}
			if segment == "." || segment == ".." {
				return Err(Error::InvalidPath(format!("relative segment in {input:?}")));
			}
			if segment.contains(char::is_control) {
				return Err(Error::InvalidPath(format!("control character in {input:?}")));
			}
			segments.push(segment);
		}
		if segments.is_empty() {
			return Err(Error::InvalidPath(format!("no segments in {input:?}")));
		}
		Ok(DocPath(format!("/{}", segments.join("/"))))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn segments(&self) -> impl Iterator<Item = &str> {
		self.0[1..].split('/')
	}

	/// The final segment.
	pub fn name(&self) -> &str {
		self.0.rsplit('/').next().expect("canonical paths have segments")
	}

	/// All segments except the last; `None` at the root level.
	pub fn parent(&self) -> Option<DocPath> {
		let idx = self.0.rfind('/').expect("canonical paths contain '/'");
		if idx == 0 {
			return None;
		}
		Some(DocPath(self.0[..idx].to_string()))
	}

	/// Segment count minus one: `/a` is depth 0, `/a/b` depth 1.
	pub fn depth(&self) -> usize {
		self.segments().count() - 1
	}

	pub fn join(&self, child: &str) -> Result<DocPath> {
		DocPath::parse(&format!("{}/{}", self.0, child))
	}
}

impl TryFrom<String> for DocPath {
	type Error = Error;

	fn try_from(value: String) -> Result<DocPath> {
		DocPath::parse(&value)
	}
}

impl From<DocPath> for String {
	fn from(path: DocPath) -> String {
		path.0
	}
}

impl Display for DocPath {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_canonicalization() {
		assert_eq!(DocPath::parse("alice/projects").unwrap().as_str(), "/alice/projects");
		assert_eq!(DocPath::parse("/alice//projects/").unwrap().as_str(), "/alice/projects");
		assert_eq!(DocPath::parse("///a").unwrap().as_str(), "/a");
	}

	#[test]
	fn test_rejects_degenerate_paths() {
		assert!(DocPath::parse("").is_err());
		assert!(DocPath::parse("/").is_err());
		assert!(DocPath::parse("  ").is_err());
		assert!(DocPath::parse("/a/../b").is_err());
		assert!(DocPath::parse("/a/\x00b").is_err());
	}

	#[test]
	fn test_parent_and_depth() {
		let path = DocPath::parse("/alice/projects/report").unwrap();
		assert_eq!(path.depth(), 2);
		assert_eq!(path.name(), "report");
		let parent = path.parent().unwrap();
		assert_eq!(parent.as_str(), "/alice/projects");
		assert_eq!(parent.parent().unwrap().as_str(), "/alice");
		assert_eq!(parent.parent().unwrap().parent(), None);
		assert_eq!(DocPath::parse("/alice").unwrap().depth(), 0);
	}
}
