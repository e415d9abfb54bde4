// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// An opaque commit identifier whose lexicographic order matches commit
/// order within a backend lifetime.
///
/// Both backends derive it from a monotonic u64 transaction id rendered as a
/// fixed-width decimal string, so string comparison and numeric comparison
/// agree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Versionstamp(String);

impl Versionstamp {
	pub const WIDTH: usize = 20;

	pub fn from_sequence(seq: u64) -> Self {
		Versionstamp(format!("{seq:020}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for Versionstamp {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
