// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::time::Duration;

use quill_type::Value;

use crate::key::Key;
use crate::version::Versionstamp;

/// A committed key/value pair as observed by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
	pub key: Key,
	pub value: Value,
	pub versionstamp: Versionstamp,
}

/// Result of a write or atomic commit.
///
/// `Conflict` is the clean outcome of a failed check; backend faults are
/// errors, never `Conflict`.
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
	Ok { versionstamp: Versionstamp },
	Conflict,
}

impl Commit {
	pub fn is_ok(&self) -> bool {
		matches!(self, Commit::Ok { .. })
	}

	pub fn versionstamp(&self) -> Option<&Versionstamp> {
		match self {
			Commit::Ok { versionstamp } => Some(versionstamp),
			Commit::Conflict => None,
		}
	}
}

/// What a `list` call iterates over.
#[derive(Debug, Clone)]
pub enum KeySelector {
	/// Every key with the given structural prefix (the prefix key itself
	/// included when present).
	Prefix(Key),
	/// Half-open structural range `[start, end)`.
	Range { start: Key, end: Key },
}

/// Requested read recency. The embedded backend is always strong; the
/// relational backend accepts `Eventual` and, absent read replicas, serves
/// it identically to `Strong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
	#[default]
	Strong,
	Eventual,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
	/// Per-batch cap; backends default this to [`ListOptions::DEFAULT_LIMIT`].
	pub limit: Option<usize>,
	/// Opaque resumption token: the serialized key of the last yielded
	/// entry. Resuming skips keys `<=` the cursor (`>=` when reversed).
	pub cursor: Option<String>,
	pub reverse: bool,
	pub consistency: Consistency,
}

impl ListOptions {
	pub const DEFAULT_LIMIT: usize = 100;

	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
		self.cursor = Some(cursor.into());
		self
	}

	pub fn reverse(mut self) -> Self {
		self.reverse = true;
		self
	}

	pub fn effective_limit(&self) -> usize {
		match self.limit {
			Some(0) | None => Self::DEFAULT_LIMIT,
			Some(n) => n,
		}
	}
}

/// One batch of a `list` call plus the token to resume after it.
#[derive(Debug, Clone)]
pub struct ListPage {
	pub entries: Vec<Entry>,
	/// Set when the batch was cut by `limit`; absent when exhausted.
	pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
	/// Relative time-to-live; the backend stores the absolute expiry.
	pub expire_in: Option<Duration>,
}

impl SetOptions {
	pub fn expire_in(ttl: Duration) -> Self {
		SetOptions { expire_in: Some(ttl) }
	}
}
