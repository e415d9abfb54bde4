// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::time::Duration;

use quill_core::{Commit, Key, SetOptions, Versionstamp};
use quill_type::{Result, Value};

use crate::KvStore;

/// A versionstamp precondition. `None` asserts the key is absent (or
/// expired, which readers cannot tell apart from absent).
#[derive(Debug, Clone)]
pub struct Check {
	pub key: Key,
	pub versionstamp: Option<Versionstamp>,
}

#[derive(Debug, Clone)]
pub enum Mutation {
	Set { key: Key, value: Value, expire_in: Option<Duration> },
	Delete { key: Key },
	/// Adds `delta` to an integer value, treating an absent entry as 0.
	Sum { key: Key, delta: i64 },
}

impl Mutation {
	pub fn key(&self) -> &Key {
		match self {
			Mutation::Set { key, .. } | Mutation::Delete { key } | Mutation::Sum { key, .. } => key,
		}
	}
}

/// Accumulates checks and mutations; `commit` applies them in one backend
/// transaction. Any failed check turns the whole commit into a clean
/// [`Commit::Conflict`] with no side effects.
#[must_use = "an atomic op does nothing until committed"]
pub struct AtomicOp<'a> {
	store: &'a KvStore,
	checks: Vec<Check>,
	mutations: Vec<Mutation>,
}

impl<'a> AtomicOp<'a> {
	pub(crate) fn new(store: &'a KvStore) -> Self {
		AtomicOp { store, checks: Vec::new(), mutations: Vec::new() }
	}

	pub fn check(mut self, key: Key, versionstamp: Option<Versionstamp>) -> Self {
		self.checks.push(Check { key, versionstamp });
		self
	}

	pub fn set(self, key: Key, value: Value) -> Self {
		self.set_with(key, value, SetOptions::default())
	}

	pub fn set_with(mut self, key: Key, value: Value, options: SetOptions) -> Self {
		self.mutations.push(Mutation::Set { key, value, expire_in: options.expire_in });
		self
	}

	pub fn delete(mut self, key: Key) -> Self {
		self.mutations.push(Mutation::Delete { key });
		self
	}

	pub fn sum(mut self, key: Key, delta: i64) -> Self {
		self.mutations.push(Mutation::Sum { key, delta });
		self
	}

	pub fn is_empty(&self) -> bool {
		self.checks.is_empty() && self.mutations.is_empty()
	}

	pub async fn commit(self) -> Result<Commit> {
		let AtomicOp { store, checks, mutations } = self;
		match store {
			KvStore::Memory(kv) => kv.commit(&checks, &mutations),
			KvStore::Sqlite(kv) => kv.commit(&checks, &mutations),
		}
	}
}
