// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! The transactional ordered key-value store.
//!
//! Two backends satisfy the same contract and are selected at startup:
//!
//! - [`MemoryKv`]: an embedded ordered map with an optional append-only log
//!   for durability.
//! - [`SqliteKv`]: a single relational table storing composite keys as
//!   structured JSON, with legacy-format detection and migration.
//!
//! [`KvStore`] is the process-wide handle services hold; it is cheap to
//! clone. All operations are async, fail only with the `Backend` error kind,
//! and never retry internally. Optimistic concurrency goes through
//! [`AtomicOp`]: versionstamp checks either all pass and the mutations
//! commit under one monotonic versionstamp, or the commit returns a clean
//! conflict with no side effects.

pub mod atomic;
pub mod cursor;
pub mod memory;
pub mod sqlite;

use futures_util::Stream;
use futures_util::stream::{self, TryStreamExt};
use quill_core::{Entry, Key, KeySelector, ListOptions, ListPage, SetOptions};
use quill_type::{Result, Value};

pub use atomic::AtomicOp;
pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

/// The pluggable backend: a small fixed set of variants rather than an open
/// trait object.
#[derive(Clone)]
pub enum KvStore {
	Memory(MemoryKv),
	Sqlite(SqliteKv),
}

impl KvStore {
	/// Embedded backend without durability; state lives and dies with the
	/// process.
	pub fn in_memory() -> KvStore {
		KvStore::Memory(MemoryKv::new())
	}

	/// Embedded backend replaying and appending an operation log at `path`.
	pub fn open_embedded(path: &std::path::Path) -> Result<KvStore> {
		Ok(KvStore::Memory(MemoryKv::open(path)?))
	}

	/// Relational backend; runs legacy-format migration on first open.
	pub fn open_sqlite(path: &std::path::Path) -> Result<KvStore> {
		Ok(KvStore::Sqlite(SqliteKv::open(path)?))
	}

	/// Current entry for `key`, expired entries filtered.
	pub async fn get(&self, key: &Key) -> Result<Option<Entry>> {
		match self {
			KvStore::Memory(kv) => kv.get(key),
			KvStore::Sqlite(kv) => kv.get(key),
		}
	}

	/// Point reads for several keys, preserving input order.
	pub async fn get_many(&self, keys: &[Key]) -> Result<Vec<Option<Entry>>> {
		match self {
			KvStore::Memory(kv) => keys.iter().map(|k| kv.get(k)).collect(),
			KvStore::Sqlite(kv) => keys.iter().map(|k| kv.get(k)).collect(),
		}
	}

	/// Unconditional upsert.
	pub async fn set(
		&self,
		key: &Key,
		value: Value,
		options: SetOptions,
	) -> Result<quill_core::Commit> {
		self.atomic().set_with(key.clone(), value, options).commit().await
	}

	/// Idempotent point delete.
	pub async fn delete(&self, key: &Key) -> Result<()> {
		self.atomic().delete(key.clone()).commit().await?;
		Ok(())
	}

	/// One batch of entries in structural key order plus a resumption
	/// cursor. `opts.consistency` is accepted for both backends; absent
	/// read replicas, eventual reads are served as strong.
	pub async fn list(&self, selector: &KeySelector, opts: ListOptions) -> Result<ListPage> {
		match self {
			KvStore::Memory(kv) => kv.list(selector, &opts),
			KvStore::Sqlite(kv) => kv.list(selector, &opts),
		}
	}

	/// Begin accumulating an atomic operation.
	pub fn atomic(&self) -> AtomicOp<'_> {
		AtomicOp::new(self)
	}

	/// Auto-paginating stream over [`KvStore::list`] batches. Each pull of
	/// a new batch re-enters the store, so long iterations observe writes
	/// committed after the iteration started, batch by batch.
	pub fn entries<'a>(
		&'a self,
		selector: KeySelector,
		opts: ListOptions,
	) -> impl Stream<Item = Result<Entry>> + 'a {
		stream::try_unfold(Some(opts), move |state| {
			let selector = selector.clone();
			async move {
				let Some(opts) = state else {
					return Ok::<_, quill_type::Error>(None);
				};
				let page = self.list(&selector, opts.clone()).await?;
				let next = page.cursor.map(|cursor| {
					let mut opts = opts;
					opts.cursor = Some(cursor);
					opts
				});
				Ok(Some((stream::iter(page.entries.into_iter().map(Ok)), next)))
			}
		})
		.try_flatten()
	}
}
