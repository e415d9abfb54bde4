// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! The embedded backend: an ordered map keyed by keycode bytes, guarded by a
//! read-write lock, with a native monotonic versionstamp counter. Optionally
//! durable through the append-only log in [`log`].

mod log;

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use quill_core::{Commit, Entry, Key, KeySelector, ListOptions, ListPage, Versionstamp, keycode};
use quill_type::time::{UnixMillis, now_millis};
use quill_type::{Error, Result, Value};

use crate::atomic::{Check, Mutation};
use crate::cursor;
use log::{LogFile, LogOp, LogRecord};

#[derive(Debug, Clone)]
struct Stored {
	key: Key,
	value: Value,
	seq: u64,
	expires_at: Option<UnixMillis>,
}

impl Stored {
	fn is_expired(&self, now: UnixMillis) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}

	fn entry(&self) -> Entry {
		Entry {
			key: self.key.clone(),
			value: self.value.clone(),
			versionstamp: Versionstamp::from_sequence(self.seq),
		}
	}
}

#[derive(Default)]
struct State {
	entries: BTreeMap<Vec<u8>, Stored>,
	next_seq: u64,
}

struct Inner {
	state: RwLock<State>,
	/// Present when opened against a path; appended under the state write
	/// lock so the log order matches commit order.
	log: Option<Mutex<LogFile>>,
}

#[derive(Clone)]
pub struct MemoryKv {
	inner: Arc<Inner>,
}

impl MemoryKv {
	pub fn new() -> MemoryKv {
		MemoryKv {
			inner: Arc::new(Inner { state: RwLock::new(State::default()), log: None }),
		}
	}

	pub fn open(path: &Path) -> Result<MemoryKv> {
		let (records, log) = log::open(path)?;
		let mut state = State::default();
		for record in records {
			state.next_seq = state.next_seq.max(record.seq + 1);
			for op in record.ops {
				match op {
					LogOp::Set { key, value, expires_at } => {
						let encoded = keycode::encode(&key);
						state.entries.insert(
							encoded,
							Stored { key, value, seq: record.seq, expires_at },
						);
					}
					LogOp::Delete { key } => {
						state.entries.remove(&keycode::encode(&key));
					}
				}
			}
		}
		tracing::debug!(
			path = %path.display(),
			entries = state.entries.len(),
			next_seq = state.next_seq,
			"embedded store opened"
		);
		Ok(MemoryKv {
			inner: Arc::new(Inner { state: RwLock::new(state), log: Some(Mutex::new(log)) }),
		})
	}

	pub fn get(&self, key: &Key) -> Result<Option<Entry>> {
		let state = self.inner.state.read();
		let now = now_millis();
		Ok(state
			.entries
			.get(&keycode::encode(key))
			.filter(|stored| !stored.is_expired(now))
			.map(Stored::entry))
	}

	pub fn commit(&self, checks: &[Check], mutations: &[Mutation]) -> Result<Commit> {
		let mut state = self.inner.state.write();
		let now = now_millis();

		for check in checks {
			let current = state
				.entries
				.get(&keycode::encode(&check.key))
				.filter(|stored| !stored.is_expired(now))
				.map(|stored| Versionstamp::from_sequence(stored.seq));
			if current != check.versionstamp {
				return Ok(Commit::Conflict);
			}
		}

		let seq = state.next_seq;

		// Resolve mutations into plain effects before touching anything, so
		// a failure (sum over a non-integer, log write error) leaves no
		// partial state. An overlay lets later mutations in the same op
		// observe earlier ones.
		let mut effects: Vec<LogOp> = Vec::with_capacity(mutations.len());
		let mut overlay: BTreeMap<Vec<u8>, Option<(Value, Option<UnixMillis>)>> = BTreeMap::new();
		for mutation in mutations {
			let encoded = keycode::encode(mutation.key());
			match mutation {
				Mutation::Set { key, value, expire_in } => {
					let expires_at = expire_in.map(|ttl| now + ttl.as_millis() as u64);
					overlay.insert(encoded, Some((value.clone(), expires_at)));
					effects.push(LogOp::Set { key: key.clone(), value: value.clone(), expires_at });
				}
				Mutation::Delete { key } => {
					overlay.insert(encoded, None);
					effects.push(LogOp::Delete { key: key.clone() });
				}
				Mutation::Sum { key, delta } => {
					let current = match overlay.get(&encoded) {
						Some(pending) => pending.as_ref().map(|(value, _)| value.clone()),
						None => state
							.entries
							.get(&encoded)
							.filter(|stored| !stored.is_expired(now))
							.map(|stored| stored.value.clone()),
					};
					let base = match current {
						None => 0,
						Some(Value::Int(v)) => v,
						Some(other) => {
							return Err(Error::backend(format!(
								"sum over non-integer value at {key}: {other:?}"
							)));
						}
					};
					let value = Value::Int(base.wrapping_add(*delta));
					overlay.insert(encoded, Some((value.clone(), None)));
					effects.push(LogOp::Set { key: key.clone(), value, expires_at: None });
				}
			}
		}

		if let Some(log) = &self.inner.log {
			log.lock().append(&LogRecord {
				seq,
				ops: effects.iter().map(clone_op).collect(),
			})?;
		}

		for op in effects {
			match op {
				LogOp::Set { key, value, expires_at } => {
					let encoded = keycode::encode(&key);
					state.entries.insert(encoded, Stored { key, value, seq, expires_at });
				}
				LogOp::Delete { key } => {
					state.entries.remove(&keycode::encode(&key));
				}
			}
		}
		state.next_seq = seq + 1;

		Ok(Commit::Ok { versionstamp: Versionstamp::from_sequence(seq) })
	}

	pub fn list(&self, selector: &KeySelector, opts: &ListOptions) -> Result<ListPage> {
		let (start, end) = byte_bounds(selector);
		let cursor_bytes = opts.cursor.as_deref().map(cursor::decode).transpose()?;
		let limit = opts.effective_limit();
		let now = now_millis();

		let (lower, upper): (Bound<Vec<u8>>, Bound<Vec<u8>>) = if opts.reverse {
			let upper = match &cursor_bytes {
				Some(c) if end.as_ref().is_none_or(|e| c < e) => Bound::Excluded(c.clone()),
				_ => end.map(Bound::Excluded).unwrap_or(Bound::Unbounded),
			};
			(Bound::Included(start), upper)
		} else {
			let lower = match &cursor_bytes {
				Some(c) if *c >= start => Bound::Excluded(c.clone()),
				_ => Bound::Included(start),
			};
			(lower, end.map(Bound::Excluded).unwrap_or(Bound::Unbounded))
		};
		if range_is_empty(&lower, &upper) {
			return Ok(ListPage { entries: Vec::new(), cursor: None });
		}

		let state = self.inner.state.read();
		let range = state.entries.range::<Vec<u8>, _>((lower, upper));
		let live = |stored: &&Stored| !stored.is_expired(now);
		let entries: Vec<Entry> = if opts.reverse {
			range.rev().map(|(_, s)| s).filter(live).take(limit).map(Stored::entry).collect()
		} else {
			range.map(|(_, s)| s).filter(live).take(limit).map(Stored::entry).collect()
		};

		let cursor = (entries.len() == limit)
			.then(|| cursor::encode(&entries.last().expect("non-empty batch").key));
		Ok(ListPage { entries, cursor })
	}
}

impl Default for MemoryKv {
	fn default() -> Self {
		MemoryKv::new()
	}
}

fn clone_op(op: &LogOp) -> LogOp {
	match op {
		LogOp::Set { key, value, expires_at } => {
			LogOp::Set { key: key.clone(), value: value.clone(), expires_at: *expires_at }
		}
		LogOp::Delete { key } => LogOp::Delete { key: key.clone() },
	}
}

fn byte_bounds(selector: &KeySelector) -> (Vec<u8>, Option<Vec<u8>>) {
	match selector {
		KeySelector::Prefix(prefix) => keycode::prefix_range(&keycode::encode(prefix)),
		KeySelector::Range { start, end } => {
			(keycode::encode(start), Some(keycode::encode(end)))
		}
	}
}

/// `BTreeMap::range` panics on inverted bounds; detect them up front.
fn range_is_empty(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
	let low = match lower {
		Bound::Included(v) | Bound::Excluded(v) => v,
		Bound::Unbounded => return false,
	};
	match upper {
		Bound::Unbounded => false,
		Bound::Included(high) => low > high,
		Bound::Excluded(high) => match (lower, low.cmp(high)) {
			(_, std::cmp::Ordering::Greater) => true,
			(Bound::Excluded(_), std::cmp::Ordering::Equal) => true,
			(Bound::Included(_), std::cmp::Ordering::Equal) => true,
			_ => false,
		},
	}
}
