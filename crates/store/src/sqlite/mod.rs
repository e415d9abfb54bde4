// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! The relational backend: one `kv` table whose `key_path` column holds the
//! composite key as structured JSON, compared and ordered through a custom
//! collation that decodes both sides and applies the structural key order.
//! Atomic operations map to sqlite transactions; the monotonic commit
//! counter lives in `kv_meta` and becomes the versionstamp.
//!
//! Calls run the (short) sqlite statements directly under a connection
//! mutex, the same way the embedded backend holds its map lock.

mod keyjson;
mod migration;

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde_json::Value as Json;

use quill_core::{Commit, Entry, Key, KeyPart, KeySelector, ListOptions, ListPage, Versionstamp};
use quill_type::time::now_millis;
use quill_type::{Error, Result, Value};

use crate::atomic::{Check, Mutation};
use crate::cursor;

/// Column layout of a live table whose migration failed; queries are built
/// against what actually exists.
#[derive(Debug, Clone)]
struct LegacyColumns {
	has_versionstamp: bool,
	has_expires_at: bool,
}

#[derive(Clone)]
pub struct SqliteKv {
	conn: Arc<Mutex<Connection>>,
	legacy: Option<LegacyColumns>,
}

impl SqliteKv {
	pub fn open(path: &Path) -> Result<SqliteKv> {
		let conn = Connection::open(path).map_err(Error::backend)?;
		// journal_mode returns the resulting mode as a row.
		let _mode: String = conn
			.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
			.map_err(Error::backend)?;
		SqliteKv::from_connection(conn)
	}

	pub fn open_in_memory() -> Result<SqliteKv> {
		SqliteKv::from_connection(Connection::open_in_memory().map_err(Error::backend)?)
	}

	fn from_connection(mut conn: Connection) -> Result<SqliteKv> {
		conn.create_collation("structural_key", collate_structural).map_err(Error::backend)?;
		let fallback = migration::run(&mut conn)?;
		let legacy = if fallback {
			let columns = table_columns(&conn, "kv")?;
			Some(LegacyColumns {
				has_versionstamp: columns.iter().any(|c| c == "versionstamp"),
				has_expires_at: columns.iter().any(|c| c == "expires_at"),
			})
		} else {
			None
		};
		Ok(SqliteKv { conn: Arc::new(Mutex::new(conn)), legacy })
	}

	pub fn get(&self, key: &Key) -> Result<Option<Entry>> {
		let conn = self.conn.lock();
		let now = now_millis() as i64;

		if let Some(columns) = &self.legacy {
			return self.get_degraded(&conn, key, now, columns);
		}

		let mut stmt = conn
			.prepare_cached(
				"SELECT value, versionstamp FROM kv
				 WHERE key_path = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
			)
			.map_err(Error::backend)?;
		let row = stmt
			.query_row(params![keyjson::key_path(key), now], |r| {
				Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
			})
			.optional()
			.map_err(Error::backend)?;
		match row {
			Some((value, versionstamp)) => Ok(Some(Entry {
				key: key.clone(),
				value: parse_value(&value)?,
				versionstamp: Versionstamp::from_sequence(versionstamp as u64),
			})),
			None => Ok(None),
		}
	}

	/// Single-key read against a table whose migration failed: probe the
	/// structured form first, then the legacy comma-joined and JSON-escaped
	/// scalar forms.
	fn get_degraded(
		&self,
		conn: &Connection,
		key: &Key,
		now: i64,
		columns: &LegacyColumns,
	) -> Result<Option<Entry>> {
		let select = format!(
			"SELECT value, {} FROM kv WHERE key_path = ?1{}",
			if columns.has_versionstamp { "versionstamp" } else { "0" },
			if columns.has_expires_at { " AND (expires_at IS NULL OR expires_at > ?2)" } else { "" },
		);
		let mut stmt = conn.prepare_cached(&select).map_err(Error::backend)?;

		let mut candidates = vec![keyjson::key_path(key)];
		candidates.extend(legacy_candidates(key));
		for candidate in candidates {
			let row = if columns.has_expires_at {
				stmt.query_row(params![candidate, now], |r| {
					Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
				})
			} else {
				stmt.query_row(params![candidate], |r| {
					Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
				})
			}
			.optional()
			.map_err(Error::backend)?;
			if let Some((value, versionstamp)) = row {
				return Ok(Some(Entry {
					key: key.clone(),
					value: parse_value_lenient(&value),
					versionstamp: Versionstamp::from_sequence(versionstamp as u64),
				}));
			}
		}
		Ok(None)
	}

	pub fn commit(&self, checks: &[Check], mutations: &[Mutation]) -> Result<Commit> {
		let mut conn = self.conn.lock();
		let now = now_millis();
		let tx = conn
			.transaction_with_behavior(TransactionBehavior::Immediate)
			.map_err(Error::backend)?;

		for check in checks {
			let current: Option<i64> = tx
				.query_row(
					"SELECT versionstamp FROM kv
					 WHERE key_path = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
					params![keyjson::key_path(&check.key), now as i64],
					|r| r.get(0),
				)
				.optional()
				.map_err(Error::backend)?;
			let current = current.map(|v| Versionstamp::from_sequence(v as u64));
			if current != check.versionstamp {
				// Dropping the transaction rolls it back.
				return Ok(Commit::Conflict);
			}
		}

		let seq = next_commit_seq(&tx)?;
		for mutation in mutations {
			match mutation {
				Mutation::Set { key, value, expire_in } => {
					let expires_at = expire_in.map(|ttl| (now + ttl.as_millis() as u64) as i64);
					upsert(&tx, key, value, seq, expires_at)?;
				}
				Mutation::Delete { key } => {
					tx.execute(
						"DELETE FROM kv WHERE key_path = ?1",
						params![keyjson::key_path(key)],
					)
					.map_err(Error::backend)?;
				}
				Mutation::Sum { key, delta } => {
					// Within the transaction, reads observe earlier
					// mutations of the same op.
					let current: Option<String> = tx
						.query_row(
							"SELECT value FROM kv
							 WHERE key_path = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
							params![keyjson::key_path(key), now as i64],
							|r| r.get(0),
						)
						.optional()
						.map_err(Error::backend)?;
					let base = match current.map(|raw| parse_value(&raw)).transpose()? {
						None => 0,
						Some(Value::Int(v)) => v,
						Some(other) => {
							return Err(Error::backend(format!(
								"sum over non-integer value at {key}: {other:?}"
							)));
						}
					};
					upsert(&tx, key, &Value::Int(base.wrapping_add(*delta)), seq, None)?;
				}
			}
		}

		tx.commit().map_err(Error::backend)?;
		Ok(Commit::Ok { versionstamp: Versionstamp::from_sequence(seq) })
	}

	pub fn list(&self, selector: &KeySelector, opts: &ListOptions) -> Result<ListPage> {
		let limit = opts.effective_limit();
		let now = now_millis() as i64;
		let cursor_key = opts.cursor.as_deref().map(cursor::decode_key).transpose()?;

		let (start, end) = match selector {
			KeySelector::Prefix(prefix) => (prefix.clone(), keyjson::prefix_upper_bound(prefix)),
			KeySelector::Range { start, end } => (start.clone(), Some(end.clone())),
		};

		let mut sql = String::from(
			"SELECT key_path, value, versionstamp FROM kv
			 WHERE (expires_at IS NULL OR expires_at > ?)",
		);
		let mut bind: Vec<SqlValue> = vec![SqlValue::Integer(now)];
		if opts.reverse {
			sql.push_str(" AND key_path >= ?");
			bind.push(SqlValue::Text(keyjson::key_path(&start)));
			match (&cursor_key, &end) {
				(Some(c), e) if e.as_ref().is_none_or(|end| c < end) => {
					sql.push_str(" AND key_path < ?");
					bind.push(SqlValue::Text(keyjson::key_path(c)));
				}
				(_, Some(end)) => {
					sql.push_str(" AND key_path < ?");
					bind.push(SqlValue::Text(keyjson::key_path(end)));
				}
				(_, None) => {}
			}
		} else {
			match &cursor_key {
				Some(c) if *c >= start => {
					sql.push_str(" AND key_path > ?");
					bind.push(SqlValue::Text(keyjson::key_path(c)));
				}
				_ => {
					sql.push_str(" AND key_path >= ?");
					bind.push(SqlValue::Text(keyjson::key_path(&start)));
				}
			}
			if let Some(end) = &end {
				sql.push_str(" AND key_path < ?");
				bind.push(SqlValue::Text(keyjson::key_path(end)));
			}
		}
		sql.push_str(if opts.reverse {
			" ORDER BY key_path DESC LIMIT ?"
		} else {
			" ORDER BY key_path ASC LIMIT ?"
		});
		bind.push(SqlValue::Integer(limit as i64));

		let conn = self.conn.lock();
		let mut stmt = conn.prepare(&sql).map_err(Error::backend)?;
		let mut rows = stmt.query(params_from_iter(bind)).map_err(Error::backend)?;
		let mut entries = Vec::new();
		while let Some(row) = rows.next().map_err(Error::backend)? {
			let key_path: String = row.get(0).map_err(Error::backend)?;
			let key = match keyjson::parse_key_path(&key_path) {
				Ok(key) => key,
				Err(_) => {
					// Un-migrated legacy row; lists serve structured rows only.
					tracing::debug!(key_path = %key_path, "skipping legacy row during list");
					continue;
				}
			};
			let value: String = row.get(1).map_err(Error::backend)?;
			let versionstamp: i64 = row.get(2).map_err(Error::backend)?;
			entries.push(Entry {
				key,
				value: parse_value(&value)?,
				versionstamp: Versionstamp::from_sequence(versionstamp as u64),
			});
		}

		let cursor = (entries.len() == limit)
			.then(|| cursor::encode(&entries.last().expect("non-empty batch").key));
		Ok(ListPage { entries, cursor })
	}
}

fn upsert(
	tx: &rusqlite::Transaction<'_>,
	key: &Key,
	value: &Value,
	seq: u64,
	expires_at: Option<i64>,
) -> Result<()> {
	tx.execute(
		"INSERT INTO kv (key_path, value, versionstamp, expires_at)
		 VALUES (?1, ?2, ?3, ?4)
		 ON CONFLICT (key_path) DO UPDATE SET
			value = excluded.value,
			versionstamp = excluded.versionstamp,
			expires_at = excluded.expires_at",
		params![keyjson::key_path(key), value.to_json().to_string(), seq as i64, expires_at],
	)
	.map_err(Error::backend)?;
	Ok(())
}

fn next_commit_seq(tx: &rusqlite::Transaction<'_>) -> Result<u64> {
	let current: String = tx
		.query_row("SELECT value FROM kv_meta WHERE name = 'commit_seq'", [], |r| r.get(0))
		.map_err(Error::backend)?;
	let seq = current.parse::<u64>().unwrap_or(0) + 1;
	tx.execute("UPDATE kv_meta SET value = ?1 WHERE name = 'commit_seq'", params![seq.to_string()])
		.map_err(Error::backend)?;
	Ok(seq)
}

fn parse_value(raw: &str) -> Result<Value> {
	let json: Json = serde_json::from_str(raw)
		.map_err(|err| Error::backend(format!("corrupt value column: {err}")))?;
	Ok(Value::from_json(json))
}

/// Legacy rows may hold plain text where JSON is expected.
fn parse_value_lenient(raw: &str) -> Value {
	match serde_json::from_str::<Json>(raw) {
		Ok(json) => Value::from_json(json),
		Err(_) => Value::Text(raw.to_string()),
	}
}

/// Structural comparison for the `key_path` column. Rows that do not parse
/// as structured keys (pre-migration data) fall back to byte order, which
/// keeps the comparison total.
fn collate_structural(a: &str, b: &str) -> Ordering {
	match (keyjson::parse_key_path(a), keyjson::parse_key_path(b)) {
		(Ok(left), Ok(right)) => left.cmp(&right),
		_ => a.cmp(b),
	}
}

/// The comma-joined and JSON-escaped scalar forms of an all-text key; other
/// part types never occurred before migration.
fn legacy_candidates(key: &Key) -> Vec<String> {
	let mut texts = Vec::with_capacity(key.len());
	for part in key.parts() {
		match part {
			KeyPart::Text(v) => texts.push(v.as_str()),
			_ => return Vec::new(),
		}
	}
	let joined = texts.join(",");
	let escaped = Json::String(joined.clone()).to_string();
	vec![joined, escaped]
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
	let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})")).map_err(Error::backend)?;
	let columns = stmt
		.query_map([], |row| row.get::<_, String>(1))
		.map_err(Error::backend)?
		.collect::<rusqlite::Result<Vec<_>>>()
		.map_err(Error::backend)?;
	Ok(columns)
}
