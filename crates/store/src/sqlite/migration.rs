// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Legacy-format detection and migration for the relational backend.
//!
//! Early deployments stored `key_path` as a comma-joined scalar
//! (`users,by_id,42`) or a JSON-escaped scalar (`"users,by_id,42"`). A
//! backend opening such a table snapshots it, rebuilds the live table with
//! the structured schema, and re-inserts every row with a normalized key and
//! value. The whole rebuild runs in one transaction: a failure rolls back,
//! leaves the live table untouched, and the store falls back to probing
//! legacy key forms on single-key reads.

use rusqlite::{Connection, params};
use serde_json::Value as Json;

use quill_type::{Error, Result};

use super::keyjson;

pub(crate) const SENTINEL_NAME: &str = "schema_format";
pub(crate) const SENTINEL_STRUCTURED: &str = "structured";
const COLLATION_MARKER: &str = "COLLATE structural_key";

pub(crate) const CREATE_META: &str = "
CREATE TABLE IF NOT EXISTS kv_meta (
	name  TEXT PRIMARY KEY,
	value TEXT NOT NULL
) WITHOUT ROWID;
INSERT OR IGNORE INTO kv_meta (name, value) VALUES ('commit_seq', '0');
";

pub(crate) const CREATE_KV: &str = "
CREATE TABLE IF NOT EXISTS kv (
	key_path     TEXT    NOT NULL COLLATE structural_key,
	value        TEXT    NOT NULL,
	versionstamp INTEGER NOT NULL,
	expires_at   INTEGER,
	created_at   INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000),
	updated_at   INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
);
CREATE UNIQUE INDEX IF NOT EXISTS kv_key_path ON kv (key_path);
CREATE INDEX IF NOT EXISTS kv_expires_at ON kv (expires_at) WHERE expires_at IS NOT NULL;
CREATE TRIGGER IF NOT EXISTS kv_touch_updated_at
AFTER UPDATE ON kv FOR EACH ROW
BEGIN
	UPDATE kv SET updated_at = CAST(strftime('%s', 'now') AS INTEGER) * 1000
	WHERE rowid = NEW.rowid;
END;
";

/// Run detection and, if needed, migration. Returns `true` when migration
/// failed and the store should serve legacy lookups as fallbacks.
pub(crate) fn run(conn: &mut Connection) -> Result<bool> {
	conn.execute_batch(CREATE_META).map_err(Error::backend)?;

	if sentinel_present(conn)? {
		conn.execute_batch(CREATE_KV).map_err(Error::backend)?;
		return Ok(false);
	}

	let table_sql: Option<String> = conn
		.query_row("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'kv'", [], |r| {
			r.get(0)
		})
		.map(Some)
		.or_else(|err| match err {
			rusqlite::Error::QueryReturnedNoRows => Ok(None),
			err => Err(Error::backend(err)),
		})?;

	let Some(table_sql) = table_sql else {
		// Fresh database.
		conn.execute_batch(CREATE_KV).map_err(Error::backend)?;
		write_sentinel(conn)?;
		return Ok(false);
	};

	let structured_schema = table_sql.contains(COLLATION_MARKER);
	let legacy_rows = count_legacy_rows(conn)?;
	let total_rows: i64 =
		conn.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0)).map_err(Error::backend)?;

	if legacy_rows == 0 && structured_schema {
		write_sentinel(conn)?;
		return Ok(false);
	}
	if total_rows == 0 {
		// Empty legacy-schema table: nothing to copy, just rebuild.
		conn.execute_batch("DROP TABLE kv").map_err(Error::backend)?;
		conn.execute_batch(CREATE_KV).map_err(Error::backend)?;
		write_sentinel(conn)?;
		return Ok(false);
	}

	tracing::info!(total_rows, legacy_rows, "migrating legacy key-value table");
	match migrate(conn) {
		Ok(migrated) => {
			tracing::info!(migrated, "legacy key-value migration complete");
			Ok(false)
		}
		Err(err) => {
			tracing::error!(error = %err, "legacy key-value migration failed; continuing with legacy lookups");
			Ok(true)
		}
	}
}

fn sentinel_present(conn: &Connection) -> Result<bool> {
	let value: Option<String> = conn
		.query_row("SELECT value FROM kv_meta WHERE name = ?1", params![SENTINEL_NAME], |r| {
			r.get(0)
		})
		.map(Some)
		.or_else(|err| match err {
			rusqlite::Error::QueryReturnedNoRows => Ok(None),
			err => Err(Error::backend(err)),
		})?;
	Ok(value.as_deref() == Some(SENTINEL_STRUCTURED))
}

fn write_sentinel(conn: &Connection) -> Result<()> {
	conn.execute(
		"INSERT OR REPLACE INTO kv_meta (name, value) VALUES (?1, ?2)",
		params![SENTINEL_NAME, SENTINEL_STRUCTURED],
	)
	.map_err(Error::backend)?;
	Ok(())
}

fn count_legacy_rows(conn: &Connection) -> Result<i64> {
	let mut stmt = conn.prepare("SELECT key_path FROM kv").map_err(Error::backend)?;
	let mut rows = stmt.query([]).map_err(Error::backend)?;
	let mut count = 0;
	while let Some(row) = rows.next().map_err(Error::backend)? {
		let key_path: String = row.get(0).map_err(Error::backend)?;
		if keyjson::parse_key_path(&key_path).is_err() {
			count += 1;
		}
	}
	Ok(count)
}

fn migrate(conn: &mut Connection) -> Result<u64> {
	let tx = conn.transaction().map_err(Error::backend)?;

	// Snapshot, then copy into the work table the rebuild reads from.
	tx.execute_batch(
		"DROP TABLE IF EXISTS kv_legacy_backup;
		 CREATE TABLE kv_legacy_backup AS SELECT * FROM kv;
		 DROP TABLE IF EXISTS kv_migrate;
		 CREATE TABLE kv_migrate AS SELECT * FROM kv;
		 DROP TABLE kv;",
	)
	.map_err(Error::backend)?;
	tx.execute_batch(CREATE_KV).map_err(Error::backend)?;

	let columns = super::table_columns(&tx, "kv_migrate")?;
	let has = |name: &str| columns.iter().any(|c| c == name);
	if !has("key_path") || !has("value") {
		return Err(Error::backend("legacy table lacks key_path/value columns"));
	}

	let select = format!(
		"SELECT key_path, value, {}, {} FROM kv_migrate",
		if has("versionstamp") { "versionstamp" } else { "0" },
		if has("expires_at") { "expires_at" } else { "NULL" },
	);

	let mut migrated = 0u64;
	let mut max_versionstamp = 0i64;
	{
		let mut read = tx.prepare(&select).map_err(Error::backend)?;
		let mut write = tx
			.prepare(
				"INSERT OR REPLACE INTO kv (key_path, value, versionstamp, expires_at)
				 VALUES (?1, ?2, ?3, ?4)",
			)
			.map_err(Error::backend)?;
		let mut rows = read.query([]).map_err(Error::backend)?;
		while let Some(row) = rows.next().map_err(Error::backend)? {
			let key_path: String = row.get(0).map_err(Error::backend)?;
			let value: String = row.get(1).map_err(Error::backend)?;
			let versionstamp: i64 = row.get(2).map_err(Error::backend)?;
			let expires_at: Option<i64> = row.get(3).map_err(Error::backend)?;
			write
				.execute(params![
					normalize_key_path(&key_path),
					normalize_value(&value),
					versionstamp,
					expires_at
				])
				.map_err(Error::backend)?;
			migrated += 1;
			max_versionstamp = max_versionstamp.max(versionstamp);
		}
	}

	tx.execute(
		"UPDATE kv_meta SET value = ?1
		 WHERE name = 'commit_seq' AND CAST(value AS INTEGER) < ?2",
		params![max_versionstamp.to_string(), max_versionstamp],
	)
	.map_err(Error::backend)?;
	tx.execute_batch("DROP TABLE kv_migrate").map_err(Error::backend)?;
	write_sentinel(&tx)?;
	tx.commit().map_err(Error::backend)?;
	Ok(migrated)
}

/// Structured keys pass through canonicalized; comma-joined and
/// JSON-escaped scalars split into a list of text parts; bare scalars wrap
/// into a single-element list.
fn normalize_key_path(raw: &str) -> String {
	if let Ok(key) = keyjson::parse_key_path(raw) {
		return keyjson::key_path(&key);
	}
	let scalar = match serde_json::from_str::<Json>(raw) {
		Ok(Json::String(inner)) => inner,
		_ => raw.to_string(),
	};
	let parts: Vec<Json> = scalar.split(',').map(|p| Json::String(p.to_string())).collect();
	Json::Array(parts).to_string()
}

/// Valid structured values are preserved; stray strings are quoted.
fn normalize_value(raw: &str) -> String {
	match serde_json::from_str::<Json>(raw) {
		Ok(_) => raw.to_string(),
		Err(_) => Json::String(raw.to_string()).to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_normalize_key_path_variants() {
		assert_eq!(normalize_key_path("users,by_id,42"), r#"["users","by_id","42"]"#);
		assert_eq!(normalize_key_path("\"users,by_id,42\""), r#"["users","by_id","42"]"#);
		assert_eq!(normalize_key_path("config"), r#"["config"]"#);
		// Already structured: canonicalized, not re-split.
		assert_eq!(normalize_key_path(r#"["a,b", 1]"#), r#"["a,b",1]"#);
	}

	#[test]
	fn test_normalize_value_quotes_stray_strings() {
		assert_eq!(normalize_value("{\"a\":1}"), "{\"a\":1}");
		assert_eq!(normalize_value("plain text"), "\"plain text\"");
		assert_eq!(normalize_value("42"), "42");
	}
}
