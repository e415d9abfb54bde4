// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Durability for the embedded backend: an append-only log of committed
//! operations, replayed on open. Frames are length-prefixed postcard; a
//! truncated tail (torn final write) is dropped with a warning rather than
//! failing the open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use quill_core::Key;
use quill_type::time::UnixMillis;
use quill_type::{Error, Result, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum LogOp {
	Set { key: Key, value: Value, expires_at: Option<UnixMillis> },
	Delete { key: Key },
}

/// One committed transaction: its sequence number and resolved effects
/// (`sum` mutations are logged as the integer they produced).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LogRecord {
	pub seq: u64,
	pub ops: Vec<LogOp>,
}

pub(crate) struct LogFile {
	file: File,
}

impl LogFile {
	pub fn append(&mut self, record: &LogRecord) -> Result<()> {
		let bytes = postcard::to_allocvec(record).map_err(Error::backend)?;
		let len = u32::try_from(bytes.len()).map_err(|_| Error::backend("oversized log frame"))?;
		self.file.write_all(&len.to_le_bytes())?;
		self.file.write_all(&bytes)?;
		self.file.flush()?;
		self.file.sync_data()?;
		Ok(())
	}
}

/// Replay an existing log and return the records plus a writer positioned
/// at its end.
pub(crate) fn open(path: &Path) -> Result<(Vec<LogRecord>, LogFile)> {
	let mut records = Vec::new();
	if path.exists() {
		let mut raw = Vec::new();
		File::open(path)?.read_to_end(&mut raw)?;
		let mut input = raw.as_slice();
		loop {
			let Some((len_bytes, rest)) = input.split_first_chunk::<4>() else {
				break;
			};
			let len = u32::from_le_bytes(*len_bytes) as usize;
			if rest.len() < len {
				tracing::warn!(path = %path.display(), "dropping truncated trailing log frame");
				break;
			}
			let (frame, rest) = rest.split_at(len);
			let record: LogRecord = postcard::from_bytes(frame)
				.map_err(|err| Error::backend(format!("corrupt log frame: {err}")))?;
			records.push(record);
			input = rest;
			if input.is_empty() {
				break;
			}
		}
		if !input.is_empty() && input.len() < 4 {
			tracing::warn!(path = %path.display(), "dropping truncated trailing log frame");
		}
	}
	let file = OpenOptions::new().create(true).append(true).open(path)?;
	Ok((records, LogFile { file }))
}
