// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Opaque list cursors: the keycode bytes of the last yielded key, base64
//! encoded. Resuming skips keys at or before the cursor (at or after it when
//! iterating in reverse).

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64};
use quill_core::{Key, keycode};
use quill_type::{Error, Result};

pub fn encode(key: &Key) -> String {
	BASE64.encode(keycode::encode(key))
}

/// Decode back to the keycode bytes; the structural key itself is recovered
/// with [`decode_key`] where a backend needs it.
pub fn decode(cursor: &str) -> Result<Vec<u8>> {
	let bytes = BASE64
		.decode(cursor)
		.map_err(|_| Error::InvalidInput(format!("malformed cursor {cursor:?}")))?;
	// Validate eagerly so a corrupt token fails the call, not the batch.
	keycode::decode(&bytes).map_err(|_| Error::InvalidInput(format!("malformed cursor {cursor:?}")))?;
	Ok(bytes)
}

pub fn decode_key(cursor: &str) -> Result<Key> {
	let bytes = decode(cursor)?;
	keycode::decode(&bytes)
}
