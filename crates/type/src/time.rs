// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch. All persisted timestamps use this.
pub type UnixMillis = u64;

pub fn now_millis() -> UnixMillis {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
