// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! The collaboration coordinator.
//!
//! Every open document has one in-memory room holding the authoritative
//! CRDT replica and the set of connections viewing it. Updates apply to the
//! replica, fan out to the other connections, and mark the room dirty;
//! a debounced background task persists dirty replicas to the KV store and
//! the last connection leaving forces a final flush before the room is
//! evicted.
//!
//! The CRDT itself is external (yrs); this crate moves its update bytes
//! around without interpreting them.

pub mod coordinator;
pub mod protocol;
pub mod room;

pub use coordinator::{CollabConfig, ConnectionHandle, Coordinator};
pub use protocol::{Message, SyncMessage};
