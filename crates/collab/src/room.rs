// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Per-document rooms.
//!
//! A room owns the shared replica and its connection set behind one mutex;
//! the lock is never held across a suspension point. Long work (state
//! encoding for a save) produces a private snapshot under the lock and the
//! KV write happens outside it.
//!
//! Lifecycle: created empty, initialized once from the persisted state
//! (single winner, losers wait), then Ready. Updates move it to Dirty and
//! schedule a flush; a successful flush of the observed epoch moves it back
//! to Ready. The last connection leaving forces a final flush and the
//! coordinator evicts it.

use std::collections::HashMap;

use parking_lot::Mutex;
use quill_core::DocPath;
use quill_core::model::PermissionLevel;
use quill_type::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// One subscriber of a room. The outbound queue is bounded: a connection
/// that cannot keep up is dropped rather than blocking the room.
pub(crate) struct Connection {
	pub user_id: Uuid,
	pub level: PermissionLevel,
	outbound: mpsc::Sender<Vec<u8>>,
}

pub(crate) struct RoomState {
	doc: Doc,
	connections: HashMap<u64, Connection>,
	refcount: usize,
	/// Bumped on every applied update.
	dirty_epoch: u64,
	/// Epoch of the last successfully persisted snapshot.
	saved_epoch: u64,
	/// A debounced save task is already pending.
	save_scheduled: bool,
}

pub struct Room {
	path: DocPath,
	state: Mutex<RoomState>,
	/// Replica initialization from the persisted payload; single winner.
	pub(crate) init: tokio::sync::OnceCell<()>,
}

impl Room {
	pub(crate) fn new(path: DocPath) -> Room {
		Room {
			path,
			state: Mutex::new(RoomState {
				doc: Doc::new(),
				connections: HashMap::new(),
				refcount: 0,
				dirty_epoch: 0,
				saved_epoch: 0,
				save_scheduled: false,
			}),
			init: tokio::sync::OnceCell::new(),
		}
	}

	pub fn path(&self) -> &DocPath {
		&self.path
	}

	/// Apply a persisted payload as the replica's initial state.
	pub(crate) fn load_initial(&self, payload: &[u8]) -> Result<()> {
		let state = self.state.lock();
		let update = Update::decode_v1(payload)
			.map_err(|err| Error::backend(format!("persisted state at {}: {err}", self.path)))?;
		state
			.doc
			.transact_mut()
			.apply_update(update)
			.map_err(|err| Error::backend(format!("persisted state at {}: {err}", self.path)))?;
		Ok(())
	}

	pub(crate) fn attach(
		&self,
		id: u64,
		user_id: Uuid,
		level: PermissionLevel,
		outbound: mpsc::Sender<Vec<u8>>,
	) {
		let mut state = self.state.lock();
		state.connections.insert(id, Connection { user_id, level, outbound });
		state.refcount += 1;
	}

	/// Remove a connection; `true` when the room became empty.
	pub(crate) fn detach(&self, id: u64) -> bool {
		let mut state = self.state.lock();
		if state.connections.remove(&id).is_some() {
			state.refcount -= 1;
		}
		state.refcount == 0
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.state.lock().refcount == 0
	}

	pub(crate) fn connection_level(&self, id: u64) -> Option<PermissionLevel> {
		self.state.lock().connections.get(&id).map(|c| c.level)
	}

	pub fn connection_count(&self) -> usize {
		self.state.lock().connections.len()
	}

	/// Distinct users currently connected; the same user may hold several
	/// connections.
	pub fn connected_users(&self) -> Vec<Uuid> {
		let state = self.state.lock();
		let mut users: Vec<Uuid> = state.connections.values().map(|c| c.user_id).collect();
		users.sort_unstable();
		users.dedup();
		users
	}

	/// Apply update bytes to the replica and bump the dirty epoch. Returns
	/// whether a save task should be scheduled (first dirtying since the
	/// last schedule).
	pub(crate) fn apply_update(&self, payload: &[u8]) -> Result<bool> {
		let update = Update::decode_v1(payload)
			.map_err(|err| Error::InvalidInput(format!("malformed update: {err}")))?;
		let mut state = self.state.lock();
		state
			.doc
			.transact_mut()
			.apply_update(update)
			.map_err(|err| Error::InvalidInput(format!("unappliable update: {err}")))?;
		state.dirty_epoch += 1;
		let schedule = !state.save_scheduled;
		state.save_scheduled = true;
		Ok(schedule)
	}

	/// The server's state vector, sent as sync step 1 on join.
	pub(crate) fn state_vector(&self) -> Vec<u8> {
		self.state.lock().doc.transact().state_vector().encode_v1()
	}

	/// The diff a peer with `remote` state vector is missing (sync step 2).
	pub(crate) fn diff(&self, remote: &[u8]) -> Result<Vec<u8>> {
		let remote = StateVector::decode_v1(remote)
			.map_err(|err| Error::InvalidInput(format!("malformed state vector: {err}")))?;
		Ok(self.state.lock().doc.transact().encode_state_as_update_v1(&remote))
	}

	/// Snapshot for persistence: the full state plus the epoch it covers.
	pub(crate) fn snapshot(&self) -> (Vec<u8>, u64) {
		let state = self.state.lock();
		let payload = state.doc.transact().encode_state_as_update_v1(&StateVector::default());
		(payload, state.dirty_epoch)
	}

	pub(crate) fn is_dirty(&self) -> bool {
		let state = self.state.lock();
		state.dirty_epoch > state.saved_epoch
	}

	/// Record a successful save of `epoch`. Returns `true` when newer
	/// updates arrived during the save and another pass is needed.
	pub(crate) fn mark_saved(&self, epoch: u64) -> bool {
		let mut state = self.state.lock();
		state.saved_epoch = state.saved_epoch.max(epoch);
		let still_dirty = state.dirty_epoch > state.saved_epoch;
		if !still_dirty {
			state.save_scheduled = false;
		}
		still_dirty
	}

	/// Give up the scheduled-save claim (room evicted with a clean replica).
	pub(crate) fn clear_schedule(&self) {
		self.state.lock().save_scheduled = false;
	}

	/// Send a frame to every connection except `from`. A connection whose
	/// queue is full or closed is removed; the send pump observes the
	/// dropped sender and closes the socket.
	pub(crate) fn broadcast(&self, from: u64, frame: &[u8]) {
		let mut state = self.state.lock();
		let mut dropped = Vec::new();
		for (&id, connection) in &state.connections {
			if id == from {
				continue;
			}
			if let Err(err) = connection.outbound.try_send(frame.to_vec()) {
				match err {
					mpsc::error::TrySendError::Full(_) => {
						warn!(room = %self.path, connection = id, "outbound queue overflow, dropping connection");
					}
					mpsc::error::TrySendError::Closed(_) => {}
				}
				dropped.push(id);
			}
		}
		for id in dropped {
			if state.connections.remove(&id).is_some() {
				state.refcount -= 1;
				debug!(room = %self.path, connection = id, "connection dropped during broadcast");
			}
		}
	}

	/// Send a frame to a single connection; `false` when it is gone.
	pub(crate) fn send_to(&self, id: u64, frame: &[u8]) -> bool {
		let state = self.state.lock();
		match state.connections.get(&id) {
			Some(connection) => connection.outbound.try_send(frame.to_vec()).is_ok(),
			None => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn update_inserting(text: &str) -> Vec<u8> {
		let doc = Doc::new();
		let field = doc.get_or_insert_text("content");
		let mut txn = doc.transact_mut();
		yrs::Text::insert(&field, &mut txn, 0, text);
		txn.encode_update_v1()
	}

	#[test]
	fn test_apply_update_marks_dirty_once_per_schedule() {
		let room = Room::new(DocPath::parse("/doc").unwrap());
		assert!(!room.is_dirty());
		assert!(room.apply_update(&update_inserting("a")).unwrap());
		// Already scheduled; further updates keep the claim.
		assert!(!room.apply_update(&update_inserting("b")).unwrap());
		assert!(room.is_dirty());

		let (_, epoch) = room.snapshot();
		assert!(!room.mark_saved(epoch));
		assert!(!room.is_dirty());
		// The next update schedules again.
		assert!(room.apply_update(&update_inserting("c")).unwrap());
	}

	#[test]
	fn test_mark_saved_detects_concurrent_dirtying() {
		let room = Room::new(DocPath::parse("/doc").unwrap());
		room.apply_update(&update_inserting("a")).unwrap();
		let (_, epoch) = room.snapshot();
		room.apply_update(&update_inserting("b")).unwrap();
		// The save covered only the first epoch; another pass is needed.
		assert!(room.mark_saved(epoch));
		assert!(room.is_dirty());
	}

	#[test]
	fn test_connected_users_dedups_multi_connection_users() {
		let room = Room::new(DocPath::parse("/doc").unwrap());
		let user = uuid::Uuid::new_v4();
		let other = uuid::Uuid::new_v4();
		let (tx, _rx) = tokio::sync::mpsc::channel(4);
		room.attach(1, user, PermissionLevel::Editor, tx.clone());
		room.attach(2, user, PermissionLevel::Editor, tx.clone());
		room.attach(3, other, PermissionLevel::Viewer, tx);
		assert_eq!(room.connection_count(), 3);
		assert_eq!(room.connected_users().len(), 2);
		assert!(room.detach(1) == false && room.detach(2) == false && room.detach(3));
	}

	#[test]
	fn test_malformed_update_is_rejected() {
		let room = Room::new(DocPath::parse("/doc").unwrap());
		assert!(room.apply_update(&[0xde, 0xad, 0xbe, 0xef]).is_err());
		assert!(!room.is_dirty());
	}

	#[test]
	fn test_diff_converges_with_remote_vector() {
		let room = Room::new(DocPath::parse("/doc").unwrap());
		room.apply_update(&update_inserting("hello")).unwrap();

		let remote = Doc::new();
		remote.get_or_insert_text("content");
		let sv = remote.transact().state_vector().encode_v1();
		let diff = room.diff(&sv).unwrap();
		remote
			.transact_mut()
			.apply_update(Update::decode_v1(&diff).unwrap())
			.unwrap();

		let (full, _) = room.snapshot();
		let remote_full =
			remote.transact().encode_state_as_update_v1(&StateVector::default());
		assert_eq!(full, remote_full);
	}
}
