// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use quill_auth::AuthService;
use quill_core::DocPath;
use quill_core::model::PermissionLevel;
use quill_document::DocumentService;
use quill_permission::PermissionService;
use quill_type::{Error, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::protocol::{Message, SyncMessage};
use crate::room::Room;

/// Handler for out-of-band stateless messages.
pub type StatelessHandler = Arc<dyn Fn(Uuid, &DocPath, &str) + Send + Sync>;

#[derive(Clone)]
pub struct CollabConfig {
	/// Coalescing window between a room turning dirty and its save.
	pub save_debounce: Duration,
	/// Backoff ceiling for failing saves.
	pub save_backoff_cap: Duration,
	/// Bound on each connection's outbound queue.
	pub queue_capacity: usize,
	/// Bound on incoming update/awareness frames and persisted snapshots.
	pub max_payload: usize,
}

impl Default for CollabConfig {
	fn default() -> Self {
		CollabConfig {
			save_debounce: Duration::from_secs(2),
			save_backoff_cap: Duration::from_secs(60),
			queue_capacity: 64,
			max_payload: 10 * 1024 * 1024,
		}
	}
}

struct CoordinatorInner {
	auth: AuthService,
	permissions: PermissionService,
	documents: DocumentService,
	rooms: Mutex<HashMap<DocPath, Arc<Room>>>,
	config: CollabConfig,
	shutdown: watch::Receiver<bool>,
	next_connection_id: AtomicU64,
	stateless: Mutex<Option<StatelessHandler>>,
}

/// Wires sessions, permissions and documents to the per-document rooms.
/// Cheap to clone; all clones share the room registry.
#[derive(Clone)]
pub struct Coordinator {
	inner: Arc<CoordinatorInner>,
}

impl Coordinator {
	pub fn new(
		auth: AuthService,
		permissions: PermissionService,
		documents: DocumentService,
		config: CollabConfig,
		shutdown: watch::Receiver<bool>,
	) -> Coordinator {
		Coordinator {
			inner: Arc::new(CoordinatorInner {
				auth,
				permissions,
				documents,
				rooms: Mutex::new(HashMap::new()),
				config,
				shutdown,
				next_connection_id: AtomicU64::new(1),
				stateless: Mutex::new(None),
			}),
		}
	}

	/// Register the handler stateless messages are forwarded to.
	pub fn on_stateless(&self, handler: StatelessHandler) {
		*self.inner.stateless.lock() = Some(handler);
	}

	pub fn config(&self) -> &CollabConfig {
		&self.inner.config
	}

	/// Authenticate, authorize and attach a connection to the document's
	/// room, creating and loading the room if this is the first connection.
	/// The initial sync (the server's state vector) is queued on `outbound`
	/// before this returns.
	#[instrument(name = "collab::join", level = "debug", skip(self, token, outbound))]
	pub async fn join(
		&self,
		token: &str,
		path: &DocPath,
		outbound: mpsc::Sender<Vec<u8>>,
	) -> Result<ConnectionHandle> {
		let user = self.inner.auth.identify(token).await?;
		let resolved = self.inner.permissions.resolve(Some(user.id), path).await?;
		if !resolved.has_level(PermissionLevel::Viewer) {
			return Err(Error::PermissionDenied(format!("collaboration on {path}")));
		}
		// The document must exist before it can host a room.
		self.inner.documents.get(path).await?;

		let room = self.room_for(path);
		let loaded = room
			.init
			.get_or_try_init(|| async {
				match self.inner.documents.load_state(path).await? {
					Some(payload) => room.load_initial(&payload)?,
					None => debug!(room = %path, "room started from an empty replica"),
				}
				Ok::<(), Error>(())
			})
			.await;
		if let Err(err) = loaded {
			// A failed load must not poison the registry slot forever; the
			// next join retries from a fresh room.
			self.inner.rooms.lock().remove(path);
			return Err(err);
		}

		let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
		room.attach(id, user.id, resolved.level, outbound);
		room.send_to(id, &Message::Sync(SyncMessage::Step1(room.state_vector())).encode());
		self.inner.documents.mark_accessed(path).await.ok();
		debug!(room = %path, connection = id, user = %user.id, "connection joined");

		Ok(ConnectionHandle {
			coordinator: self.clone(),
			room,
			path: path.clone(),
			id,
			user_id: user.id,
			left: false,
		})
	}

	fn room_for(&self, path: &DocPath) -> Arc<Room> {
		let mut rooms = self.inner.rooms.lock();
		rooms.entry(path.clone()).or_insert_with(|| Arc::new(Room::new(path.clone()))).clone()
	}

	pub fn open_rooms(&self) -> usize {
		self.inner.rooms.lock().len()
	}

	/// Persist every dirty room; called on server shutdown.
	pub async fn flush_all(&self) {
		let rooms: Vec<Arc<Room>> = self.inner.rooms.lock().values().cloned().collect();
		for room in rooms {
			if room.is_dirty() {
				self.flush(&room).await;
			}
		}
	}

	/// One save pass: snapshot under the lock, write outside it.
	async fn flush(&self, room: &Room) -> bool {
		let (payload, epoch) = room.snapshot();
		match self.inner.documents.persist_state(room.path(), payload).await {
			Ok(metadata) => {
				debug!(room = %room.path(), version = metadata.version, "replica persisted");
				room.mark_saved(epoch);
				true
			}
			Err(err) => {
				warn!(room = %room.path(), error = %err, "replica save failed; room stays dirty");
				false
			}
		}
	}

	/// Debounced save loop for one dirty room. Retries transient failures
	/// with doubling backoff up to the ceiling; exits once the room is
	/// clean, evicted, or the server shuts down (after a last attempt).
	async fn save_task(self, room: Arc<Room>) {
		let mut shutdown = self.inner.shutdown.clone();
		let mut delay = self.inner.config.save_debounce;
		loop {
			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = shutdown.changed() => {
					if room.is_dirty() {
						self.flush(&room).await;
					}
					room.clear_schedule();
					return;
				}
			}
			if !room.is_dirty() {
				room.clear_schedule();
				return;
			}
			if self.flush(&room).await {
				if !room.is_dirty() {
					return;
				}
				// Updates landed during the save; coalesce again.
				delay = self.inner.config.save_debounce;
			} else {
				delay = (delay * 2).min(self.inner.config.save_backoff_cap);
			}
		}
	}

	fn schedule_save(&self, room: &Arc<Room>) {
		let coordinator = self.clone();
		let room = room.clone();
		tokio::spawn(coordinator.save_task(room));
	}

	/// Final flush and eviction after the last connection left. The room
	/// stays in the registry while flushing so a concurrent join attaches
	/// to it instead of loading a stale snapshot.
	async fn evict_if_empty(&self, room: &Arc<Room>, path: &DocPath) {
		if !room.is_empty() {
			return;
		}
		if room.is_dirty() {
			let mut attempts = 0;
			while !self.flush(room).await {
				attempts += 1;
				if attempts >= 3 {
					warn!(room = %path, "eviction flush gave up; state loss possible");
					break;
				}
				tokio::time::sleep(Duration::from_millis(100 * attempts)).await;
			}
		}
		let mut rooms = self.inner.rooms.lock();
		if let Some(current) = rooms.get(path) {
			if Arc::ptr_eq(current, room) && room.is_empty() {
				rooms.remove(path);
				info!(room = %path, "room evicted");
			}
		}
	}
}

/// One attached connection. Feed inbound frames through
/// [`ConnectionHandle::handle_frame`]; call [`ConnectionHandle::leave`] when
/// the transport closes. Dropping without leaving detaches synchronously
/// and schedules the final flush in the background.
pub struct ConnectionHandle {
	coordinator: Coordinator,
	room: Arc<Room>,
	path: DocPath,
	id: u64,
	user_id: Uuid,
	left: bool,
}

impl ConnectionHandle {
	pub fn path(&self) -> &DocPath {
		&self.path
	}

	pub fn user_id(&self) -> Uuid {
		self.user_id
	}

	/// Process one inbound frame. An error means the connection must be
	/// failed by the transport: policy violations (writes below EDITOR,
	/// oversized or malformed payloads) are not survivable on a stream
	/// whose replica may now diverge.
	pub fn handle_frame(&self, raw: &[u8]) -> Result<()> {
		if raw.len() > self.coordinator.inner.config.max_payload {
			return Err(Error::InvalidInput(format!(
				"frame of {} bytes exceeds the {} byte limit",
				raw.len(),
				self.coordinator.inner.config.max_payload
			)));
		}
		match Message::decode(raw)? {
			Message::Auth(_) => {
				Err(Error::InvalidInput("authentication is only valid before joining".into()))
			}
			Message::Sync(SyncMessage::Step1(remote)) => {
				let diff = self.room.diff(&remote)?;
				self.room.send_to(self.id, &Message::Sync(SyncMessage::Step2(diff)).encode());
				Ok(())
			}
			Message::Sync(SyncMessage::Step2(update)) | Message::Update(update) => {
				self.apply_write(&update)
			}
			Message::Awareness(state) => {
				self.room.broadcast(self.id, &Message::Awareness(state).encode());
				Ok(())
			}
			Message::Stateless(json) => {
				if let Some(handler) = self.coordinator.inner.stateless.lock().clone() {
					handler(self.user_id, &self.path, &json);
				}
				Ok(())
			}
		}
	}

	fn apply_write(&self, update: &[u8]) -> Result<()> {
		let level = self
			.room
			.connection_level(self.id)
			.ok_or_else(|| Error::backend("connection no longer attached"))?;
		if level < PermissionLevel::Editor {
			return Err(Error::PermissionDenied(format!("writing to {}", self.path)));
		}
		let schedule = self.room.apply_update(update)?;
		self.room.broadcast(self.id, &Message::Update(update.to_vec()).encode());
		if schedule {
			self.coordinator.schedule_save(&self.room);
		}
		Ok(())
	}

	/// Detach from the room; the last connection out flushes and evicts.
	pub async fn leave(mut self) {
		self.left = true;
		let emptied = self.room.detach(self.id);
		debug!(room = %self.path, connection = self.id, "connection left");
		if emptied {
			self.coordinator.evict_if_empty(&self.room.clone(), &self.path.clone()).await;
		}
	}
}

impl Drop for ConnectionHandle {
	fn drop(&mut self) {
		if self.left {
			return;
		}
		let emptied = self.room.detach(self.id);
		if emptied {
			let coordinator = self.coordinator.clone();
			let room = self.room.clone();
			let path = self.path.clone();
			if let Ok(handle) = tokio::runtime::Handle::try_current() {
				handle.spawn(async move {
					coordinator.evict_if_empty(&room, &path).await;
				});
			}
		}
	}
}
