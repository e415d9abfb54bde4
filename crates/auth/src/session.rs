// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::time::Duration;

use quill_core::model::Session;
use quill_core::record::{decode_record, encode_record};
use quill_core::{KeySelector, ListOptions, schema};
use quill_store::KvStore;
use quill_type::time::now_millis;
use quill_type::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::password::generate_token;

/// Request metadata recorded on the session at issuance.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
	pub user_agent: Option<String>,
	pub ip: Option<String>,
}

/// Sessions are fixed-lifetime tokens under `["sessions", token]`. Activity
/// touches `updatedAt` only; `expiresAt` is set once at issuance.
#[derive(Clone)]
pub struct SessionStore {
	kv: KvStore,
	timeout: Duration,
}

impl SessionStore {
	/// Expired entries swept per atomic batch.
	const SWEEP_BATCH: usize = 100;

	pub fn new(kv: KvStore, timeout: Duration) -> SessionStore {
		SessionStore { kv, timeout }
	}

	pub async fn issue(&self, user_id: Uuid, client: ClientInfo) -> Result<Session> {
		let now = now_millis();
		let session = Session {
			id: generate_token(),
			user_id,
			expires_at: now + self.timeout.as_millis() as u64,
			created_at: now,
			updated_at: now,
			user_agent: client.user_agent,
			ip: client.ip,
		};
		self.kv
			.set(&schema::session(&session.id), encode_record(&session)?, Default::default())
			.await?;
		debug!(user = %user_id, "session issued");
		Ok(session)
	}

	/// The stored session iff present and unexpired. An expired session is
	/// deleted on observation, best effort.
	pub async fn resolve(&self, token: &str) -> Result<Option<Session>> {
		let Some(entry) = self.kv.get(&schema::session(token)).await? else {
			return Ok(None);
		};
		let session: Session = decode_record(&entry.value)?;
		if session.is_expired(now_millis()) {
			if let Err(err) = self.kv.delete(&schema::session(token)).await {
				warn!(error = %err, "failed to delete expired session");
			}
			return Ok(None);
		}
		Ok(Some(session))
	}

	/// Record activity. Last-writer-wins: the timestamp is advisory, so no
	/// check-and-set is needed, and the lifetime never moves.
	pub async fn touch(&self, token: &str) -> Result<()> {
		let Some(mut session) = self.resolve(token).await? else {
			return Ok(());
		};
		session.updated_at = now_millis();
		self.kv
			.set(&schema::session(token), encode_record(&session)?, Default::default())
			.await?;
		Ok(())
	}

	pub async fn revoke(&self, token: &str) -> Result<()> {
		self.kv.delete(&schema::session(token)).await
	}

	/// Delete every session belonging to `user_id`; used when an account is
	/// deactivated or removed.
	pub async fn revoke_all_for(&self, user_id: Uuid) -> Result<u64> {
		let mut revoked = 0;
		let mut opts = ListOptions::default().limit(Self::SWEEP_BATCH);
		loop {
			let page = self.kv.list(&KeySelector::Prefix(schema::sessions_prefix()), opts).await?;
			let mut batch = self.kv.atomic();
			for entry in &page.entries {
				let session: Session = decode_record(&entry.value)?;
				if session.user_id == user_id {
					batch = batch.delete(entry.key.clone());
					revoked += 1;
				}
			}
			if !batch.is_empty() {
				batch.commit().await?;
			}
			match page.cursor {
				Some(cursor) => opts = ListOptions::default().limit(Self::SWEEP_BATCH).cursor(cursor),
				None => break,
			}
		}
		Ok(revoked)
	}

	/// Scan the session prefix and delete entries past expiry, at most
	/// [`Self::SWEEP_BATCH`] per atomic transaction. Returns the count
	/// removed. Races with issuance are benign: the scan observes a
	/// snapshot batch at a time and only deletes keys it saw expired.
	pub async fn sweep(&self) -> Result<u64> {
		let now = now_millis();
		let mut swept = 0;
		let mut opts = ListOptions::default().limit(Self::SWEEP_BATCH);
		loop {
			let page = self.kv.list(&KeySelector::Prefix(schema::sessions_prefix()), opts).await?;
			let mut batch = self.kv.atomic();
			for entry in &page.entries {
				let session: Session = decode_record(&entry.value)?;
				if session.is_expired(now) {
					batch = batch.delete(entry.key.clone());
					swept += 1;
				}
			}
			if !batch.is_empty() {
				batch.commit().await?;
			}
			match page.cursor {
				Some(cursor) => opts = ListOptions::default().limit(Self::SWEEP_BATCH).cursor(cursor),
				None => break,
			}
		}
		if swept > 0 {
			debug!(swept, "expired sessions removed");
		}
		Ok(swept)
	}
}
