// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Composition root.
//!
//! Loads configuration, opens the selected KV backend, wires the services
//! together with their collaborators injected, and runs the websocket
//! subsystem plus the session sweeper until ctrl-c. No service holds global
//! state; everything flows from here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quill_auth::{AuthService, SessionStore};
use quill_collab::{CollabConfig, Coordinator};
use quill_core::config::ServerConfig;
use quill_document::DocumentService;
use quill_permission::PermissionService;
use quill_store::KvStore;
use quill_sub_server_ws::{WsConfig, WsServer};
use quill_type::{Error, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the expired-session sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	if let Err(err) = run().await {
		error!(error = %err, "server exited with error");
		std::process::exit(1);
	}
}

async fn run() -> Result<()> {
	let mut config = match std::env::args().nth(1) {
		Some(path) => ServerConfig::load(Path::new(&path))?,
		None => ServerConfig::default(),
	};
	config.apply_env()?;

	let kv = open_store()?;
	let sessions = SessionStore::new(kv.clone(), config.session_timeout());
	let auth = AuthService::new(kv.clone(), sessions.clone());
	let documents = DocumentService::new(kv.clone(), config.documents.clone());
	let permissions =
		PermissionService::new(kv.clone(), config.documents.clone(), config.features.clone());

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let coordinator = Coordinator::new(
		auth,
		permissions,
		documents,
		CollabConfig {
			max_payload: config.documents.max_document_size,
			..Default::default()
		},
		shutdown_rx.clone(),
	);

	let sweeper = {
		let sessions = sessions.clone();
		let mut shutdown = shutdown_rx.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = ticker.tick() => {
						// Best-effort background work: failures log, never
						// propagate.
						if let Err(err) = sessions.sweep().await {
							warn!(error = %err, "session sweep failed");
						}
					}
					_ = shutdown.changed() => break,
				}
			}
		})
	};

	let ws = WsServer::bind(
		coordinator.clone(),
		WsConfig {
			host: config.server.host.clone(),
			port: config.server.port,
			..Default::default()
		},
	)
	.await?;
	let server = tokio::spawn(ws.serve(shutdown_rx));

	tokio::signal::ctrl_c().await?;
	info!("shutdown requested");
	shutdown_tx.send(true).ok();
	server.await.ok();
	sweeper.await.ok();
	// Rooms with unsaved edits get a final flush before exit.
	coordinator.flush_all().await;
	info!("shutdown complete");
	Ok(())
}

/// Backend selection: `QUILL_BACKEND` is `sqlite` (default), `embedded`, or
/// `memory`; `QUILL_DATA` points at the database or log file.
fn open_store() -> Result<KvStore> {
	let backend = std::env::var("QUILL_BACKEND").unwrap_or_else(|_| "sqlite".to_string());
	let data = std::env::var("QUILL_DATA").map(PathBuf::from);
	match backend.as_str() {
		"memory" => {
			warn!("using the non-durable in-memory backend");
			Ok(KvStore::in_memory())
		}
		"embedded" => {
			let path = data.unwrap_or_else(|_| PathBuf::from("quill.kv"));
			info!(path = %path.display(), "opening embedded backend");
			KvStore::open_embedded(&path)
		}
		"sqlite" => {
			let path = data.unwrap_or_else(|_| PathBuf::from("quill.db"));
			info!(path = %path.display(), "opening sqlite backend");
			KvStore::open_sqlite(&path)
		}
		other => Err(Error::InvalidInput(format!("unknown backend {other:?}"))),
	}
}
