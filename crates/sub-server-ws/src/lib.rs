// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Websocket subsystem.
//!
//! Each connection names its room in the request path (`/doc:<path>`),
//! authenticates with its first frame, and then exchanges collaboration
//! frames. The socket task owns both directions: inbound frames go to the
//! coordinator, outbound frames drain the connection's bounded queue. A
//! connection that misbehaves is closed with a policy code; everything it
//! owned is released through its `leave`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quill_collab::{Coordinator, Message as CollabMessage};
use quill_core::DocPath;
use quill_type::{Error, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WsConfig {
	pub host: String,
	pub port: u16,
	/// A connection must authenticate and start syncing within this window.
	pub sync_timeout: Duration,
}

impl Default for WsConfig {
	fn default() -> Self {
		WsConfig {
			host: "127.0.0.1".to_string(),
			port: 8727,
			sync_timeout: Duration::from_secs(15),
		}
	}
}

pub struct WsServer {
	listener: TcpListener,
	coordinator: Coordinator,
	config: WsConfig,
}

impl WsServer {
	pub async fn bind(coordinator: Coordinator, config: WsConfig) -> Result<WsServer> {
		let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
		Ok(WsServer { listener, coordinator, config })
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	/// Accept loop; returns once `shutdown` fires. Connection tasks watch
	/// the same signal and drain on their own.
	pub async fn serve(self, shutdown: watch::Receiver<bool>) {
		match self.local_addr() {
			Ok(addr) => info!(%addr, "websocket server listening"),
			Err(_) => info!("websocket server listening"),
		}
		let mut accept_shutdown = shutdown.clone();
		loop {
			tokio::select! {
				_ = accept_shutdown.changed() => break,
				accepted = self.listener.accept() => {
					match accepted {
						Ok((stream, peer)) => {
							let coordinator = self.coordinator.clone();
							let config = self.config.clone();
							let shutdown = shutdown.clone();
							tokio::spawn(async move {
								if let Err(err) =
									handle_connection(coordinator, config, stream, peer, shutdown).await
								{
									debug!(%peer, error = %err, "connection ended with error");
								}
							});
						}
						Err(err) => {
							warn!(error = %err, "accept failed");
						}
					}
				}
			}
		}
		info!("websocket server stopped");
	}
}

/// `/doc:<path>` is the canonical room naming.
fn room_from_request_path(raw: &str) -> Result<DocPath> {
	let trimmed = raw.strip_prefix('/').unwrap_or(raw);
	let path = trimmed
		.strip_prefix("doc:")
		.ok_or_else(|| Error::InvalidInput(format!("unknown room {raw:?}")))?;
	DocPath::parse(path)
}

async fn handle_connection(
	coordinator: Coordinator,
	config: WsConfig,
	stream: TcpStream,
	peer: SocketAddr,
	mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
	let mut request_path = None;
	let mut ws = tokio_tungstenite::accept_hdr_async(stream, |request: &tokio_tungstenite::tungstenite::handshake::server::Request, response| {
		request_path = Some(request.uri().path().to_string());
		Ok(response)
	})
	.await
	.map_err(|err| Error::InvalidInput(format!("websocket handshake failed: {err}")))?;

	let path = match request_path.as_deref().map(room_from_request_path) {
		Some(Ok(path)) => path,
		_ => {
			close(&mut ws, CloseCode::Policy, "unknown room").await;
			return Ok(());
		}
	};

	// Authentication must arrive before anything else, within the sync
	// window.
	let first = tokio::time::timeout(config.sync_timeout, ws.next()).await;
	let token = match first {
		Ok(Some(Ok(WsMessage::Binary(raw)))) => match CollabMessage::decode(&raw) {
			Ok(CollabMessage::Auth(token)) => token,
			_ => {
				close(&mut ws, CloseCode::Policy, "authentication required").await;
				return Ok(());
			}
		},
		Err(_) => {
			close(&mut ws, CloseCode::Policy, "authentication timeout").await;
			return Ok(());
		}
		_ => return Ok(()),
	};

	let (tx, mut rx) = mpsc::channel(coordinator.config().queue_capacity);
	let handle = match coordinator.join(&token, &path, tx).await {
		Ok(handle) => handle,
		Err(err) => {
			let code = match err {
				Error::AuthenticationRequired | Error::InvalidCredentials => CloseCode::Policy,
				Error::PermissionDenied(_) => CloseCode::Policy,
				Error::NotFound(_) => CloseCode::Policy,
				_ => CloseCode::Error,
			};
			close(&mut ws, code, err.code()).await;
			return Ok(());
		}
	};
	debug!(%peer, room = %path, "collaboration session open");

	let mut close_reason: Option<(CloseCode, String)> = None;
	loop {
		tokio::select! {
			outbound = rx.recv() => match outbound {
				Some(frame) => {
					if ws.send(WsMessage::Binary(frame)).await.is_err() {
						break;
					}
				}
				// The room dropped our sender: queue overflow or eviction.
				None => {
					close_reason = Some((CloseCode::Policy, "outbound queue overflow".into()));
					break;
				}
			},
			inbound = ws.next() => match inbound {
				Some(Ok(WsMessage::Binary(raw))) => {
					if let Err(err) = handle.handle_frame(&raw) {
						let code = match err {
							Error::PermissionDenied(_) => CloseCode::Policy,
							Error::InvalidInput(_) => CloseCode::Policy,
							_ => CloseCode::Error,
						};
						close_reason = Some((code, err.code().to_string()));
						break;
					}
				}
				Some(Ok(WsMessage::Close(_))) | None => break,
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					debug!(%peer, error = %err, "websocket read failed");
					break;
				}
			},
			_ = shutdown.changed() => {
				close_reason = Some((CloseCode::Restart, "server shutting down".into()));
				break;
			}
		}
	}

	if let Some((code, reason)) = close_reason {
		close(&mut ws, code, &reason).await;
	}
	handle.leave().await;
	debug!(%peer, room = %path, "collaboration session closed");
	Ok(())
}

async fn close(ws: &mut WebSocketStream<TcpStream>, code: CloseCode, reason: &str) {
	let frame = CloseFrame { code, reason: reason.to_string().into() };
	ws.send(WsMessage::Close(Some(frame))).await.ok();
}
