// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! End-to-end websocket tests: real sockets, real handshake, real frames.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quill_collab::{CollabConfig, Coordinator, Message, SyncMessage};
use quill_core::DocPath;
use quill_permission::{Actor, PermissionsPatch};
use quill_sub_server_ws::{WsConfig, WsServer};
use quill_testing::TestStack;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use yrs::updates::encoder::Encode;
use yrs::{Doc, Text, Transact};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
	addr: SocketAddr,
	stack: TestStack,
	shutdown: watch::Sender<bool>,
}

async fn start_server() -> Server {
	let stack = TestStack::new();
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let coordinator = Coordinator::new(
		stack.auth.clone(),
		stack.perms.clone(),
		stack.docs.clone(),
		CollabConfig { save_debounce: Duration::from_millis(50), ..Default::default() },
		shutdown_rx.clone(),
	);
	let server = WsServer::bind(
		coordinator,
		WsConfig { port: 0, sync_timeout: Duration::from_millis(500), ..Default::default() },
	)
	.await
	.unwrap();
	let addr = server.local_addr().unwrap();
	tokio::spawn(server.serve(shutdown_rx));
	Server { addr, stack, shutdown: shutdown_tx }
}

async fn register(server: &Server, username: &str) -> (uuid::Uuid, String) {
	server.stack.register(username).await
}

async fn connect(server: &Server, room: &str) -> Client {
	let (client, _) = connect_async(format!("ws://{}/doc:{}", server.addr, room)).await.unwrap();
	client
}

async fn authed_client(server: &Server, room: &str, token: &str) -> Client {
	let mut client = connect(server, room).await;
	client.send(WsMessage::Binary(Message::Auth(token.to_string()).encode())).await.unwrap();
	// The server answers with its state vector.
	match next_message(&mut client).await {
		Message::Sync(SyncMessage::Step1(_)) => client,
		other => panic!("expected initial sync, got {other:?}"),
	}
}

async fn next_message(client: &mut Client) -> Message {
	loop {
		let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
			.await
			.expect("frame before timeout")
			.expect("stream open")
			.expect("clean frame");
		match frame {
			WsMessage::Binary(raw) => return Message::decode(&raw).unwrap(),
			WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
			other => panic!("unexpected frame {other:?}"),
		}
	}
}

async fn expect_close(client: &mut Client) {
	loop {
		match tokio::time::timeout(Duration::from_secs(2), client.next())
			.await
			.expect("frame before timeout")
		{
			None | Some(Err(_)) => return,
			Some(Ok(WsMessage::Close(_))) => return,
			Some(Ok(_)) => continue,
		}
	}
}

fn client_update(text: &str) -> Vec<u8> {
	let doc = Doc::new();
	let field = doc.get_or_insert_text("content");
	let mut txn = doc.transact_mut();
	field.insert(&mut txn, 0, text);
	txn.encode_update_v1()
}

#[tokio::test]
async fn test_two_clients_collaborate_over_sockets() {
	let server = start_server().await;
	let (alice, alice_token) = register(&server, "alice").await;
	let (bob, bob_token) = register(&server, "bob").await;
	server.stack.seed_document("/pad", alice).await;
	server.stack.perms
		.set_permissions(
			&DocPath::parse("/pad").unwrap(),
			PermissionsPatch { editors: Some(vec![bob]), ..Default::default() },
			Actor::user(alice),
		)
		.await
		.unwrap();

	let mut alice_client = authed_client(&server, "/pad", &alice_token).await;
	let mut bob_client = authed_client(&server, "/pad", &bob_token).await;

	let update = client_update("over the wire");
	alice_client
		.send(WsMessage::Binary(Message::Update(update.clone()).encode()))
		.await
		.unwrap();

	match next_message(&mut bob_client).await {
		Message::Update(received) => assert_eq!(received, update),
		other => panic!("expected update, got {other:?}"),
	}

	// The edit reaches disk through the debounced save.
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert!(
		server.stack.docs
			.load_state(&DocPath::parse("/pad").unwrap())
			.await
			.unwrap()
			.is_some()
	);

	alice_client.close(None).await.ok();
	bob_client.close(None).await.ok();
}

#[tokio::test]
async fn test_awareness_relays_between_clients() {
	let server = start_server().await;
	let (alice, alice_token) = register(&server, "alice").await;
	let (_, bob_token) = register(&server, "bob").await;
	let pad = DocPath::parse("/pad").unwrap();
	server.stack.docs.create(&pad, alice, Default::default()).await.unwrap();
	server.stack.perms
		.set_permissions(
			&pad,
			PermissionsPatch {
				public_access: Some(quill_core::PermissionLevel::Viewer),
				..Default::default()
			},
			Actor::user(alice),
		)
		.await
		.unwrap();

	let mut alice_client = authed_client(&server, "/pad", &alice_token).await;
	let mut bob_client = authed_client(&server, "/pad", &bob_token).await;

	bob_client
		.send(WsMessage::Binary(Message::Awareness(vec![4, 5, 6]).encode()))
		.await
		.unwrap();
	match next_message(&mut alice_client).await {
		Message::Awareness(state) => assert_eq!(state, vec![4, 5, 6]),
		other => panic!("expected awareness, got {other:?}"),
	}
}

#[tokio::test]
async fn test_unauthenticated_and_unknown_rooms_are_closed() {
	let server = start_server().await;
	let (alice, token) = register(&server, "alice").await;
	server.stack.seed_document("/pad", alice).await;

	// First frame is not authentication.
	let mut client = connect(&server, "/pad").await;
	client
		.send(WsMessage::Binary(Message::Awareness(vec![1]).encode()))
		.await
		.unwrap();
	expect_close(&mut client).await;

	// Authentication with a bogus token.
	let mut client = connect(&server, "/pad").await;
	client.send(WsMessage::Binary(Message::Auth("bogus".into()).encode())).await.unwrap();
	expect_close(&mut client).await;

	// Unknown room naming scheme.
	let (mut client, _) =
		connect_async(format!("ws://{}/not-a-room", server.addr)).await.unwrap();
	client.send(WsMessage::Binary(Message::Auth(token.clone()).encode())).await.unwrap();
	expect_close(&mut client).await;

	// Room for a document that does not exist.
	let mut client = connect(&server, "/missing").await;
	client.send(WsMessage::Binary(Message::Auth(token).encode())).await.unwrap();
	expect_close(&mut client).await;
}

#[tokio::test]
async fn test_write_below_editor_closes_the_connection() {
	let server = start_server().await;
	let (alice, _) = register(&server, "alice").await;
	let (bob, bob_token) = register(&server, "bob").await;
	let pad = DocPath::parse("/pad").unwrap();
	server.stack.docs.create(&pad, alice, Default::default()).await.unwrap();
	server.stack.perms
		.set_permissions(
			&pad,
			PermissionsPatch { viewers: Some(vec![bob]), ..Default::default() },
			Actor::user(alice),
		)
		.await
		.unwrap();

	let mut client = authed_client(&server, "/pad", &bob_token).await;
	client
		.send(WsMessage::Binary(Message::Update(client_update("nope")).encode()))
		.await
		.unwrap();
	expect_close(&mut client).await;
}

#[tokio::test]
async fn test_shutdown_stops_the_accept_loop() {
	let server = start_server().await;
	server.shutdown.send(true).unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(TcpStream::connect(server.addr).await.is_err() || {
		// The listener task may still be winding down; a second attempt
		// after the loop exits must fail.
		tokio::time::sleep(Duration::from_millis(200)).await;
		TcpStream::connect(server.addr).await.is_err()
	});
}
