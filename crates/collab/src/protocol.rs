// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Wire framing for the collaboration channel: one tagged binary message
//! per transport frame. Sync payloads carry the CRDT library's own sync
//! protocol bytes and are forwarded to it verbatim.

use quill_type::{Error, Result};

const TAG_AUTH: u8 = 0x00;
const TAG_SYNC: u8 = 0x01;
const TAG_UPDATE: u8 = 0x02;
const TAG_AWARENESS: u8 = 0x03;
const TAG_STATELESS: u8 = 0x04;

const SYNC_STEP1: u8 = 0x00;
const SYNC_STEP2: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
	/// A state vector; the receiver answers with the missing diff.
	Step1(Vec<u8>),
	/// An update covering the sender's knowledge of what is missing.
	Step2(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// Session token; must precede everything else on a connection.
	Auth(String),
	Sync(SyncMessage),
	/// CRDT update bytes to apply and broadcast.
	Update(Vec<u8>),
	/// Transient presence payload; broadcast without applying.
	Awareness(Vec<u8>),
	/// Out-of-band JSON for registered handlers.
	Stateless(String),
}

impl Message {
	pub fn encode(&self) -> Vec<u8> {
		match self {
			Message::Auth(token) => frame(TAG_AUTH, token.as_bytes()),
			Message::Sync(SyncMessage::Step1(sv)) => sync_frame(SYNC_STEP1, sv),
			Message::Sync(SyncMessage::Step2(update)) => sync_frame(SYNC_STEP2, update),
			Message::Update(update) => frame(TAG_UPDATE, update),
			Message::Awareness(state) => frame(TAG_AWARENESS, state),
			Message::Stateless(json) => frame(TAG_STATELESS, json.as_bytes()),
		}
	}

	pub fn decode(raw: &[u8]) -> Result<Message> {
		let (&tag, payload) = raw
			.split_first()
			.ok_or_else(|| Error::InvalidInput("empty collaboration frame".into()))?;
		match tag {
			TAG_AUTH => Ok(Message::Auth(utf8(payload)?)),
			TAG_SYNC => {
				let (&step, body) = payload
					.split_first()
					.ok_or_else(|| Error::InvalidInput("truncated sync frame".into()))?;
				match step {
					SYNC_STEP1 => Ok(Message::Sync(SyncMessage::Step1(body.to_vec()))),
					SYNC_STEP2 => Ok(Message::Sync(SyncMessage::Step2(body.to_vec()))),
					other => {
						Err(Error::InvalidInput(format!("unknown sync step {other:#04x}")))
					}
				}
			}
			TAG_UPDATE => Ok(Message::Update(payload.to_vec())),
			TAG_AWARENESS => Ok(Message::Awareness(payload.to_vec())),
			TAG_STATELESS => {
				let json = utf8(payload)?;
				serde_json::from_str::<serde_json::Value>(&json).map_err(|_| {
					Error::InvalidInput("stateless payload is not valid json".into())
				})?;
				Ok(Message::Stateless(json))
			}
			other => Err(Error::InvalidInput(format!("unknown message tag {other:#04x}"))),
		}
	}
}

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(1 + payload.len());
	out.push(tag);
	out.extend_from_slice(payload);
	out
}

fn sync_frame(step: u8, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(2 + payload.len());
	out.push(TAG_SYNC);
	out.push(step);
	out.extend_from_slice(payload);
	out
}

fn utf8(payload: &[u8]) -> Result<String> {
	String::from_utf8(payload.to_vec())
		.map_err(|_| Error::InvalidInput("frame payload is not utf-8".into()))
}
