// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Order-preserving byte encoding for composite keys.
//!
//! Each part is a type tag followed by a value encoding whose byte order
//! matches the part's value order:
//!
//! - `Bytes`/`Text`: raw bytes with 0x00 escaped as 0x00 0xff, terminated by
//!   0x00 0x00. The terminator sorts below any continuation, so prefixes
//!   order before their extensions.
//! - `Int`: big-endian two's complement with the sign bit flipped, ordering
//!   negative values before positive ones.
//! - `BigInt`: same scheme over 16 bytes.
//! - `Bool`: one byte, 0 or 1.
//!
//! Tags are ordered the same way [`KeyPart`]'s cross-type order is declared,
//! so encoded keys compare byte-wise exactly like keys compare structurally.
//! Because every part encoding is self-delimiting, the encoding of a key is
//! a byte prefix of another's iff the key is a structural prefix.

use quill_type::{Error, Result};

use crate::key::{Key, KeyPart};

const TAG_BYTES: u8 = 0x01;
const TAG_TEXT: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_BIGINT: u8 = 0x04;
const TAG_BOOL: u8 = 0x05;

pub fn encode(key: &Key) -> Vec<u8> {
	let mut out = Vec::with_capacity(16 * key.len());
	for part in key.parts() {
		encode_part(part, &mut out);
	}
	out
}

fn encode_part(part: &KeyPart, out: &mut Vec<u8>) {
	match part {
		KeyPart::Bytes(v) => {
			out.push(TAG_BYTES);
			encode_escaped(v, out);
		}
		KeyPart::Text(v) => {
			out.push(TAG_TEXT);
			encode_escaped(v.as_bytes(), out);
		}
		KeyPart::Int(v) => {
			out.push(TAG_INT);
			let mut bytes = v.to_be_bytes();
			bytes[0] ^= 1 << 7;
			out.extend_from_slice(&bytes);
		}
		KeyPart::BigInt(v) => {
			out.push(TAG_BIGINT);
			let mut bytes = v.to_be_bytes();
			bytes[0] ^= 1 << 7;
			out.extend_from_slice(&bytes);
		}
		KeyPart::Bool(v) => {
			out.push(TAG_BOOL);
			out.push(u8::from(*v));
		}
	}
}

fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
	for &b in bytes {
		if b == 0x00 {
			out.extend_from_slice(&[0x00, 0xff]);
		} else {
			out.push(b);
		}
	}
	out.extend_from_slice(&[0x00, 0x00]);
}

pub fn decode(mut input: &[u8]) -> Result<Key> {
	let mut parts = Vec::new();
	while !input.is_empty() {
		let (part, rest) = decode_part(input)?;
		parts.push(part);
		input = rest;
	}
	if parts.is_empty() {
		return Err(Error::backend("empty key encoding"));
	}
	Ok(Key::new(parts))
}

fn decode_part(input: &[u8]) -> Result<(KeyPart, &[u8])> {
	let (&tag, rest) = input
		.split_first()
		.ok_or_else(|| Error::backend("truncated key encoding"))?;
	match tag {
		TAG_BYTES => {
			let (bytes, rest) = decode_escaped(rest)?;
			Ok((KeyPart::Bytes(bytes), rest))
		}
		TAG_TEXT => {
			let (bytes, rest) = decode_escaped(rest)?;
			let text = String::from_utf8(bytes)
				.map_err(|_| Error::backend("invalid utf-8 in text key part"))?;
			Ok((KeyPart::Text(text), rest))
		}
		TAG_INT => {
			let (chunk, rest) = take(rest, 8)?;
			let mut bytes: [u8; 8] = chunk.try_into().expect("take returned 8 bytes");
			bytes[0] ^= 1 << 7;
			Ok((KeyPart::Int(i64::from_be_bytes(bytes)), rest))
		}
		TAG_BIGINT => {
			let (chunk, rest) = take(rest, 16)?;
			let mut bytes: [u8; 16] = chunk.try_into().expect("take returned 16 bytes");
			bytes[0] ^= 1 << 7;
			Ok((KeyPart::BigInt(i128::from_be_bytes(bytes)), rest))
		}
		TAG_BOOL => {
			let (chunk, rest) = take(rest, 1)?;
			match chunk[0] {
				0x00 => Ok((KeyPart::Bool(false), rest)),
				0x01 => Ok((KeyPart::Bool(true), rest)),
				b => Err(Error::backend(format!("invalid boolean key byte {b:#04x}"))),
			}
		}
		tag => Err(Error::backend(format!("unknown key part tag {tag:#04x}"))),
	}
}

fn take(input: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
	if input.len() < len {
		return Err(Error::backend("truncated key encoding"));
	}
	Ok(input.split_at(len))
}

fn decode_escaped(input: &[u8]) -> Result<(Vec<u8>, &[u8])> {
	let mut decoded = Vec::new();
	let mut i = 0;
	loop {
		match input.get(i) {
			Some(0x00) => match input.get(i + 1) {
				Some(0x00) => return Ok((decoded, &input[i + 2..])),
				Some(0xff) => {
					decoded.push(0x00);
					i += 2;
				}
				_ => return Err(Error::backend("invalid escape sequence in key")),
			},
			Some(&b) => {
				decoded.push(b);
				i += 1;
			}
			None => return Err(Error::backend("unterminated key part")),
		}
	}
}

/// Half-open byte range covering exactly the encodings that start with
/// `prefix`. `None` as the upper bound means unbounded (all-0xff prefix).
pub fn prefix_range(prefix: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
	(prefix.to_vec(), successor(prefix))
}

/// The smallest byte string greater than every string starting with `bytes`:
/// increment the rightmost byte below 0xff and truncate after it.
pub fn successor(bytes: &[u8]) -> Option<Vec<u8>> {
	let mut end = bytes.to_vec();
	while let Some(&last) = end.last() {
		if last < 0xff {
			*end.last_mut().expect("non-empty") = last + 1;
			return Some(end);
		}
		end.pop();
	}
	None
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;
	use crate::key;

	fn round_trip(key: &Key) {
		assert_eq!(&decode(&encode(key)).unwrap(), key);
	}

	#[test]
	fn test_round_trip_edge_values() {
		round_trip(&key![""]);
		round_trip(&key!["a\x00b"]);
		round_trip(&key![vec![0x00u8, 0xff, 0x00]]);
		round_trip(&key![i64::MIN, i64::MAX, 0i64, -1i64]);
		round_trip(&key![i128::MIN, i128::MAX]);
		round_trip(&key![false, true]);
		round_trip(&key!["sessions", "3f2a", 7i64]);
	}

	#[test]
	fn test_negative_ints_order_before_positive() {
		let neg = encode(&key![-1i64]);
		let zero = encode(&key![0i64]);
		let pos = encode(&key![1i64]);
		assert!(neg < zero && zero < pos);
	}

	#[test]
	fn test_prefix_encoding_is_byte_prefix() {
		let full = encode(&key!["documents", "metadata", "/a/b"]);
		let prefix = encode(&key!["documents", "metadata"]);
		assert!(full.starts_with(&prefix));
		let other = encode(&key!["documents", "permissions"]);
		assert!(!full.starts_with(&other));
	}

	#[test]
	fn test_successor_handles_trailing_ff() {
		assert_eq!(successor(&[0x61, 0x62]), Some(vec![0x61, 0x63]));
		assert_eq!(successor(&[0x61, 0xff]), Some(vec![0x62]));
		assert_eq!(successor(&[0xff, 0xff]), None);
	}

	#[test]
	fn test_escaped_zero_orders_with_extensions() {
		// "b\xff" < "b\xff\x00" < "b\xffb" in both domains.
		let a = key![vec![0x62u8, 0xff]];
		let b = key![vec![0x62u8, 0xff, 0x00]];
		let c = key![vec![0x62u8, 0xff, 0x62]];
		assert!(a < b && b < c);
		assert!(encode(&a) < encode(&b) && encode(&b) < encode(&c));
	}

	fn part_strategy() -> impl Strategy<Value = KeyPart> {
		prop_oneof![
			proptest::collection::vec(any::<u8>(), 0..12).prop_map(KeyPart::Bytes),
			"[a-z\\x00/]{0,12}".prop_map(KeyPart::Text),
			any::<i64>().prop_map(KeyPart::Int),
			any::<i128>().prop_map(KeyPart::BigInt),
			any::<bool>().prop_map(KeyPart::Bool),
		]
	}

	fn key_strategy() -> impl Strategy<Value = Key> {
		proptest::collection::vec(part_strategy(), 1..5).prop_map(Key::new)
	}

	proptest! {
		/// The byte encoding orders exactly like the structural order.
		#[test]
		fn prop_encoded_order_matches_structural(a in key_strategy(), b in key_strategy()) {
			prop_assert_eq!(encode(&a).cmp(&encode(&b)), a.cmp(&b));
		}

		/// Decoding inverts encoding for arbitrary keys.
		#[test]
		fn prop_decode_inverts_encode(key in key_strategy()) {
			prop_assert_eq!(decode(&encode(&key)).unwrap(), key);
		}
	}
}
