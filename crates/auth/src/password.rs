// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Password derivation and verification.
//!
//! Stored form is the triple `iterations$salt_b64$hash_b64` with
//! PBKDF2-HMAC-SHA256 over the UTF-8 password bytes, a 16-byte random salt
//! and a 32-byte output. Verification re-derives with the stored parameters
//! and compares in constant time; malformed stored strings verify as
//! `false` and never error.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac;
use quill_type::{Error, Result};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

pub const MIN_LENGTH: usize = 8;
pub const MAX_LENGTH: usize = 128;

pub fn hash_password(password: &str) -> String {
	let mut salt = [0u8; SALT_LEN];
	rand::rng().fill_bytes(&mut salt);
	let hash = derive(password, &salt, ITERATIONS);
	format!("{ITERATIONS}${}${}", BASE64.encode(salt), BASE64.encode(hash))
}

pub fn verify_password(stored: &str, password: &str) -> bool {
	let Some((iterations, salt, hash)) = parse(stored) else {
		return false;
	};
	let derived = derive(password, &salt, iterations);
	// Accumulator comparison; no early return on the first mismatching byte.
	derived.ct_eq(&hash).into()
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
	let mut out = [0u8; HASH_LEN];
	pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
	out
}

fn parse(stored: &str) -> Option<(u32, Vec<u8>, [u8; HASH_LEN])> {
	let mut parts = stored.split('$');
	let iterations: u32 = parts.next()?.parse().ok()?;
	if iterations == 0 {
		return None;
	}
	let salt = BASE64.decode(parts.next()?).ok()?;
	let hash: [u8; HASH_LEN] = BASE64.decode(parts.next()?).ok()?.try_into().ok()?;
	if parts.next().is_some() {
		return None;
	}
	Some((iterations, salt, hash))
}

/// Minimum 8 and maximum 128 characters, at least one letter and one digit.
pub fn validate_strength(password: &str) -> Result<()> {
	let length = password.chars().count();
	if length < MIN_LENGTH {
		return Err(Error::InvalidInput(format!(
			"password must be at least {MIN_LENGTH} characters"
		)));
	}
	if length > MAX_LENGTH {
		return Err(Error::InvalidInput(format!(
			"password must be at most {MAX_LENGTH} characters"
		)));
	}
	if !password.chars().any(char::is_alphabetic) {
		return Err(Error::InvalidInput("password must contain a letter".into()));
	}
	if !password.chars().any(|c| c.is_ascii_digit()) {
		return Err(Error::InvalidInput("password must contain a digit".into()));
	}
	Ok(())
}

/// A fresh 256-bit session token, hex encoded.
pub fn generate_token() -> String {
	let mut bytes = [0u8; 32];
	rand::rng().fill_bytes(&mut bytes);
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hash_and_verify() {
		let stored = hash_password("alice123abc");
		assert!(stored.starts_with("100000$"));
		assert!(verify_password(&stored, "alice123abc"));
		assert!(!verify_password(&stored, "alice123abd"));
		assert!(!verify_password(&stored, ""));
	}

	#[test]
	fn test_salts_differ_between_hashes() {
		let a = hash_password("alice123abc");
		let b = hash_password("alice123abc");
		assert_ne!(a, b);
		assert!(verify_password(&a, "alice123abc") && verify_password(&b, "alice123abc"));
	}

	#[test]
	fn test_malformed_stored_strings_verify_false() {
		for stored in [
			"",
			"plainhash",
			"abc$notb64$notb64",
			"100000$c2FsdA",
			"100000$c2FsdA$short",
			"0$c2FsdA$c2FsdA",
			"100000$c2FsdA$c2FsdA$extra",
		] {
			assert!(!verify_password(stored, "alice123abc"), "accepted {stored:?}");
		}
	}

	#[test]
	fn test_verify_honors_stored_iteration_count() {
		// A triple derived with a different count still verifies, because
		// the stored parameters win.
		let salt = [7u8; SALT_LEN];
		let mut out = [0u8; HASH_LEN];
		pbkdf2_hmac::<Sha256>(b"alice123abc", &salt, 1_000, &mut out);
		let stored = format!("1000${}${}", BASE64.encode(salt), BASE64.encode(out));
		assert!(verify_password(&stored, "alice123abc"));
	}

	#[test]
	fn test_strength_rules() {
		assert!(validate_strength("alice123abc").is_ok());
		assert!(validate_strength("a1234567").is_ok());
		assert!(validate_strength("short1a").is_err());
		assert!(validate_strength("allletters").is_err());
		assert!(validate_strength("12345678").is_err());
		assert!(validate_strength(&"a1".repeat(65)).is_err());
	}

	#[test]
	fn test_token_entropy_shape() {
		let token = generate_token();
		assert_eq!(token.len(), 64);
		assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(token, generate_token());
	}
}
